//! Derived-table joins, lateral correlation rules, and CTE joins.

use std::sync::Arc;

use strata::criteria::{CriteriaQuery, JoinError, PathSource};
use strata::model::{
    AttributeDescriptor, ColumnDescriptor, EntityDescriptor, MetadataRegistry,
};
use strata::query::JoinType;

fn registry() -> Arc<MetadataRegistry> {
    Arc::new(
        MetadataRegistry::builder()
            .register(
                EntityDescriptor::new("Customer")
                    .with_id(AttributeDescriptor::basic("id", ColumnDescriptor::new("id")))
                    .with_attribute(AttributeDescriptor::basic(
                        "region",
                        ColumnDescriptor::new("region"),
                    )),
            )
            .register(
                EntityDescriptor::new("Order")
                    .with_id(AttributeDescriptor::basic("id", ColumnDescriptor::new("id")))
                    .with_attribute(AttributeDescriptor::many_to_one(
                        "customer",
                        "Customer",
                        ColumnDescriptor::new("customer_id"),
                    ))
                    .with_attribute(AttributeDescriptor::basic(
                        "total",
                        ColumnDescriptor::new("total"),
                    )),
            )
            .build()
            .unwrap(),
    )
}

#[test]
fn uncorrelated_subquery_joins_without_lateral() {
    let reg = registry();
    let mut q = CriteriaQuery::new(Arc::clone(&reg));
    let root = q.from_entity("Customer").unwrap();

    let mut sub = CriteriaQuery::new(reg);
    let orders = sub.from_entity("Order").unwrap();
    sub.select_as(orders.get("customer"), "customer_id");

    let join = q.join_derived(&root, sub, JoinType::Inner).unwrap();
    q.on(&join, join.get("customer_id").eq(root.id_path())).unwrap();
}

#[test]
fn correlated_subquery_requires_lateral() {
    let reg = registry();
    let mut q = CriteriaQuery::new(Arc::clone(&reg));
    let root = q.from_entity("Customer").unwrap();

    // The subquery reaches into the enclosing FROM clause through a path on
    // the outer root.
    let mut sub = CriteriaQuery::new(reg);
    let orders = sub.from_entity("Order").unwrap();
    sub.filter(orders.get("customer").eq(root.id_path()));
    sub.select_as(orders.get("total"), "total");

    // Without lateral capability the correlation would silently vanish, so
    // resolution fails fast instead.
    let err = q.join_derived(&root, sub, JoinType::Inner).unwrap_err();
    assert_eq!(err, JoinError::UncorrelatedDerivedJoin);
}

#[test]
fn lateral_join_accepts_correlated_subquery() {
    let reg = registry();
    let mut q = CriteriaQuery::new(Arc::clone(&reg));
    let root = q.from_entity("Customer").unwrap();

    let mut sub = CriteriaQuery::new(reg);
    let orders = sub.from_entity("Order").unwrap();
    sub.filter(orders.get("customer").eq(root.id_path()));
    sub.select_as(orders.get("total"), "total");
    sub.limit(1);

    let join = q.join_lateral(&root, sub, JoinType::Left).unwrap();
    // the derived node is typed by its select list, not an entity
    assert!(q.node(strata::criteria::FromNode::node_ref(&join).node)
        .entity
        .is_none());
}

#[test]
fn explicitly_correlated_root_requires_lateral_too() {
    let reg = registry();
    let mut q = CriteriaQuery::new(Arc::clone(&reg));
    let root = q.from_entity("Customer").unwrap();

    let mut sub = CriteriaQuery::new(reg);
    let corr = sub.correlate(&q, &root).unwrap();
    assert_eq!(sub.correlation_parent(&corr), Some(strata::criteria::FromNode::node_ref(&root)));
    sub.select_as(corr.get("region"), "region");

    let err = q.join_derived(&root, sub.clone(), JoinType::Inner).unwrap_err();
    assert_eq!(err, JoinError::UncorrelatedDerivedJoin);

    // the same subquery is fine laterally
    q.join_lateral(&root, sub, JoinType::Inner).unwrap();
}

#[test]
fn cte_join_resolves_registered_name() {
    let reg = registry();
    let mut q = CriteriaQuery::new(Arc::clone(&reg));
    let root = q.from_entity("Customer").unwrap();

    let mut totals = CriteriaQuery::new(reg);
    let orders = totals.from_entity("Order").unwrap();
    totals.select_as(orders.get("customer"), "customer_id");
    totals.select_as(orders.get("total"), "total");

    q.with_cte("order_totals", totals).unwrap();
    let join = q.join_cte(&root, "order_totals").unwrap();
    q.on(&join, join.get("customer_id").eq(root.id_path())).unwrap();
}

#[test]
fn unregistered_cte_fails() {
    let mut q = CriteriaQuery::new(registry());
    let root = q.from_entity("Customer").unwrap();
    assert_eq!(
        q.join_cte(&root, "order_totals").unwrap_err(),
        JoinError::UnknownCte("order_totals".into())
    );
}

#[test]
fn lateral_flag_is_invalid_for_cte_targets() {
    let reg = registry();
    let mut q = CriteriaQuery::new(Arc::clone(&reg));
    let root = q.from_entity("Customer").unwrap();

    let mut totals = CriteriaQuery::new(reg);
    totals.from_entity("Order").unwrap();
    q.with_cte("order_totals", totals).unwrap();

    let spec = strata::criteria::JoinSpec::cte("order_totals").lateral();
    assert!(matches!(
        q.resolve_join(&root, spec),
        Err(JoinError::LateralNotDerived)
    ));
}
