//! Write planning: placeholder-vs-expression emission and refresh plans.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use strata::generation::{GenerationTiming, SequenceGenerator, ValueGenerationPolicy};
use strata::model::{AttributeDescriptor, ColumnDescriptor, EntityDescriptor, Value};
use strata::sql::dialect::Dialect;
use strata::sql::test_utils::validate_sql;
use strata::translate::{plan_delete, plan_insert, plan_update, RefreshPlan};

fn plain_user() -> EntityDescriptor {
    EntityDescriptor::new("User")
        .with_id(AttributeDescriptor::basic("id", ColumnDescriptor::new("id")))
        .with_attribute(AttributeDescriptor::basic(
            "name",
            ColumnDescriptor::new("name"),
        ))
        .with_attribute(AttributeDescriptor::basic(
            "email",
            ColumnDescriptor::new("email"),
        ))
}

/// created_at is computed by the database via an expression in the insert;
/// updated_at on every write; audit_ref is filled by a trigger.
fn stamped() -> EntityDescriptor {
    EntityDescriptor::new("Document")
        .with_id(AttributeDescriptor::basic("id", ColumnDescriptor::new("id")))
        .with_attribute(AttributeDescriptor::basic(
            "title",
            ColumnDescriptor::new("title"),
        ))
        .with_attribute(AttributeDescriptor::basic(
            "created_at",
            ColumnDescriptor::new("created_at").generated(
                ValueGenerationPolicy::database_expression(
                    GenerationTiming::Insert,
                    "current_timestamp",
                ),
            ),
        ))
        .with_attribute(AttributeDescriptor::basic(
            "updated_at",
            ColumnDescriptor::new("updated_at").generated(
                ValueGenerationPolicy::database_expression(
                    GenerationTiming::Always,
                    "current_timestamp",
                ),
            ),
        ))
        .with_attribute(AttributeDescriptor::basic(
            "audit_ref",
            ColumnDescriptor::new("audit_ref")
                .generated(ValueGenerationPolicy::database(GenerationTiming::Insert)),
        ))
}

fn values(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[test]
fn insert_binds_plain_columns_in_declaration_order() {
    let entity = plain_user();
    let vals = values(&[
        ("id", Value::Int(1)),
        ("name", Value::Text("ada".into())),
        ("email", Value::Text("ada@example.com".into())),
    ]);

    let plan = plan_insert(&entity, &vals, Dialect::Postgres).unwrap();
    assert_eq!(
        plan.statement.sql,
        "INSERT INTO \"users\" (\"id\", \"name\", \"email\") VALUES ($1, $2, $3)"
    );
    assert_eq!(
        plan.statement.params,
        vec![
            Value::Int(1),
            Value::Text("ada".into()),
            Value::Text("ada@example.com".into())
        ]
    );
    assert_eq!(plan.refresh, RefreshPlan::None);
    validate_sql(&plan.statement.sql, Dialect::Postgres).unwrap();
}

#[test]
fn insert_emits_generation_expression_not_a_parameter() {
    let entity = stamped();
    let vals = values(&[("id", Value::Int(7)), ("title", Value::Text("t".into()))]);

    let plan = plan_insert(&entity, &vals, Dialect::Postgres).unwrap();
    // the expression is literal SQL text, the trigger column is absent from
    // the column list entirely
    assert!(plan.statement.sql.contains("current_timestamp"));
    let column_list = &plan.statement.sql[..plan.statement.sql.find("VALUES").unwrap()];
    assert!(!column_list.contains("audit_ref"));
    // only id and title bind parameters
    assert_eq!(
        plan.statement.params,
        vec![Value::Int(7), Value::Text("t".into())]
    );
    // all three generated columns come back from RETURNING
    match &plan.refresh {
        RefreshPlan::FromExecution { columns } => {
            assert_eq!(columns, &["created_at", "updated_at", "audit_ref"]);
        }
        other => panic!("expected FromExecution, got {:?}", other),
    }
    assert!(plan
        .statement
        .sql
        .contains("RETURNING \"created_at\", \"updated_at\", \"audit_ref\""));
    validate_sql(&plan.statement.sql, Dialect::Postgres).unwrap();
}

#[test]
fn insert_refresh_falls_back_to_follow_up_select() {
    let entity = stamped();
    let vals = values(&[("id", Value::Int(7)), ("title", Value::Text("t".into()))]);

    let plan = plan_insert(&entity, &vals, Dialect::MySql).unwrap();
    assert!(!plan.statement.sql.contains("RETURNING"));
    match &plan.refresh {
        RefreshPlan::Select { statement, columns } => {
            assert!(statement.sql.contains("`created_at`"));
            assert!(statement.sql.contains("WHERE `id` = ?"));
            assert_eq!(statement.params, vec![Value::Int(7)]);
            assert_eq!(columns.len(), 3);
            validate_sql(&statement.sql, Dialect::MySql).unwrap();
        }
        other => panic!("expected Select refresh, got {:?}", other),
    }
    validate_sql(&plan.statement.sql, Dialect::MySql).unwrap();
}

#[test]
fn database_parameter_policy_binds_the_property_value() {
    // referenced in SQL with no expression text: placeholder mode
    let entity = EntityDescriptor::new("Event")
        .with_id(AttributeDescriptor::basic("id", ColumnDescriptor::new("id")))
        .with_attribute(AttributeDescriptor::basic(
            "recorded_at",
            ColumnDescriptor::new("recorded_at")
                .generated(ValueGenerationPolicy::database_parameter(
                    GenerationTiming::Insert,
                )),
        ));
    let vals = values(&[
        ("id", Value::Int(1)),
        ("recorded_at", Value::Text("2024-05-01".into())),
    ]);

    let plan = plan_insert(&entity, &vals, Dialect::Postgres).unwrap();
    assert!(plan.statement.sql.contains("\"recorded_at\""));
    assert_eq!(
        plan.statement.params,
        vec![Value::Int(1), Value::Text("2024-05-01".into())]
    );
    validate_sql(&plan.statement.sql, Dialect::Postgres).unwrap();
}

#[test]
fn in_memory_generator_runs_and_reports_its_value() {
    let entity = EntityDescriptor::new("Ticket")
        .with_id(AttributeDescriptor::basic(
            "id",
            ColumnDescriptor::new("id").generated(ValueGenerationPolicy::in_memory(
                GenerationTiming::Insert,
                Arc::new(SequenceGenerator::starting_at(100)),
            )),
        ))
        .with_attribute(AttributeDescriptor::basic(
            "subject",
            ColumnDescriptor::new("subject"),
        ));
    let vals = values(&[("subject", Value::Text("hello".into()))]);

    let plan = plan_insert(&entity, &vals, Dialect::Postgres).unwrap();
    assert_eq!(
        plan.generated_in_memory,
        vec![("id".to_string(), Value::Int(100))]
    );
    assert_eq!(
        plan.statement.params,
        vec![Value::Int(100), Value::Text("hello".into())]
    );
    // in-memory generation never needs a read-back
    assert_eq!(plan.refresh, RefreshPlan::None);
}

#[test]
fn assigned_identifier_is_not_regenerated() {
    let entity = EntityDescriptor::new("Ticket")
        .with_id(AttributeDescriptor::basic(
            "id",
            ColumnDescriptor::new("id").generated(ValueGenerationPolicy::in_memory(
                GenerationTiming::Insert,
                Arc::new(SequenceGenerator::starting_at(100)),
            )),
        ))
        .with_attribute(AttributeDescriptor::basic(
            "subject",
            ColumnDescriptor::new("subject"),
        ));
    let vals = values(&[
        ("id", Value::Int(42)),
        ("subject", Value::Text("hello".into())),
    ]);

    let plan = plan_insert(&entity, &vals, Dialect::Postgres).unwrap();
    assert_eq!(
        plan.generated_in_memory,
        vec![("id".to_string(), Value::Int(42))]
    );
}

#[test]
fn update_writes_dirty_columns_and_generation_mandated_ones() {
    let entity = stamped();
    let vals = values(&[
        ("id", Value::Int(7)),
        ("title", Value::Text("new title".into())),
    ]);
    let dirty: HashSet<String> = ["title".to_string()].into();

    let plan = plan_update(&entity, &vals, &dirty, &Value::Int(7), Dialect::Postgres)
        .unwrap()
        .expect("dirty entity plans an update");
    assert_eq!(
        plan.statement.sql,
        "UPDATE \"documents\" SET \"title\" = $1, \"updated_at\" = current_timestamp \
         WHERE \"id\" = $2 RETURNING \"updated_at\""
    );
    assert_eq!(
        plan.statement.params,
        vec![Value::Text("new title".into()), Value::Int(7)]
    );
    validate_sql(&plan.statement.sql, Dialect::Postgres).unwrap();
}

#[test]
fn clean_entity_with_always_expression_still_touches() {
    let entity = stamped();
    let vals = values(&[("id", Value::Int(7)), ("title", Value::Text("t".into()))]);

    let plan = plan_update(&entity, &vals, &HashSet::new(), &Value::Int(7), Dialect::Postgres)
        .unwrap()
        .expect("ALWAYS expression yields a SET slot");
    assert!(plan.statement.sql.contains("\"updated_at\" = current_timestamp"));
    assert!(!plan.statement.sql.contains("\"title\""));
}

#[test]
fn unreferenced_always_column_plans_no_statement() {
    // timing ALWAYS but the database fills the column on its own: nothing to
    // emit, so a clean entity produces no update at all
    let entity = EntityDescriptor::new("Document")
        .with_id(AttributeDescriptor::basic("id", ColumnDescriptor::new("id")))
        .with_attribute(AttributeDescriptor::basic(
            "revision",
            ColumnDescriptor::new("revision")
                .generated(ValueGenerationPolicy::database(GenerationTiming::Always)),
        ));
    let vals = values(&[("id", Value::Int(1))]);

    let plan = plan_update(&entity, &vals, &HashSet::new(), &Value::Int(1), Dialect::Postgres)
        .unwrap();
    assert!(plan.is_none());
}

#[test]
fn dialect_aware_expression_spelling() {
    let entity = EntityDescriptor::new("Document")
        .with_id(AttributeDescriptor::basic("id", ColumnDescriptor::new("id")))
        .with_attribute(AttributeDescriptor::basic(
            "updated_at",
            ColumnDescriptor::new("updated_at").generated(
                ValueGenerationPolicy::database_expression_for(GenerationTiming::Always, |d| {
                    match d {
                        Dialect::TSql => "GETDATE()".into(),
                        _ => "current_timestamp".into(),
                    }
                }),
            ),
        ));
    let vals = values(&[("id", Value::Int(1))]);
    let dirty = HashSet::new();

    let pg = plan_update(&entity, &vals, &dirty, &Value::Int(1), Dialect::Postgres)
        .unwrap()
        .unwrap();
    assert!(pg.statement.sql.contains("current_timestamp"));

    let tsql = plan_update(&entity, &vals, &dirty, &Value::Int(1), Dialect::TSql)
        .unwrap()
        .unwrap();
    assert!(tsql.statement.sql.contains("GETDATE()"));
    assert!(tsql.statement.sql.contains("OUTPUT INSERTED.[updated_at]"));
}

#[test]
fn statement_snapshots() {
    let entity = stamped();
    let vals = values(&[("id", Value::Int(7)), ("title", Value::Text("t".into()))]);
    let plan = plan_insert(&entity, &vals, Dialect::Postgres).unwrap();
    insta::assert_snapshot!(
        plan.statement.sql,
        @r#"INSERT INTO "documents" ("id", "title", "created_at", "updated_at") VALUES ($1, $2, current_timestamp, current_timestamp) RETURNING "created_at", "updated_at", "audit_ref""#
    );

    let stmt = plan_delete(&plain_user(), &Value::Int(9), Dialect::Postgres).unwrap();
    insta::assert_snapshot!(stmt.sql, @r#"DELETE FROM "users" WHERE "id" = $1"#);
}

#[test]
fn delete_binds_the_identifier() {
    let entity = plain_user();
    let stmt = plan_delete(&entity, &Value::Int(9), Dialect::Postgres).unwrap();
    assert_eq!(stmt.sql, "DELETE FROM \"users\" WHERE \"id\" = $1");
    assert_eq!(stmt.params, vec![Value::Int(9)]);
    validate_sql(&stmt.sql, Dialect::Postgres).unwrap();
}
