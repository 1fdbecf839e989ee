//! Lowering of criteria trees to SELECT statements.
//!
//! Alias assignment, join lowering (mapped attribute joins, entity joins,
//! derived/lateral joins, CTE joins), predicate lowering with parameter
//! binding, and fetch-join select-list expansion.
//!
//! Parameters are collected in textual emission order: CTE bodies first,
//! then join conditions in FROM-clause order, then the WHERE clause. That
//! keeps positional `?` dialects correct without renumbering.

use std::collections::HashMap;

use tracing::debug;

use crate::criteria::{CriteriaExpr, CriteriaQuery, NodeRef, Path, PathSegment};
use crate::criteria::tree::{NodeSource, QueryNode};
use crate::model::{AttributeDescriptor, AttributeKind, EntityDescriptor, Value};
use crate::sql::dialect::{Dialect, SqlDialect};
use crate::sql::expr::{self, Expr};
use crate::sql::query::{
    Cte, Join, JoinSource, OrderByExpr, Query, SelectExpr, SortDir, TableRef,
};

use super::{TranslateError, TranslatedStatement};

/// What a FROM-clause alias stands for, for path resolution.
#[derive(Debug, Clone)]
struct ScopeEntry {
    alias: String,
    /// Entity type of the rows, `None` for derived/CTE nodes.
    entity: Option<String>,
    /// Key column, when the node is a map-attribute join.
    key_column: Option<String>,
}

/// Allocates query-wide unique table aliases (`t0`, `t1`, ...), shared
/// across nested subquery scopes so lateral references never collide.
#[derive(Debug, Default)]
struct AliasAllocator {
    next: usize,
}

impl AliasAllocator {
    fn allocate(&mut self) -> String {
        let alias = format!("t{}", self.next);
        self.next += 1;
        alias
    }
}

/// Lowers criteria queries to parameterized SELECT statements.
#[derive(Debug, Clone, Copy)]
pub struct SelectTranslator {
    dialect: Dialect,
}

impl SelectTranslator {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    /// Translate a resolved criteria query into SQL text plus its ordered
    /// parameter list.
    pub fn translate(
        &self,
        criteria: &CriteriaQuery,
    ) -> Result<TranslatedStatement, TranslateError> {
        let mut aliases = AliasAllocator::default();
        let mut scope: HashMap<NodeRef, ScopeEntry> = HashMap::new();
        let mut params: Vec<Value> = Vec::new();

        let query = self.lower_query(criteria, &mut aliases, &mut scope, &mut params)?;
        let sql = query.to_sql(self.dialect);
        debug!(dialect = self.dialect.name(), %sql, "translated criteria query");
        Ok(TranslatedStatement { sql, params })
    }

    /// Translate to the SELECT AST without rendering. Used by tests and by
    /// callers embedding the query elsewhere.
    pub fn translate_to_query(
        &self,
        criteria: &CriteriaQuery,
    ) -> Result<(Query, Vec<Value>), TranslateError> {
        let mut aliases = AliasAllocator::default();
        let mut scope: HashMap<NodeRef, ScopeEntry> = HashMap::new();
        let mut params: Vec<Value> = Vec::new();
        let query = self.lower_query(criteria, &mut aliases, &mut scope, &mut params)?;
        Ok((query, params))
    }

    fn lower_query(
        &self,
        criteria: &CriteriaQuery,
        aliases: &mut AliasAllocator,
        scope: &mut HashMap<NodeRef, ScopeEntry>,
        params: &mut Vec<Value>,
    ) -> Result<Query, TranslateError> {
        let mut query = Query::new();

        // CTE bodies render first.
        if criteria.ctes().next().is_some() && !self.dialect.supports_cte() {
            return Err(TranslateError::CteNotSupported(self.dialect.name()));
        }
        for (name, cte_criteria) in criteria.ctes() {
            let mut cte_scope = HashMap::new();
            let lowered = self.lower_query(cte_criteria, aliases, &mut cte_scope, params)?;
            query = query.with_cte(Cte::new(name, lowered));
        }

        // Roots: first becomes FROM, the rest cross-join. Correlated roots
        // emit no FROM element; they alias the enclosing node.
        let roots: Vec<&QueryNode> = criteria.roots().collect();
        if roots.is_empty() {
            return Err(TranslateError::EmptyQuery);
        }

        let mut primary_root: Option<&QueryNode> = None;
        for root in &roots {
            if let NodeSource::CorrelatedRoot = root.source {
                let outer = root
                    .correlation_parent
                    .expect("correlated root carries its parent");
                let entry = scope
                    .get(&outer)
                    .cloned()
                    .ok_or(TranslateError::CorrelationOutOfScope)?;
                scope.insert(criteria.make_ref(root.id), entry);
                continue;
            }

            let entity = self.entity_of(criteria, root)?;
            let alias = aliases.allocate();
            scope.insert(
                criteria.make_ref(root.id),
                ScopeEntry {
                    alias: alias.clone(),
                    entity: Some(entity.name.clone()),
                    key_column: None,
                },
            );
            let mut table = TableRef::new(&entity.table).with_alias(&alias);
            if let Some(schema) = &entity.schema {
                table = table.with_schema(schema);
            }
            if primary_root.is_none() {
                primary_root = Some(root);
                query = query.from(table);
            } else {
                query = query.cross_join(table);
            }
        }
        // A query whose only roots are correlated emits no FROM clause at
        // all; it projects straight off the enclosing aliases.

        // Joins in depth-first pre-order so parents are in scope before
        // their children.
        let mut fetched: Vec<NodeRef> = Vec::new();
        let mut stack: Vec<&QueryNode> = roots.iter().rev().map(|r| *r).collect();
        while let Some(node) = stack.pop() {
            for child_id in node.children.iter().rev() {
                stack.push(criteria.node(*child_id));
            }
            if matches!(
                node.source,
                NodeSource::Root | NodeSource::CorrelatedRoot
            ) {
                continue;
            }

            let join = self.lower_join(criteria, node, aliases, scope, params)?;
            query.joins.push(join);

            if node.fetch {
                fetched.push(criteria.make_ref(node.id));
            }
        }

        // Selection: explicit paths, or the primary root's eager columns
        // plus any fetch joins.
        if criteria.selection.is_empty() {
            let root = primary_root.ok_or_else(|| {
                TranslateError::InvalidPath(
                    "correlated subqueries need an explicit selection".into(),
                )
            })?;
            let root_ref = criteria.make_ref(root.id);
            let mut select = self.entity_columns(criteria, &root_ref, scope)?;
            for node_ref in &fetched {
                select.extend(self.entity_columns(criteria, node_ref, scope)?);
            }
            query.select = select;
        } else {
            let mut select = Vec::new();
            for item in &criteria.selection {
                let expr = self.lower_path(criteria, &item.path, scope)?;
                let mut sel = SelectExpr::new(expr);
                if let Some(alias) = &item.alias {
                    sel = sel.with_alias(alias);
                }
                select.push(sel);
            }
            query.select = select;
        }

        // WHERE
        if let Some(filter) = &criteria.filter {
            let lowered = self.lower_expr(criteria, filter, scope, params)?;
            query.where_clause = Some(lowered);
        }

        // ORDER BY
        for ord in &criteria.order {
            let expr = self.lower_path(criteria, &ord.path, scope)?;
            query.order_by.push(match ord.dir {
                SortDir::Asc => OrderByExpr::asc(expr),
                SortDir::Desc => OrderByExpr::desc(expr),
            });
        }

        // LIMIT / OFFSET
        if let Some(limit) = criteria.limit {
            query = query.limit(limit);
        }
        if let Some(offset) = criteria.offset {
            query = query.offset(offset);
        }

        Ok(query)
    }

    fn lower_join(
        &self,
        criteria: &CriteriaQuery,
        node: &QueryNode,
        aliases: &mut AliasAllocator,
        scope: &mut HashMap<NodeRef, ScopeEntry>,
        params: &mut Vec<Value>,
    ) -> Result<Join, TranslateError> {
        let parent_id = node.parent.expect("join node has a parent");
        let parent_ref = criteria.make_ref(parent_id);
        let parent_entry = scope
            .get(&parent_ref)
            .cloned()
            .expect("parent lowered before child");
        let alias = aliases.allocate();

        let (source, mapped_on, entity, key_column) = match &node.source {
            NodeSource::AttributeJoin { attribute } => {
                let parent_entity_name = parent_entry
                    .entity
                    .as_deref()
                    .expect("attribute join parents are entity-typed");
                let parent_entity = self.entity(criteria, parent_entity_name)?;
                let attr = self.attribute(parent_entity, attribute)?;
                let target_name = attr
                    .target_entity
                    .as_deref()
                    .expect("attribute joins resolve associations");
                let target = self.entity(criteria, target_name)?;

                let on = self.mapped_join_condition(
                    parent_entity,
                    attr,
                    target,
                    &parent_entry.alias,
                    &alias,
                )?;
                let mut table = TableRef::new(&target.table).with_alias(&alias);
                if let Some(schema) = &target.schema {
                    table = table.with_schema(schema);
                }
                (
                    JoinSource::Table(table),
                    Some(on),
                    Some(target.name.clone()),
                    attr.key_column.clone(),
                )
            }

            NodeSource::EntityJoin => {
                let entity_name = node.entity.as_deref().expect("entity joins are typed");
                let entity = self.entity(criteria, entity_name)?;
                let mut table = TableRef::new(&entity.table).with_alias(&alias);
                if let Some(schema) = &entity.schema {
                    table = table.with_schema(schema);
                }
                (
                    JoinSource::Table(table),
                    None,
                    Some(entity.name.clone()),
                    None,
                )
            }

            NodeSource::DerivedJoin { subquery, lateral } => {
                if *lateral
                    && !self.dialect.supports_lateral()
                    && !self.dialect.supports_apply()
                {
                    return Err(TranslateError::LateralNotSupported(self.dialect.name()));
                }
                // A lateral subquery sees the enclosing scope; a plain
                // derived table gets a fresh one.
                let lowered = if *lateral {
                    self.lower_query(subquery, aliases, scope, params)?
                } else {
                    let mut inner_scope = HashMap::new();
                    self.lower_query(subquery, aliases, &mut inner_scope, params)?
                };
                (
                    JoinSource::Derived {
                        query: Box::new(lowered),
                        alias: alias.clone(),
                        lateral: *lateral,
                    },
                    None,
                    None,
                    None,
                )
            }

            NodeSource::CteJoin { cte } => (
                JoinSource::Cte {
                    name: cte.clone(),
                    alias: alias.clone(),
                },
                None,
                None,
                None,
            ),

            NodeSource::Root | NodeSource::CorrelatedRoot => {
                unreachable!("roots are not lowered as joins")
            }
        };

        scope.insert(
            criteria.make_ref(node.id),
            ScopeEntry {
                alias,
                entity,
                key_column,
            },
        );

        // Extra ON restriction, ANDed with the mapped condition. Lowered
        // after the node enters scope so it can reference the join itself.
        let on = match (&node.on, mapped_on) {
            (Some(extra), Some(mapped)) => {
                let lowered = self.lower_expr(criteria, extra, scope, params)?;
                Some(crate::sql::expr::ExprExt::and(mapped, lowered))
            }
            (Some(extra), None) => Some(self.lower_expr(criteria, extra, scope, params)?),
            (None, mapped) => mapped,
        };

        Ok(Join {
            join_type: node.join_type,
            source,
            on,
        })
    }

    /// The mapped ON condition of an attribute join.
    ///
    /// To-one: `parent.fk = child.id`. To-many: `child.mapped_by = parent.id`.
    fn mapped_join_condition(
        &self,
        parent: &EntityDescriptor,
        attr: &AttributeDescriptor,
        target: &EntityDescriptor,
        parent_alias: &str,
        child_alias: &str,
    ) -> Result<Expr, TranslateError> {
        use crate::sql::expr::ExprExt;

        if attr.kind == AttributeKind::Singular {
            let fk = attr
                .column
                .as_ref()
                .map(|c| c.name.as_str())
                .ok_or_else(|| TranslateError::InvalidPath(format!(
                    "association '{}.{}' has no foreign key column",
                    parent.name, attr.name
                )))?;
            let target_id = target.id_column().ok_or_else(|| {
                TranslateError::UnknownEntity(target.name.clone())
            })?;
            Ok(expr::table_col(parent_alias, fk).eq(expr::table_col(child_alias, target_id)))
        } else {
            let mapped_by = attr.mapped_by_column.as_deref().ok_or_else(|| {
                TranslateError::InvalidPath(format!(
                    "plural association '{}.{}' has no mapped-by column",
                    parent.name, attr.name
                ))
            })?;
            let parent_id = parent.id_column().ok_or_else(|| {
                TranslateError::UnknownEntity(parent.name.clone())
            })?;
            Ok(expr::table_col(child_alias, mapped_by)
                .eq(expr::table_col(parent_alias, parent_id)))
        }
    }

    /// Qualified select columns for a node's entity: eager column attributes
    /// in declaration order. Lazy attributes stay out of the default
    /// selection; they load on demand.
    fn entity_columns(
        &self,
        criteria: &CriteriaQuery,
        node_ref: &NodeRef,
        scope: &HashMap<NodeRef, ScopeEntry>,
    ) -> Result<Vec<SelectExpr>, TranslateError> {
        let entry = scope.get(node_ref).expect("node lowered before selection");
        let entity_name = entry
            .entity
            .as_deref()
            .ok_or_else(|| TranslateError::InvalidPath("derived nodes have no entity columns".into()))?;
        let entity = self.entity(criteria, entity_name)?;

        Ok(entity
            .column_attributes()
            .filter(|a| !a.lazy)
            .map(|a| {
                let column = a.column.as_ref().expect("column attribute");
                SelectExpr::new(expr::table_col(&entry.alias, &column.name))
            })
            .collect())
    }

    fn lower_expr(
        &self,
        criteria: &CriteriaQuery,
        expr: &CriteriaExpr,
        scope: &HashMap<NodeRef, ScopeEntry>,
        params: &mut Vec<Value>,
    ) -> Result<Expr, TranslateError> {
        use crate::criteria::tree::ComparisonOp;
        use crate::sql::expr::BinaryOperator;

        Ok(match expr {
            CriteriaExpr::Path(path) => self.lower_path(criteria, path, scope)?,

            CriteriaExpr::Value(v) => {
                params.push(v.clone());
                Expr::Param(params.len())
            }

            CriteriaExpr::Compare { left, op, right } => {
                let left = self.lower_expr(criteria, left, scope, params)?;
                let right = self.lower_expr(criteria, right, scope, params)?;
                let op = match op {
                    ComparisonOp::Eq => BinaryOperator::Eq,
                    ComparisonOp::Ne => BinaryOperator::Ne,
                    ComparisonOp::Lt => BinaryOperator::Lt,
                    ComparisonOp::Gt => BinaryOperator::Gt,
                    ComparisonOp::Lte => BinaryOperator::Lte,
                    ComparisonOp::Gte => BinaryOperator::Gte,
                    ComparisonOp::Like => BinaryOperator::Like,
                };
                Expr::BinaryOp {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                }
            }

            CriteriaExpr::And(a, b) => Expr::BinaryOp {
                left: Box::new(self.lower_expr(criteria, a, scope, params)?),
                op: BinaryOperator::And,
                right: Box::new(self.lower_expr(criteria, b, scope, params)?),
            },

            CriteriaExpr::Or(a, b) => Expr::Paren(Box::new(Expr::BinaryOp {
                left: Box::new(self.lower_expr(criteria, a, scope, params)?),
                op: BinaryOperator::Or,
                right: Box::new(self.lower_expr(criteria, b, scope, params)?),
            })),

            CriteriaExpr::Not(e) => Expr::UnaryOp {
                op: crate::sql::expr::UnaryOperator::Not,
                expr: Box::new(Expr::Paren(Box::new(
                    self.lower_expr(criteria, e, scope, params)?,
                ))),
            },

            CriteriaExpr::IsNull { expr: e, negated } => Expr::IsNull {
                expr: Box::new(self.lower_expr(criteria, e, scope, params)?),
                negated: *negated,
            },

            CriteriaExpr::In {
                expr: e,
                values,
                negated,
            } => {
                let lowered = self.lower_expr(criteria, e, scope, params)?;
                let mut items = Vec::with_capacity(values.len());
                for v in values {
                    params.push(v.clone());
                    items.push(Expr::Param(params.len()));
                }
                Expr::In {
                    expr: Box::new(lowered),
                    values: items,
                    negated: *negated,
                }
            }

            CriteriaExpr::Function { name, args } => {
                let mut lowered = Vec::with_capacity(args.len());
                for a in args {
                    lowered.push(self.lower_expr(criteria, a, scope, params)?);
                }
                Expr::Function {
                    name: name.clone(),
                    args: lowered,
                }
            }
        })
    }

    fn lower_path(
        &self,
        criteria: &CriteriaQuery,
        path: &Path,
        scope: &HashMap<NodeRef, ScopeEntry>,
    ) -> Result<Expr, TranslateError> {
        let entry = scope
            .get(&path.node)
            .ok_or(TranslateError::CorrelationOutOfScope)?;

        match (&path.segment, entry.entity.as_deref()) {
            (PathSegment::MapKey, _) => {
                let key = entry
                    .key_column
                    .as_deref()
                    .ok_or(TranslateError::NotAMapJoin)?;
                Ok(expr::table_col(&entry.alias, key))
            }

            (PathSegment::Id, Some(entity_name)) => {
                let entity = self.entity(criteria, entity_name)?;
                let id = entity
                    .id_column()
                    .ok_or_else(|| TranslateError::UnknownEntity(entity.name.clone()))?;
                Ok(expr::table_col(&entry.alias, id))
            }

            (PathSegment::Id, None) => Err(TranslateError::InvalidPath(
                "derived nodes have no identifier path".into(),
            )),

            (PathSegment::Attribute(name), Some(entity_name)) => {
                let entity = self.entity(criteria, entity_name)?;
                let attr = self.attribute(entity, name)?;
                if attr.kind.is_plural() {
                    return Err(TranslateError::PathToPlural {
                        entity: entity.name.clone(),
                        attribute: name.clone(),
                    });
                }
                let column = attr.column.as_ref().ok_or_else(|| {
                    TranslateError::InvalidPath(format!(
                        "attribute '{}.{}' has no column",
                        entity.name, name
                    ))
                })?;
                Ok(expr::table_col(&entry.alias, &column.name))
            }

            // Derived/CTE nodes expose their select-list aliases as columns.
            (PathSegment::Attribute(name), None) => {
                Ok(expr::table_col(&entry.alias, name))
            }
        }
    }

    fn entity_of<'a>(
        &self,
        criteria: &'a CriteriaQuery,
        node: &QueryNode,
    ) -> Result<&'a EntityDescriptor, TranslateError> {
        let name = node
            .entity
            .as_deref()
            .ok_or_else(|| TranslateError::InvalidPath("untyped query root".into()))?;
        self.entity(criteria, name)
    }

    fn entity<'a>(
        &self,
        criteria: &'a CriteriaQuery,
        name: &str,
    ) -> Result<&'a EntityDescriptor, TranslateError> {
        criteria
            .registry()
            .get(name)
            .ok_or_else(|| TranslateError::UnknownEntity(name.into()))
    }

    fn attribute<'a>(
        &self,
        entity: &'a EntityDescriptor,
        name: &str,
    ) -> Result<&'a AttributeDescriptor, TranslateError> {
        entity
            .attribute(name)
            .ok_or_else(|| TranslateError::UnknownAttribute {
                entity: entity.name.clone(),
                attribute: name.into(),
            })
    }
}
