//! Write planning: entity state to INSERT/UPDATE/DELETE.
//!
//! For each column the planner asks the value generation policy three
//! things: include the column at all, bind a parameter or emit the mapped
//! expression, and whether the column must be read back after the statement
//! runs. In-memory generators run here and their results are handed back to
//! the tracker so the managed instance stays consistent with the row.
//!
//! Parameter positions follow textual order (columns left to right, then the
//! identifier predicate), which keeps positional `?` dialects correct.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::generation::{needs_refresh_after, referenced_column_value, GenerationOrigin};
use crate::model::{EntityDescriptor, Value};
use crate::sql::dialect::{Dialect, SqlDialect};
use crate::sql::dml::{ColumnWrite, Delete, Insert, Update};
use crate::sql::expr::{col, param, ExprExt};
use crate::sql::query::{Query, SelectExpr, TableRef};

use super::{TranslateError, TranslatedStatement};

/// How database-generated columns are read back after a write.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshPlan {
    /// Nothing to read back.
    None,
    /// Values come back from executing the write itself: RETURNING/OUTPUT
    /// where the dialect supports it, or driver-level read-back when the
    /// identifier itself is generated and no read-back clause exists.
    FromExecution { columns: Vec<String> },
    /// A follow-up select keyed by the identifier reads the columns back.
    Select {
        statement: TranslatedStatement,
        columns: Vec<String>,
    },
}

/// A planned write: the statement, the refresh plan, and any in-memory
/// generated values the tracker must apply to the managed instance.
#[derive(Debug, Clone, PartialEq)]
pub struct WritePlan {
    pub statement: TranslatedStatement,
    pub refresh: RefreshPlan,
    /// (attribute, generated value) pairs produced by in-memory generators.
    pub generated_in_memory: Vec<(String, Value)>,
}

/// Plan the INSERT for a new entity instance.
///
/// `values` holds the instance's attribute values by attribute name; absent
/// attributes insert as NULL.
pub fn plan_insert(
    entity: &EntityDescriptor,
    values: &HashMap<String, Value>,
    dialect: Dialect,
) -> Result<WritePlan, TranslateError> {
    let mut insert = Insert::into(entity.table.clone());
    if let Some(schema) = &entity.schema {
        insert = insert.schema(schema.clone());
    }

    let mut params: Vec<Value> = Vec::new();
    let mut generated_in_memory: Vec<(String, Value)> = Vec::new();
    let mut refresh_columns: Vec<String> = Vec::new();

    for attr in entity.column_attributes() {
        let column = attr.column.as_ref().expect("column attribute");
        let policy = &column.generation;
        let current = values.get(&attr.name);

        if policy.timing.includes_insert() {
            if needs_refresh_after(policy, true) {
                refresh_columns.push(column.name.clone());
            }
            match policy.origin {
                GenerationOrigin::InMemory => {
                    let generator = policy.generator.as_ref().expect("validated at build");
                    // An identifier assigned at persist time is not
                    // regenerated; other generated columns always re-run
                    // their generator.
                    let generated = if attr.name == entity.id {
                        match current {
                            Some(v) if !v.is_null() => v.clone(),
                            _ => generator.generate(None),
                        }
                    } else {
                        generator.generate(current)
                    };
                    params.push(generated.clone());
                    generated_in_memory.push((attr.name.clone(), generated));
                    insert = insert.column(ColumnWrite::param(&column.name, params.len()));
                }
                GenerationOrigin::Database => {
                    if !policy.reference_column_in_sql {
                        continue; // no column reference, no bound parameter
                    }
                    match referenced_column_value(policy, dialect) {
                        Some(expression) => {
                            insert =
                                insert.column(ColumnWrite::expression(&column.name, expression));
                        }
                        None => {
                            // Referenced with no expression text: plain
                            // placeholder, per write_property_value.
                            params.push(current.cloned().unwrap_or(Value::Null));
                            insert =
                                insert.column(ColumnWrite::param(&column.name, params.len()));
                        }
                    }
                }
            }
        } else {
            params.push(current.cloned().unwrap_or(Value::Null));
            insert = insert.column(ColumnWrite::param(&column.name, params.len()));
        }
    }

    // Identifier value as it will exist after the statement, when known.
    let id_value = entity.id_attribute().and_then(|id_attr| {
        generated_in_memory
            .iter()
            .find(|(name, _)| name == &id_attr.name)
            .map(|(_, v)| v.clone())
            .or_else(|| values.get(&id_attr.name).cloned())
    });

    let (insert, refresh) =
        attach_refresh(entity, insert, refresh_columns, id_value, dialect, |stmt, cols| {
            stmt.returning(cols.iter().cloned())
        })?;

    let sql = insert.to_sql(dialect);
    debug!(entity = %entity.name, %sql, "planned insert");
    Ok(WritePlan {
        statement: TranslatedStatement { sql, params },
        refresh,
        generated_in_memory,
    })
}

/// Plan the UPDATE for a managed instance.
///
/// `dirty` names the attributes whose values changed; generation-mandated
/// columns (UPDATE/ALWAYS timing) are written regardless. Returns `None`
/// when nothing at all would be written.
pub fn plan_update(
    entity: &EntityDescriptor,
    values: &HashMap<String, Value>,
    dirty: &HashSet<String>,
    id_value: &Value,
    dialect: Dialect,
) -> Result<Option<WritePlan>, TranslateError> {
    let mut update = Update::table(entity.table.clone());
    if let Some(schema) = &entity.schema {
        update = update.schema(schema.clone());
    }

    let mut params: Vec<Value> = Vec::new();
    let mut generated_in_memory: Vec<(String, Value)> = Vec::new();
    let mut refresh_columns: Vec<String> = Vec::new();
    let mut wrote_anything = false;

    for attr in entity.column_attributes() {
        if attr.name == entity.id {
            continue; // identifiers are immutable
        }
        let column = attr.column.as_ref().expect("column attribute");
        let policy = &column.generation;
        let current = values.get(&attr.name);

        if policy.timing.includes_update() {
            if needs_refresh_after(policy, false) {
                refresh_columns.push(column.name.clone());
            }
            match policy.origin {
                GenerationOrigin::InMemory => {
                    let generator = policy.generator.as_ref().expect("validated at build");
                    let generated = generator.generate(current);
                    params.push(generated.clone());
                    generated_in_memory.push((attr.name.clone(), generated));
                    update = update.set(ColumnWrite::param(&column.name, params.len()));
                    wrote_anything = true;
                }
                GenerationOrigin::Database => {
                    if !policy.reference_column_in_sql {
                        continue;
                    }
                    match referenced_column_value(policy, dialect) {
                        Some(expression) => {
                            update = update.set(ColumnWrite::expression(&column.name, expression));
                        }
                        None => {
                            params.push(current.cloned().unwrap_or(Value::Null));
                            update = update.set(ColumnWrite::param(&column.name, params.len()));
                        }
                    }
                    wrote_anything = true;
                }
            }
        } else if dirty.contains(&attr.name) {
            params.push(current.cloned().unwrap_or(Value::Null));
            update = update.set(ColumnWrite::param(&column.name, params.len()));
            wrote_anything = true;
        }
    }

    if !wrote_anything {
        return Ok(None);
    }

    let id_column = entity
        .id_column()
        .ok_or_else(|| TranslateError::UnknownEntity(entity.name.clone()))?;
    params.push(id_value.clone());
    update = update.filter(col(id_column).eq(param(params.len())));

    let (update, refresh) = attach_refresh(
        entity,
        update,
        refresh_columns,
        Some(id_value.clone()),
        dialect,
        |stmt, cols| stmt.returning(cols.iter().cloned()),
    )?;

    let sql = update.to_sql(dialect);
    debug!(entity = %entity.name, %sql, "planned update");
    Ok(Some(WritePlan {
        statement: TranslatedStatement { sql, params },
        refresh,
        generated_in_memory,
    }))
}

/// Plan the DELETE for a removed instance.
pub fn plan_delete(
    entity: &EntityDescriptor,
    id_value: &Value,
    dialect: Dialect,
) -> Result<TranslatedStatement, TranslateError> {
    let id_column = entity
        .id_column()
        .ok_or_else(|| TranslateError::UnknownEntity(entity.name.clone()))?;

    let mut delete = Delete::from(entity.table.clone());
    if let Some(schema) = &entity.schema {
        delete = delete.schema(schema.clone());
    }
    let delete = delete.filter(col(id_column).eq(param(1)));

    let sql = delete.to_sql(dialect);
    debug!(entity = %entity.name, %sql, "planned delete");
    Ok(TranslatedStatement {
        sql,
        params: vec![id_value.clone()],
    })
}

/// Decide how refresh columns are read back and attach RETURNING/OUTPUT to
/// the statement where the dialect supports it.
fn attach_refresh<S>(
    entity: &EntityDescriptor,
    statement: S,
    refresh_columns: Vec<String>,
    id_value: Option<Value>,
    dialect: Dialect,
    add_returning: impl FnOnce(S, &[String]) -> S,
) -> Result<(S, RefreshPlan), TranslateError> {
    if refresh_columns.is_empty() {
        return Ok((statement, RefreshPlan::None));
    }

    if dialect.supports_returning() || dialect.uses_output_clause() {
        let statement = add_returning(statement, &refresh_columns);
        return Ok((
            statement,
            RefreshPlan::FromExecution {
                columns: refresh_columns,
            },
        ));
    }

    match id_value {
        Some(id) => {
            let select = follow_up_select(entity, &refresh_columns, dialect)?;
            Ok((
                statement,
                RefreshPlan::Select {
                    statement: TranslatedStatement {
                        sql: select,
                        params: vec![id],
                    },
                    columns: refresh_columns,
                },
            ))
        }
        // The identifier itself is generated and there is no read-back
        // clause: the executor has to surface the generated row.
        None => Ok((
            statement,
            RefreshPlan::FromExecution {
                columns: refresh_columns,
            },
        )),
    }
}

fn follow_up_select(
    entity: &EntityDescriptor,
    columns: &[String],
    dialect: Dialect,
) -> Result<String, TranslateError> {
    let id_column = entity
        .id_column()
        .ok_or_else(|| TranslateError::UnknownEntity(entity.name.clone()))?;

    let mut table = TableRef::new(&entity.table);
    if let Some(schema) = &entity.schema {
        table = table.with_schema(schema);
    }
    let query = Query::new()
        .select(
            columns
                .iter()
                .map(|c| SelectExpr::new(col(c)))
                .collect::<Vec<_>>(),
        )
        .from(table)
        .filter(col(id_column).eq(param(1)));

    Ok(query.to_sql(dialect))
}
