//! Shared in-memory database fake for session tests.
//!
//! Understands the statement shapes the session emits for the Postgres
//! dialect: parameterized INSERT/UPDATE/DELETE/SELECT keyed by identifier.
//! Non-parameter value items (generation expressions) are stored as
//! `gen:<expression>` sentinels, standing in for the database computing
//! them, so RETURNING-based refresh is observable end to end.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use regex::Regex;
use strata::model::Value;
use strata::state::{ExecError, ExecOutcome, Row, StatementExecutor};

#[derive(Debug, Default)]
struct Store {
    tables: HashMap<String, Vec<Row>>,
    statements: Vec<String>,
    fail_next: Option<String>,
}

/// Cloneable handle over a shared row store, so several sessions can run
/// against the same "database".
#[derive(Debug, Default, Clone)]
pub struct MemoryDb {
    store: Rc<RefCell<Store>>,
}

#[allow(dead_code)]
impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next execute call fail with the given message.
    pub fn fail_next(&self, message: &str) {
        self.store.borrow_mut().fail_next = Some(message.into());
    }

    /// Every statement executed so far, in order.
    pub fn statements(&self) -> Vec<String> {
        self.store.borrow().statements.clone()
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.store
            .borrow()
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn seed_row(&self, table: &str, row: Row) {
        self.store
            .borrow_mut()
            .tables
            .entry(table.into())
            .or_default()
            .push(row);
    }
}

fn idents(segment: &str) -> Vec<String> {
    Regex::new("\"([^\"]+)\"")
        .unwrap()
        .captures_iter(segment)
        .map(|c| c[1].to_string())
        .collect()
}

/// Resolve a VALUES/SET item: `$n` binds a parameter, anything else is a
/// database-computed expression sentinel.
fn resolve(item: &str, params: &[Value]) -> Value {
    let item = item.trim();
    match item.strip_prefix('$') {
        Some(n) => params[n.parse::<usize>().expect("placeholder index") - 1].clone(),
        None => Value::Text(format!("gen:{}", item)),
    }
}

fn where_id(sql: &str, params: &[Value]) -> Option<(String, Value)> {
    let re = Regex::new(r#"WHERE "([^"]+)" = \$(\d+)"#).unwrap();
    let caps = re.captures(sql)?;
    let column = caps[1].to_string();
    let index: usize = caps[2].parse().ok()?;
    Some((column, params[index - 1].clone()))
}

fn returning_columns(sql: &str) -> Option<Vec<String>> {
    sql.find(" RETURNING ")
        .map(|pos| idents(&sql[pos + " RETURNING ".len()..]))
}

fn project(row: &Row, columns: &[String]) -> Row {
    columns
        .iter()
        .filter_map(|c| row.get(c).map(|v| (c.clone(), v.clone())))
        .collect()
}

impl StatementExecutor for MemoryDb {
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<ExecOutcome, ExecError> {
        let mut store = self.store.borrow_mut();
        store.statements.push(sql.to_string());
        if let Some(message) = store.fail_next.take() {
            return Err(ExecError::new(message));
        }

        if sql.starts_with("INSERT INTO") {
            let table = idents(sql).remove(0);
            let cols_open = sql.find('(').expect("column list");
            let cols_close = sql[cols_open..].find(')').expect("column list end") + cols_open;
            let columns = idents(&sql[cols_open..cols_close]);

            let values_open = sql.find("VALUES (").expect("values") + "VALUES (".len();
            let values_close =
                sql[values_open..].find(')').expect("values end") + values_open;
            let items: Vec<&str> = sql[values_open..values_close].split(',').collect();

            let row: Row = columns
                .iter()
                .cloned()
                .zip(items.iter().map(|i| resolve(i, params)))
                .collect();
            let returned = returning_columns(sql).map(|cols| project(&row, &cols));
            store.tables.entry(table).or_default().push(row);
            Ok(ExecOutcome {
                rows_affected: 1,
                returned_row: returned.filter(|r| !r.is_empty()),
            })
        } else if sql.starts_with("UPDATE ") {
            let table = idents(sql).remove(0);
            let set_start = sql.find(" SET ").expect("SET clause") + " SET ".len();
            let set_end = sql.find(" WHERE ").unwrap_or(sql.len());
            let assignments: Vec<(String, Value)> = sql[set_start..set_end]
                .split(", ")
                .map(|pair| {
                    let (col, rhs) = pair.split_once(" = ").expect("assignment");
                    (idents(col).remove(0), resolve(rhs, params))
                })
                .collect();
            let (id_col, id_val) = where_id(sql, params).expect("identifier predicate");

            let rows = store.tables.entry(table).or_default();
            let mut affected = 0;
            let mut returned = None;
            for row in rows.iter_mut() {
                if row.get(&id_col) == Some(&id_val) {
                    for (col, val) in &assignments {
                        row.insert(col.clone(), val.clone());
                    }
                    affected += 1;
                    if let Some(cols) = returning_columns(sql) {
                        returned = Some(project(row, &cols));
                    }
                }
            }
            Ok(ExecOutcome {
                rows_affected: affected,
                returned_row: returned,
            })
        } else if sql.starts_with("DELETE FROM") {
            let table = idents(sql).remove(0);
            let (id_col, id_val) = where_id(sql, params).expect("identifier predicate");
            let rows = store.tables.entry(table).or_default();
            let before = rows.len();
            rows.retain(|row| row.get(&id_col) != Some(&id_val));
            Ok(ExecOutcome {
                rows_affected: (before - rows.len()) as u64,
                returned_row: None,
            })
        } else {
            Err(ExecError::new(format!("unsupported statement: {}", sql)))
        }
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, ExecError> {
        let mut store = self.store.borrow_mut();
        store.statements.push(sql.to_string());

        let from = sql.find("FROM").expect("FROM clause");
        let columns = idents(&sql[..from]);
        let table = idents(&sql[from..]).remove(0);

        let rows = store.tables.get(&table).cloned().unwrap_or_default();
        let filtered: Vec<Row> = match where_id(sql, params) {
            Some((id_col, id_val)) => rows
                .into_iter()
                .filter(|row| row.get(&id_col) == Some(&id_val))
                .collect(),
            None => rows,
        };
        Ok(filtered.iter().map(|row| project(row, &columns)).collect())
    }
}
