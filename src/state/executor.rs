//! The SQL execution seam.
//!
//! The core never performs I/O; a [`StatementExecutor`] is the external
//! collaborator that runs statements. Execution is synchronous from the
//! tracker's point of view - flush waits for each statement before moving
//! the entity state machine.

use std::collections::HashMap;

use thiserror::Error;

use crate::model::Value;

/// A result row, keyed by column name.
pub type Row = HashMap<String, Value>;

/// Error from the executing database.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("statement rejected: {message}")]
pub struct ExecError {
    pub message: String,
}

impl ExecError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Outcome of a write statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecOutcome {
    pub rows_affected: u64,
    /// Row surfaced by RETURNING/OUTPUT, or driver-level read-back of
    /// generated values.
    pub returned_row: Option<Row>,
}

/// Executes parameterized SQL. Implementations wrap a driver connection;
/// tests use in-memory fakes.
pub trait StatementExecutor {
    /// Execute a write statement.
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<ExecOutcome, ExecError>;

    /// Execute a query, returning all rows.
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, ExecError>;

    /// Execute a query expected to return at most one row.
    fn query_row(&mut self, sql: &str, params: &[Value]) -> Result<Option<Row>, ExecError> {
        Ok(self.query(sql, params)?.into_iter().next())
    }
}
