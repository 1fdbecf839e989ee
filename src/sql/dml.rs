//! DML (INSERT, UPDATE, DELETE) statement AST.
//!
//! Write statements are produced by the flush planner, not by hand: each
//! written column carries a [`WriteSlot`] deciding whether the statement
//! binds a parameter or embeds a generation expression verbatim. Columns a
//! generation policy excludes from SQL simply never appear here.
//!
//! Refresh of database-generated columns uses RETURNING where the dialect
//! supports it, the OUTPUT clause on T-SQL, and is left to a follow-up
//! select elsewhere.

use super::dialect::{Dialect, SqlDialect};
use super::expr::Expr;
use super::token::{Token, TokenStream};

// ============================================================================
// Write slots
// ============================================================================

/// How a written column's value appears in the statement.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteSlot {
    /// Bound parameter placeholder, 1-based position in the parameter list.
    Param(usize),
    /// A trusted SQL expression from the mapping (e.g. `current_timestamp`),
    /// emitted verbatim instead of a parameter.
    Expression(String),
}

impl WriteSlot {
    fn to_tokens(&self) -> TokenStream {
        let mut ts = TokenStream::new();
        match self {
            WriteSlot::Param(n) => {
                ts.push(Token::Placeholder(*n));
            }
            WriteSlot::Expression(sql) => {
                ts.push(Token::Raw(sql.clone()));
            }
        }
        ts
    }
}

/// A single column write: column name plus its slot.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnWrite {
    pub column: String,
    pub slot: WriteSlot,
}

impl ColumnWrite {
    pub fn param(column: impl Into<String>, position: usize) -> Self {
        Self {
            column: column.into(),
            slot: WriteSlot::Param(position),
        }
    }

    pub fn expression(column: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            slot: WriteSlot::Expression(sql.into()),
        }
    }
}

// ============================================================================
// INSERT
// ============================================================================

/// INSERT statement.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "DML statements have no effect until converted to SQL with to_sql()"]
pub struct Insert {
    pub schema: Option<String>,
    pub table: String,
    pub columns: Vec<ColumnWrite>,
    /// Columns to read back from the inserted row.
    pub returning: Vec<String>,
}

impl Insert {
    /// Create a new INSERT statement.
    pub fn into(table: impl Into<String>) -> Self {
        Self {
            schema: None,
            table: table.into(),
            columns: Vec::new(),
            returning: Vec::new(),
        }
    }

    /// Set the schema.
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Add a column write.
    pub fn column(mut self, write: ColumnWrite) -> Self {
        self.columns.push(write);
        self
    }

    /// Add multiple column writes.
    pub fn columns(mut self, writes: impl IntoIterator<Item = ColumnWrite>) -> Self {
        self.columns.extend(writes);
        self
    }

    /// Add columns to the read-back clause.
    pub fn returning(mut self, cols: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.returning.extend(cols.into_iter().map(|c| c.into()));
        self
    }

    /// Convert to SQL for the given dialect.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        self.to_tokens(dialect).serialize(dialect)
    }

    /// Convert to token stream.
    pub fn to_tokens(&self, dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();

        ts.push(Token::Insert).space().push(Token::Into).space();
        ts.push(Token::QualifiedIdent {
            schema: self.schema.clone(),
            name: self.table.clone(),
        });

        if !self.columns.is_empty() {
            ts.space().lparen();
            for (i, write) in self.columns.iter().enumerate() {
                if i > 0 {
                    ts.comma().space();
                }
                ts.push(Token::Ident(write.column.clone()));
            }
            ts.rparen();
        }

        // T-SQL: OUTPUT goes before VALUES
        if !self.returning.is_empty() && dialect.uses_output_clause() {
            ts.space().push(Token::Output).space();
            emit_output_columns(&mut ts, Token::Inserted, &self.returning);
        }

        ts.space().push(Token::Values).space().lparen();
        for (i, write) in self.columns.iter().enumerate() {
            if i > 0 {
                ts.comma().space();
            }
            ts.append(&write.slot.to_tokens());
        }
        ts.rparen();

        if !self.returning.is_empty() && dialect.supports_returning() {
            ts.space().push(Token::Returning).space();
            emit_returning_columns(&mut ts, &self.returning);
        }

        ts
    }
}

// ============================================================================
// UPDATE
// ============================================================================

/// UPDATE statement.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "DML statements have no effect until converted to SQL with to_sql()"]
pub struct Update {
    pub schema: Option<String>,
    pub table: String,
    pub set: Vec<ColumnWrite>,
    pub filter: Option<Expr>,
    pub returning: Vec<String>,
}

impl Update {
    /// Create a new UPDATE statement.
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            schema: None,
            table: table.into(),
            set: Vec::new(),
            filter: None,
            returning: Vec::new(),
        }
    }

    /// Set the schema.
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Add a SET assignment.
    pub fn set(mut self, write: ColumnWrite) -> Self {
        self.set.push(write);
        self
    }

    /// Add multiple SET assignments.
    pub fn set_many(mut self, writes: impl IntoIterator<Item = ColumnWrite>) -> Self {
        self.set.extend(writes);
        self
    }

    /// Add a WHERE condition (ANDed with existing conditions).
    pub fn filter(mut self, expr: Expr) -> Self {
        use super::expr::ExprExt;
        self.filter = Some(match self.filter {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    /// Add columns to the read-back clause.
    pub fn returning(mut self, cols: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.returning.extend(cols.into_iter().map(|c| c.into()));
        self
    }

    /// Convert to SQL for the given dialect.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        self.to_tokens(dialect).serialize(dialect)
    }

    /// Convert to token stream.
    pub fn to_tokens(&self, dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();

        ts.push(Token::Update).space();
        ts.push(Token::QualifiedIdent {
            schema: self.schema.clone(),
            name: self.table.clone(),
        });

        ts.space().push(Token::Set).space();
        for (i, write) in self.set.iter().enumerate() {
            if i > 0 {
                ts.comma().space();
            }
            ts.push(Token::Ident(write.column.clone()))
                .space()
                .push(Token::Eq)
                .space()
                .append(&write.slot.to_tokens());
        }

        // T-SQL: OUTPUT goes after SET, before WHERE
        if !self.returning.is_empty() && dialect.uses_output_clause() {
            ts.space().push(Token::Output).space();
            emit_output_columns(&mut ts, Token::Inserted, &self.returning);
        }

        if let Some(ref filter) = self.filter {
            ts.space()
                .push(Token::Where)
                .space()
                .append(&filter.to_tokens_for_dialect(dialect));
        }

        if !self.returning.is_empty() && dialect.supports_returning() {
            ts.space().push(Token::Returning).space();
            emit_returning_columns(&mut ts, &self.returning);
        }

        ts
    }
}

// ============================================================================
// DELETE
// ============================================================================

/// DELETE statement.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "DML statements have no effect until converted to SQL with to_sql()"]
pub struct Delete {
    pub schema: Option<String>,
    pub table: String,
    pub filter: Option<Expr>,
}

impl Delete {
    /// Create a new DELETE statement.
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            schema: None,
            table: table.into(),
            filter: None,
        }
    }

    /// Set the schema.
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Add a WHERE condition (ANDed with existing conditions).
    pub fn filter(mut self, expr: Expr) -> Self {
        use super::expr::ExprExt;
        self.filter = Some(match self.filter {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    /// Convert to SQL for the given dialect.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        self.to_tokens(dialect).serialize(dialect)
    }

    /// Convert to token stream.
    pub fn to_tokens(&self, dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();

        ts.push(Token::Delete).space().push(Token::From).space();
        ts.push(Token::QualifiedIdent {
            schema: self.schema.clone(),
            name: self.table.clone(),
        });

        if let Some(ref filter) = self.filter {
            ts.space()
                .push(Token::Where)
                .space()
                .append(&filter.to_tokens_for_dialect(dialect));
        }

        ts
    }
}

fn emit_returning_columns(ts: &mut TokenStream, cols: &[String]) {
    for (i, col) in cols.iter().enumerate() {
        if i > 0 {
            ts.comma().space();
        }
        ts.push(Token::Ident(col.clone()));
    }
}

fn emit_output_columns(ts: &mut TokenStream, source: Token, cols: &[String]) {
    for (i, col) in cols.iter().enumerate() {
        if i > 0 {
            ts.comma().space();
        }
        ts.push(source.clone())
            .push(Token::Dot)
            .push(Token::Ident(col.clone()));
    }
}

// ============================================================================
// Tests
// ============================================================================
