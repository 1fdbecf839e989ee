//! SQL dialect definitions and formatting rules.
//!
//! This module provides a trait-based abstraction for SQL dialect differences.
//! Each dialect implements `SqlDialect` to handle its specific syntax:
//!
//! - Identifier quoting: `"` (ANSI/PG/SQLite), `` ` `` (MySQL), `[]` (T-SQL)
//! - Parameter placeholders: `$n` vs `?` vs `@pn`
//! - Pagination: LIMIT/OFFSET vs OFFSET FETCH
//! - Boolean literals: true/false vs 1/0
//! - LATERAL joins vs CROSS APPLY / OUTER APPLY
//! - RETURNING vs OUTPUT for write-back of generated values
//! - Function name remapping (current-timestamp spellings etc.)
//!
//! The translator consults these capabilities when lowering a criteria tree,
//! and the state tracker consults `supports_returning` to decide between
//! RETURNING and a follow-up select when refreshing database-generated
//! columns.

mod ansi;
mod mysql;
mod postgres;
mod sqlite;
mod tsql;

pub mod helpers;

// Note: Ansi is exported as a reference implementation for testing and
// documentation. It is NOT included in the Dialect enum because real databases
// rarely speak pure ANSI SQL.
pub use ansi::Ansi;
pub use mysql::MySql;
pub use postgres::Postgres;
pub use sqlite::Sqlite;
pub use tsql::TSql;

use serde::{Deserialize, Serialize};

use super::token::TokenStream;

/// SQL dialect trait - defines how SQL constructs are rendered.
///
/// Implementations handle dialect-specific syntax differences.
/// The default implementations follow ANSI SQL where possible.
pub trait SqlDialect: std::fmt::Debug {
    /// Dialect name for display/logging.
    fn name(&self) -> &'static str;

    // =========================================================================
    // Identifier and Literal Quoting
    // =========================================================================

    /// Quote an identifier (table, column, alias).
    fn quote_identifier(&self, ident: &str) -> String;

    /// Quote a string literal.
    ///
    /// All dialects use single quotes with `''` for escaping.
    /// Override for Unicode prefix (T-SQL N'...').
    fn quote_string(&self, s: &str) -> String {
        format!("'{}'", s.replace('\'', "''"))
    }

    /// Format a boolean literal.
    fn format_bool(&self, b: bool) -> &'static str;

    // =========================================================================
    // Parameters
    // =========================================================================

    /// Render the placeholder for the bound parameter at `position` (1-based).
    ///
    /// - MySQL/SQLite: `?` (positional, index ignored)
    /// - PostgreSQL: `$1`, `$2`, ...
    /// - T-SQL: `@p1`, `@p2`, ...
    fn placeholder(&self, position: usize) -> String {
        let _ = position;
        "?".into()
    }

    // =========================================================================
    // Pagination
    // =========================================================================

    /// Emit LIMIT/OFFSET or equivalent pagination clause.
    fn emit_limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> TokenStream {
        helpers::emit_limit_offset_standard(limit, offset)
    }

    /// Whether this dialect requires ORDER BY for OFFSET/LIMIT.
    fn requires_order_by_for_offset(&self) -> bool {
        false
    }

    // =========================================================================
    // Operators
    // =========================================================================

    /// String concatenation operator.
    fn concat_operator(&self) -> &'static str {
        "||"
    }

    /// Whether this dialect supports the `||` concat operator.
    ///
    /// MySQL uses `||` as logical OR by default.
    fn supports_concat_operator(&self) -> bool {
        true
    }

    // =========================================================================
    // CTE (Common Table Expressions)
    // =========================================================================

    /// Whether this dialect supports common table expressions at all.
    fn supports_cte(&self) -> bool {
        true
    }

    /// Whether to emit the RECURSIVE keyword for recursive CTEs.
    ///
    /// T-SQL omits the RECURSIVE keyword.
    fn emit_recursive_keyword(&self) -> bool {
        true
    }

    // =========================================================================
    // JOIN Syntax
    // =========================================================================

    /// Whether this dialect supports LATERAL derived-table joins.
    ///
    /// T-SQL uses CROSS APPLY / OUTER APPLY instead; the query renderer
    /// falls back to APPLY syntax when this returns false.
    fn supports_lateral(&self) -> bool {
        true
    }

    /// Whether this dialect supports CROSS APPLY / OUTER APPLY.
    ///
    /// Only consulted when `supports_lateral` is false; a dialect with
    /// neither cannot execute lateral derived joins at all.
    fn supports_apply(&self) -> bool {
        false
    }

    // =========================================================================
    // NULLS Ordering
    // =========================================================================

    /// Whether this dialect supports NULLS FIRST/LAST in ORDER BY.
    fn supports_nulls_ordering(&self) -> bool {
        true
    }

    // =========================================================================
    // Write-back of Generated Values
    // =========================================================================

    /// Whether this dialect supports the RETURNING clause on DML.
    fn supports_returning(&self) -> bool {
        true
    }

    /// Whether this dialect uses the OUTPUT clause instead of RETURNING.
    fn uses_output_clause(&self) -> bool {
        false
    }

    // =========================================================================
    // Function Remapping
    // =========================================================================

    /// Remap a function name for this dialect.
    ///
    /// Different databases spell the same function differently:
    /// - `CURRENT_TIMESTAMP` → `GETDATE` (T-SQL)
    /// - `NVL` → `COALESCE` (PostgreSQL) / `IFNULL` (MySQL)
    ///
    /// Returns `Some(new_name)` if the function should be remapped, `None` to
    /// keep the original. The input is matched case-insensitively.
    fn remap_function(&self, name: &str) -> Option<&'static str> {
        let _ = name;
        None
    }
}

/// Supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Postgres,
    MySql,
    Sqlite,
    TSql,
}

impl Dialect {
    /// Get the dialect implementation.
    pub fn dialect(&self) -> &'static dyn SqlDialect {
        match self {
            Dialect::Postgres => &Postgres,
            Dialect::MySql => &MySql,
            Dialect::Sqlite => &Sqlite,
            Dialect::TSql => &TSql,
        }
    }

    /// Parse a dialect name as found in configuration files.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Some(Dialect::Postgres),
            "mysql" => Some(Dialect::MySql),
            "sqlite" => Some(Dialect::Sqlite),
            "tsql" | "mssql" | "sqlserver" => Some(Dialect::TSql),
            _ => None,
        }
    }
}

// Implement SqlDialect for the Dialect enum by delegating to concrete types
impl SqlDialect for Dialect {
    fn name(&self) -> &'static str {
        self.dialect().name()
    }

    fn quote_identifier(&self, ident: &str) -> String {
        self.dialect().quote_identifier(ident)
    }

    fn quote_string(&self, s: &str) -> String {
        self.dialect().quote_string(s)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        self.dialect().format_bool(b)
    }

    fn placeholder(&self, position: usize) -> String {
        self.dialect().placeholder(position)
    }

    fn emit_limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> TokenStream {
        self.dialect().emit_limit_offset(limit, offset)
    }

    fn requires_order_by_for_offset(&self) -> bool {
        self.dialect().requires_order_by_for_offset()
    }

    fn concat_operator(&self) -> &'static str {
        self.dialect().concat_operator()
    }

    fn supports_concat_operator(&self) -> bool {
        self.dialect().supports_concat_operator()
    }

    fn supports_cte(&self) -> bool {
        self.dialect().supports_cte()
    }

    fn emit_recursive_keyword(&self) -> bool {
        self.dialect().emit_recursive_keyword()
    }

    fn supports_lateral(&self) -> bool {
        self.dialect().supports_lateral()
    }

    fn supports_apply(&self) -> bool {
        self.dialect().supports_apply()
    }

    fn supports_nulls_ordering(&self) -> bool {
        self.dialect().supports_nulls_ordering()
    }

    fn supports_returning(&self) -> bool {
        self.dialect().supports_returning()
    }

    fn uses_output_clause(&self) -> bool {
        self.dialect().uses_output_clause()
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        self.dialect().remap_function(name)
    }
}
