//! SQLite SQL dialect.
//!
//! SQLite differences from ANSI:
//! - ANSI double-quote identifier quoting
//! - `?` positional placeholders
//! - RETURNING supported since 3.35
//! - No LATERAL joins

use super::helpers;
use super::SqlDialect;

/// SQLite SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct Sqlite;

impl SqlDialect for Sqlite {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_literal(b)
    }

    // Uses default placeholder (`?`)

    fn supports_lateral(&self) -> bool {
        false
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        helpers::remap_function_sqlite(name)
    }
}
