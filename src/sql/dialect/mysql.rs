//! MySQL SQL dialect.
//!
//! MySQL differences from ANSI:
//! - Backtick identifier quoting
//! - `||` is logical OR by default; concatenation uses CONCAT()
//! - Booleans are 1/0
//! - No RETURNING clause (generated values need a follow-up select)
//! - LATERAL joins supported since 8.0.14

use super::helpers;
use super::SqlDialect;

/// MySQL SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct MySql;

impl SqlDialect for MySql {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_backtick(ident)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_numeric(b)
    }

    // Uses default placeholder (`?`)

    fn supports_concat_operator(&self) -> bool {
        false
    }

    fn supports_nulls_ordering(&self) -> bool {
        false
    }

    fn supports_returning(&self) -> bool {
        false
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        helpers::remap_function_mysql(name)
    }
}
