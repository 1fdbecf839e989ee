//! T-SQL (SQL Server / Azure SQL) dialect.
//!
//! T-SQL has significant differences from ANSI:
//! - Square bracket identifier quoting (`[name]`)
//! - `@pN` named parameter placeholders
//! - OFFSET FETCH for pagination (requires ORDER BY)
//! - N'...' prefix for Unicode strings
//! - OUTPUT instead of RETURNING
//! - CROSS APPLY / OUTER APPLY instead of LATERAL
//! - No RECURSIVE keyword for recursive CTEs
//! - String concatenation with `+`

use super::helpers;
use super::SqlDialect;
use crate::sql::token::TokenStream;

/// T-SQL (SQL Server) dialect.
#[derive(Debug, Clone, Copy)]
pub struct TSql;

impl SqlDialect for TSql {
    fn name(&self) -> &'static str {
        "tsql"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_bracket(ident)
    }

    fn quote_string(&self, s: &str) -> String {
        // T-SQL uses N'...' for Unicode strings
        if !s.is_ascii() {
            helpers::quote_string_unicode(s)
        } else {
            helpers::quote_string_single(s)
        }
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_numeric(b)
    }

    fn placeholder(&self, position: usize) -> String {
        format!("@p{}", position)
    }

    fn emit_limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> TokenStream {
        helpers::emit_limit_offset_tsql(limit, offset)
    }

    fn requires_order_by_for_offset(&self) -> bool {
        true
    }

    fn concat_operator(&self) -> &'static str {
        "+"
    }

    fn emit_recursive_keyword(&self) -> bool {
        // T-SQL doesn't use the RECURSIVE keyword
        false
    }

    fn supports_lateral(&self) -> bool {
        // T-SQL uses CROSS APPLY / OUTER APPLY instead
        false
    }

    fn supports_apply(&self) -> bool {
        true
    }

    fn supports_nulls_ordering(&self) -> bool {
        false
    }

    fn supports_returning(&self) -> bool {
        false
    }

    fn uses_output_clause(&self) -> bool {
        true
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        helpers::remap_function_tsql(name)
    }
}
