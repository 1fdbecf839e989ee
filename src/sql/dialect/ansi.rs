//! ANSI SQL reference dialect.
//!
//! A pure ANSI SQL implementation kept as a reference for the trait defaults.
//! Not part of the `Dialect` enum - real databases rarely speak pure ANSI.

use super::helpers;
use super::SqlDialect;

/// ANSI SQL reference dialect.
#[derive(Debug, Clone, Copy)]
pub struct Ansi;

impl SqlDialect for Ansi {
    fn name(&self) -> &'static str {
        "ansi"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_literal(b)
    }

    // Everything else uses the trait defaults.
}
