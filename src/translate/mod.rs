//! Lowering: criteria trees and flush plans down to SQL.
//!
//! Two lowerings live here:
//! 1. [`select::SelectTranslator`] turns a resolved [`crate::criteria::CriteriaQuery`]
//!    into a parameterized SELECT.
//! 2. [`write`] plans INSERT/UPDATE/DELETE statements for the state tracker,
//!    consulting each column's value generation policy for
//!    placeholder-vs-expression emission and the select-after-write refresh
//!    list.

pub mod select;
pub mod write;

use thiserror::Error;

use crate::model::Value;

pub use select::SelectTranslator;
pub use write::{plan_delete, plan_insert, plan_update, RefreshPlan, WritePlan};

/// Errors raised while lowering to SQL.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TranslateError {
    #[error("Criteria query has no root")]
    EmptyQuery,

    #[error("Unknown entity: '{0}'")]
    UnknownEntity(String),

    #[error("Unknown attribute '{attribute}' on entity '{entity}'")]
    UnknownAttribute { entity: String, attribute: String },

    #[error(
        "Path to to-many attribute '{entity}.{attribute}'; join the attribute instead of \
         navigating it"
    )]
    PathToPlural { entity: String, attribute: String },

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Map key path on a node that is not a map join")]
    NotAMapJoin,

    #[error("Correlated subquery used outside the scope of its enclosing query")]
    CorrelationOutOfScope,

    #[error("Dialect '{0}' supports neither LATERAL nor APPLY derived joins")]
    LateralNotSupported(&'static str),

    #[error("Dialect '{0}' does not support common table expressions")]
    CteNotSupported(&'static str),
}

/// A rendered statement: SQL text plus its ordered parameter list.
///
/// Parameter order matches textual placeholder order, so positional `?`
/// dialects bind correctly.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslatedStatement {
    pub sql: String,
    pub params: Vec<Value>,
}
