//! # Strata
//!
//! A criteria-query ORM core: typed query trees compiled to multi-dialect
//! SQL, plus a unit-of-work entity state tracker with value generation.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │           Criteria Tree (roots, joins, predicates)       │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [join resolution · criteria]
//! ┌─────────────────────────────────────────────────────────┐
//! │                Resolved Query Tree                       │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [translate]
//! ┌─────────────────────────────────────────────────────────┐
//! │          SQL AST (tokens, exprs, queries, DML)           │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [dialect rendering]
//! ┌─────────────────────────────────────────────────────────┐
//! │        Parameterized SQL text + ordered parameters       │
//! └─────────────────────────────────────────────────────────┘
//!
//! Independently, entity mutation flows through the state tracker:
//!
//!   Session ──dirty checking──▶ write planning ──policies──▶ DML
//!      ▲                                                      │
//!      └───────────── select-after-write refresh ◀────────────┘
//! ```
//!
//! Entity metadata ([`model`]) and per-column value generation policies
//! ([`generation`]) feed both pipelines.

pub mod config;
pub mod criteria;
pub mod generation;
pub mod model;
pub mod sql;
pub mod state;
pub mod translate;

// Re-export SQL submodules at crate level for convenient paths
pub use sql::dialect;
pub use sql::dml;
pub use sql::expr;
pub use sql::query;
pub use sql::token;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::config::{Config, DirtyChecking};
    pub use crate::criteria::{
        CriteriaExpr, CriteriaQuery, FromNode, JoinError, JoinSpec, JoinTarget, Path, PathSource,
    };
    pub use crate::dialect::{Dialect, SqlDialect};
    pub use crate::generation::{
        generated_by_database, referenced_column_value, write_property_value, GenerationOrigin,
        GenerationTiming, ValueGenerationPolicy, ValueGenerator,
    };
    pub use crate::model::{
        AttributeDescriptor, AttributeKind, ColumnDescriptor, EntityDescriptor, MappingError,
        MetadataRegistry, Value,
    };
    pub use crate::query::{JoinType, SortDir};
    pub use crate::state::{
        EntityKey, EntityStatus, ExecError, ExecOutcome, Session, SessionError, StatementExecutor,
    };
    pub use crate::translate::{SelectTranslator, TranslateError, TranslatedStatement};
}

// Also export the most common types at the crate root
pub use config::Config;
pub use criteria::CriteriaQuery;
pub use dialect::Dialect;
pub use model::{MetadataRegistry, Value};
pub use state::Session;
pub use translate::SelectTranslator;
