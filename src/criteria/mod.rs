//! The semantic query model: criteria trees and join resolution.
//!
//! A criteria query is built programmatically - roots, joins, predicates,
//! selection - and then handed to [`crate::translate`] for lowering to SQL.

pub mod join;
pub mod tree;

pub use join::{JoinError, JoinSpec, JoinTarget};
pub use tree::{
    CollectionJoin, CriteriaExpr, CriteriaOrder, CriteriaQuery, FromNode, Join, ListJoin, MapJoin,
    NodeRef, Path, PathSegment, PathSource, Root, Selection, SetJoin,
};
