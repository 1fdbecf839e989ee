//! The criteria query tree.
//!
//! A [`CriteriaQuery`] owns an arena of [`QueryNode`]s - roots and joins -
//! plus the selection, filter, ordering and registered common table
//! expressions. Handles ([`Root`], [`Join`], [`CollectionJoin`], ...) are
//! cheap copies of a [`NodeRef`] and stay valid for the lifetime of the
//! query; all mutation goes through the query itself.
//!
//! Capabilities are expressed as traits rather than an inheritance chain:
//! every handle is a [`FromNode`] (it names a FROM-clause element) and a
//! [`PathSource`] (attribute paths can be navigated from it). Join
//! resolution itself lives in [`super::join`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::model::{MetadataRegistry, Value};
use crate::sql::query::{JoinType, SortDir};

use super::join::JoinError;

// ============================================================================
// Identifiers
// ============================================================================

/// Index of a node within its query's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

/// Process-unique identity of a [`CriteriaQuery`], used to tell outer-scope
/// path references apart from local ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryId(u64);

static NEXT_QUERY_ID: AtomicU64 = AtomicU64::new(1);

impl QueryId {
    fn next() -> Self {
        QueryId(NEXT_QUERY_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A node reference: query identity plus arena index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeRef {
    pub query: QueryId,
    pub node: NodeId,
}

// ============================================================================
// Nodes
// ============================================================================

/// How a node entered the FROM clause.
#[derive(Debug, Clone)]
pub enum NodeSource {
    /// A query root.
    Root,
    /// A subquery root correlated to a node of an enclosing query.
    CorrelatedRoot,
    /// A join resolved from a mapped attribute.
    AttributeJoin { attribute: String },
    /// An explicit entity join (cartesian, restricted by `on`).
    EntityJoin,
    /// A derived-table join over a fully built subquery.
    DerivedJoin {
        subquery: Box<CriteriaQuery>,
        lateral: bool,
    },
    /// A join against a registered common table expression.
    CteJoin { cte: String },
}

/// A FROM-clause element: root or join.
///
/// The arena owns nodes; children hold non-owning parent ids.
#[derive(Debug, Clone)]
pub struct QueryNode {
    pub id: NodeId,
    /// Entity type of the rows this node produces. `None` for derived and
    /// CTE nodes, whose shape is the subquery's select list.
    pub entity: Option<String>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// For correlated subquery roots: the enclosing node this root mirrors.
    pub correlation_parent: Option<NodeRef>,
    pub join_type: JoinType,
    /// Eager-fetch join: the joined entity's columns join the select list.
    pub fetch: bool,
    pub source: NodeSource,
    /// Extra join restriction, ANDed with any mapped join condition.
    pub on: Option<CriteriaExpr>,
}

// ============================================================================
// Capability traits and typed handles
// ============================================================================

/// Capability: names a FROM-clause element of some query.
pub trait FromNode {
    fn node_ref(&self) -> NodeRef;
}

/// Capability: attribute paths can be navigated from this node.
pub trait PathSource: FromNode {
    /// Path to a mapped attribute (or, for derived/CTE nodes, a select-list
    /// alias).
    fn get(&self, attribute: &str) -> Path {
        Path {
            node: self.node_ref(),
            segment: PathSegment::Attribute(attribute.into()),
        }
    }

    /// Path to the entity identifier.
    fn id_path(&self) -> Path {
        Path {
            node: self.node_ref(),
            segment: PathSegment::Id,
        }
    }
}

macro_rules! node_handle {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name(pub(crate) NodeRef);

        impl FromNode for $name {
            fn node_ref(&self) -> NodeRef {
                self.0
            }
        }

        impl PathSource for $name {}
    };
}

node_handle!(
    /// Handle to a query root (plain or correlated).
    Root
);
node_handle!(
    /// Handle to a singular-attribute, entity, derived or CTE join.
    Join
);
node_handle!(
    /// Handle to a collection-attribute join.
    CollectionJoin
);
node_handle!(
    /// Handle to a set-attribute join.
    SetJoin
);
node_handle!(
    /// Handle to a list-attribute join.
    ListJoin
);
node_handle!(
    /// Handle to a map-attribute join. Exposes key and value paths.
    MapJoin
);

impl MapJoin {
    /// Path to the map key column.
    pub fn key(&self) -> Path {
        Path {
            node: self.0,
            segment: PathSegment::MapKey,
        }
    }

    /// The map value is the joined entity itself; value paths are ordinary
    /// attribute paths from this join.
    pub fn value(&self, attribute: &str) -> Path {
        self.get(attribute)
    }
}

// ============================================================================
// Paths and predicates
// ============================================================================

/// A path rooted at a FROM-clause node.
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    pub node: NodeRef,
    pub segment: PathSegment,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PathSegment {
    /// A mapped attribute name (or select-list alias on derived/CTE nodes).
    Attribute(String),
    /// The map key column of a map join.
    MapKey,
    /// The entity identifier.
    Id,
}

/// Comparison operators available on paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Lte,
    Gte,
    Like,
}

/// A criteria predicate/expression over paths and bound values.
///
/// Values are carried as [`Value`] and become bound parameters during
/// translation; they are never rendered into the SQL text.
#[derive(Debug, Clone, PartialEq)]
pub enum CriteriaExpr {
    Path(Path),
    Value(Value),
    Compare {
        left: Box<CriteriaExpr>,
        op: ComparisonOp,
        right: Box<CriteriaExpr>,
    },
    And(Box<CriteriaExpr>, Box<CriteriaExpr>),
    Or(Box<CriteriaExpr>, Box<CriteriaExpr>),
    Not(Box<CriteriaExpr>),
    IsNull {
        expr: Box<CriteriaExpr>,
        negated: bool,
    },
    In {
        expr: Box<CriteriaExpr>,
        values: Vec<Value>,
        negated: bool,
    },
    /// A function over arguments, e.g. `lower(name)`.
    Function {
        name: String,
        args: Vec<CriteriaExpr>,
    },
}

impl CriteriaExpr {
    pub fn and(self, other: CriteriaExpr) -> CriteriaExpr {
        CriteriaExpr::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: CriteriaExpr) -> CriteriaExpr {
        CriteriaExpr::Or(Box::new(self), Box::new(other))
    }

    pub fn negate(self) -> CriteriaExpr {
        CriteriaExpr::Not(Box::new(self))
    }

    /// Paths referenced anywhere in this expression.
    pub(crate) fn collect_paths<'a>(&'a self, out: &mut Vec<&'a Path>) {
        match self {
            CriteriaExpr::Path(p) => out.push(p),
            CriteriaExpr::Value(_) => {}
            CriteriaExpr::Compare { left, right, .. } => {
                left.collect_paths(out);
                right.collect_paths(out);
            }
            CriteriaExpr::And(a, b) | CriteriaExpr::Or(a, b) => {
                a.collect_paths(out);
                b.collect_paths(out);
            }
            CriteriaExpr::Not(e) => e.collect_paths(out),
            CriteriaExpr::IsNull { expr, .. } => expr.collect_paths(out),
            CriteriaExpr::In { expr, .. } => expr.collect_paths(out),
            CriteriaExpr::Function { args, .. } => {
                for a in args {
                    a.collect_paths(out);
                }
            }
        }
    }
}

impl From<Path> for CriteriaExpr {
    fn from(p: Path) -> Self {
        CriteriaExpr::Path(p)
    }
}

impl From<Value> for CriteriaExpr {
    fn from(v: Value) -> Self {
        CriteriaExpr::Value(v)
    }
}

impl From<i64> for CriteriaExpr {
    fn from(n: i64) -> Self {
        CriteriaExpr::Value(Value::Int(n))
    }
}

impl From<&str> for CriteriaExpr {
    fn from(s: &str) -> Self {
        CriteriaExpr::Value(Value::Text(s.into()))
    }
}

impl From<bool> for CriteriaExpr {
    fn from(b: bool) -> Self {
        CriteriaExpr::Value(Value::Bool(b))
    }
}

impl Path {
    fn compare(self, op: ComparisonOp, other: impl Into<CriteriaExpr>) -> CriteriaExpr {
        CriteriaExpr::Compare {
            left: Box::new(CriteriaExpr::Path(self)),
            op,
            right: Box::new(other.into()),
        }
    }

    pub fn eq(self, other: impl Into<CriteriaExpr>) -> CriteriaExpr {
        self.compare(ComparisonOp::Eq, other)
    }

    pub fn ne(self, other: impl Into<CriteriaExpr>) -> CriteriaExpr {
        self.compare(ComparisonOp::Ne, other)
    }

    pub fn lt(self, other: impl Into<CriteriaExpr>) -> CriteriaExpr {
        self.compare(ComparisonOp::Lt, other)
    }

    pub fn gt(self, other: impl Into<CriteriaExpr>) -> CriteriaExpr {
        self.compare(ComparisonOp::Gt, other)
    }

    pub fn lte(self, other: impl Into<CriteriaExpr>) -> CriteriaExpr {
        self.compare(ComparisonOp::Lte, other)
    }

    pub fn gte(self, other: impl Into<CriteriaExpr>) -> CriteriaExpr {
        self.compare(ComparisonOp::Gte, other)
    }

    pub fn like(self, pattern: &str) -> CriteriaExpr {
        self.compare(ComparisonOp::Like, Value::Text(pattern.into()))
    }

    pub fn is_null(self) -> CriteriaExpr {
        CriteriaExpr::IsNull {
            expr: Box::new(CriteriaExpr::Path(self)),
            negated: false,
        }
    }

    pub fn is_not_null(self) -> CriteriaExpr {
        CriteriaExpr::IsNull {
            expr: Box::new(CriteriaExpr::Path(self)),
            negated: true,
        }
    }

    pub fn in_values(self, values: Vec<Value>) -> CriteriaExpr {
        CriteriaExpr::In {
            expr: Box::new(CriteriaExpr::Path(self)),
            values,
            negated: false,
        }
    }
}

// ============================================================================
// Selection and ordering
// ============================================================================

/// A select-list item: path with optional alias.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub path: Path,
    pub alias: Option<String>,
}

/// An ordering item.
#[derive(Debug, Clone, PartialEq)]
pub struct CriteriaOrder {
    pub path: Path,
    pub dir: SortDir,
}

// ============================================================================
// The query
// ============================================================================

/// A criteria query: a tree of FROM-clause nodes plus selection, filter,
/// ordering, pagination and registered CTEs.
///
/// Construction is single-threaded builder mutation; a resolved tree is
/// owned by its query and must not be mutated concurrently.
#[derive(Debug, Clone)]
pub struct CriteriaQuery {
    pub(crate) id: QueryId,
    registry: Arc<MetadataRegistry>,
    pub(crate) nodes: Vec<QueryNode>,
    pub(crate) roots: Vec<NodeId>,
    /// Registered CTEs in declaration order.
    pub(crate) ctes: Vec<(String, Box<CriteriaQuery>)>,
    pub(crate) selection: Vec<Selection>,
    pub(crate) filter: Option<CriteriaExpr>,
    pub(crate) order: Vec<CriteriaOrder>,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: Option<u64>,
}

impl CriteriaQuery {
    /// Create an empty query over the given metadata.
    pub fn new(registry: Arc<MetadataRegistry>) -> Self {
        Self {
            id: QueryId::next(),
            registry,
            nodes: Vec::new(),
            roots: Vec::new(),
            ctes: Vec::new(),
            selection: Vec::new(),
            filter: None,
            order: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn registry(&self) -> &Arc<MetadataRegistry> {
        &self.registry
    }

    /// Add a query root for an entity.
    pub fn from_entity(&mut self, entity: &str) -> Result<Root, JoinError> {
        self.registry
            .get(entity)
            .ok_or_else(|| JoinError::UnknownEntity(entity.into()))?;
        let id = self.push_node(QueryNode {
            id: NodeId(0), // fixed up by push_node
            entity: Some(entity.into()),
            parent: None,
            children: Vec::new(),
            correlation_parent: None,
            join_type: JoinType::Inner,
            fetch: false,
            source: NodeSource::Root,
            on: None,
        });
        self.roots.push(id);
        Ok(Root(self.make_ref(id)))
    }

    /// Create a root correlated to a node of an enclosing query, mirroring
    /// its entity type. The enclosing query is only read, never mutated.
    pub fn correlate(
        &mut self,
        outer: &CriteriaQuery,
        node: &impl FromNode,
    ) -> Result<Root, JoinError> {
        let r = node.node_ref();
        if r.query != outer.id {
            return Err(JoinError::UnknownNode);
        }
        let entity = outer.node(r.node).entity.clone();
        let id = self.push_node(QueryNode {
            id: NodeId(0),
            entity,
            parent: None,
            children: Vec::new(),
            correlation_parent: Some(r),
            join_type: JoinType::Inner,
            fetch: false,
            source: NodeSource::CorrelatedRoot,
            on: None,
        });
        self.roots.push(id);
        Ok(Root(self.make_ref(id)))
    }

    /// The correlation parent of a node, if it is a correlated root.
    pub fn correlation_parent(&self, node: &impl FromNode) -> Option<NodeRef> {
        let r = node.node_ref();
        if r.query != self.id {
            return None;
        }
        self.node(r.node).correlation_parent
    }

    /// Register a common table expression. Joins can then target it by name.
    pub fn with_cte(&mut self, name: &str, query: CriteriaQuery) -> Result<(), JoinError> {
        if self.ctes.iter().any(|(n, _)| n == name) {
            return Err(JoinError::DuplicateCte(name.into()));
        }
        self.ctes.push((name.into(), Box::new(query)));
        Ok(())
    }

    /// Add a WHERE predicate (ANDed with existing predicates).
    pub fn filter(&mut self, predicate: CriteriaExpr) -> &mut Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    /// Attach an extra join restriction to a join node, ANDed with any
    /// mapped join condition.
    pub fn on(&mut self, join: &impl FromNode, predicate: CriteriaExpr) -> Result<(), JoinError> {
        let r = join.node_ref();
        if r.query != self.id {
            return Err(JoinError::UnknownNode);
        }
        let node = &mut self.nodes[r.node.0];
        node.on = Some(match node.on.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        Ok(())
    }

    /// Select explicit paths. An empty selection means "the root entity's
    /// columns plus any fetch joins".
    pub fn select(&mut self, paths: Vec<Path>) -> &mut Self {
        self.selection = paths
            .into_iter()
            .map(|path| Selection { path, alias: None })
            .collect();
        self
    }

    /// Add an aliased select item.
    pub fn select_as(&mut self, path: Path, alias: &str) -> &mut Self {
        self.selection.push(Selection {
            path,
            alias: Some(alias.into()),
        });
        self
    }

    /// Append an ordering.
    pub fn order_by(&mut self, path: Path, dir: SortDir) -> &mut Self {
        self.order.push(CriteriaOrder { path, dir });
        self
    }

    pub fn limit(&mut self, limit: u64) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(&mut self, offset: u64) -> &mut Self {
        self.offset = Some(offset);
        self
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn node(&self, id: NodeId) -> &QueryNode {
        &self.nodes[id.0]
    }

    pub fn nodes(&self) -> impl Iterator<Item = &QueryNode> {
        self.nodes.iter()
    }

    pub fn roots(&self) -> impl Iterator<Item = &QueryNode> {
        self.roots.iter().map(|id| self.node(*id))
    }

    pub fn ctes(&self) -> impl Iterator<Item = (&str, &CriteriaQuery)> {
        self.ctes.iter().map(|(n, q)| (n.as_str(), q.as_ref()))
    }

    pub(crate) fn cte_registered(&self, name: &str) -> bool {
        self.ctes.iter().any(|(n, _)| n == name)
    }

    /// Does this query reference any enclosing scope, either through a
    /// correlated root or through a path into another query's nodes?
    pub fn references_outer_scope(&self) -> bool {
        if self
            .nodes
            .iter()
            .any(|n| matches!(n.source, NodeSource::CorrelatedRoot))
        {
            return true;
        }
        let mut paths: Vec<&Path> = Vec::new();
        if let Some(filter) = &self.filter {
            filter.collect_paths(&mut paths);
        }
        for node in &self.nodes {
            if let Some(on) = &node.on {
                on.collect_paths(&mut paths);
            }
        }
        for sel in &self.selection {
            paths.push(&sel.path);
        }
        for ord in &self.order {
            paths.push(&ord.path);
        }
        paths.iter().any(|p| p.node.query != self.id)
    }

    // ------------------------------------------------------------------
    // Internal
    // ------------------------------------------------------------------

    pub(crate) fn make_ref(&self, id: NodeId) -> NodeRef {
        NodeRef {
            query: self.id,
            node: id,
        }
    }

    pub(crate) fn push_node(&mut self, mut node: QueryNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        node.id = id;
        if let Some(parent) = node.parent {
            self.nodes[parent.0].children.push(id);
        }
        self.nodes.push(node);
        id
    }
}
