//! Join resolution.
//!
//! One logic path resolves every kind of join: [`CriteriaQuery::resolve_join`]
//! takes a [`JoinSpec`] and either appends exactly one child node to the
//! parent or fails without touching the tree (validation happens before any
//! mutation). The typed accessors (`join`, `join_collection`, `join_map`,
//! `join_lateral`, ...) are thin adapters that build a `JoinSpec` and wrap
//! the resulting node in the matching handle type.
//!
//! Resolution never reuses an existing node unless the request explicitly
//! asks for it; two identical `join` calls produce two sibling nodes.

use thiserror::Error;

use crate::model::AttributeKind;
use crate::sql::query::JoinType;

use super::tree::{
    CollectionJoin, CriteriaQuery, FromNode, Join, ListJoin, MapJoin, NodeId, NodeRef, NodeSource,
    QueryNode, SetJoin,
};

/// Errors raised while resolving joins. All are caller-recoverable by
/// correcting the query; the tree is never left partially mutated.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum JoinError {
    #[error("Unknown entity: '{0}'")]
    UnknownEntity(String),

    #[error("Node does not belong to this query")]
    UnknownNode,

    #[error("Unknown attribute '{attribute}' on entity '{entity}'")]
    AttributeNotFound { entity: String, attribute: String },

    #[error(
        "Attribute '{entity}.{attribute}' is {actual}, but a {expected} join was requested"
    )]
    KindMismatch {
        entity: String,
        attribute: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Attribute '{entity}.{attribute}' is not an association and cannot be joined")]
    NotJoinable { entity: String, attribute: String },

    #[error("Unknown common table expression: '{0}'")]
    UnknownCte(String),

    #[error("Common table expression '{0}' is already registered")]
    DuplicateCte(String),

    #[error(
        "Derived join subquery references the enclosing query; use a lateral join to make the \
         enclosing FROM clause visible"
    )]
    UncorrelatedDerivedJoin,

    #[error("Lateral joins require a subquery-derived target")]
    LateralNotDerived,

    #[error("Fetch joins require a mapped association attribute")]
    FetchRequiresAttribute,

    #[error("Attribute joins require an entity-typed parent node")]
    UntypedParent,
}

/// What a join resolves against.
#[derive(Debug, Clone)]
pub enum JoinTarget {
    /// A mapped attribute of the parent's entity, with an optional plurality
    /// the caller insists on (typed accessors set this).
    Attribute {
        name: String,
        expected: Option<AttributeKind>,
    },
    /// An explicit entity join.
    Entity(String),
    /// A fully built subquery joined as a derived table.
    Derived(Box<CriteriaQuery>),
    /// A registered common table expression, by name.
    Cte(String),
}

/// A join request: target plus join type and flags.
#[derive(Debug, Clone)]
pub struct JoinSpec {
    pub target: JoinTarget,
    pub join_type: JoinType,
    /// Only valid for derived targets.
    pub lateral: bool,
    /// Eager-fetch: only valid for attribute targets.
    pub fetch: bool,
    /// Reuse an existing equivalent join instead of creating a sibling.
    pub reuse: bool,
}

impl JoinSpec {
    pub fn attribute(name: &str) -> Self {
        Self::for_target(JoinTarget::Attribute {
            name: name.into(),
            expected: None,
        })
    }

    pub fn attribute_of_kind(name: &str, kind: AttributeKind) -> Self {
        Self::for_target(JoinTarget::Attribute {
            name: name.into(),
            expected: Some(kind),
        })
    }

    pub fn entity(entity: &str) -> Self {
        Self::for_target(JoinTarget::Entity(entity.into()))
    }

    pub fn derived(query: CriteriaQuery) -> Self {
        Self::for_target(JoinTarget::Derived(Box::new(query)))
    }

    pub fn cte(name: &str) -> Self {
        Self::for_target(JoinTarget::Cte(name.into()))
    }

    fn for_target(target: JoinTarget) -> Self {
        Self {
            target,
            join_type: JoinType::Inner,
            lateral: false,
            fetch: false,
            reuse: false,
        }
    }

    pub fn join_type(mut self, join_type: JoinType) -> Self {
        self.join_type = join_type;
        self
    }

    pub fn lateral(mut self) -> Self {
        self.lateral = true;
        self
    }

    pub fn fetch(mut self) -> Self {
        self.fetch = true;
        self
    }

    pub fn reuse(mut self) -> Self {
        self.reuse = true;
        self
    }
}

impl CriteriaQuery {
    /// Resolve a join request against a parent node.
    ///
    /// On success exactly one child node is appended to the parent (or, with
    /// `reuse`, an existing equivalent child is returned). On error the tree
    /// is untouched.
    pub fn resolve_join(
        &mut self,
        parent: &impl FromNode,
        spec: JoinSpec,
    ) -> Result<NodeRef, JoinError> {
        let pref = parent.node_ref();
        if pref.query != self.id {
            return Err(JoinError::UnknownNode);
        }
        let parent_id = pref.node;

        let JoinSpec {
            target,
            join_type,
            lateral,
            fetch,
            reuse,
        } = spec;

        match target {
            JoinTarget::Attribute { name, expected } => {
                if lateral {
                    return Err(JoinError::LateralNotDerived);
                }
                let parent_entity = self
                    .node(parent_id)
                    .entity
                    .clone()
                    .ok_or(JoinError::UntypedParent)?;
                let descriptor = self
                    .registry()
                    .get(&parent_entity)
                    .ok_or_else(|| JoinError::UnknownEntity(parent_entity.clone()))?;
                let attr =
                    descriptor
                        .attribute(&name)
                        .ok_or_else(|| JoinError::AttributeNotFound {
                            entity: parent_entity.clone(),
                            attribute: name.clone(),
                        })?;
                let target_entity =
                    attr.target_entity
                        .clone()
                        .ok_or_else(|| JoinError::NotJoinable {
                            entity: parent_entity.clone(),
                            attribute: name.clone(),
                        })?;
                if let Some(expected) = expected {
                    if attr.kind != expected {
                        return Err(JoinError::KindMismatch {
                            entity: parent_entity,
                            attribute: name,
                            expected: expected.label(),
                            actual: attr.kind.label(),
                        });
                    }
                }

                if reuse {
                    if let Some(existing) =
                        self.find_attribute_join(parent_id, &name, join_type)
                    {
                        return Ok(self.make_ref(existing));
                    }
                }

                let id = self.push_node(QueryNode {
                    id: NodeId(0),
                    entity: Some(target_entity),
                    parent: Some(parent_id),
                    children: Vec::new(),
                    correlation_parent: None,
                    join_type,
                    fetch,
                    source: NodeSource::AttributeJoin { attribute: name },
                    on: None,
                });
                Ok(self.make_ref(id))
            }

            JoinTarget::Entity(entity) => {
                if lateral {
                    return Err(JoinError::LateralNotDerived);
                }
                if fetch {
                    return Err(JoinError::FetchRequiresAttribute);
                }
                self.registry()
                    .get(&entity)
                    .ok_or_else(|| JoinError::UnknownEntity(entity.clone()))?;
                let id = self.push_node(QueryNode {
                    id: NodeId(0),
                    entity: Some(entity),
                    parent: Some(parent_id),
                    children: Vec::new(),
                    correlation_parent: None,
                    join_type,
                    fetch: false,
                    source: NodeSource::EntityJoin,
                    on: None,
                });
                Ok(self.make_ref(id))
            }

            JoinTarget::Derived(subquery) => {
                if fetch {
                    return Err(JoinError::FetchRequiresAttribute);
                }
                // Without lateral capability the derived table cannot see the
                // enclosing FROM clause; a correlated subquery would silently
                // lose its correlation, so this fails fast instead.
                if !lateral && subquery.references_outer_scope() {
                    return Err(JoinError::UncorrelatedDerivedJoin);
                }
                let id = self.push_node(QueryNode {
                    id: NodeId(0),
                    entity: None,
                    parent: Some(parent_id),
                    children: Vec::new(),
                    correlation_parent: None,
                    join_type,
                    fetch: false,
                    source: NodeSource::DerivedJoin { subquery, lateral },
                    on: None,
                });
                Ok(self.make_ref(id))
            }

            JoinTarget::Cte(name) => {
                if lateral {
                    return Err(JoinError::LateralNotDerived);
                }
                if fetch {
                    return Err(JoinError::FetchRequiresAttribute);
                }
                if !self.cte_registered(&name) {
                    return Err(JoinError::UnknownCte(name));
                }
                let id = self.push_node(QueryNode {
                    id: NodeId(0),
                    entity: None,
                    parent: Some(parent_id),
                    children: Vec::new(),
                    correlation_parent: None,
                    join_type,
                    fetch: false,
                    source: NodeSource::CteJoin { cte: name },
                    on: None,
                });
                Ok(self.make_ref(id))
            }
        }
    }

    fn find_attribute_join(
        &self,
        parent: NodeId,
        attribute: &str,
        join_type: JoinType,
    ) -> Option<NodeId> {
        self.node(parent).children.iter().copied().find(|&child| {
            let node = self.node(child);
            node.join_type == join_type
                && matches!(
                    &node.source,
                    NodeSource::AttributeJoin { attribute: a } if a == attribute
                )
        })
    }

    // ------------------------------------------------------------------
    // Typed accessors (thin adapters over resolve_join)
    // ------------------------------------------------------------------

    /// Join a mapped association of any plurality (inner join).
    pub fn join(&mut self, parent: &impl FromNode, attribute: &str) -> Result<Join, JoinError> {
        self.join_with(parent, attribute, JoinType::Inner)
    }

    /// Join a mapped association with an explicit join type.
    pub fn join_with(
        &mut self,
        parent: &impl FromNode,
        attribute: &str,
        join_type: JoinType,
    ) -> Result<Join, JoinError> {
        self.resolve_join(parent, JoinSpec::attribute(attribute).join_type(join_type))
            .map(Join)
    }

    /// Join a mapped association, reusing an existing equivalent join node
    /// when one exists.
    pub fn join_reusing(
        &mut self,
        parent: &impl FromNode,
        attribute: &str,
        join_type: JoinType,
    ) -> Result<Join, JoinError> {
        self.resolve_join(
            parent,
            JoinSpec::attribute(attribute).join_type(join_type).reuse(),
        )
        .map(Join)
    }

    /// Join a collection attribute.
    pub fn join_collection(
        &mut self,
        parent: &impl FromNode,
        attribute: &str,
    ) -> Result<CollectionJoin, JoinError> {
        self.join_collection_with(parent, attribute, JoinType::Inner)
    }

    pub fn join_collection_with(
        &mut self,
        parent: &impl FromNode,
        attribute: &str,
        join_type: JoinType,
    ) -> Result<CollectionJoin, JoinError> {
        self.resolve_join(
            parent,
            JoinSpec::attribute_of_kind(attribute, AttributeKind::Collection)
                .join_type(join_type),
        )
        .map(CollectionJoin)
    }

    /// Join a set attribute.
    pub fn join_set(
        &mut self,
        parent: &impl FromNode,
        attribute: &str,
    ) -> Result<SetJoin, JoinError> {
        self.join_set_with(parent, attribute, JoinType::Inner)
    }

    pub fn join_set_with(
        &mut self,
        parent: &impl FromNode,
        attribute: &str,
        join_type: JoinType,
    ) -> Result<SetJoin, JoinError> {
        self.resolve_join(
            parent,
            JoinSpec::attribute_of_kind(attribute, AttributeKind::Set).join_type(join_type),
        )
        .map(SetJoin)
    }

    /// Join a list attribute.
    pub fn join_list(
        &mut self,
        parent: &impl FromNode,
        attribute: &str,
    ) -> Result<ListJoin, JoinError> {
        self.join_list_with(parent, attribute, JoinType::Inner)
    }

    pub fn join_list_with(
        &mut self,
        parent: &impl FromNode,
        attribute: &str,
        join_type: JoinType,
    ) -> Result<ListJoin, JoinError> {
        self.resolve_join(
            parent,
            JoinSpec::attribute_of_kind(attribute, AttributeKind::List).join_type(join_type),
        )
        .map(ListJoin)
    }

    /// Join a map attribute. The handle exposes key and value paths.
    pub fn join_map(
        &mut self,
        parent: &impl FromNode,
        attribute: &str,
    ) -> Result<MapJoin, JoinError> {
        self.join_map_with(parent, attribute, JoinType::Inner)
    }

    pub fn join_map_with(
        &mut self,
        parent: &impl FromNode,
        attribute: &str,
        join_type: JoinType,
    ) -> Result<MapJoin, JoinError> {
        self.resolve_join(
            parent,
            JoinSpec::attribute_of_kind(attribute, AttributeKind::Map).join_type(join_type),
        )
        .map(MapJoin)
    }

    /// Join an entity with no mapped association (restrict with
    /// [`CriteriaQuery::on`]).
    pub fn join_entity(
        &mut self,
        parent: &impl FromNode,
        entity: &str,
    ) -> Result<Join, JoinError> {
        self.join_entity_with(parent, entity, JoinType::Inner)
    }

    pub fn join_entity_with(
        &mut self,
        parent: &impl FromNode,
        entity: &str,
        join_type: JoinType,
    ) -> Result<Join, JoinError> {
        self.resolve_join(parent, JoinSpec::entity(entity).join_type(join_type))
            .map(Join)
    }

    /// Join a fully built subquery as a derived table.
    pub fn join_derived(
        &mut self,
        parent: &impl FromNode,
        subquery: CriteriaQuery,
        join_type: JoinType,
    ) -> Result<Join, JoinError> {
        self.resolve_join(parent, JoinSpec::derived(subquery).join_type(join_type))
            .map(Join)
    }

    /// Join a subquery laterally: the subquery may reference the enclosing
    /// FROM clause.
    pub fn join_lateral(
        &mut self,
        parent: &impl FromNode,
        subquery: CriteriaQuery,
        join_type: JoinType,
    ) -> Result<Join, JoinError> {
        self.resolve_join(
            parent,
            JoinSpec::derived(subquery).join_type(join_type).lateral(),
        )
        .map(Join)
    }

    /// Join a registered common table expression.
    pub fn join_cte(&mut self, parent: &impl FromNode, name: &str) -> Result<Join, JoinError> {
        self.join_cte_with(parent, name, JoinType::Inner)
    }

    pub fn join_cte_with(
        &mut self,
        parent: &impl FromNode,
        name: &str,
        join_type: JoinType,
    ) -> Result<Join, JoinError> {
        self.resolve_join(parent, JoinSpec::cte(name).join_type(join_type))
            .map(Join)
    }

    /// Eager-fetch join of a mapped association: the joined entity's columns
    /// are added to the select list during translation.
    pub fn fetch(&mut self, parent: &impl FromNode, attribute: &str) -> Result<Join, JoinError> {
        self.fetch_with(parent, attribute, JoinType::Inner)
    }

    pub fn fetch_with(
        &mut self,
        parent: &impl FromNode,
        attribute: &str,
        join_type: JoinType,
    ) -> Result<Join, JoinError> {
        self.resolve_join(
            parent,
            JoinSpec::attribute(attribute).join_type(join_type).fetch(),
        )
        .map(Join)
    }
}
