//! Metadata registry: whole-mapping validation and flush ordering.
//!
//! Mapping mistakes are fatal at build time, not query time: the registry
//! refuses to build when an association targets an unknown entity, an
//! identifier is missing, or a generation policy is self-contradictory
//! (a database-generated column carrying an in-memory generator).

use std::collections::HashMap;

use once_cell::sync::Lazy;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use regex::Regex;
use thiserror::Error;

use crate::generation::{GenerationOrigin, GenerationTiming};

use super::attribute::{AttributeKind, EntityDescriptor};

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex"));

/// Errors raised while building the metadata registry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MappingError {
    #[error("Duplicate entity: '{0}'")]
    DuplicateEntity(String),

    #[error("Unknown entity: '{0}'")]
    UnknownEntity(String),

    #[error("Entity '{entity}' has no identifier attribute")]
    MissingIdAttribute { entity: String },

    #[error("Identifier attribute '{entity}.{attribute}' must be a basic eager column")]
    InvalidIdAttribute { entity: String, attribute: String },

    #[error("Duplicate attribute '{attribute}' on entity '{entity}'")]
    DuplicateAttribute { entity: String, attribute: String },

    #[error("Invalid identifier '{name}' in {context}")]
    InvalidIdentifier { name: String, context: String },

    #[error("Attribute '{entity}.{attribute}' references unknown entity '{target}'")]
    UnknownTargetEntity {
        entity: String,
        attribute: String,
        target: String,
    },

    #[error(
        "Column '{entity}.{column}' is database-generated but carries an in-memory generator"
    )]
    GenerationPolicyConflict { entity: String, column: String },

    #[error("Column '{entity}.{column}' is generated in memory but has no generator")]
    MissingGenerator { entity: String, column: String },

    #[error("Invalid mapping: {0}")]
    InvalidMapping(String),
}

/// Validated entity metadata plus the derived flush order.
#[derive(Debug, Clone)]
pub struct MetadataRegistry {
    entities: HashMap<String, EntityDescriptor>,
    flush_order: Vec<String>,
}

impl MetadataRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder {
            entities: Vec::new(),
        }
    }

    /// Look up an entity, `None` when unregistered.
    pub fn get(&self, name: &str) -> Option<&EntityDescriptor> {
        self.entities.get(name)
    }

    /// Look up an entity or fail.
    pub fn entity(&self, name: &str) -> Result<&EntityDescriptor, MappingError> {
        self.entities
            .get(name)
            .ok_or_else(|| MappingError::UnknownEntity(name.into()))
    }

    /// Entity names in insert-safe order: an entity's to-one targets come
    /// before it, and the owners of its to-many collections come before the
    /// elements. Deletes run in the reverse of this order.
    pub fn flush_order(&self) -> &[String] {
        &self.flush_order
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityDescriptor> {
        self.entities.values()
    }
}

/// Collects entities, then validates the mapping as a whole.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    entities: Vec<EntityDescriptor>,
}

impl RegistryBuilder {
    pub fn register(mut self, entity: EntityDescriptor) -> Self {
        self.entities.push(entity);
        self
    }

    /// Validate everything and derive the flush order.
    pub fn build(self) -> Result<MetadataRegistry, MappingError> {
        let mut entities: HashMap<String, EntityDescriptor> = HashMap::new();
        let registration_order: Vec<String> =
            self.entities.iter().map(|e| e.name.clone()).collect();

        for entity in self.entities {
            if entities.contains_key(&entity.name) {
                return Err(MappingError::DuplicateEntity(entity.name));
            }
            entities.insert(entity.name.clone(), entity);
        }

        for entity in entities.values() {
            validate_entity(entity, &entities)?;
        }

        let flush_order = derive_flush_order(&entities, &registration_order);

        Ok(MetadataRegistry {
            entities,
            flush_order,
        })
    }
}

fn check_identifier(name: &str, context: &str) -> Result<(), MappingError> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(MappingError::InvalidIdentifier {
            name: name.into(),
            context: context.into(),
        })
    }
}

fn validate_entity(
    entity: &EntityDescriptor,
    all: &HashMap<String, EntityDescriptor>,
) -> Result<(), MappingError> {
    check_identifier(&entity.name, "entity name")?;
    check_identifier(&entity.table, &format!("table of '{}'", entity.name))?;

    // Identifier attribute: present, basic, eager, column-backed.
    if entity.id.is_empty() {
        return Err(MappingError::MissingIdAttribute {
            entity: entity.name.clone(),
        });
    }
    let id = entity
        .id_attribute()
        .ok_or_else(|| MappingError::MissingIdAttribute {
            entity: entity.name.clone(),
        })?;
    if id.kind != AttributeKind::Singular || id.is_association() || id.lazy || id.column.is_none() {
        return Err(MappingError::InvalidIdAttribute {
            entity: entity.name.clone(),
            attribute: id.name.clone(),
        });
    }

    let mut seen = std::collections::HashSet::new();
    for attr in &entity.attributes {
        check_identifier(&attr.name, &format!("attribute of '{}'", entity.name))?;
        if !seen.insert(attr.name.as_str()) {
            return Err(MappingError::DuplicateAttribute {
                entity: entity.name.clone(),
                attribute: attr.name.clone(),
            });
        }

        if let Some(column) = &attr.column {
            check_identifier(&column.name, &format!("column of '{}'", entity.name))?;

            // A policy may not claim database origin and hold a generator,
            // and an in-memory generated column needs its generator.
            let policy = &column.generation;
            match policy.origin {
                GenerationOrigin::Database if policy.generator.is_some() => {
                    return Err(MappingError::GenerationPolicyConflict {
                        entity: entity.name.clone(),
                        column: column.name.clone(),
                    });
                }
                GenerationOrigin::InMemory
                    if policy.timing != GenerationTiming::Never && policy.generator.is_none() =>
                {
                    return Err(MappingError::MissingGenerator {
                        entity: entity.name.clone(),
                        column: column.name.clone(),
                    });
                }
                _ => {}
            }
        }

        if let Some(target) = &attr.target_entity {
            if !all.contains_key(target) {
                return Err(MappingError::UnknownTargetEntity {
                    entity: entity.name.clone(),
                    attribute: attr.name.clone(),
                    target: target.clone(),
                });
            }
        }

        match attr.kind {
            AttributeKind::Singular => {}
            AttributeKind::Map => {
                if attr.key_column.is_none() {
                    return Err(MappingError::InvalidMapping(format!(
                        "map attribute '{}.{}' has no key column",
                        entity.name, attr.name
                    )));
                }
                check_plural(entity, attr)?;
            }
            AttributeKind::Collection | AttributeKind::List | AttributeKind::Set => {
                check_plural(entity, attr)?;
            }
        }
    }

    Ok(())
}

fn check_plural(
    entity: &EntityDescriptor,
    attr: &super::attribute::AttributeDescriptor,
) -> Result<(), MappingError> {
    if attr.target_entity.is_none() || attr.mapped_by_column.is_none() {
        return Err(MappingError::InvalidMapping(format!(
            "plural attribute '{}.{}' needs a target entity and a mapped-by column",
            entity.name, attr.name
        )));
    }
    Ok(())
}

/// Topological order over association dependencies. To-one targets precede
/// their owners; collection owners precede their elements. Mappings with
/// reference cycles fall back to registration order.
fn derive_flush_order(
    entities: &HashMap<String, EntityDescriptor>,
    registration_order: &[String],
) -> Vec<String> {
    let mut graph: DiGraph<String, ()> = DiGraph::new();
    let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();

    for name in registration_order {
        nodes.insert(name.as_str(), graph.add_node(name.clone()));
    }

    for entity in entities.values() {
        let owner = nodes[entity.name.as_str()];
        for attr in &entity.attributes {
            let Some(target) = attr.target_entity.as_deref() else {
                continue;
            };
            if target == entity.name {
                continue; // self-references don't constrain the order
            }
            let target_node = nodes[target];
            match attr.kind {
                // FK lives on the owner: the target row must exist first.
                AttributeKind::Singular => {
                    graph.add_edge(target_node, owner, ());
                }
                // FK lives on the element: the owner row must exist first.
                _ => {
                    graph.add_edge(owner, target_node, ());
                }
            }
        }
    }

    match toposort(&graph, None) {
        Ok(order) => order.into_iter().map(|n| graph[n].clone()).collect(),
        Err(_) => {
            tracing::warn!("association cycle in mapping; flushing in registration order");
            registration_order.to_vec()
        }
    }
}
