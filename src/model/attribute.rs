//! Entity, attribute and column descriptors.
//!
//! The metadata layer the rest of the core consumes: which attributes an
//! entity has, their plurality, laziness, backing columns and generation
//! policies. Metadata is registered programmatically (annotation processing
//! and mapping-file bootstrap are external collaborators) and validated as a
//! whole by the [`super::registry::MetadataRegistry`].

use inflector::Inflector;
use serde::{Deserialize, Serialize};

use crate::generation::ValueGenerationPolicy;

/// Plurality of an attribute, which decides the valid join accessors and the
/// shape of the join result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    /// A basic column or a to-one association.
    Singular,
    /// An unordered to-many association (bag semantics).
    Collection,
    /// An ordered to-many association.
    List,
    /// A deduplicated to-many association.
    Set,
    /// A keyed to-many association; exposes key and value accessors when
    /// joined.
    Map,
}

impl AttributeKind {
    /// Is this a to-many kind?
    pub fn is_plural(&self) -> bool {
        !matches!(self, AttributeKind::Singular)
    }

    /// Accessor label used in kind-mismatch errors.
    pub fn label(&self) -> &'static str {
        match self {
            AttributeKind::Singular => "singular",
            AttributeKind::Collection => "collection",
            AttributeKind::List => "list",
            AttributeKind::Set => "set",
            AttributeKind::Map => "map",
        }
    }
}

/// A mapped column: physical name plus its value generation policy.
#[derive(Debug, Clone)]
pub struct ColumnDescriptor {
    pub name: String,
    pub generation: ValueGenerationPolicy,
}

impl ColumnDescriptor {
    /// An ordinary user-written column.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            generation: ValueGenerationPolicy::none(),
        }
    }

    /// Attach a generation policy.
    pub fn generated(mut self, policy: ValueGenerationPolicy) -> Self {
        self.generation = policy;
        self
    }
}

/// A mapped attribute of an entity.
#[derive(Debug, Clone)]
pub struct AttributeDescriptor {
    pub name: String,
    pub kind: AttributeKind,
    /// Lazy attributes start unloaded and only join dirty checking once read.
    pub lazy: bool,
    /// Backing column: the value column of a basic attribute, or the
    /// foreign-key column of a to-one association (owned by this entity's
    /// table).
    pub column: Option<ColumnDescriptor>,
    /// Target entity of an association; `None` for basic attributes.
    pub target_entity: Option<String>,
    /// For to-many associations: the foreign-key column on the target
    /// entity's table pointing back at this entity.
    pub mapped_by_column: Option<String>,
    /// For map attributes: the key column on the target entity's table.
    pub key_column: Option<String>,
    /// For list attributes: the order column on the target entity's table.
    pub order_column: Option<String>,
}

impl AttributeDescriptor {
    /// A basic singular attribute backed by a column.
    pub fn basic(name: &str, column: ColumnDescriptor) -> Self {
        Self {
            name: name.into(),
            kind: AttributeKind::Singular,
            lazy: false,
            column: Some(column),
            target_entity: None,
            mapped_by_column: None,
            key_column: None,
            order_column: None,
        }
    }

    /// A to-one association: singular, owning a foreign-key column.
    pub fn many_to_one(name: &str, target_entity: &str, fk_column: ColumnDescriptor) -> Self {
        Self {
            name: name.into(),
            kind: AttributeKind::Singular,
            lazy: false,
            column: Some(fk_column),
            target_entity: Some(target_entity.into()),
            mapped_by_column: None,
            key_column: None,
            order_column: None,
        }
    }

    /// An unordered to-many association, mapped by a foreign-key column on
    /// the target side.
    pub fn collection(name: &str, target_entity: &str, mapped_by_column: &str) -> Self {
        Self::plural(name, AttributeKind::Collection, target_entity, mapped_by_column)
    }

    /// A set-valued to-many association.
    pub fn set(name: &str, target_entity: &str, mapped_by_column: &str) -> Self {
        Self::plural(name, AttributeKind::Set, target_entity, mapped_by_column)
    }

    /// A list-valued to-many association. Attach the order column with
    /// [`AttributeDescriptor::ordered_by`].
    pub fn list(name: &str, target_entity: &str, mapped_by_column: &str) -> Self {
        Self::plural(name, AttributeKind::List, target_entity, mapped_by_column)
    }

    /// A map-valued to-many association keyed by a column on the target side.
    pub fn map(name: &str, target_entity: &str, mapped_by_column: &str, key_column: &str) -> Self {
        let mut attr = Self::plural(name, AttributeKind::Map, target_entity, mapped_by_column);
        attr.key_column = Some(key_column.into());
        attr
    }

    fn plural(name: &str, kind: AttributeKind, target: &str, mapped_by: &str) -> Self {
        Self {
            name: name.into(),
            kind,
            lazy: false,
            column: None,
            target_entity: Some(target.into()),
            mapped_by_column: Some(mapped_by.into()),
            key_column: None,
            order_column: None,
        }
    }

    /// Mark the attribute lazy.
    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    /// Set the order column of a list attribute.
    pub fn ordered_by(mut self, order_column: &str) -> Self {
        self.order_column = Some(order_column.into());
        self
    }

    /// Is this an association (it has a target entity)?
    pub fn is_association(&self) -> bool {
        self.target_entity.is_some()
    }
}

/// A mapped entity: name, table, identifier and attributes.
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    pub name: String,
    pub schema: Option<String>,
    pub table: String,
    /// Name of the identifier attribute.
    pub id: String,
    /// Attributes in declaration order; order is what makes generated SQL
    /// deterministic.
    pub attributes: Vec<AttributeDescriptor>,
}

impl EntityDescriptor {
    /// Create an entity. The table name defaults to the snake_cased plural of
    /// the entity name (`OrderLine` → `order_lines`).
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            schema: None,
            table: name.to_snake_case().to_plural(),
            id: String::new(),
            attributes: Vec::new(),
        }
    }

    /// Override the table name.
    pub fn with_table(mut self, table: &str) -> Self {
        self.table = table.into();
        self
    }

    /// Set the schema.
    pub fn with_schema(mut self, schema: &str) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Declare the identifier attribute. Added like any other attribute.
    pub fn with_id(mut self, attr: AttributeDescriptor) -> Self {
        self.id = attr.name.clone();
        self.attributes.insert(0, attr);
        self
    }

    /// Add an attribute.
    pub fn with_attribute(mut self, attr: AttributeDescriptor) -> Self {
        self.attributes.push(attr);
        self
    }

    /// Look up an attribute by name.
    pub fn attribute(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// The identifier attribute.
    ///
    /// Present on any registry-validated descriptor.
    pub fn id_attribute(&self) -> Option<&AttributeDescriptor> {
        self.attribute(&self.id)
    }

    /// The identifier column name.
    pub fn id_column(&self) -> Option<&str> {
        self.id_attribute()
            .and_then(|a| a.column.as_ref())
            .map(|c| c.name.as_str())
    }

    /// Attributes that own a column on this entity's table (basic attributes
    /// and to-one associations), in declaration order.
    pub fn column_attributes(&self) -> impl Iterator<Item = &AttributeDescriptor> {
        self.attributes.iter().filter(|a| a.column.is_some())
    }
}
