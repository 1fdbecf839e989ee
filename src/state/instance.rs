//! Managed entity instances and their attribute state.

use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

use crate::model::value::{hash_value, Value};

/// Lifecycle status of an instance within a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityStatus {
    /// Known to the application, not yet to the session.
    Transient,
    /// Managed, in sync with the database as of the last load/flush.
    ManagedClean,
    /// Managed with unflushed attribute changes.
    ManagedDirty,
    /// No longer tracked; loaded values remain readable.
    Detached,
    /// Scheduled for deletion; terminal until the delete executes.
    Removed,
}

/// Per-attribute slot: loaded value or lazy not-yet-loaded marker.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeState {
    Loaded(Value),
    NotLoaded,
}

/// Identity of a managed instance: entity name plus identifier hash.
///
/// Instances persisted without a known identifier (database-generated ids)
/// get a session-local pending key that stays stable for the session's
/// lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    entity: String,
    id_hash: u64,
    pending: bool,
}

impl EntityKey {
    pub fn assigned(entity: &str, id: &Value) -> Self {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        hash_value(id, &mut hasher);
        Self {
            entity: entity.into(),
            id_hash: hasher.finish(),
            pending: false,
        }
    }

    pub fn pending(entity: &str, sequence: u64) -> Self {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        sequence.hash(&mut hasher);
        Self {
            entity: entity.into(),
            id_hash: hasher.finish(),
            pending: true,
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }
}

/// A managed instance: attribute slots, the loaded snapshot dirty checking
/// compares against, and the set of explicitly written attributes.
#[derive(Debug, Clone)]
pub struct ManagedInstance {
    pub entity: String,
    pub status: EntityStatus,
    /// Awaiting its INSERT at the next flush.
    pub pending_insert: bool,
    values: HashMap<String, AttributeState>,
    snapshot: HashMap<String, Value>,
    written: HashSet<String>,
}

impl ManagedInstance {
    /// A fresh instance for persist: every provided attribute is loaded, the
    /// snapshot is empty until the insert flushes.
    pub fn new_for_persist(entity: &str, values: HashMap<String, Value>) -> Self {
        Self {
            entity: entity.into(),
            status: EntityStatus::ManagedClean,
            pending_insert: true,
            values: values
                .into_iter()
                .map(|(k, v)| (k, AttributeState::Loaded(v)))
                .collect(),
            snapshot: HashMap::new(),
            written: HashSet::new(),
        }
    }

    /// An instance hydrated from a database row. `loaded` holds the eagerly
    /// selected attributes; `unloaded` the lazy attributes left behind.
    pub fn from_row(
        entity: &str,
        loaded: HashMap<String, Value>,
        unloaded: impl IntoIterator<Item = String>,
    ) -> Self {
        let mut values: HashMap<String, AttributeState> = loaded
            .iter()
            .map(|(k, v)| (k.clone(), AttributeState::Loaded(v.clone())))
            .collect();
        for attr in unloaded {
            values.entry(attr).or_insert(AttributeState::NotLoaded);
        }
        Self {
            entity: entity.into(),
            status: EntityStatus::ManagedClean,
            pending_insert: false,
            values,
            snapshot: loaded,
            written: HashSet::new(),
        }
    }

    pub fn attribute_state(&self, attribute: &str) -> Option<&AttributeState> {
        self.values.get(attribute)
    }

    pub fn loaded_value(&self, attribute: &str) -> Option<&Value> {
        match self.values.get(attribute) {
            Some(AttributeState::Loaded(v)) => Some(v),
            _ => None,
        }
    }

    /// Record a lazily loaded value: loaded and clean, it now participates
    /// in dirty checking like any eager attribute.
    pub fn mark_loaded(&mut self, attribute: &str, value: Value) {
        self.values
            .insert(attribute.into(), AttributeState::Loaded(value.clone()));
        self.snapshot.insert(attribute.into(), value);
    }

    /// Apply an attribute write and recompute dirtiness.
    ///
    /// With `snapshot_checking`, dirtiness is value comparison against the
    /// loaded snapshot: writing an attribute back to its loaded value leaves
    /// the instance clean. Without it, every explicit write counts.
    pub fn write(&mut self, attribute: &str, value: Value, snapshot_checking: bool) {
        self.values
            .insert(attribute.into(), AttributeState::Loaded(value));
        self.written.insert(attribute.into());
        if self.pending_insert {
            return; // inserts carry all values; no update dirtiness involved
        }
        let dirty = if snapshot_checking {
            !self.dirty_attributes(true).is_empty()
        } else {
            !self.written.is_empty()
        };
        self.status = if dirty {
            EntityStatus::ManagedDirty
        } else {
            EntityStatus::ManagedClean
        };
    }

    /// Attributes to include in an UPDATE.
    ///
    /// Snapshot mode: loaded values that differ from the snapshot (an
    /// attribute written but never loaded counts as dirty - there is nothing
    /// to compare against). Explicit mode: exactly the written attributes;
    /// unread lazy attributes are unchanged unless explicitly set.
    pub fn dirty_attributes(&self, snapshot_checking: bool) -> HashSet<String> {
        if !snapshot_checking {
            return self.written.clone();
        }
        self.values
            .iter()
            .filter_map(|(name, state)| match state {
                AttributeState::Loaded(value) => match self.snapshot.get(name) {
                    Some(snap) if snap == value => None,
                    Some(_) => Some(name.clone()),
                    // never loaded from the database: only dirty if written
                    None if self.written.contains(name) => Some(name.clone()),
                    None => None,
                },
                AttributeState::NotLoaded => None,
            })
            .collect()
    }

    /// All currently loaded attribute values, for write planning.
    pub fn loaded_values(&self) -> HashMap<String, Value> {
        self.values
            .iter()
            .filter_map(|(name, state)| match state {
                AttributeState::Loaded(v) => Some((name.clone(), v.clone())),
                AttributeState::NotLoaded => None,
            })
            .collect()
    }

    /// After a successful flush statement: fold in generated values, reset
    /// the snapshot to the current loaded state, clear the written set.
    pub fn apply_flush(&mut self, generated: impl IntoIterator<Item = (String, Value)>) {
        for (attribute, value) in generated {
            self.values
                .insert(attribute.clone(), AttributeState::Loaded(value.clone()));
        }
        self.snapshot = self
            .values
            .iter()
            .filter_map(|(name, state)| match state {
                AttributeState::Loaded(v) => Some((name.clone(), v.clone())),
                AttributeState::NotLoaded => None,
            })
            .collect();
        self.written.clear();
        self.pending_insert = false;
        self.status = EntityStatus::ManagedClean;
    }
}
