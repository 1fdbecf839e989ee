//! The session: a single-threaded unit of work.
//!
//! A session owns its executor and an identity map of managed instances. It
//! assumes exclusive ownership of its entity graph by one logical thread of
//! control for its lifetime; nothing here is synchronized.
//!
//! Flush walks pending inserts in dependency order, then updates, then
//! deletes in reverse dependency order, planning each statement through
//! [`crate::translate::write`] and executing it synchronously. A rejected
//! statement surfaces as [`FlushError::Statement`] with the entity key
//! intact and the instance still in its pre-flush dirty state, so the
//! caller can correct and retry; there is no automatic retry and no
//! partial-flush recovery - rollback means discarding the unit of work
//! ([`Session::clear`]) or reloading.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, trace};

use crate::config::{Config, DirtyChecking};
use crate::criteria::CriteriaQuery;
use crate::generation::{GenerationOrigin, GenerationTiming};
use crate::model::{AttributeDescriptor, EntityDescriptor, MetadataRegistry, Value};
use crate::sql::dialect::Dialect;
use crate::sql::expr::{col, param, ExprExt};
use crate::sql::query::{Query, SelectExpr, TableRef};
use crate::translate::{
    plan_delete, plan_insert, plan_update, RefreshPlan, SelectTranslator, TranslateError,
};

use super::executor::{ExecError, Row, StatementExecutor};
use super::instance::{AttributeState, EntityKey, EntityStatus, ManagedInstance};

/// A statement failed during flush. The referenced entity keeps its
/// pre-flush dirty state so the flush can be retried after correction.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("flush failed for entity '{entity}': {source}")]
pub struct FlushError {
    pub entity: String,
    pub key: EntityKey,
    #[source]
    pub source: ExecError,
}

/// Errors raised by session operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("Unknown entity: '{0}'")]
    UnknownEntity(String),

    #[error("Unknown attribute '{attribute}' on entity '{entity}'")]
    UnknownAttribute { entity: String, attribute: String },

    #[error("Attribute '{attribute}' on entity '{entity}' is not a column attribute")]
    NotAColumn { entity: String, attribute: String },

    #[error("No instance managed under the given key")]
    NotManaged,

    #[error("Instance is detached from this session")]
    InstanceDetached,

    #[error("Instance is scheduled for removal")]
    InstanceRemoved,

    #[error("Entity '{entity}' with identifier {id:?} not found")]
    NotFound { entity: String, id: Value },

    #[error("Entity '{0}' has no identifier value")]
    MissingIdentifier(String),

    #[error("Lazy attribute '{attribute}' cannot load on a detached instance")]
    LazyLoadOnDetached { attribute: String },

    #[error(transparent)]
    Translate(#[from] TranslateError),

    #[error(transparent)]
    Flush(#[from] FlushError),

    #[error(transparent)]
    Execution(#[from] ExecError),
}

/// Unit-of-work session over a statement executor.
pub struct Session<E: StatementExecutor> {
    registry: Arc<MetadataRegistry>,
    config: Config,
    dialect: Dialect,
    executor: E,
    instances: HashMap<EntityKey, ManagedInstance>,
    /// Keys in first-management order, for deterministic flushing within an
    /// entity group.
    order: Vec<EntityKey>,
    /// Assigned-identity lookups for instances persisted under a pending key
    /// whose identifier materialized at flush.
    aliases: HashMap<EntityKey, EntityKey>,
    pending_seq: u64,
}

impl<E: StatementExecutor> Session<E> {
    pub fn new(registry: Arc<MetadataRegistry>, executor: E) -> Self {
        Self::with_config(registry, executor, Config::default())
    }

    pub fn with_config(registry: Arc<MetadataRegistry>, executor: E, config: Config) -> Self {
        Self {
            registry,
            dialect: config.orm.dialect,
            config,
            executor,
            instances: HashMap::new(),
            order: Vec::new(),
            aliases: HashMap::new(),
            pending_seq: 0,
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn registry(&self) -> &Arc<MetadataRegistry> {
        &self.registry
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn executor_mut(&mut self) -> &mut E {
        &mut self.executor
    }

    /// Make a transient instance managed; it inserts at the next flush.
    ///
    /// An absent identifier is generated now when the mapping carries an
    /// in-memory insert-timed generator; otherwise the instance is tracked
    /// under a session-local pending key until the database produces one.
    pub fn persist(
        &mut self,
        entity: &str,
        mut values: HashMap<String, Value>,
    ) -> Result<EntityKey, SessionError> {
        let registry = Arc::clone(&self.registry);
        let desc = self.descriptor(&registry, entity)?;

        for name in values.keys() {
            if desc.attribute(name).is_none() {
                return Err(SessionError::UnknownAttribute {
                    entity: entity.into(),
                    attribute: name.clone(),
                });
            }
        }

        let id_attr = desc
            .id_attribute()
            .ok_or_else(|| SessionError::UnknownEntity(entity.into()))?;
        if !values.contains_key(&id_attr.name) {
            let policy = &id_attr.column.as_ref().expect("validated id column").generation;
            if policy.origin == GenerationOrigin::InMemory && policy.timing.includes_insert() {
                if let Some(generator) = &policy.generator {
                    values.insert(id_attr.name.clone(), generator.generate(None));
                }
            }
        }

        let key = match values.get(&id_attr.name) {
            Some(id) if !id.is_null() => EntityKey::assigned(entity, id),
            _ => {
                self.pending_seq += 1;
                EntityKey::pending(entity, self.pending_seq)
            }
        };

        if self.instances.contains_key(&key) {
            return Ok(key);
        }

        trace!(entity, "transient instance becomes managed");
        self.instances
            .insert(key.clone(), ManagedInstance::new_for_persist(entity, values));
        self.order.push(key.clone());
        Ok(key)
    }

    /// Load an entity by identifier, or return the managed instance from
    /// the identity map.
    pub fn get(&mut self, entity: &str, id: Value) -> Result<EntityKey, SessionError> {
        let key = EntityKey::assigned(entity, &id);
        if self.instances.contains_key(&key) {
            return Ok(key);
        }
        if let Some(aliased) = self.aliases.get(&key) {
            return Ok(aliased.clone());
        }

        let registry = Arc::clone(&self.registry);
        let desc = self.descriptor(&registry, entity)?;
        let lazy_loading = self.config.orm.lazy_loading;

        let eager: Vec<&AttributeDescriptor> = desc
            .column_attributes()
            .filter(|a| !a.lazy || !lazy_loading)
            .collect();
        let id_column = desc
            .id_column()
            .ok_or_else(|| SessionError::UnknownEntity(entity.into()))?;

        let mut table = TableRef::new(&desc.table);
        if let Some(schema) = &desc.schema {
            table = table.with_schema(schema);
        }
        let select = Query::new()
            .select(
                eager
                    .iter()
                    .map(|a| {
                        SelectExpr::new(col(&a.column.as_ref().expect("column attribute").name))
                    })
                    .collect::<Vec<_>>(),
            )
            .from(table)
            .filter(col(id_column).eq(param(1)));
        let sql = select.to_sql(self.dialect);

        let row = self
            .executor
            .query_row(&sql, &[id.clone()])?
            .ok_or_else(|| SessionError::NotFound {
                entity: entity.into(),
                id: id.clone(),
            })?;

        let loaded = self.row_to_attributes(desc, &row);
        let unloaded: Vec<String> = desc
            .column_attributes()
            .filter(|a| a.lazy && lazy_loading)
            .map(|a| a.name.clone())
            .collect();

        debug!(entity, lazy = unloaded.len(), "loaded instance");
        self.instances.insert(
            key.clone(),
            ManagedInstance::from_row(entity, loaded, unloaded),
        );
        self.order.push(key.clone());
        Ok(key)
    }

    /// Lifecycle status of a managed instance.
    pub fn status(&self, key: &EntityKey) -> Result<EntityStatus, SessionError> {
        Ok(self.instance(key)?.status)
    }

    /// Read an attribute value, lazily loading it on first access. Once
    /// loaded, the attribute participates in dirty checking like any other.
    pub fn get_attribute(
        &mut self,
        key: &EntityKey,
        attribute: &str,
    ) -> Result<Value, SessionError> {
        let instance = self.instance(key)?;
        let entity = instance.entity.clone();
        let status = instance.status;

        match instance.attribute_state(attribute) {
            Some(AttributeState::Loaded(v)) => return Ok(v.clone()),
            Some(AttributeState::NotLoaded) => {}
            None => {
                let registry = Arc::clone(&self.registry);
                let desc = self.descriptor(&registry, &entity)?;
                let attr = desc.attribute(attribute).ok_or_else(|| {
                    SessionError::UnknownAttribute {
                        entity: entity.clone(),
                        attribute: attribute.into(),
                    }
                })?;
                if attr.column.is_none() {
                    return Err(SessionError::NotAColumn {
                        entity,
                        attribute: attribute.into(),
                    });
                }
                // Column attribute never populated: an unflushed insert's
                // unset attribute reads as NULL.
                return Ok(Value::Null);
            }
        }

        if status == EntityStatus::Detached {
            return Err(SessionError::LazyLoadOnDetached {
                attribute: attribute.into(),
            });
        }

        // On-demand single-column load.
        let registry = Arc::clone(&self.registry);
        let desc = self.descriptor(&registry, &entity)?;
        let attr = desc
            .attribute(attribute)
            .ok_or_else(|| SessionError::UnknownAttribute {
                entity: entity.clone(),
                attribute: attribute.into(),
            })?;
        let column = attr
            .column
            .as_ref()
            .ok_or_else(|| SessionError::NotAColumn {
                entity: entity.clone(),
                attribute: attribute.into(),
            })?;
        let id = self.identifier_value(key, desc)?;
        let id_column = desc
            .id_column()
            .ok_or_else(|| SessionError::UnknownEntity(entity.clone()))?;

        let mut table = TableRef::new(&desc.table);
        if let Some(schema) = &desc.schema {
            table = table.with_schema(schema);
        }
        let select = Query::new()
            .select(vec![SelectExpr::new(col(&column.name))])
            .from(table)
            .filter(col(id_column).eq(param(1)));
        let sql = select.to_sql(self.dialect);

        trace!(entity = %entity, attribute, "first access of lazy attribute");
        let row = self
            .executor
            .query_row(&sql, &[id.clone()])?
            .ok_or(SessionError::NotFound { entity, id })?;
        let value = row.get(&column.name).cloned().unwrap_or(Value::Null);

        let instance = self.instance_mut(key)?;
        instance.mark_loaded(attribute, value.clone());
        Ok(value)
    }

    /// Write an attribute. Dirtiness follows the configured checking mode;
    /// writing a value equal to the loaded one leaves the instance clean
    /// under snapshot checking.
    pub fn set_attribute(
        &mut self,
        key: &EntityKey,
        attribute: &str,
        value: Value,
    ) -> Result<(), SessionError> {
        let registry = Arc::clone(&self.registry);
        let snapshot_checking = self.config.orm.dirty_checking == DirtyChecking::Snapshot;

        let instance = self.instance(key)?;
        match instance.status {
            EntityStatus::Detached => return Err(SessionError::InstanceDetached),
            EntityStatus::Removed => return Err(SessionError::InstanceRemoved),
            _ => {}
        }
        let entity = instance.entity.clone();

        let desc = self.descriptor(&registry, &entity)?;
        let attr = desc
            .attribute(attribute)
            .ok_or_else(|| SessionError::UnknownAttribute {
                entity: entity.clone(),
                attribute: attribute.into(),
            })?;
        if attr.column.is_none() {
            return Err(SessionError::NotAColumn {
                entity,
                attribute: attribute.into(),
            });
        }

        let instance = self.instance_mut(key)?;
        let before = instance.status;
        instance.write(attribute, value, snapshot_checking);
        if before != instance.status {
            trace!(entity = %instance.entity, attribute, from = ?before, to = ?instance.status, "status transition");
        }
        Ok(())
    }

    /// Schedule a managed instance for deletion. A never-flushed pending
    /// insert is simply dropped.
    pub fn remove(&mut self, key: &EntityKey) -> Result<(), SessionError> {
        let instance = self.instance(key)?;
        if instance.status == EntityStatus::Detached {
            return Err(SessionError::InstanceDetached);
        }
        if instance.pending_insert {
            self.instances.remove(key);
            self.order.retain(|k| k != key);
            return Ok(());
        }
        self.instance_mut(key)?.status = EntityStatus::Removed;
        Ok(())
    }

    /// Detach an instance: loaded values stay readable, nothing flushes.
    pub fn detach(&mut self, key: &EntityKey) -> Result<(), SessionError> {
        self.instance_mut(key)?.status = EntityStatus::Detached;
        Ok(())
    }

    /// Discard the whole unit of work, abandoning unflushed state.
    pub fn clear(&mut self) {
        self.instances.clear();
        self.order.clear();
        self.aliases.clear();
    }

    /// Execute a criteria query through this session's executor.
    pub fn find(&mut self, criteria: &CriteriaQuery) -> Result<Vec<Row>, SessionError> {
        let translated = SelectTranslator::new(self.dialect).translate(criteria)?;
        Ok(self.executor.query(&translated.sql, &translated.params)?)
    }

    /// Synchronize in-memory state to the database.
    ///
    /// Inserts run in dependency order, then updates, then deletes in
    /// reverse dependency order. Only MANAGED-DIRTY instances (or
    /// MANAGED-CLEAN instances with ALWAYS-timed database-generated
    /// columns) produce update statements.
    pub fn flush(&mut self) -> Result<(), SessionError> {
        let registry = Arc::clone(&self.registry);
        let snapshot_checking = self.config.orm.dirty_checking == DirtyChecking::Snapshot;
        let flush_order = registry.flush_order().to_vec();

        // Inserts, parents first.
        for entity_name in &flush_order {
            for key in self.keys_of(entity_name) {
                let Some(instance) = self.instances.get(&key) else {
                    continue;
                };
                if !instance.pending_insert || instance.status == EntityStatus::Removed {
                    continue;
                }
                let desc = self.descriptor(&registry, entity_name)?;
                let values = instance.loaded_values();
                let plan = plan_insert(desc, &values, self.dialect)?;
                self.execute_write(&key, entity_name, plan)?;

                // Pending identities materialize after refresh.
                if let Some(id_attr) = desc.id_attribute() {
                    let id = self
                        .instances
                        .get(&key)
                        .and_then(|i| i.loaded_value(&id_attr.name).cloned());
                    if let Some(id) = id {
                        if !id.is_null() {
                            let assigned = EntityKey::assigned(entity_name, &id);
                            if assigned != key {
                                self.aliases.insert(assigned, key.clone());
                            }
                        }
                    }
                }
            }
        }

        // Updates.
        for key in self.order.clone() {
            let Some(instance) = self.instances.get(&key) else {
                continue;
            };
            if instance.pending_insert
                || matches!(
                    instance.status,
                    EntityStatus::Detached | EntityStatus::Removed | EntityStatus::Transient
                )
            {
                continue;
            }
            let entity_name = instance.entity.clone();
            let desc = self.descriptor(&registry, &entity_name)?;

            let considered = instance.status == EntityStatus::ManagedDirty
                || has_always_database_column(desc);
            if !considered {
                continue;
            }

            let dirty = instance.dirty_attributes(snapshot_checking);
            let values = instance.loaded_values();
            let id_attr = desc
                .id_attribute()
                .ok_or_else(|| SessionError::UnknownEntity(entity_name.clone()))?;
            let id = values
                .get(&id_attr.name)
                .cloned()
                .ok_or_else(|| SessionError::MissingIdentifier(entity_name.clone()))?;

            if let Some(plan) = plan_update(desc, &values, &dirty, &id, self.dialect)? {
                self.execute_write(&key, &entity_name, plan)?;
            }
        }

        // Deletes, children first.
        for entity_name in flush_order.iter().rev() {
            for key in self.keys_of(entity_name) {
                let Some(instance) = self.instances.get(&key) else {
                    continue;
                };
                if instance.status != EntityStatus::Removed {
                    continue;
                }
                let desc = self.descriptor(&registry, entity_name)?;
                let id_attr = desc
                    .id_attribute()
                    .ok_or_else(|| SessionError::UnknownEntity(entity_name.clone()))?;
                let id = instance
                    .loaded_value(&id_attr.name)
                    .cloned()
                    .ok_or_else(|| SessionError::MissingIdentifier(entity_name.clone()))?;

                let statement = plan_delete(desc, &id, self.dialect)?;
                self.executor
                    .execute(&statement.sql, &statement.params)
                    .map_err(|source| FlushError {
                        entity: entity_name.clone(),
                        key: key.clone(),
                        source,
                    })?;

                // The delete executed; the instance is discarded.
                self.instances.remove(&key);
                self.order.retain(|k| k != &key);
            }
        }

        debug!(managed = self.instances.len(), "flush complete");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn execute_write(
        &mut self,
        key: &EntityKey,
        entity_name: &str,
        plan: crate::translate::WritePlan,
    ) -> Result<(), SessionError> {
        let outcome = self
            .executor
            .execute(&plan.statement.sql, &plan.statement.params)
            .map_err(|source| FlushError {
                entity: entity_name.into(),
                key: key.clone(),
                source,
            })?;

        let refreshed: Option<Row> = match &plan.refresh {
            RefreshPlan::None => None,
            RefreshPlan::FromExecution { .. } => outcome.returned_row,
            RefreshPlan::Select { statement, .. } => self
                .executor
                .query_row(&statement.sql, &statement.params)
                .map_err(|source| FlushError {
                    entity: entity_name.into(),
                    key: key.clone(),
                    source,
                })?,
        };

        let registry = Arc::clone(&self.registry);
        let desc = self.descriptor(&registry, entity_name)?;
        let refreshed_attrs: Vec<(String, Value)> = refreshed
            .map(|row| self.row_to_attributes(desc, &row).into_iter().collect())
            .unwrap_or_default();

        let instance = self.instance_mut(key)?;
        instance.apply_flush(plan.generated_in_memory);
        for (attribute, value) in refreshed_attrs {
            instance.mark_loaded(&attribute, value);
        }
        Ok(())
    }

    fn descriptor<'a>(
        &self,
        registry: &'a MetadataRegistry,
        entity: &str,
    ) -> Result<&'a EntityDescriptor, SessionError> {
        registry
            .get(entity)
            .ok_or_else(|| SessionError::UnknownEntity(entity.into()))
    }

    fn instance(&self, key: &EntityKey) -> Result<&ManagedInstance, SessionError> {
        self.instances.get(key).ok_or(SessionError::NotManaged)
    }

    fn instance_mut(&mut self, key: &EntityKey) -> Result<&mut ManagedInstance, SessionError> {
        self.instances.get_mut(key).ok_or(SessionError::NotManaged)
    }

    fn keys_of(&self, entity: &str) -> Vec<EntityKey> {
        self.order
            .iter()
            .filter(|k| k.entity() == entity)
            .cloned()
            .collect()
    }

    fn identifier_value(
        &self,
        key: &EntityKey,
        desc: &EntityDescriptor,
    ) -> Result<Value, SessionError> {
        let id_attr = desc
            .id_attribute()
            .ok_or_else(|| SessionError::UnknownEntity(desc.name.clone()))?;
        self.instance(key)?
            .loaded_value(&id_attr.name)
            .cloned()
            .ok_or_else(|| SessionError::MissingIdentifier(desc.name.clone()))
    }

    /// Map a column-keyed row back to attribute names.
    fn row_to_attributes(&self, desc: &EntityDescriptor, row: &Row) -> HashMap<String, Value> {
        let mut out = HashMap::new();
        for attr in desc.column_attributes() {
            let column = attr.column.as_ref().expect("column attribute");
            if let Some(value) = row.get(&column.name) {
                out.insert(attr.name.clone(), value.clone());
            }
        }
        out
    }
}

fn has_always_database_column(desc: &EntityDescriptor) -> bool {
    desc.column_attributes().any(|a| {
        let policy = &a.column.as_ref().expect("column attribute").generation;
        policy.timing == GenerationTiming::Always && policy.origin == GenerationOrigin::Database
    })
}
