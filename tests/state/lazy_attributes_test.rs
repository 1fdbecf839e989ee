//! Lazy attribute loading and its interaction with dirty checking.
//!
//! Mirrors the classic all-lazy-properties scenario: an entity whose only
//! data columns are lazy, updated to null one at a time and reloaded.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use common::MemoryDb;
use strata::config::{Config, DirtyChecking};
use strata::model::{
    AttributeDescriptor, ColumnDescriptor, EntityDescriptor, MetadataRegistry, Value,
};
use strata::state::{EntityStatus, Session};

fn registry() -> Arc<MetadataRegistry> {
    Arc::new(
        MetadataRegistry::builder()
            .register(
                EntityDescriptor::new("LazyEntity")
                    .with_id(AttributeDescriptor::basic("id", ColumnDescriptor::new("id")))
                    .with_attribute(
                        AttributeDescriptor::basic(
                            "lazyProperty1",
                            ColumnDescriptor::new("lazy_property1"),
                        )
                        .lazy(),
                    )
                    .with_attribute(
                        AttributeDescriptor::basic(
                            "lazyProperty2",
                            ColumnDescriptor::new("lazy_property2"),
                        )
                        .lazy(),
                    ),
            )
            .build()
            .unwrap(),
    )
}

/// Persist the entity with both lazy properties set, through its own
/// session, and return the shared database.
fn prepare(db: &MemoryDb) -> Value {
    let mut session = Session::new(registry(), db.clone());
    let key = session
        .persist(
            "LazyEntity",
            HashMap::from([
                ("id".to_string(), Value::Int(1)),
                ("lazyProperty1".to_string(), Value::Text("update1".into())),
                ("lazyProperty2".to_string(), Value::Text("update2".into())),
            ]),
        )
        .unwrap();
    session.flush().unwrap();
    session.get_attribute(&key, "id").unwrap()
}

#[test]
fn load_selects_only_eager_columns() {
    let db = MemoryDb::new();
    let id = prepare(&db);

    let mut session = Session::new(registry(), db.clone());
    session.get("LazyEntity", id).unwrap();

    let select = db
        .statements()
        .into_iter()
        .rev()
        .find(|s| s.starts_with("SELECT"))
        .expect("a load ran");
    assert!(select.contains("\"id\""));
    assert!(!select.contains("lazy_property1"));
    assert!(!select.contains("lazy_property2"));
}

#[test]
fn update_one_lazy_property_to_null() {
    let db = MemoryDb::new();
    let id = prepare(&db);

    // non-null -> null, without ever reading either property
    let mut session = Session::new(registry(), db.clone());
    let key = session.get("LazyEntity", id.clone()).unwrap();
    session.set_attribute(&key, "lazyProperty1", Value::Null).unwrap();
    assert_eq!(session.status(&key).unwrap(), EntityStatus::ManagedDirty);
    session.flush().unwrap();

    // the update touched exactly the written property
    let update = db
        .statements()
        .into_iter()
        .find(|s| s.starts_with("UPDATE"))
        .expect("an update ran");
    assert!(update.contains("\"lazy_property1\""));
    assert!(!update.contains("\"lazy_property2\""));

    // reload in a fresh session
    let mut reloaded = Session::new(registry(), db.clone());
    let key = reloaded.get("LazyEntity", id).unwrap();
    assert_eq!(
        reloaded.get_attribute(&key, "lazyProperty1").unwrap(),
        Value::Null
    );
    assert_eq!(
        reloaded.get_attribute(&key, "lazyProperty2").unwrap(),
        Value::Text("update2".into())
    );
}

#[test]
fn update_all_lazy_properties_to_null() {
    let db = MemoryDb::new();
    let id = prepare(&db);

    let mut session = Session::new(registry(), db.clone());
    let key = session.get("LazyEntity", id.clone()).unwrap();
    session.set_attribute(&key, "lazyProperty1", Value::Null).unwrap();
    session.set_attribute(&key, "lazyProperty2", Value::Null).unwrap();
    session.flush().unwrap();

    let mut reloaded = Session::new(registry(), db.clone());
    let key = reloaded.get("LazyEntity", id).unwrap();
    assert_eq!(
        reloaded.get_attribute(&key, "lazyProperty1").unwrap(),
        Value::Null
    );
    assert_eq!(
        reloaded.get_attribute(&key, "lazyProperty2").unwrap(),
        Value::Null
    );
}

#[test]
fn first_read_loads_on_demand_and_joins_dirty_checking() {
    let db = MemoryDb::new();
    let id = prepare(&db);

    let mut session = Session::new(registry(), db.clone());
    let key = session.get("LazyEntity", id).unwrap();

    let statements_before = db.statements().len();
    let value = session.get_attribute(&key, "lazyProperty1").unwrap();
    assert_eq!(value, Value::Text("update1".into()));
    // the read issued an on-demand single-column select
    let loads = db.statements();
    assert_eq!(loads.len(), statements_before + 1);
    assert!(loads.last().unwrap().contains("\"lazy_property1\""));

    // a second read hits the loaded slot, no extra statement
    session.get_attribute(&key, "lazyProperty1").unwrap();
    assert_eq!(db.statements().len(), statements_before + 1);

    // once read, the attribute dirty-checks like any other: writing the
    // loaded value back keeps the entity clean
    session
        .set_attribute(&key, "lazyProperty1", Value::Text("update1".into()))
        .unwrap();
    assert_eq!(session.status(&key).unwrap(), EntityStatus::ManagedClean);
}

#[test]
fn unread_lazy_attributes_never_dirty_the_entity() {
    let db = MemoryDb::new();
    let id = prepare(&db);

    let mut session = Session::new(registry(), db.clone());
    let key = session.get("LazyEntity", id).unwrap();
    assert_eq!(session.status(&key).unwrap(), EntityStatus::ManagedClean);

    let before = db.statements().len();
    session.flush().unwrap();
    assert_eq!(db.statements().len(), before);
}

#[test]
fn explicit_only_mode_flushes_same_value_writes() {
    let db = MemoryDb::new();
    let id = prepare(&db);

    let mut config = Config::default();
    config.orm.dirty_checking = DirtyChecking::ExplicitOnly;
    let mut session = Session::with_config(registry(), db.clone(), config);

    let key = session.get("LazyEntity", id).unwrap();
    // read it first so a snapshot exists, then write the same value back
    let current = session.get_attribute(&key, "lazyProperty1").unwrap();
    session
        .set_attribute(&key, "lazyProperty1", current)
        .unwrap();
    // without snapshot comparison every explicit write counts
    assert_eq!(session.status(&key).unwrap(), EntityStatus::ManagedDirty);

    session.flush().unwrap();
    let update = db
        .statements()
        .into_iter()
        .find(|s| s.starts_with("UPDATE"))
        .expect("an update ran");
    assert!(update.contains("\"lazy_property1\""));
    assert!(!update.contains("\"lazy_property2\""));
}

#[test]
fn disabling_lazy_loading_selects_everything_eagerly() {
    let db = MemoryDb::new();
    let id = prepare(&db);

    let mut config = Config::default();
    config.orm.lazy_loading = false;
    let mut session = Session::with_config(registry(), db.clone(), config);

    let key = session.get("LazyEntity", id).unwrap();
    let select = db
        .statements()
        .into_iter()
        .rev()
        .find(|s| s.starts_with("SELECT"))
        .expect("a load ran");
    assert!(select.contains("\"lazy_property1\""));
    assert!(select.contains("\"lazy_property2\""));

    // no further statement on read
    let before = db.statements().len();
    session.get_attribute(&key, "lazyProperty2").unwrap();
    assert_eq!(db.statements().len(), before);
}
