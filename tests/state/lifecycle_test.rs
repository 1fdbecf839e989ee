//! The entity lifecycle state machine: persist, dirty checking, flush,
//! remove, detach, and flush-failure recovery.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use common::MemoryDb;
use strata::generation::{GenerationTiming, SequenceGenerator, ValueGenerationPolicy};
use strata::model::{
    AttributeDescriptor, ColumnDescriptor, EntityDescriptor, MetadataRegistry, Value,
};
use strata::state::{EntityStatus, Session, SessionError};

fn registry() -> Arc<MetadataRegistry> {
    Arc::new(
        MetadataRegistry::builder()
            .register(
                EntityDescriptor::new("User")
                    .with_id(AttributeDescriptor::basic(
                        "id",
                        ColumnDescriptor::new("id").generated(ValueGenerationPolicy::in_memory(
                            GenerationTiming::Insert,
                            Arc::new(SequenceGenerator::starting_at(1)),
                        )),
                    ))
                    .with_attribute(AttributeDescriptor::basic(
                        "name",
                        ColumnDescriptor::new("name"),
                    ))
                    .with_attribute(AttributeDescriptor::basic(
                        "email",
                        ColumnDescriptor::new("email"),
                    )),
            )
            .register(
                EntityDescriptor::new("Order")
                    .with_id(AttributeDescriptor::basic("id", ColumnDescriptor::new("id")))
                    .with_attribute(AttributeDescriptor::many_to_one(
                        "customer",
                        "User",
                        ColumnDescriptor::new("user_id"),
                    )),
            )
            .build()
            .unwrap(),
    )
}

fn user_values(name: &str) -> HashMap<String, Value> {
    HashMap::from([
        ("name".to_string(), Value::Text(name.into())),
        ("email".to_string(), Value::Text(format!("{}@example.com", name))),
    ])
}

#[test]
fn persist_makes_transient_managed_and_flush_inserts() {
    let db = MemoryDb::new();
    let mut session = Session::new(registry(), db.clone());

    let key = session.persist("User", user_values("ada")).unwrap();
    assert_eq!(session.status(&key).unwrap(), EntityStatus::ManagedClean);
    assert!(db.rows("users").is_empty());

    session.flush().unwrap();
    assert_eq!(session.status(&key).unwrap(), EntityStatus::ManagedClean);

    let rows = db.rows("users");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("name"), Some(&Value::Text("ada".into())));
    assert!(db.statements()[0].starts_with("INSERT INTO \"users\""));
}

#[test]
fn dirty_check_round_trip() {
    let db = MemoryDb::new();
    db.seed_row(
        "users",
        HashMap::from([
            ("id".to_string(), Value::Int(1)),
            ("name".to_string(), Value::Text("ada".into())),
            ("email".to_string(), Value::Text("ada@example.com".into())),
        ]),
    );
    let mut session = Session::new(registry(), db.clone());
    let key = session.get("User", Value::Int(1)).unwrap();

    // writing the current value back leaves the entity clean
    session
        .set_attribute(&key, "name", Value::Text("ada".into()))
        .unwrap();
    assert_eq!(session.status(&key).unwrap(), EntityStatus::ManagedClean);

    // a different value dirties it
    session
        .set_attribute(&key, "name", Value::Text("grace".into()))
        .unwrap();
    assert_eq!(session.status(&key).unwrap(), EntityStatus::ManagedDirty);

    // flush returns it to clean and persists the change
    session.flush().unwrap();
    assert_eq!(session.status(&key).unwrap(), EntityStatus::ManagedClean);
    assert_eq!(
        db.rows("users")[0].get("name"),
        Some(&Value::Text("grace".into()))
    );
}

#[test]
fn clean_entities_flush_no_statements() {
    let db = MemoryDb::new();
    db.seed_row(
        "users",
        HashMap::from([
            ("id".to_string(), Value::Int(1)),
            ("name".to_string(), Value::Text("ada".into())),
            ("email".to_string(), Value::Text("ada@example.com".into())),
        ]),
    );
    let mut session = Session::new(registry(), db.clone());
    session.get("User", Value::Int(1)).unwrap();

    let before = db.statements().len();
    session.flush().unwrap();
    assert_eq!(db.statements().len(), before);
}

#[test]
fn update_writes_only_dirty_columns() {
    let db = MemoryDb::new();
    db.seed_row(
        "users",
        HashMap::from([
            ("id".to_string(), Value::Int(1)),
            ("name".to_string(), Value::Text("ada".into())),
            ("email".to_string(), Value::Text("ada@example.com".into())),
        ]),
    );
    let mut session = Session::new(registry(), db.clone());
    let key = session.get("User", Value::Int(1)).unwrap();
    session
        .set_attribute(&key, "email", Value::Text("ada@new.example".into()))
        .unwrap();
    session.flush().unwrap();

    let update = db
        .statements()
        .into_iter()
        .find(|s| s.starts_with("UPDATE"))
        .expect("an update ran");
    assert!(update.contains("\"email\""));
    assert!(!update.contains("\"name\""));
}

#[test]
fn flush_failure_keeps_entity_dirty_for_retry() {
    let db = MemoryDb::new();
    db.seed_row(
        "users",
        HashMap::from([
            ("id".to_string(), Value::Int(1)),
            ("name".to_string(), Value::Text("ada".into())),
            ("email".to_string(), Value::Text("ada@example.com".into())),
        ]),
    );
    let mut session = Session::new(registry(), db.clone());
    let key = session.get("User", Value::Int(1)).unwrap();
    session
        .set_attribute(&key, "name", Value::Text("grace".into()))
        .unwrap();

    db.fail_next("constraint violated");
    let err = session.flush().unwrap_err();
    match err {
        SessionError::Flush(flush) => {
            assert_eq!(flush.entity, "User");
            assert_eq!(flush.key, key);
        }
        other => panic!("expected flush error, got {:?}", other),
    }

    // pre-flush dirty state survives; no automatic retry happened
    assert_eq!(session.status(&key).unwrap(), EntityStatus::ManagedDirty);
    assert_eq!(
        db.rows("users")[0].get("name"),
        Some(&Value::Text("ada".into()))
    );

    // a manual retry succeeds
    session.flush().unwrap();
    assert_eq!(session.status(&key).unwrap(), EntityStatus::ManagedClean);
    assert_eq!(
        db.rows("users")[0].get("name"),
        Some(&Value::Text("grace".into()))
    );
}

#[test]
fn removed_instances_delete_and_are_discarded() {
    let db = MemoryDb::new();
    db.seed_row(
        "users",
        HashMap::from([
            ("id".to_string(), Value::Int(1)),
            ("name".to_string(), Value::Text("ada".into())),
            ("email".to_string(), Value::Text("ada@example.com".into())),
        ]),
    );
    let mut session = Session::new(registry(), db.clone());
    let key = session.get("User", Value::Int(1)).unwrap();

    session.remove(&key).unwrap();
    assert_eq!(session.status(&key).unwrap(), EntityStatus::Removed);

    // removed is terminal: writes are rejected until the delete executes
    let err = session
        .set_attribute(&key, "name", Value::Text("x".into()))
        .unwrap_err();
    assert_eq!(err, SessionError::InstanceRemoved);

    session.flush().unwrap();
    assert!(db.rows("users").is_empty());
    // after the delete executes the instance is discarded
    assert_eq!(session.status(&key).unwrap_err(), SessionError::NotManaged);
}

#[test]
fn detached_instances_stop_flushing_but_stay_readable() {
    let db = MemoryDb::new();
    db.seed_row(
        "users",
        HashMap::from([
            ("id".to_string(), Value::Int(1)),
            ("name".to_string(), Value::Text("ada".into())),
            ("email".to_string(), Value::Text("ada@example.com".into())),
        ]),
    );
    let mut session = Session::new(registry(), db.clone());
    let key = session.get("User", Value::Int(1)).unwrap();

    session.detach(&key).unwrap();
    assert_eq!(session.status(&key).unwrap(), EntityStatus::Detached);

    // loaded values remain readable
    assert_eq!(
        session.get_attribute(&key, "name").unwrap(),
        Value::Text("ada".into())
    );
    // but writes are rejected
    assert_eq!(
        session
            .set_attribute(&key, "name", Value::Text("x".into()))
            .unwrap_err(),
        SessionError::InstanceDetached
    );

    let before = db.statements().len();
    session.flush().unwrap();
    assert_eq!(db.statements().len(), before);
}

#[test]
fn inserts_run_in_dependency_order() {
    let db = MemoryDb::new();
    let mut session = Session::new(registry(), db.clone());

    // persist the dependent first; flush must still insert users before
    // orders because orders carry the foreign key
    let user_key = session.persist("User", user_values("ada")).unwrap();
    let user_id = session.get_attribute(&user_key, "id").unwrap();
    session
        .persist(
            "Order",
            HashMap::from([
                ("id".to_string(), Value::Int(500)),
                ("customer".to_string(), user_id),
            ]),
        )
        .unwrap();

    session.flush().unwrap();

    let inserts: Vec<String> = db
        .statements()
        .into_iter()
        .filter(|s| s.starts_with("INSERT"))
        .collect();
    assert_eq!(inserts.len(), 2);
    assert!(inserts[0].contains("\"users\""));
    assert!(inserts[1].contains("\"orders\""));
}

#[test]
fn pending_insert_removal_never_touches_the_database() {
    let db = MemoryDb::new();
    let mut session = Session::new(registry(), db.clone());
    let key = session.persist("User", user_values("ada")).unwrap();

    session.remove(&key).unwrap();
    session.flush().unwrap();

    assert!(db.statements().is_empty());
    assert!(db.rows("users").is_empty());
}

#[test]
fn clear_discards_the_unit_of_work() {
    let db = MemoryDb::new();
    let mut session = Session::new(registry(), db.clone());
    let key = session.persist("User", user_values("ada")).unwrap();

    session.clear();
    assert_eq!(session.status(&key).unwrap_err(), SessionError::NotManaged);

    session.flush().unwrap();
    assert!(db.rows("users").is_empty());
}

#[test]
fn database_generated_column_refreshes_after_insert() {
    // created_at is computed by the database via an expression in the
    // insert; the instance picks the value up through RETURNING
    let registry = Arc::new(
        MetadataRegistry::builder()
            .register(
                EntityDescriptor::new("Document")
                    .with_id(AttributeDescriptor::basic("id", ColumnDescriptor::new("id")))
                    .with_attribute(AttributeDescriptor::basic(
                        "title",
                        ColumnDescriptor::new("title"),
                    ))
                    .with_attribute(AttributeDescriptor::basic(
                        "created_at",
                        ColumnDescriptor::new("created_at").generated(
                            ValueGenerationPolicy::database_expression(
                                GenerationTiming::Insert,
                                "current_timestamp",
                            ),
                        ),
                    )),
            )
            .build()
            .unwrap(),
    );

    let db = MemoryDb::new();
    let mut session = Session::new(registry, db.clone());
    let key = session
        .persist(
            "Document",
            HashMap::from([
                ("id".to_string(), Value::Int(1)),
                ("title".to_string(), Value::Text("draft".into())),
            ]),
        )
        .unwrap();
    session.flush().unwrap();

    let insert = db.statements()[0].clone();
    // the expression is emitted literally and read back in the same statement
    assert!(insert.contains("current_timestamp"));
    assert!(insert.contains("RETURNING \"created_at\""));

    // the refreshed value is on the instance without any further statement
    let statements_before = db.statements().len();
    let created_at = session.get_attribute(&key, "created_at").unwrap();
    assert_eq!(created_at, Value::Text("gen:current_timestamp".into()));
    assert_eq!(db.statements().len(), statements_before);
}

#[test]
fn in_memory_identifier_assigned_at_persist() {
    let db = MemoryDb::new();
    let mut session = Session::new(registry(), db.clone());
    let key = session.persist("User", user_values("ada")).unwrap();

    let id = session.get_attribute(&key, "id").unwrap();
    assert!(matches!(id, Value::Int(_)));

    session.flush().unwrap();
    // the flushed row carries the same identifier
    assert_eq!(db.rows("users")[0].get("id"), Some(&id));
    // and the identity map serves the same instance for that id
    let again = session.get("User", id).unwrap();
    assert_eq!(again, key);
}
