//! Shared declarations for the integration suites.

#![allow(dead_code)]

use std::{path::Path, sync::Arc};
use tabula::{
    config::LockConfig,
    db::storage::SqliteStorage,
    prelude::*,
};

pub const CUSTOMER: &str = "customer";
pub const INVOICE: &str = "invoice";
pub const LINE: &str = "line";
pub const PROJECT: &str = "project";
pub const TASK: &str = "task";

// ---- declarations ------------------------------------------------------

pub fn registry() -> Registry {
    let types = [
        EntityType::builder(CUSTOMER)
            .field(FieldDeclaration::new("name", FieldKind::Text).required().index("name"))
            .field(FieldDeclaration::new("notes", FieldKind::Text).in_metadata())
            .title_field("name")
            .build(),
        EntityType::builder(INVOICE)
            .field(FieldDeclaration::new("amount", FieldKind::Number))
            .field(
                FieldDeclaration::new("status", FieldKind::Enumeration)
                    .enumeration(["open", "paid"])
                    .default_value("open"),
            )
            .field(FieldDeclaration::new("customer", FieldKind::Reference).foreign(CUSTOMER))
            .build(),
        EntityType::builder(LINE)
            .field(
                FieldDeclaration::new("invoice", FieldKind::Reference)
                    .foreign(INVOICE)
                    .depending(),
            )
            .field(FieldDeclaration::new("qty", FieldKind::Integer))
            .build(),
        EntityType::builder(PROJECT)
            .field(FieldDeclaration::new("name", FieldKind::Text))
            .delete_strategy(DeleteStrategy::Block)
            .delete_mode(DeleteMode::SoftMark)
            .build(),
        EntityType::builder(TASK)
            .field(FieldDeclaration::new("project", FieldKind::Reference).foreign(PROJECT))
            .build(),
    ];

    types
        .into_iter()
        .map(|ty| ty.expect("fixture type should build"))
        .try_fold(Registry::new(), Registry::with)
        .expect("fixture registry should build")
}

/// Lock settings that give up quickly on contention.
pub fn config(lock_dir: Option<&Path>) -> Config {
    Config {
        lock: LockConfig {
            directory: lock_dir.map(Path::to_path_buf),
            stale_after_ms: 60_000,
            max_wait_ms: 40,
            backoff_unit_ms: 5,
        },
        ..Config::default()
    }
}

// ---- sessions ----------------------------------------------------------

pub fn open(storage: SqliteStorage, config: Config) -> Session {
    let session = Session::builder(Arc::new(registry()), storage)
        .config(config)
        .build()
        .expect("session should build");
    session.ensure_schema().expect("schema should reconcile");

    session
}

pub fn memory_session() -> Session {
    open(
        SqliteStorage::open_in_memory().expect("in-memory database should open"),
        config(None),
    )
}

/// Create and save one record.
pub fn create(session: &Session, type_name: &str, values: &[(&str, Value)]) -> Record {
    let mut record = Record::with_values(
        session.entity_type(type_name).expect("fixture type should exist"),
        values.iter().cloned(),
    )
    .expect("fixture values should be accepted");
    record.save(session, false, false).expect("save should succeed");

    record
}

pub fn ids(collection: &Collection) -> Vec<i64> {
    collection.keys().iter().filter_map(Value::as_int).collect()
}
