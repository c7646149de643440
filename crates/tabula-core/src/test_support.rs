//! Module: test_support
//! Responsibility: shared entity declarations and session wiring for
//! in-crate tests.
//! Does not own: assertions; each module keeps its own test cases.

use crate::{
    config::{Config, LockConfig},
    db::{Session, storage::SqliteStorage},
    error::InternalError,
    model::{
        declaration::FieldDeclaration,
        entity_type::{DeleteMode, DeleteStrategy, EntityType},
        field::FieldKind,
        registry::Registry,
    },
    services::{FileService, FixedClock},
};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, PoisonError};

pub(crate) const CUSTOMER: &str = "customer";
pub(crate) const INVOICE: &str = "invoice";
pub(crate) const LINE: &str = "line";
pub(crate) const NOTE: &str = "note";
pub(crate) const COUNTRY: &str = "country";
pub(crate) const PROJECT: &str = "project";
pub(crate) const TASK: &str = "task";
pub(crate) const CONTACT: &str = "contact";

/// Instant every fixture clock starts at.
pub(crate) fn start() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).expect("valid timestamp")
}

// ---- entity types ------------------------------------------------------

///
/// customer_type
/// Title-bearing type with an indexed name, a side-channel note and an
/// address composite.
///
pub(crate) fn customer_type() -> EntityType {
    EntityType::builder(CUSTOMER)
        .field(FieldDeclaration::new("name", FieldKind::Text).required().index("name"))
        .field(FieldDeclaration::new("email", FieldKind::Email))
        .field(FieldDeclaration::new("notes", FieldKind::Text).in_metadata())
        .field(FieldDeclaration::new("tags", FieldKind::Array))
        .field(FieldDeclaration::new("address", FieldKind::Address))
        .title_field("name")
        .build()
        .expect("customer type should build")
}

///
/// invoice_type
///
pub(crate) fn invoice_type() -> EntityType {
    EntityType::builder(INVOICE)
        .field(FieldDeclaration::new("amount", FieldKind::Number))
        .field(
            FieldDeclaration::new("status", FieldKind::Enumeration)
                .enumeration(["open", "paid"])
                .default_value("open"),
        )
        .field(FieldDeclaration::new("issued", FieldKind::Date))
        .field(FieldDeclaration::new("price", FieldKind::Currency))
        .field(FieldDeclaration::new("notes", FieldKind::Text).in_metadata())
        .field(FieldDeclaration::new("customer", FieldKind::Reference).foreign(CUSTOMER))
        .field(FieldDeclaration::new("attachment", FieldKind::File))
        .build()
        .expect("invoice type should build")
}

pub(crate) fn line_type() -> EntityType {
    EntityType::builder(LINE)
        .field(
            FieldDeclaration::new("invoice", FieldKind::Reference)
                .foreign(INVOICE)
                .depending(),
        )
        .field(FieldDeclaration::new("qty", FieldKind::Integer))
        .field(FieldDeclaration::new("description", FieldKind::Text))
        .build()
        .expect("line type should build")
}

pub(crate) fn note_type() -> EntityType {
    EntityType::builder(NOTE)
        .field(FieldDeclaration::new("subject", FieldKind::PolymorphicReference))
        .field(FieldDeclaration::new("body", FieldKind::Text))
        .build()
        .expect("note type should build")
}

pub(crate) fn country_type() -> EntityType {
    EntityType::builder(COUNTRY)
        .field(FieldDeclaration::new("code", FieldKind::KeyText))
        .field(FieldDeclaration::new("label", FieldKind::Text))
        .manual_keys()
        .title_field("label")
        .build()
        .expect("country type should build")
}

/// Soft-deleted type that refuses deletes while tasks point at it.
pub(crate) fn project_type() -> EntityType {
    EntityType::builder(PROJECT)
        .field(FieldDeclaration::new("name", FieldKind::Text))
        .delete_strategy(DeleteStrategy::Block)
        .delete_mode(DeleteMode::SoftMark)
        .build()
        .expect("project type should build")
}

pub(crate) fn task_type() -> EntityType {
    EntityType::builder(TASK)
        .field(FieldDeclaration::new("project", FieldKind::Reference).foreign(PROJECT))
        .field(FieldDeclaration::new("title", FieldKind::Text))
        .build()
        .expect("task type should build")
}

pub(crate) fn contact_type() -> EntityType {
    EntityType::builder(CONTACT)
        .field(FieldDeclaration::new("name", FieldKind::Text))
        .field(FieldDeclaration::new("phone", FieldKind::Text).in_metadata())
        .delete_strategy(DeleteStrategy::DoNothing)
        .delete_mode(DeleteMode::ResetFields)
        .build()
        .expect("contact type should build")
}

/// Every fixture type.
pub(crate) fn registry() -> Registry {
    [
        customer_type(),
        invoice_type(),
        line_type(),
        note_type(),
        country_type(),
        project_type(),
        task_type(),
        contact_type(),
    ]
    .into_iter()
    .try_fold(Registry::new(), Registry::with)
    .expect("fixture registry should build")
}

// ---- sessions ----------------------------------------------------------

/// Lock settings that fail fast on contention.
pub(crate) fn fast_config() -> Config {
    Config {
        lock: LockConfig {
            directory: None,
            stale_after_ms: 60_000,
            max_wait_ms: 40,
            backoff_unit_ms: 5,
        },
        ..Config::default()
    }
}

///
/// session
/// In-memory session over the fixture registry with its schema in place.
///
pub(crate) fn session() -> Session {
    session_with(registry(), fast_config())
}

pub(crate) fn session_with(registry: Registry, config: Config) -> Session {
    build_session(registry, config, Arc::new(RecordingFiles::default()))
        .expect("fixture session should build")
}

pub(crate) fn build_session(
    registry: Registry,
    config: Config,
    files: Arc<dyn FileService>,
) -> Result<Session, InternalError> {
    let storage = SqliteStorage::open_in_memory()?;
    let session = Session::builder(Arc::new(registry), storage)
        .config(config)
        .clock(Arc::new(FixedClock::new(start())))
        .files(files)
        .build()?;
    session.ensure_schema()?;

    Ok(session)
}

///
/// RecordingFiles
/// File service that remembers which attachments were deleted.
///

#[derive(Debug, Default)]
pub(crate) struct RecordingFiles {
    deleted: Mutex<Vec<i64>>,
}

impl RecordingFiles {
    pub(crate) fn deleted(&self) -> Vec<i64> {
        self.deleted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl FileService for RecordingFiles {
    fn delete(&self, file_id: i64) -> Result<(), InternalError> {
        self.deleted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(file_id);

        Ok(())
    }
}
