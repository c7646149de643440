//! ## Crate layout
//! - `config`: TOML-backed runtime settings for locks, schema and queries.
//! - `db`: sessions, records, filters, collections, schema reconciliation
//!   and the storage boundary.
//! - `error`: the shared error type and its classification.
//! - `lock`: advisory record locks over memory or filesystem markers.
//! - `model`: entity type declarations, field metadata and the registry.
//! - `obs`: event counters and the metrics sink.
//! - `value`: runtime field values.
//!
//! The `prelude` module carries the vocabulary used by application code that
//! declares entity types and works with records.

pub use tabula_core as core;
pub use tabula_core::{config, db, error, lock, model, obs, serialize, services, value};

//
// Consts
//

/// Workspace version re-export for downstream tooling/tests.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use tabula_core::error::InternalError as Error;

///
/// Prelude
///

pub mod prelude {
    pub use crate::core::{
        config::Config,
        db::{Collection, Condition, Filter, OrderDirection, Record, Session},
        error::{ErrorClass, InternalError},
        model::{
            Address, Currency, DeleteMode, DeleteStrategy, EntityHooks, EntityType,
            FieldDeclaration, FieldKind, PolymorphicRef, Registry,
        },
        value::Value,
    };
    pub use serde::{Deserialize, Serialize};
}
