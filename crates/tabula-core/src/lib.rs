//! Core runtime for tabula: field metadata, entity records and their
//! lifecycle, advisory locks, predicate queries and schema reconciliation.
#![warn(unreachable_pub)]

// public exports are one module level down
pub mod config;
pub mod db;
pub mod error;
pub mod lock;
pub mod model;
pub mod obs;
pub mod serialize;
pub mod services;
pub mod value;

// test
#[cfg(test)]
pub(crate) mod test_support;

///
/// Prelude
///
/// Domain vocabulary for code that declares entity types and works with
/// records. Storage backends, lock stores and metrics stay one module down.
///

pub mod prelude {
    pub use crate::{
        db::{Collection, Condition, Filter, OrderDirection, Record, Session},
        error::InternalError,
        model::{
            DeleteMode, DeleteStrategy, EntityHooks, EntityType, FieldDeclaration, FieldKind,
            Registry,
        },
        value::Value,
    };
}
