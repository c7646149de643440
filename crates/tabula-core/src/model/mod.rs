//! Module: model
//! Responsibility: field kinds, field declarations, entity structures and
//! the registry of entity types.
//! Does not own: persistence or querying.

pub mod composite;
pub mod declaration;
pub mod entity_type;
pub mod field;
pub mod hooks;
pub mod registry;
pub mod structure;

pub use composite::{Address, Currency, PolymorphicRef, Repetition, RepetitionKind};
pub use declaration::{FieldDeclaration, Relation, StorageLocation};
pub use entity_type::{DeleteMode, DeleteStrategy, EntityConfig, EntityType, EntityTypeBuilder};
pub use field::FieldKind;
pub use hooks::{EntityHooks, NoHooks};
pub use registry::{RefCardinality, Registry, ReverseRef};
pub use structure::EntityStructure;
