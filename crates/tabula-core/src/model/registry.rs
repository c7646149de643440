//! Module: model::registry
//! Responsibility: registered entity types and the reverse-reference index
//! used by cascading deletes.
//! Does not own: delete orchestration (see `db::record`).
//! Boundary: built once, then shared read-only by sessions.

use crate::{
    error::{ErrorOrigin, InternalError},
    model::{declaration::Relation, entity_type::EntityType, field::FieldKind},
};
use std::{
    collections::{BTreeMap, btree_map::Entry},
    sync::Arc,
};

///
/// RefCardinality
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RefCardinality {
    /// One key in a `Reference` column.
    Single,
    /// Key list in a `ReferenceMulti` column.
    Multi,
    /// `(type, id)` pair of a polymorphic reference.
    Polymorphic,
}

///
/// ReverseRef
/// One field of `source` that can point at the indexed target type.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReverseRef {
    pub source: String,
    pub field: String,
    pub cardinality: RefCardinality,
    pub relation: Relation,
}

///
/// Registry
///

#[derive(Debug, Default)]
pub struct Registry {
    types: BTreeMap<String, Arc<EntityType>>,
    reverse: BTreeMap<String, Vec<ReverseRef>>,
    polymorphic: Vec<ReverseRef>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one entity type and index its outgoing references.
    pub fn register(&mut self, ty: EntityType) -> Result<Arc<EntityType>, InternalError> {
        let ty = Arc::new(ty);
        match self.types.entry(ty.name().to_string()) {
            Entry::Occupied(_) => {
                return Err(InternalError::usage(
                    ErrorOrigin::Model,
                    format!("entity type '{}' is already registered", ty.name()),
                ));
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&ty));
            }
        }

        for field in ty.structure().fields() {
            if field.parent.is_some() {
                continue;
            }
            let cardinality = match field.kind {
                FieldKind::Reference => RefCardinality::Single,
                FieldKind::ReferenceMulti => RefCardinality::Multi,
                FieldKind::PolymorphicReference => RefCardinality::Polymorphic,
                _ => continue,
            };
            let entry = ReverseRef {
                source: ty.name().to_string(),
                field: field.name.clone(),
                cardinality,
                relation: field.relation,
            };

            match (&field.foreign_class, cardinality) {
                (_, RefCardinality::Polymorphic) | (None, _) => self.polymorphic.push(entry),
                (Some(target), _) => self.reverse.entry(target.clone()).or_default().push(entry),
            }
        }

        Ok(ty)
    }

    /// Builder-style registration for static setups.
    pub fn with(mut self, ty: EntityType) -> Result<Self, InternalError> {
        self.register(ty)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Result<&Arc<EntityType>, InternalError> {
        self.types.get(name).ok_or_else(|| {
            InternalError::usage(ErrorOrigin::Model, format!("unknown entity type '{name}'"))
        })
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn types(&self) -> impl Iterator<Item = &Arc<EntityType>> {
        self.types.values()
    }

    /// Every field that may reference a record of `target`.
    pub fn referrers<'a>(&'a self, target: &str) -> impl Iterator<Item = &'a ReverseRef> {
        self.reverse
            .get(target)
            .into_iter()
            .flatten()
            .chain(self.polymorphic.iter())
    }

    /// Check that every reference points at a registered type with an
    /// integer key. Reference columns are `INTEGER`, so text keys such as
    /// `"007"` would not survive a round trip; link those through a
    /// polymorphic reference instead.
    pub fn validate_links(&self) -> Result<(), InternalError> {
        let mut problems = Vec::new();
        for (target, refs) in &self.reverse {
            let key_kind = self.types.get(target).map(|ty| ty.key_kind());
            for r in refs {
                match key_kind {
                    None => problems.push(format!(
                        "{}.{} references unregistered type '{target}'",
                        r.source, r.field
                    )),
                    Some(FieldKind::Key) => {}
                    Some(kind) => problems.push(format!(
                        "{}.{} references '{target}', whose {kind:?} key is not an integer",
                        r.source, r.field
                    )),
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(InternalError::usage(ErrorOrigin::Model, problems.join("; ")))
        }
    }
}
