//! Module: db::collection
//! Responsibility: ordered, single-type sets of records returned by filters,
//! with identity-keyed union and difference.
//! Does not own: how records are selected (see `db::query`).


use crate::{
    db::{Session, record::Record},
    error::{ErrorOrigin, InternalError},
    model::entity_type::EntityType,
    value::{Value, values_equal},
};
use derive_more::{Deref, IntoIterator};
use std::sync::Arc;

///
/// Collection
///
/// Records of one entity type in a caller-visible order. An empty collection
/// takes the type of the first record added to it.
///
/// Read access goes through `Deref<Target = Vec<Record>>`; there is no
/// `DerefMut`, so every insertion passes the type check.
///

#[derive(Debug, Default, Deref, IntoIterator)]
pub struct Collection {
    ty: Option<Arc<EntityType>>,
    #[deref]
    #[into_iterator(owned, ref)]
    records: Vec<Record>,
}

impl Collection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty collection already bound to `ty`.
    #[must_use]
    pub const fn of_type(ty: Arc<EntityType>) -> Self {
        Self {
            ty: Some(ty),
            records: Vec::new(),
        }
    }

    pub fn from_records(ty: Arc<EntityType>, records: Vec<Record>) -> Result<Self, InternalError> {
        let mut collection = Self::of_type(ty);
        collection.extend(records)?;

        Ok(collection)
    }

    #[must_use]
    pub const fn entity_type(&self) -> Option<&Arc<EntityType>> {
        self.ty.as_ref()
    }

    /// Append one record; fails when its type differs from the collection's.
    pub fn add(&mut self, record: Record) -> Result<(), InternalError> {
        self.check_type(record.entity_type())?;
        if self.ty.is_none() {
            self.ty = Some(Arc::clone(record.entity_type()));
        }
        self.records.push(record);

        Ok(())
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = Record>) -> Result<(), InternalError> {
        for record in records {
            self.add(record)?;
        }

        Ok(())
    }

    /// Union by identity: records of `other` whose key is already present
    /// are dropped.
    pub fn add_collection(&mut self, other: Self) -> Result<(), InternalError> {
        if let Some(ty) = &other.ty {
            self.check_type(ty)?;
        }

        for record in other.records {
            if record.has_id() && self.contains_key(record.id()) {
                continue;
            }
            self.add(record)?;
        }

        Ok(())
    }

    /// Difference by identity.
    pub fn remove_collection(&mut self, other: &Self) -> Result<(), InternalError> {
        if let Some(ty) = &other.ty {
            self.check_type(ty)?;
        }

        self.records
            .retain(|record| !(record.has_id() && other.contains_key(record.id())));

        Ok(())
    }

    /// Stable ascending sort on the concatenated text of `fields`.
    pub fn sort(&mut self, fields: &[&str]) -> Result<(), InternalError> {
        if let Some(ty) = &self.ty {
            for field in fields {
                let decl = ty.structure().get_field(field)?;
                if decl.kind.is_composite() {
                    return Err(InternalError::usage(
                        ErrorOrigin::Collection,
                        format!("cannot sort on composite field '{field}'"),
                    ));
                }
            }
        }

        self.records.sort_by_cached_key(|record| {
            fields
                .iter()
                .map(|field| record.value_of(field).to_text())
                .collect::<String>()
        });

        Ok(())
    }

    /// Reload every member for write and delete it, then empty the
    /// collection. Returns how many deletes went through.
    pub fn delete_all(&mut self, session: &Session) -> Result<usize, InternalError> {
        let mut deleted = 0;
        for mut record in self.records.drain(..) {
            if !record.in_storage() {
                continue;
            }
            record.reload_for_write(session)?;
            if record.delete(session, false)? {
                deleted += 1;
            } else {
                record.release_lock(session)?;
            }
        }

        Ok(deleted)
    }

    /// Value of one primitive field for every member, in order.
    pub fn field_values(&self, name: &str) -> Result<Vec<Value>, InternalError> {
        self.records
            .iter()
            .map(|record| record.get(name).cloned())
            .collect()
    }

    #[must_use]
    pub fn keys(&self) -> Vec<Value> {
        self.records
            .iter()
            .filter(|record| record.has_id())
            .map(|record| record.id().clone())
            .collect()
    }

    #[must_use]
    pub fn contains_key(&self, id: &Value) -> bool {
        self.records
            .iter()
            .any(|record| values_equal(record.id(), id))
    }

    #[must_use]
    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    fn check_type(&self, other: &EntityType) -> Result<(), InternalError> {
        match &self.ty {
            Some(ty) if ty.name() != other.name() => Err(InternalError::usage(
                ErrorOrigin::Collection,
                format!(
                    "cannot mix {} records into a {} collection",
                    other.name(),
                    ty.name()
                ),
            )),
            _ => Ok(()),
        }
    }
}
