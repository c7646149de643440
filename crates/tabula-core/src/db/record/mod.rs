//! Module: db::record
//! Responsibility: the typed value container for one entity instance, its
//! load-time snapshot and dirty-field diffing.
//! Does not own: SQL composition for queries (see `db::query`).
//! Boundary: every persistence step (`load_*`, `save`, `delete`) takes the
//! owning `Session` explicitly.

mod delete;
mod lifecycle;

#[cfg(test)]
mod tests;

use crate::{
    db::{
        codec::{self, MetadataMap},
        storage::Row,
    },
    error::{ErrorOrigin, InternalError},
    model::{
        composite::{Address, Currency, PolymorphicRef},
        declaration::{FieldDeclaration, StorageLocation},
        entity_type::{DELETED_FIELD, EntityType, METADATA_FIELD},
        field::FieldKind,
        structure::check_enumeration,
    },
    value::Value,
};
use std::{collections::BTreeMap, fmt, sync::Arc};

///
/// AccessMode
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AccessMode {
    Read,
    /// Mutations allowed; for stored records the write lock is held.
    Write,
}

///
/// Record
///
/// Current values plus the values-as-loaded snapshot of one entity.
/// Composite fields hold no value themselves; their primitive sub-fields do.
///

pub struct Record {
    ty: Arc<EntityType>,
    values: BTreeMap<String, Value>,
    loaded: BTreeMap<String, Value>,
    mode: AccessMode,
    in_storage: bool,
    lock_key: Option<String>,
    /// Blob entries that no declared side-channel field claims.
    metadata_extra: MetadataMap,
}

impl Record {
    /// Fresh, unsaved record in write mode with defaults filled.
    #[must_use]
    pub fn new(ty: Arc<EntityType>) -> Self {
        let values = default_values(&ty);

        Self {
            ty,
            loaded: values.clone(),
            values,
            mode: AccessMode::Write,
            in_storage: false,
            lock_key: None,
            metadata_extra: MetadataMap::new(),
        }
    }

    /// Fresh record with initial values applied through the typed setter.
    pub fn with_values<I, K, V>(ty: Arc<EntityType>, values: I) -> Result<Self, InternalError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let mut record = Self::new(ty);
        for (name, value) in values {
            record.set(name.as_ref(), value)?;
        }

        Ok(record)
    }

    #[must_use]
    pub const fn entity_type(&self) -> &Arc<EntityType> {
        &self.ty
    }

    #[must_use]
    pub fn type_name(&self) -> &str {
        self.ty.name()
    }

    #[must_use]
    pub const fn mode(&self) -> AccessMode {
        self.mode
    }

    #[must_use]
    pub const fn is_write(&self) -> bool {
        matches!(self.mode, AccessMode::Write)
    }

    #[must_use]
    pub const fn in_storage(&self) -> bool {
        self.in_storage
    }

    /// Identity value; `Null` until assigned.
    #[must_use]
    pub fn id(&self) -> &Value {
        self.values.get(self.ty.key_name()).unwrap_or(&Value::Null)
    }

    #[must_use]
    pub fn has_id(&self) -> bool {
        !self.id().is_empty_value()
    }

    /// Soft-delete flag; always `false` for types without one.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.values
            .get(DELETED_FIELD)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Current value of a primitive field.
    pub fn get(&self, name: &str) -> Result<&Value, InternalError> {
        let decl = self.ty.structure().get_field(name)?;
        if decl.kind.is_composite() {
            return Err(composite_access(name));
        }

        Ok(self.values.get(name).unwrap_or(&Value::Null))
    }

    /// Value-as-loaded of a primitive field.
    pub fn loaded_value(&self, name: &str) -> Result<&Value, InternalError> {
        self.get(name)?;

        Ok(self.loaded.get(name).unwrap_or(&Value::Null))
    }

    /// Assign a field through coercion and enumeration checks.
    ///
    /// Composite sub-fields are only writable through their accessor.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), InternalError> {
        let decl = self.ty.structure().get_field(name)?;
        if decl.kind.is_composite() || decl.parent.is_some() {
            return Err(composite_access(name));
        }

        let decl = decl.clone();
        self.assign(&decl, value.into())
    }

    #[must_use]
    pub fn title(&self) -> Option<String> {
        let field = self.ty.config().title_field.as_deref()?;
        let value = self.values.get(field)?;

        (!value.is_empty_value()).then(|| value.to_text())
    }

    // ---- composite accessors -------------------------------------------

    pub fn currency(&self, name: &str) -> Result<Currency, InternalError> {
        let values = self.composite_values(name, FieldKind::Currency)?;

        Ok(Currency::from_values(&values))
    }

    pub fn set_currency(&mut self, name: &str, value: Currency) -> Result<(), InternalError> {
        self.assign_composite(name, FieldKind::Currency, value.into_values().to_vec())
    }

    pub fn address(&self, name: &str) -> Result<Address, InternalError> {
        let values = self.composite_values(name, FieldKind::Address)?;

        Ok(Address::from_values(&values))
    }

    pub fn set_address(&mut self, name: &str, value: Address) -> Result<(), InternalError> {
        self.assign_composite(name, FieldKind::Address, value.into_values().to_vec())
    }

    pub fn polymorphic(&self, name: &str) -> Result<Option<PolymorphicRef>, InternalError> {
        let values = self.composite_values(name, FieldKind::PolymorphicReference)?;

        Ok(PolymorphicRef::from_values(&values))
    }

    pub fn set_polymorphic(
        &mut self,
        name: &str,
        value: Option<PolymorphicRef>,
    ) -> Result<(), InternalError> {
        let values = value.map_or_else(
            || vec![Value::Null, Value::Null],
            |r| vec![Value::Text(r.target_type), r.target_id],
        );

        self.assign_composite(name, FieldKind::PolymorphicReference, values)
    }

    // ---- diffing -------------------------------------------------------

    /// Column-backed fields whose value differs from the loaded snapshot.
    /// Any side-channel change adds the blob column.
    #[must_use]
    pub fn changed_fields(&self) -> Vec<String> {
        let structure = self.ty.structure();
        let differs = |decl: &FieldDeclaration| {
            let current = self.values.get(&decl.name).unwrap_or(&Value::Null);
            let loaded = self.loaded.get(&decl.name).unwrap_or(&Value::Null);
            !decl.kind.same_value(current, loaded)
        };

        let mut changed: Vec<String> = structure
            .column_fields()
            .filter(|decl| decl.name != METADATA_FIELD && differs(decl))
            .map(|decl| decl.name.clone())
            .collect();
        if structure.side_channel_fields().any(differs) {
            changed.push(METADATA_FIELD.to_string());
        }

        changed
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.changed_fields().is_empty()
    }

    /// Required-field check; returns every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let structure = self.ty.structure();
        let mut problems = Vec::new();

        for decl in structure.fields().iter().filter(|d| d.required) {
            let missing = if decl.kind.is_composite() {
                structure
                    .sub_field_names(&decl.name)
                    .iter()
                    .all(|sub| self.values.get(*sub).is_none_or(Value::is_empty_value))
            } else {
                self.values
                    .get(&decl.name)
                    .is_none_or(Value::is_empty_value)
            };
            if missing {
                problems.push(format!("field '{}' is required", decl.name));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }

    // ---- raw values ----------------------------------------------------

    /// Every primitive field value, keyed by field name.
    #[must_use]
    pub fn to_raw_map(&self) -> BTreeMap<String, Value> {
        self.ty
            .structure()
            .fields()
            .iter()
            .filter(|d| !d.kind.is_composite() && d.kind != FieldKind::Metadata)
            .map(|d| {
                let value = self.values.get(&d.name).cloned().unwrap_or(Value::Null);
                (d.name.clone(), value)
            })
            .collect()
    }

    /// Rebuild an unsaved record from [`Self::to_raw_map`] output.
    pub fn from_raw_map(
        ty: Arc<EntityType>,
        raw: BTreeMap<String, Value>,
    ) -> Result<Self, InternalError> {
        let mut record = Self::new(ty);
        for (name, value) in raw {
            let decl = record.ty.structure().get_field(&name)?.clone();
            if decl.kind.is_composite() || decl.kind == FieldKind::Metadata {
                return Err(composite_access(&name));
            }
            record.assign(&decl, value)?;
        }

        Ok(record)
    }

    // ---- internals -----------------------------------------------------

    // Hydrate a stored row.
    pub(crate) fn from_row(
        ty: Arc<EntityType>,
        mut row: Row,
        mode: AccessMode,
    ) -> Result<Self, InternalError> {
        let mut values = BTreeMap::new();
        let blob = row.remove(METADATA_FIELD);
        let mut metadata = match &blob {
            Some(raw) => codec::decode_metadata(raw)?,
            None => MetadataMap::new(),
        };

        for decl in ty.structure().fields() {
            if decl.kind.is_composite() || decl.kind == FieldKind::Metadata {
                continue;
            }
            let value = match decl.storage() {
                StorageLocation::Column => match row.remove(&decl.name) {
                    Some(raw) => codec::decode(decl.kind, raw)?,
                    None => decl.initial_value(),
                },
                StorageLocation::SideChannel => match metadata.remove(&decl.name) {
                    Some(value) => decl.kind.coerce(value).map_err(|err| {
                        InternalError::corruption(
                            ErrorOrigin::Record,
                            format!("metadata entry '{}': {err}", decl.name),
                        )
                    })?,
                    None => decl.initial_value(),
                },
                StorageLocation::Transient => decl.initial_value(),
            };
            values.insert(decl.name.clone(), value);
        }

        Ok(Self {
            ty,
            loaded: values.clone(),
            values,
            mode,
            in_storage: true,
            lock_key: None,
            metadata_extra: metadata,
        })
    }

    // Side-channel values plus unclaimed blob entries.
    pub(crate) fn metadata_map(&self) -> MetadataMap {
        let mut map = self.metadata_extra.clone();
        for decl in self.ty.structure().side_channel_fields() {
            let value = self.values.get(&decl.name).cloned().unwrap_or(Value::Null);
            if value.is_null() {
                map.remove(&decl.name);
            } else {
                map.insert(decl.name.clone(), value);
            }
        }

        map
    }

    pub(crate) fn value_of(&self, name: &str) -> &Value {
        self.values.get(name).unwrap_or(&Value::Null)
    }

    // Unchecked write used by lifecycle code for injected fields.
    pub(crate) fn put(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_string(), value);
    }

    // Make the snapshot equal to the current values.
    pub(crate) fn mark_loaded(&mut self) {
        self.loaded = self.values.clone();
    }

    fn assign(&mut self, decl: &FieldDeclaration, value: Value) -> Result<(), InternalError> {
        if !self.is_write() {
            return Err(InternalError::usage(
                ErrorOrigin::Record,
                format!(
                    "cannot set '{}' on a read-only {} record",
                    decl.name,
                    self.ty.name()
                ),
            ));
        }

        let value = decl.kind.coerce(value).map_err(|err| {
            InternalError::validation(ErrorOrigin::Record, vec![format!("{}: {err}", decl.name)])
        })?;
        check_enumeration(decl, &value)
            .map_err(|problem| InternalError::validation(ErrorOrigin::Record, vec![problem]))?;

        if decl.kind.is_key() && self.in_storage && !decl.kind.same_value(self.id(), &value) {
            return Err(InternalError::usage(
                ErrorOrigin::Record,
                format!("key of a stored {} record is immutable", self.ty.name()),
            ));
        }

        self.values.insert(decl.name.clone(), value);
        Ok(())
    }

    fn composite_values(&self, name: &str, kind: FieldKind) -> Result<Vec<&Value>, InternalError> {
        let structure = self.ty.structure();
        let decl = structure.get_field(name)?;
        if decl.kind != kind {
            return Err(InternalError::usage(
                ErrorOrigin::Record,
                format!("field '{name}' is not a {kind:?} field"),
            ));
        }

        Ok(structure
            .sub_field_names(name)
            .into_iter()
            .map(|sub| self.value_of(sub))
            .collect())
    }

    fn assign_composite(
        &mut self,
        name: &str,
        kind: FieldKind,
        values: Vec<Value>,
    ) -> Result<(), InternalError> {
        let subs: Vec<FieldDeclaration> = {
            let structure = self.ty.structure();
            let decl = structure.get_field(name)?;
            if decl.kind != kind {
                return Err(InternalError::usage(
                    ErrorOrigin::Record,
                    format!("field '{name}' is not a {kind:?} field"),
                ));
            }
            structure
                .fields()
                .iter()
                .filter(|f| f.parent.as_deref() == Some(name))
                .cloned()
                .collect()
        };

        for (sub, value) in subs.iter().zip(values) {
            self.assign(sub, value)?;
        }

        Ok(())
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("type", &self.ty.name())
            .field("id", self.id())
            .field("mode", &self.mode)
            .field("in_storage", &self.in_storage)
            .field("values", &self.values)
            .finish_non_exhaustive()
    }
}

fn default_values(ty: &EntityType) -> BTreeMap<String, Value> {
    ty.structure()
        .fields()
        .iter()
        .filter(|d| !d.kind.is_composite() && d.kind != FieldKind::Metadata)
        .map(|d| (d.name.clone(), d.initial_value()))
        .collect()
}

fn composite_access(name: &str) -> InternalError {
    InternalError::usage(
        ErrorOrigin::Record,
        format!("field '{name}' is only accessible through its composite accessor"),
    )
}
