use crate::{
    error::{ErrorOrigin, InternalError},
    model::field::FieldKind,
    value::Value,
};
use serde::{Deserialize, Serialize};

///
/// StorageLocation
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum StorageLocation {
    /// Own physical column.
    Column,
    /// Packed into the catch-all metadata blob.
    SideChannel,
    /// Not persisted.
    Transient,
}

///
/// Relation
///
/// What happens to a referencing record when its target is deleted:
/// `Referring` records lose the reference, `Depending` records are deleted.
///

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    #[default]
    Referring,
    Depending,
}

///
/// FieldDeclaration
///
/// One named attribute of an entity type, in the declaration wire format
/// (`fieldtype`, `store_in_database`, `foreign_class`, ...).
///

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct FieldDeclaration {
    #[serde(skip)]
    pub name: String,

    #[serde(rename = "fieldtype")]
    pub kind: FieldKind,

    #[serde(default)]
    pub label: String,

    #[serde(default)]
    pub required: bool,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::value::wire::option"
    )]
    pub default_value: Option<Value>,

    #[serde(default = "default_true")]
    pub store_in_database: bool,

    #[serde(default)]
    pub store_in_metadata: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_class: Option<String>,

    /// Index group; fields sharing a key name form one composite index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enumeration: Option<Vec<String>>,

    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        with = "named_declarations"
    )]
    pub substructure: Vec<Self>,

    #[serde(default)]
    pub invisible: bool,

    #[serde(
        default,
        rename = "columnvisibility",
        skip_serializing_if = "Option::is_none"
    )]
    pub column_visibility: Option<String>,

    #[serde(default)]
    pub relation: Relation,

    /// Composite parent for expanded primitive sub-fields.
    #[serde(skip)]
    pub parent: Option<String>,
}

const fn default_true() -> bool {
    true
}

impl FieldDeclaration {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            label: String::new(),
            required: false,
            default_value: None,
            store_in_database: true,
            store_in_metadata: false,
            foreign_class: None,
            key: None,
            enumeration: None,
            substructure: Vec::new(),
            invisible: false,
            column_visibility: None,
            relation: Relation::Referring,
            parent: None,
        }
    }

    /// Parse a name-keyed declaration map (declaration order is preserved).
    pub fn parse_map(json: &str) -> Result<Vec<Self>, InternalError> {
        let raw: serde_json::Map<String, serde_json::Value> = serde_json::from_str(json)
            .map_err(|err| {
                InternalError::usage(ErrorOrigin::Model, format!("invalid declarations: {err}"))
            })?;

        named_declarations::from_map(raw).map_err(|err| {
            InternalError::usage(ErrorOrigin::Model, format!("invalid declarations: {err}"))
        })
    }

    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Store the field inside the side-channel blob instead of its own column.
    #[must_use]
    pub const fn in_metadata(mut self) -> Self {
        self.store_in_metadata = true;
        self
    }

    #[must_use]
    pub const fn transient(mut self) -> Self {
        self.store_in_database = false;
        self.store_in_metadata = false;
        self
    }

    #[must_use]
    pub fn foreign(mut self, entity: impl Into<String>) -> Self {
        self.foreign_class = Some(entity.into());
        self
    }

    #[must_use]
    pub const fn depending(mut self) -> Self {
        self.relation = Relation::Depending;
        self
    }

    #[must_use]
    pub fn index(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    #[must_use]
    pub fn enumeration<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enumeration = Some(values.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn substructure(mut self, fields: Vec<Self>) -> Self {
        self.substructure = fields;
        self
    }

    #[must_use]
    pub const fn storage(&self) -> StorageLocation {
        if self.store_in_metadata {
            StorageLocation::SideChannel
        } else if self.store_in_database {
            StorageLocation::Column
        } else {
            StorageLocation::Transient
        }
    }

    /// Column-backed and physically representable.
    #[must_use]
    pub const fn has_column(&self) -> bool {
        matches!(self.storage(), StorageLocation::Column) && self.kind.column_type().is_some()
    }

    #[must_use]
    pub const fn is_side_channel(&self) -> bool {
        matches!(self.storage(), StorageLocation::SideChannel)
    }

    /// Value a fresh record starts with.
    #[must_use]
    pub fn initial_value(&self) -> Value {
        self.default_value
            .clone()
            .and_then(|value| self.kind.coerce(value).ok())
            .unwrap_or_else(|| self.kind.empty_value())
    }
}

mod named_declarations {
    use super::FieldDeclaration;
    use serde::{
        Deserialize, Deserializer, Serializer,
        de::Error as _,
        ser::SerializeMap,
    };

    pub(super) fn serialize<S: Serializer>(
        fields: &[FieldDeclaration],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(fields.len()))?;
        for field in fields {
            map.serialize_entry(&field.name, field)?;
        }
        map.end()
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<FieldDeclaration>, D::Error> {
        let raw = serde_json::Map::<String, serde_json::Value>::deserialize(deserializer)?;

        from_map(raw).map_err(D::Error::custom)
    }

    pub(super) fn from_map(
        raw: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Vec<FieldDeclaration>, serde_json::Error> {
        raw.into_iter()
            .map(|(name, value)| {
                let mut decl: FieldDeclaration = serde_json::from_value(value)?;
                decl.name = name;
                Ok(decl)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_map_preserves_declaration_order() {
        let decls = FieldDeclaration::parse_map(
            r#"{
                "title": { "fieldtype": "text", "label": "Title", "required": true },
                "notes": { "fieldtype": "big_text", "store_in_metadata": true },
                "customer": { "fieldtype": "reference", "foreign_class": "customer", "relation": "depending" },
                "status": { "fieldtype": "enumeration", "enumeration": ["open", "paid"], "default_value": "open" },
                "lines": { "fieldtype": "object", "substructure": { "qty": { "fieldtype": "integer" } } }
            }"#,
        )
        .expect("declarations should parse");

        let names: Vec<_> = decls.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["title", "notes", "customer", "status", "lines"]);
        assert!(decls[0].required);
        assert_eq!(decls[1].storage(), StorageLocation::SideChannel);
        assert_eq!(decls[2].relation, Relation::Depending);
        assert_eq!(decls[3].initial_value(), Value::Text("open".into()));
        assert_eq!(decls[4].substructure[0].name, "qty");
    }

    #[test]
    fn storage_location_follows_flags() {
        let column = FieldDeclaration::new("a", FieldKind::Text);
        let side = FieldDeclaration::new("b", FieldKind::Text).in_metadata();
        let transient = FieldDeclaration::new("c", FieldKind::Text).transient();

        assert!(column.has_column());
        assert!(side.is_side_channel());
        assert_eq!(transient.storage(), StorageLocation::Transient);
        assert!(!FieldDeclaration::new("d", FieldKind::Currency).has_column());
    }

    #[test]
    fn unknown_fieldtype_is_rejected() {
        let err = FieldDeclaration::parse_map(r#"{ "x": { "fieldtype": "hologram" } }"#)
            .expect_err("unknown fieldtype should fail");

        assert!(err.is_usage());
    }
}
