use crate::{
    error::{ErrorOrigin, InternalError},
    model::{
        composite::{sub_field_name, sub_fields},
        declaration::FieldDeclaration,
        field::FieldKind,
    },
    value::Value,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Longest accepted table, column or index-group identifier.
pub const MAX_IDENTIFIER_LEN: usize = 64;

///
/// EntityStructure
///
/// Ordered field declarations of one entity type after composite expansion.
/// Primitive sub-fields of a composite are stored immediately ahead of their
/// parent and share its storage location and index group.
///

#[derive(Clone, Debug, Default)]
pub struct EntityStructure {
    fields: Vec<FieldDeclaration>,
    positions: HashMap<String, usize>,
}

impl EntityStructure {
    /// Register declarations in order, expanding composites once.
    pub fn register_fields(
        declarations: impl IntoIterator<Item = FieldDeclaration>,
    ) -> Result<Self, InternalError> {
        let mut structure = Self::default();
        let mut problems = Vec::new();

        for decl in declarations {
            if decl.kind.is_composite() {
                for sub in Self::expand_composite(&decl) {
                    structure.push(sub, &mut problems);
                }
            }
            structure.push(decl, &mut problems);
        }

        if problems.is_empty() {
            Ok(structure)
        } else {
            Err(InternalError::usage(
                ErrorOrigin::Model,
                format!("invalid field declarations: {}", problems.join("; ")),
            ))
        }
    }

    /// Primitive declarations backing one composite declaration.
    #[must_use]
    pub fn expand_composite(decl: &FieldDeclaration) -> Vec<FieldDeclaration> {
        sub_fields(decl.kind)
            .iter()
            .map(|(suffix, kind)| {
                let mut sub = FieldDeclaration::new(sub_field_name(&decl.name, suffix), *kind);
                sub.label.clone_from(&decl.label);
                sub.store_in_database = decl.store_in_database;
                sub.store_in_metadata = decl.store_in_metadata;
                sub.key.clone_from(&decl.key);
                sub.invisible = decl.invisible;
                sub.relation = decl.relation;
                sub.parent = Some(decl.name.clone());
                sub
            })
            .collect()
    }

    /// Look up a field, failing with a usage error when it is not declared.
    pub fn get_field(&self, name: &str) -> Result<&FieldDeclaration, InternalError> {
        self.field(name).ok_or_else(|| {
            InternalError::usage(ErrorOrigin::Model, format!("unknown field '{name}'"))
        })
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDeclaration> {
        self.positions.get(name).map(|&i| &self.fields[i])
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.positions.contains_key(name)
    }

    #[must_use]
    pub fn fields(&self) -> &[FieldDeclaration] {
        &self.fields
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The identity field, if one is declared.
    #[must_use]
    pub fn key_field(&self) -> Option<&FieldDeclaration> {
        self.fields.iter().find(|f| f.kind.is_key())
    }

    /// Fields with their own physical column, in declaration order.
    pub fn column_fields(&self) -> impl Iterator<Item = &FieldDeclaration> {
        self.fields.iter().filter(|f| f.has_column())
    }

    /// Primitive fields packed into the side-channel blob.
    pub fn side_channel_fields(&self) -> impl Iterator<Item = &FieldDeclaration> {
        self.fields
            .iter()
            .filter(|f| f.is_side_channel() && !f.kind.is_composite())
    }

    /// Names of the primitive sub-fields of a composite field.
    #[must_use]
    pub fn sub_field_names(&self, parent: &str) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.parent.as_deref() == Some(parent))
            .map(|f| f.name.as_str())
            .collect()
    }

    /// Declared index groups: key name to the ordered column list.
    #[must_use]
    pub fn index_groups(&self) -> BTreeMap<String, Vec<String>> {
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for field in self.column_fields() {
            if let Some(key) = &field.key {
                groups
                    .entry(key.clone())
                    .or_default()
                    .push(field.name.clone());
            }
        }

        groups
    }

    // Validate one declaration and append it.
    fn push(&mut self, decl: FieldDeclaration, problems: &mut Vec<String>) {
        let name = decl.name.clone();

        if !is_identifier(&name) {
            problems.push(format!("'{name}' is not a valid field name"));
        }
        if self.positions.contains_key(&name) {
            problems.push(format!("field '{name}' is declared twice"));
            return;
        }
        problems.extend(check_declaration(&decl));

        self.positions.insert(name, self.fields.len());
        self.fields.push(decl);
    }
}

// Per-declaration consistency checks.
fn check_declaration(decl: &FieldDeclaration) -> Vec<String> {
    let mut problems = Vec::new();
    let name = &decl.name;

    if decl.kind.is_enumeration() {
        match &decl.enumeration {
            Some(values) if !values.is_empty() => {
                let unique: BTreeSet<_> = values.iter().collect();
                if unique.len() != values.len() {
                    problems.push(format!("enumeration of '{name}' repeats a value"));
                }
            }
            _ => problems.push(format!("enumeration field '{name}' has no value set")),
        }
    }

    let needs_target = matches!(decl.kind, FieldKind::Reference | FieldKind::ReferenceMulti)
        && decl.parent.is_none();
    if needs_target && decl.foreign_class.is_none() {
        problems.push(format!("reference field '{name}' has no foreign_class"));
    }

    if decl.kind.is_key() && decl.is_side_channel() {
        problems.push(format!("key field '{name}' must be column-backed"));
    }

    if let Some(key) = &decl.key
        && !is_identifier(key)
    {
        problems.push(format!("index group '{key}' of '{name}' is not a valid name"));
    }

    if let Some(default) = &decl.default_value {
        match decl.kind.coerce(default.clone()) {
            Ok(value) => {
                if let Err(problem) = check_enumeration(decl, &value) {
                    problems.push(problem);
                }
            }
            Err(err) => problems.push(format!("default of '{name}' is invalid: {err}")),
        }
    }

    problems
}

/// Check a coerced value against the field's declared enumeration set.
pub(crate) fn check_enumeration(
    decl: &FieldDeclaration,
    value: &Value,
) -> Result<(), String> {
    let Some(allowed) = decl.enumeration.as_ref().filter(|_| decl.kind.is_enumeration()) else {
        return Ok(());
    };
    let items: Vec<&Value> = match value {
        Value::List(items) => items.iter().collect(),
        Value::Null => Vec::new(),
        single => vec![single],
    };

    for item in items {
        let text = item.to_text();
        if !allowed.iter().any(|a| *a == text) {
            return Err(format!(
                "'{text}' is not a valid value for enumeration '{}'",
                decl.name
            ));
        }
    }

    Ok(())
}

/// ASCII letters, digits and underscores, bounded in length.
#[must_use]
pub fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_IDENTIFIER_LEN
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
