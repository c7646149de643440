use crate::{
    error::{ErrorOrigin, InternalError},
    model::{
        declaration::FieldDeclaration,
        field::FieldKind,
        hooks::{EntityHooks, NoHooks},
        structure::{EntityStructure, is_identifier},
    },
};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

/// Injected identity field when a type declares none.
pub const ID_FIELD: &str = "id";
pub const CREATED_ON_FIELD: &str = "created_on";
pub const MODIFIED_ON_FIELD: &str = "modified_on";
/// Side-channel blob column.
pub const METADATA_FIELD: &str = "metadata";
/// Soft-delete flag, present only for [`DeleteMode::SoftMark`] types.
pub const DELETED_FIELD: &str = "deleted";

///
/// DeleteStrategy
/// How references held by other records are handled on delete.
///

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteStrategy {
    /// Refuse the delete while referrers exist.
    Block,
    /// Null out referring fields and cascade to depending records.
    #[default]
    PurgeReferers,
    /// Leave referrers untouched.
    DoNothing,
}

///
/// DeleteMode
/// How the record itself is removed.
///

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteMode {
    #[default]
    HardDelete,
    ResetFields,
    SoftMark,
}

///
/// EntityConfig
///

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct EntityConfig {
    /// Keys are assigned by the caller instead of auto-increment.
    pub manual_keys: bool,
    pub delete_strategy: DeleteStrategy,
    pub delete_mode: DeleteMode,
    /// Field used as the record's display title.
    pub title_field: Option<String>,
}

impl EntityConfig {
    fn check(&self) -> Result<(), String> {
        if self.delete_strategy == DeleteStrategy::DoNothing
            && self.delete_mode == DeleteMode::HardDelete
        {
            return Err(
                "delete strategy do_nothing requires delete mode reset_fields or soft_mark"
                    .to_string(),
            );
        }

        Ok(())
    }
}

///
/// EntityType
///
/// One declared kind of persisted record: its table name, expanded
/// structure (including injected fields), configuration and hooks.
///

pub struct EntityType {
    name: String,
    structure: EntityStructure,
    config: EntityConfig,
    key: String,
    hooks: Arc<dyn EntityHooks>,
}

impl EntityType {
    #[must_use]
    pub fn builder(name: impl Into<String>) -> EntityTypeBuilder {
        EntityTypeBuilder {
            name: name.into(),
            fields: Vec::new(),
            config: EntityConfig::default(),
            hooks: Arc::new(NoHooks),
        }
    }

    /// Table name; also the type's external identity.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn structure(&self) -> &EntityStructure {
        &self.structure
    }

    #[must_use]
    pub const fn config(&self) -> &EntityConfig {
        &self.config
    }

    #[must_use]
    pub fn hooks(&self) -> &dyn EntityHooks {
        self.hooks.as_ref()
    }

    /// Name of the identity field.
    #[must_use]
    pub fn key_name(&self) -> &str {
        &self.key
    }

    /// Kind of the identity field.
    #[must_use]
    pub fn key_kind(&self) -> FieldKind {
        self.structure
            .field(&self.key)
            .map_or(FieldKind::Key, |f| f.kind)
    }

    /// Whether the primary key is generated by the storage engine.
    #[must_use]
    pub fn auto_increment(&self) -> bool {
        !self.config.manual_keys && self.key_kind() == FieldKind::Key
    }

    #[must_use]
    pub const fn soft_deletes(&self) -> bool {
        matches!(self.config.delete_mode, DeleteMode::SoftMark)
    }

    /// Lock key guarding one record.
    #[must_use]
    pub fn lock_key(&self, id: &str) -> String {
        format!("{}.{id}", self.name)
    }

    /// Lock key of the per-type manual-key semaphore.
    #[must_use]
    pub fn key_semaphore(&self) -> String {
        format!("{}.__keys", self.name)
    }
}

impl fmt::Debug for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityType")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("config", &self.config)
            .field("fields", &self.structure.len())
            .finish_non_exhaustive()
    }
}

///
/// EntityTypeBuilder
///

pub struct EntityTypeBuilder {
    name: String,
    fields: Vec<FieldDeclaration>,
    config: EntityConfig,
    hooks: Arc<dyn EntityHooks>,
}

impl EntityTypeBuilder {
    #[must_use]
    pub fn field(mut self, decl: FieldDeclaration) -> Self {
        self.fields.push(decl);
        self
    }

    #[must_use]
    pub fn fields(mut self, decls: impl IntoIterator<Item = FieldDeclaration>) -> Self {
        self.fields.extend(decls);
        self
    }

    #[must_use]
    pub fn config(mut self, config: EntityConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub const fn manual_keys(mut self) -> Self {
        self.config.manual_keys = true;
        self
    }

    #[must_use]
    pub const fn delete_strategy(mut self, strategy: DeleteStrategy) -> Self {
        self.config.delete_strategy = strategy;
        self
    }

    #[must_use]
    pub const fn delete_mode(mut self, mode: DeleteMode) -> Self {
        self.config.delete_mode = mode;
        self
    }

    #[must_use]
    pub fn title_field(mut self, field: impl Into<String>) -> Self {
        self.config.title_field = Some(field.into());
        self
    }

    #[must_use]
    pub fn hooks(mut self, hooks: impl EntityHooks + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    /// Validate the configuration, inject framework fields and register the
    /// structure.
    pub fn build(self) -> Result<EntityType, InternalError> {
        let Self {
            name,
            fields,
            config,
            hooks,
        } = self;
        let fail = |message: String| {
            InternalError::usage(ErrorOrigin::Model, format!("entity type '{name}': {message}"))
        };

        if !is_identifier(&name) {
            return Err(fail("not a valid table name".to_string()));
        }
        config.check().map_err(&fail)?;

        let keys: Vec<&FieldDeclaration> = fields.iter().filter(|f| f.kind.is_key()).collect();
        if keys.len() > 1 {
            return Err(fail("declares more than one key field".to_string()));
        }
        if keys.iter().any(|f| f.kind == FieldKind::KeyText) && !config.manual_keys {
            return Err(fail("text keys require manual_keys".to_string()));
        }
        let key = keys
            .first()
            .map_or_else(|| ID_FIELD.to_string(), |f| f.name.clone());

        let mut all = Vec::with_capacity(fields.len() + 5);
        if keys.is_empty() {
            all.push(FieldDeclaration::new(ID_FIELD, FieldKind::Key).label("ID"));
        }
        all.extend(fields);
        all.extend(injected_fields(&config));

        let structure = EntityStructure::register_fields(all)
            .map_err(|err| fail(err.message))?;

        if let Some(title) = &config.title_field
            && !structure.contains(title)
        {
            return Err(fail(format!("title field '{title}' is not declared")));
        }

        Ok(EntityType {
            name,
            structure,
            config,
            key,
            hooks,
        })
    }
}

// Framework fields appended to every structure.
fn injected_fields(config: &EntityConfig) -> Vec<FieldDeclaration> {
    let mut fields = vec![
        FieldDeclaration::new(CREATED_ON_FIELD, FieldKind::DateTime).label("Created"),
        FieldDeclaration::new(MODIFIED_ON_FIELD, FieldKind::DateTime).label("Modified"),
        FieldDeclaration {
            invisible: true,
            ..FieldDeclaration::new(METADATA_FIELD, FieldKind::Metadata)
        },
    ];
    if config.delete_mode == DeleteMode::SoftMark {
        fields.push(FieldDeclaration {
            invisible: true,
            ..FieldDeclaration::new(DELETED_FIELD, FieldKind::Boolean)
        });
    }

    fields
}
