use crate::{
    config::Config,
    db::{
        cache::TitleCache,
        query::Filter,
        record::Record,
        schema::SchemaSynchronizer,
        storage::Storage,
    },
    error::{ErrorOrigin, InternalError},
    lock::LockManager,
    model::{entity_type::EntityType, registry::Registry},
    services::{Clock, FileService, NoopFileService, SystemClock},
    value::Value,
};
use std::{
    cell::{RefCell, RefMut},
    collections::BTreeSet,
    sync::Arc,
};

///
/// Session
///
/// One unit of work: storage handle, lock manager, collaborators and the
/// request-scoped caches. Sessions are never shared across threads.
///

pub struct Session {
    registry: Arc<Registry>,
    storage: Box<dyn Storage>,
    locks: Arc<LockManager>,
    clock: Arc<dyn Clock>,
    files: Arc<dyn FileService>,
    config: Config,
    titles: RefCell<TitleCache>,
    deleting: RefCell<BTreeSet<String>>,
}

impl Session {
    #[must_use]
    pub fn builder(registry: Arc<Registry>, storage: impl Storage + 'static) -> SessionBuilder {
        SessionBuilder {
            registry,
            storage: Box::new(storage),
            locks: None,
            clock: Arc::new(SystemClock),
            files: Arc::new(NoopFileService),
            config: Config::default(),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[must_use]
    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    #[must_use]
    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    #[must_use]
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    #[must_use]
    pub fn files(&self) -> &dyn FileService {
        self.files.as_ref()
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    pub fn entity_type(&self, name: &str) -> Result<Arc<EntityType>, InternalError> {
        self.registry.get(name).cloned()
    }

    /// Fresh, unsaved record of a registered type.
    pub fn new_record(&self, type_name: &str) -> Result<Record, InternalError> {
        Ok(Record::new(self.entity_type(type_name)?))
    }

    /// Load one record in read mode, failing when it does not exist.
    pub fn load(&self, type_name: &str, id: impl Into<Value>) -> Result<Record, InternalError> {
        let mut record = self.new_record(type_name)?;
        record.load_for_read(self, id, true)?;

        Ok(record)
    }

    /// Load one record holding its write lock.
    pub fn load_for_write(
        &self,
        type_name: &str,
        id: impl Into<Value>,
    ) -> Result<Record, InternalError> {
        let mut record = self.new_record(type_name)?;
        record.load_for_write(self, id, true)?;

        Ok(record)
    }

    #[must_use]
    pub fn filter(&self, type_name: &str) -> Filter {
        Filter::new(type_name)
    }

    /// Reconcile the physical schema of every registered type.
    pub fn ensure_schema(&self) -> Result<bool, InternalError> {
        self.registry.validate_links()?;
        let sync = SchemaSynchronizer::new(self);

        let mut changed = false;
        for ty in self.registry.types() {
            changed |= sync.ensure_in_storage(ty)?;
        }

        Ok(changed)
    }

    /// Display title of a record, cached for the life of the session.
    pub fn title(&self, type_name: &str, id: &Value) -> Result<Option<String>, InternalError> {
        let key = id.to_text();
        if let Some(title) = self.titles.borrow().get(type_name, &key) {
            return Ok(title.clone());
        }

        let mut record = self.new_record(type_name)?;
        let title = if record.load_for_read(self, id.clone(), false)? {
            record.title()
        } else {
            None
        };
        self.titles
            .borrow_mut()
            .insert(type_name, key, title.clone());

        Ok(title)
    }

    pub(crate) fn titles(&self) -> RefMut<'_, TitleCache> {
        self.titles.borrow_mut()
    }

    // Register a record as being deleted; `false` if it already is.
    pub(crate) fn begin_delete(&self, key: &str) -> bool {
        self.deleting.borrow_mut().insert(key.to_string())
    }

    pub(crate) fn end_delete(&self, key: &str) {
        self.deleting.borrow_mut().remove(key);
    }

    pub(crate) fn is_deleting(&self, key: &str) -> bool {
        self.deleting.borrow().contains(key)
    }
}

///
/// SessionBuilder
///

pub struct SessionBuilder {
    registry: Arc<Registry>,
    storage: Box<dyn Storage>,
    locks: Option<Arc<LockManager>>,
    clock: Arc<dyn Clock>,
    files: Arc<dyn FileService>,
    config: Config,
}

impl SessionBuilder {
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Share a lock manager (and its holder identity) between sessions.
    #[must_use]
    pub fn locks(mut self, locks: Arc<LockManager>) -> Self {
        self.locks = Some(locks);
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn files(mut self, files: Arc<dyn FileService>) -> Self {
        self.files = files;
        self
    }

    pub fn build(self) -> Result<Session, InternalError> {
        let locks = match self.locks {
            Some(locks) => locks,
            None => Arc::new(LockManager::from_config(
                &self.config.lock,
                Arc::clone(&self.clock),
            )?),
        };
        if self.registry.types().next().is_none() {
            return Err(InternalError::usage(
                ErrorOrigin::Model,
                "session requires at least one registered entity type",
            ));
        }

        Ok(Session {
            registry: self.registry,
            storage: self.storage,
            locks,
            clock: self.clock,
            files: self.files,
            config: self.config,
            titles: RefCell::new(TitleCache::default()),
            deleting: RefCell::new(BTreeSet::new()),
        })
    }
}
