use super::{AccessMode, Record};
use crate::{
    db::{
        Session, codec,
        storage::{Row, SqlValue, quote_ident},
    },
    error::{ErrorOrigin, InternalError},
    model::{
        entity_type::{CREATED_ON_FIELD, EntityType, METADATA_FIELD, MODIFIED_ON_FIELD},
        field::FieldKind,
    },
    obs::sink::{self, ExecKind, MetricsEvent},
    services::Clock,
    value::Value,
};
use chrono::{DateTime, Timelike, Utc};
use std::sync::Arc;

impl Record {
    /// Hydrate from storage without taking the write lock. A held write
    /// lock is released first and the record is downgraded to read mode.
    ///
    /// Returns `false` (or a not-found error when `fail_if_missing`) when no
    /// row exists; the record is then a fresh read-only instance.
    pub fn load_for_read(
        &mut self,
        session: &Session,
        id: impl Into<Value>,
        fail_if_missing: bool,
    ) -> Result<bool, InternalError> {
        self.release_lock(session)?;
        let id = key_value(&self.ty, id.into())?;
        record_exec(ExecKind::Load, &self.ty);

        match fetch_row(session, &self.ty, &id)? {
            Some(row) => {
                *self = Self::from_row(Arc::clone(&self.ty), row, AccessMode::Read)?;
                Ok(true)
            }
            None => {
                self.reset(AccessMode::Read, &id);
                missing(&self.ty, &id, fail_if_missing)
            }
        }
    }

    /// Acquire the record's write lock, then hydrate.
    ///
    /// When the row is missing or cannot be decoded the lock is released and
    /// the record is left as a fresh write-mode instance.
    pub fn load_for_write(
        &mut self,
        session: &Session,
        id: impl Into<Value>,
        fail_if_missing: bool,
    ) -> Result<bool, InternalError> {
        self.release_lock(session)?;
        let id = key_value(&self.ty, id.into())?;
        let lock_key = self.ty.lock_key(&id.to_text());
        session.locks().lock(&lock_key)?;
        record_exec(ExecKind::Load, &self.ty);

        let hydrated = fetch_row(session, &self.ty, &id).and_then(|row| {
            row.map(|row| Self::from_row(Arc::clone(&self.ty), row, AccessMode::Write))
                .transpose()
        });

        match hydrated {
            Ok(Some(mut record)) => {
                record.lock_key = Some(lock_key);
                *self = record;
                Ok(true)
            }
            Ok(None) => {
                session.locks().release(&lock_key)?;
                self.reset(AccessMode::Write, &id);
                missing(&self.ty, &id, fail_if_missing)
            }
            Err(err) => {
                session.locks().release(&lock_key)?;
                self.reset(AccessMode::Write, &id);
                Err(err)
            }
        }
    }

    /// Upgrade to write mode in place; no-op when already writable.
    pub fn reload_for_write(&mut self, session: &Session) -> Result<(), InternalError> {
        if self.is_write() {
            return Ok(());
        }
        if !self.in_storage {
            self.mode = AccessMode::Write;
            return Ok(());
        }

        let id = self.id().clone();
        self.load_for_write(session, id, true).map(|_| ())
    }

    /// Release the write lock (if held) and drop to read mode.
    pub fn release_lock(&mut self, session: &Session) -> Result<(), InternalError> {
        if let Some(key) = self.lock_key.take() {
            session.locks().release(&key)?;
        }
        self.mode = AccessMode::Read;

        Ok(())
    }

    /// Persist pending changes.
    ///
    /// Returns `false` without writing when a hook vetoes or when nothing
    /// changed and `force` is not set. Unless `keep_write_open`, the lock is
    /// released and the record drops to read mode afterwards.
    pub fn save(
        &mut self,
        session: &Session,
        force: bool,
        keep_write_open: bool,
    ) -> Result<bool, InternalError> {
        self.persist(session, force, keep_write_open, true)
    }

    pub(crate) fn persist(
        &mut self,
        session: &Session,
        force: bool,
        keep_write_open: bool,
        check_required: bool,
    ) -> Result<bool, InternalError> {
        if !self.is_write() {
            return Err(InternalError::usage(
                ErrorOrigin::Record,
                format!("cannot save a read-only {} record", self.ty.name()),
            ));
        }

        let ty = Arc::clone(&self.ty);
        let hooks = ty.hooks();
        let creating = !self.in_storage;
        if creating && !hooks.on_create(self) {
            return Ok(false);
        }
        if !hooks.on_save(self) {
            return Ok(false);
        }
        if check_required {
            self.validate()
                .map_err(|problems| InternalError::validation(ErrorOrigin::Record, problems))?;
        }

        let changed = self.changed_fields();
        if !creating && changed.is_empty() && !force {
            if !keep_write_open {
                self.release_lock(session)?;
            }
            return Ok(false);
        }

        let now = now_seconds(session.clock());
        self.put(MODIFIED_ON_FIELD, Value::DateTime(now));
        if creating {
            if self.value_of(CREATED_ON_FIELD).is_null() {
                self.put(CREATED_ON_FIELD, Value::DateTime(now));
            }
            self.insert_row(session)?;
        } else {
            let mut columns = changed;
            columns.retain(|c| c != MODIFIED_ON_FIELD);
            columns.push(MODIFIED_ON_FIELD.to_string());
            self.update_row(session, &columns)?;
        }

        self.mark_loaded();
        self.in_storage = true;
        record_exec(ExecKind::Save, &ty);
        tracing::debug!(entity = ty.name(), id = %self.id(), created = creating, "record saved");

        if keep_write_open {
            if self.lock_key.is_none() {
                let key = ty.lock_key(&self.id().to_text());
                session.locks().lock(&key)?;
                self.lock_key = Some(key);
            }
        } else {
            self.release_lock(session)?;
        }
        session.titles().invalidate(ty.name());

        if creating {
            hooks.on_after_create(self);
        }
        hooks.on_after_save(self);

        Ok(true)
    }

    // Insert a new row; manual keys are checked for collisions behind the
    // per-type key semaphore.
    fn insert_row(&mut self, session: &Session) -> Result<(), InternalError> {
        let ty = Arc::clone(&self.ty);
        let key_name = ty.key_name();
        if !self.has_id() && !ty.auto_increment() {
            return Err(InternalError::usage(
                ErrorOrigin::Record,
                format!("{} uses manual keys; assign '{key_name}' before saving", ty.name()),
            ));
        }

        let mut columns = Vec::new();
        let mut params = Vec::new();
        for decl in ty.structure().column_fields() {
            if decl.name == key_name && !self.has_id() {
                continue;
            }
            columns.push(quote_ident(&decl.name));
            params.push(self.column_param(&decl.name, decl.kind)?);
        }
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(ty.name()),
            columns.join(", "),
            vec!["?"; columns.len()].join(", ")
        );

        if ty.auto_increment() {
            let rowid = session.storage().insert(&sql, &params)?;
            if !self.has_id() {
                self.put(key_name, Value::Int(rowid));
            }
            return Ok(());
        }

        let semaphore = ty.key_semaphore();
        session.locks().lock(&semaphore)?;
        let inserted = exists(session, &ty, self.id()).and_then(|taken| {
            if taken {
                Err(InternalError::conflict(
                    ErrorOrigin::Record,
                    format!("{} key '{}' is already taken", ty.name(), self.id()),
                ))
            } else {
                session.storage().insert(&sql, &params).map(|_| ())
            }
        });
        session.locks().release(&semaphore)?;

        inserted
    }

    pub(crate) fn update_row(
        &self,
        session: &Session,
        columns: &[String],
    ) -> Result<(), InternalError> {
        let structure = self.ty.structure();
        let mut assignments = Vec::with_capacity(columns.len());
        let mut params = Vec::with_capacity(columns.len() + 1);
        for name in columns {
            let decl = structure.get_field(name)?;
            assignments.push(format!("{} = ?", quote_ident(name)));
            params.push(self.column_param(name, decl.kind)?);
        }
        params.push(key_param(&self.ty, self.id())?);

        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            quote_ident(self.ty.name()),
            assignments.join(", "),
            quote_ident(self.ty.key_name())
        );
        if session.storage().execute(&sql, &params)? == 0 {
            return Err(InternalError::not_found(self.ty.name(), self.id().to_text()));
        }

        Ok(())
    }

    fn column_param(&self, name: &str, kind: FieldKind) -> Result<SqlValue, InternalError> {
        if name == METADATA_FIELD {
            let blob = codec::encode_metadata(&self.metadata_map())?;
            return Ok(SqlValue::Blob(blob));
        }

        codec::encode(kind, self.value_of(name))
    }

    // Turn into a fresh instance for a missing identity.
    fn reset(&mut self, mode: AccessMode, id: &Value) {
        let mut fresh = Self::new(Arc::clone(&self.ty));
        if self.ty.config().manual_keys {
            fresh.put(self.ty.key_name(), id.clone());
            fresh.mark_loaded();
        }
        fresh.mode = mode;
        *self = fresh;
    }
}

pub(crate) fn now_seconds(clock: &dyn Clock) -> DateTime<Utc> {
    let now = clock.now();
    now.with_nanosecond(0).unwrap_or(now)
}

pub(crate) fn key_param(ty: &EntityType, id: &Value) -> Result<SqlValue, InternalError> {
    codec::encode(ty.key_kind(), id)
}

fn key_value(ty: &EntityType, id: Value) -> Result<Value, InternalError> {
    let id = ty.key_kind().coerce(id).map_err(|err| {
        InternalError::usage(ErrorOrigin::Record, format!("invalid {} key: {err}", ty.name()))
    })?;
    if id.is_empty_value() {
        return Err(InternalError::usage(
            ErrorOrigin::Record,
            format!("cannot load a {} record without a key", ty.name()),
        ));
    }

    Ok(id)
}

fn fetch_row(session: &Session, ty: &EntityType, id: &Value) -> Result<Option<Row>, InternalError> {
    let sql = format!(
        "SELECT * FROM {} WHERE {} = ?",
        quote_ident(ty.name()),
        quote_ident(ty.key_name())
    );

    Ok(session
        .storage()
        .query(&sql, &[key_param(ty, id)?])?
        .into_iter()
        .next())
}

fn exists(session: &Session, ty: &EntityType, id: &Value) -> Result<bool, InternalError> {
    let sql = format!(
        "SELECT 1 AS found FROM {} WHERE {} = ? LIMIT 1",
        quote_ident(ty.name()),
        quote_ident(ty.key_name())
    );

    Ok(!session.storage().query(&sql, &[key_param(ty, id)?])?.is_empty())
}

fn missing(ty: &EntityType, id: &Value, fail_if_missing: bool) -> Result<bool, InternalError> {
    if fail_if_missing {
        Err(InternalError::not_found(ty.name(), id.to_text()))
    } else {
        Ok(false)
    }
}

pub(crate) fn record_exec(kind: ExecKind, ty: &EntityType) {
    sink::record(MetricsEvent::Exec {
        kind,
        entity: ty.name().to_string(),
    });
}
