use super::{
    Record,
    lifecycle::{key_param, now_seconds, record_exec},
};
use crate::{
    db::{Session, query::Condition, query::Filter, storage::quote_ident},
    error::{ErrorOrigin, InternalError},
    model::{
        composite::PolymorphicRef,
        declaration::Relation,
        entity_type::{
            CREATED_ON_FIELD, DELETED_FIELD, DeleteMode, DeleteStrategy, EntityType,
            METADATA_FIELD, MODIFIED_ON_FIELD,
        },
        registry::{RefCardinality, ReverseRef},
    },
    obs::sink::{self, ExecKind, MetricsEvent},
    value::{Value, values_equal},
};
use std::sync::Arc;

impl Record {
    /// Delete this record according to its type's delete strategy and mode.
    ///
    /// Returns `false` when a hook vetoes, when the `Block` strategy finds
    /// referrers and `force_purge` is not set, or when this record is already
    /// being deleted further up the cascade.
    pub fn delete(&mut self, session: &Session, force_purge: bool) -> Result<bool, InternalError> {
        if !self.is_write() {
            return Err(InternalError::usage(
                ErrorOrigin::Record,
                format!("cannot delete a read-only {} record", self.ty.name()),
            ));
        }
        if !self.in_storage {
            return Err(InternalError::usage(
                ErrorOrigin::Record,
                format!("cannot delete an unsaved {} record", self.ty.name()),
            ));
        }

        let identity = self.ty.lock_key(&self.id().to_text());
        if !session.begin_delete(&identity) {
            return Ok(false);
        }
        let result = self.delete_tracked(session, force_purge);
        session.end_delete(&identity);

        result
    }

    fn delete_tracked(&mut self, session: &Session, force_purge: bool) -> Result<bool, InternalError> {
        let ty = Arc::clone(&self.ty);
        if !ty.hooks().on_delete(self) {
            return Ok(false);
        }

        let strategy = ty.config().delete_strategy;
        if strategy == DeleteStrategy::Block && !force_purge && self.has_referrers(session)? {
            sink::record(MetricsEvent::BlockedDelete {
                entity: ty.name().to_string(),
            });
            tracing::debug!(entity = ty.name(), id = %self.id(), "delete blocked by referrers");
            return Ok(false);
        }

        self.delete_attachments(session)?;
        self.apply_delete_mode(session, &ty)?;
        if strategy != DeleteStrategy::DoNothing {
            self.purge_referrers(session, force_purge)?;
        }

        self.release_lock(session)?;
        session.titles().invalidate(ty.name());
        record_exec(ExecKind::Delete, &ty);
        tracing::debug!(entity = ty.name(), id = %self.id(), mode = ?ty.config().delete_mode, "record deleted");
        ty.hooks().on_after_delete(self);

        Ok(true)
    }

    /// Whether any stored record references this one.
    pub fn has_referrers(&self, session: &Session) -> Result<bool, InternalError> {
        for reverse in session.registry().referrers(self.ty.name()) {
            if self.referrer_filter(reverse).exists(session)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    // Filter selecting the records of `reverse.source` pointing at us.
    fn referrer_filter(&self, reverse: &ReverseRef) -> Filter {
        let target = match reverse.cardinality {
            RefCardinality::Single | RefCardinality::Multi => self.id().clone(),
            RefCardinality::Polymorphic => {
                PolymorphicRef::new(self.ty.name(), self.id().clone()).to_value()
            }
        };
        let mut condition = Condition::equals(&reverse.field, target);
        if reverse.source == self.ty.name() {
            condition = condition.and(!Condition::equals(self.ty.key_name(), self.id().clone()));
        }

        Filter::new(&reverse.source)
            .condition(condition)
            .include_deleted(true)
    }

    fn delete_attachments(&self, session: &Session) -> Result<(), InternalError> {
        for decl in self.ty.structure().fields() {
            if !decl.kind.is_attachment() {
                continue;
            }
            if let Some(file_id) = self.value_of(&decl.name).as_int() {
                session.files().delete(file_id)?;
            }
        }

        Ok(())
    }

    fn apply_delete_mode(&mut self, session: &Session, ty: &EntityType) -> Result<(), InternalError> {
        match ty.config().delete_mode {
            DeleteMode::HardDelete => {
                let sql = format!(
                    "DELETE FROM {} WHERE {} = ?",
                    quote_ident(ty.name()),
                    quote_ident(ty.key_name())
                );
                session.storage().execute(&sql, &[key_param(ty, self.id())?])?;
                self.in_storage = false;
            }
            DeleteMode::ResetFields => {
                let kept = [ty.key_name(), CREATED_ON_FIELD, METADATA_FIELD];
                for decl in ty.structure().fields() {
                    if decl.kind.is_composite() || kept.contains(&decl.name.as_str()) {
                        continue;
                    }
                    self.put(&decl.name, decl.initial_value());
                }
                self.put(MODIFIED_ON_FIELD, Value::DateTime(now_seconds(session.clock())));

                let columns: Vec<String> = ty
                    .structure()
                    .column_fields()
                    .filter(|decl| decl.name != ty.key_name() && decl.name != CREATED_ON_FIELD)
                    .map(|decl| decl.name.clone())
                    .collect();
                self.update_row(session, &columns)?;
                self.mark_loaded();
            }
            DeleteMode::SoftMark => {
                self.put(DELETED_FIELD, Value::Bool(true));
                self.put(MODIFIED_ON_FIELD, Value::DateTime(now_seconds(session.clock())));
                self.update_row(
                    session,
                    &[DELETED_FIELD.to_string(), MODIFIED_ON_FIELD.to_string()],
                )?;
                self.mark_loaded();
            }
        }

        Ok(())
    }

    // Depending referrers are deleted, referring ones get the link cleared.
    fn purge_referrers(&self, session: &Session, force_purge: bool) -> Result<(), InternalError> {
        let reverse: Vec<ReverseRef> = session
            .registry()
            .referrers(self.ty.name())
            .cloned()
            .collect();

        for reverse in &reverse {
            let source = session.entity_type(&reverse.source)?;
            let referrers = self.referrer_filter(reverse).execute_unbounded(session)?;

            for mut referrer in referrers {
                if session.is_deleting(&source.lock_key(&referrer.id().to_text())) {
                    continue;
                }
                referrer.reload_for_write(session)?;

                match reverse.relation {
                    Relation::Depending => {
                        referrer.delete(session, force_purge)?;
                    }
                    Relation::Referring => {
                        self.unlink(&mut referrer, reverse)?;
                        referrer.persist(session, false, false, false)?;
                    }
                }
            }
        }

        Ok(())
    }

    fn unlink(&self, referrer: &mut Self, reverse: &ReverseRef) -> Result<(), InternalError> {
        match reverse.cardinality {
            RefCardinality::Single => referrer.set(&reverse.field, Value::Null),
            RefCardinality::Multi => {
                let remaining: Vec<Value> = referrer
                    .get(&reverse.field)?
                    .as_list()
                    .unwrap_or_default()
                    .iter()
                    .filter(|item| !values_equal(item, self.id()))
                    .cloned()
                    .collect();
                referrer.set(&reverse.field, Value::List(remaining))
            }
            RefCardinality::Polymorphic => referrer.set_polymorphic(&reverse.field, None),
        }
    }
}
