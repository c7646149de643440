use crate::db::record::Record;

///
/// EntityHooks
///
/// Per-type lifecycle callbacks. `on_create`, `on_save` and `on_delete` may
/// veto the operation by returning `false`; a veto is a silent no-op, not an
/// error. Every method defaults to accepting.
///

pub trait EntityHooks: Send + Sync {
    /// Runs before the first insert of a record.
    fn on_create(&self, _record: &mut Record) -> bool {
        true
    }

    /// Runs before every insert or update.
    fn on_save(&self, _record: &mut Record) -> bool {
        true
    }

    fn on_after_create(&self, _record: &Record) {}

    fn on_after_save(&self, _record: &Record) {}

    fn on_delete(&self, _record: &Record) -> bool {
        true
    }

    fn on_after_delete(&self, _record: &Record) {}

    /// Filters rows returned by an access-checked query.
    fn can_access(&self, _record: &Record) -> bool {
        true
    }
}

///
/// NoHooks
///

#[derive(Clone, Copy, Debug, Default)]
pub struct NoHooks;

impl EntityHooks for NoHooks {}
