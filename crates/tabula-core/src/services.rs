//! Module: services
//! Responsibility: narrow interfaces the core calls out to (time, owned
//! file attachments).

use crate::error::InternalError;
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::{Mutex, PoisonError};

///
/// Clock
///

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

///
/// SystemClock
///

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

///
/// FixedClock
/// Manually advanced clock for deterministic lease and timestamp tests.
///

#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    #[must_use]
    pub const fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = to;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

///
/// FileService
/// Owner of binary attachments referenced by `File`/`Image` fields.
///

pub trait FileService: Send + Sync {
    /// Delete one stored attachment.
    fn delete(&self, file_id: i64) -> Result<(), InternalError>;
}

///
/// NoopFileService
///

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopFileService;

impl FileService for NoopFileService {
    fn delete(&self, _file_id: i64) -> Result<(), InternalError> {
        Ok(())
    }
}
