//! Module: lock
//! Responsibility: named advisory locks with leases, stale-lease breaking
//! and bounded blocking waits.
//! Does not own: what a key protects; callers build keys per record or per
//! type semaphore.
//! Boundary: markers live in a `LockStore`; check-and-create is serialized
//! by one process-wide guard.

mod file;
mod memory;


pub use file::FileLockStore;
pub use memory::MemoryLockStore;

use crate::{
    config::LockConfig,
    error::{ErrorClass, ErrorOrigin, InternalError},
    obs::sink::{self, MetricsEvent},
    services::Clock,
};
use chrono::{DateTime, TimeDelta, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread,
    time::{Duration, Instant},
};
use thiserror::Error as ThisError;

///
/// Lease
///
/// Content of one lock marker: who holds it and until when.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Lease {
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

///
/// LockStoreError
///

#[derive(Debug, ThisError)]
pub enum LockStoreError {
    #[error("lock store i/o failed for '{key}': {source}")]
    Io {
        key: String,
        source: std::io::Error,
    },

    #[error("lock store is unusable: {0}")]
    Unavailable(String),
}

impl From<LockStoreError> for InternalError {
    fn from(err: LockStoreError) -> Self {
        Self::new(ErrorClass::Internal, ErrorOrigin::Lock, err.to_string())
    }
}

///
/// LockStore
/// Key-presence store holding lease markers.
///

pub trait LockStore: Send + Sync {
    /// Read the current lease, if a marker exists.
    fn read(&self, key: &str) -> Result<Option<Lease>, LockStoreError>;

    /// Create a marker; `false` when one already exists.
    fn create(&self, key: &str, lease: &Lease) -> Result<bool, LockStoreError>;

    /// Remove a marker; removing a missing marker is not an error.
    fn remove(&self, key: &str) -> Result<(), LockStoreError>;
}

///
/// LockManager
///
/// Locks are not re-entrant: acquiring a key this manager already holds
/// waits like any other contender.
///

pub struct LockManager {
    store: Arc<dyn LockStore>,
    guard: Mutex<()>,
    holder_id: String,
    held: Mutex<BTreeSet<String>>,
    clock: Arc<dyn Clock>,
    settings: LockConfig,
}

impl LockManager {
    pub fn new(store: Arc<dyn LockStore>, clock: Arc<dyn Clock>, settings: LockConfig) -> Self {
        Self {
            store,
            guard: Mutex::new(()),
            holder_id: ulid::Ulid::new().to_string(),
            held: Mutex::new(BTreeSet::new()),
            clock,
            settings,
        }
    }

    /// Build a manager over the store named by the lock configuration.
    pub fn from_config(settings: &LockConfig, clock: Arc<dyn Clock>) -> Result<Self, InternalError> {
        let store: Arc<dyn LockStore> = match &settings.directory {
            Some(dir) => Arc::new(FileLockStore::open(dir, settings.stale_after())?),
            None => Arc::new(MemoryLockStore::default()),
        };

        Ok(Self::new(store, clock, settings.clone()))
    }

    #[must_use]
    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    #[must_use]
    pub const fn settings(&self) -> &LockConfig {
        &self.settings
    }

    #[must_use]
    pub fn is_held(&self, key: &str) -> bool {
        self.held().contains(key)
    }

    /// Keys this manager currently holds, in order.
    #[must_use]
    pub fn held_keys(&self) -> Vec<String> {
        self.held().iter().cloned().collect()
    }

    /// One non-blocking acquisition attempt.
    ///
    /// An existing lease is broken only when it has expired and is still
    /// the same lease on a second read.
    pub fn try_acquire(&self, key: &str, stale_after: Duration) -> Result<bool, InternalError> {
        let _guard = self.guard.lock().unwrap_or_else(PoisonError::into_inner);
        let now = self.clock.now();
        let lease = Lease {
            holder: self.holder_id.clone(),
            acquired_at: now,
            expires_at: TimeDelta::from_std(stale_after)
                .ok()
                .and_then(|ttl| now.checked_add_signed(ttl))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        };

        if self.store.create(key, &lease)? {
            self.held().insert(key.to_string());
            tracing::debug!(key, holder = %self.holder_id, "lock acquired");
            return Ok(true);
        }

        let Some(existing) = self.store.read(key)? else {
            // Released between create and read.
            return self.finish_create(key, &lease);
        };
        if !existing.is_expired(now) {
            return Ok(false);
        }
        if self.store.read(key)?.as_ref() != Some(&existing) {
            return Ok(false);
        }

        tracing::warn!(
            key,
            stale_holder = %existing.holder,
            expired_at = %existing.expires_at,
            "breaking stale lock"
        );
        self.store.remove(key)?;
        sink::record(MetricsEvent::LockBreak {
            key: key.to_string(),
        });

        self.finish_create(key, &lease)
    }

    /// Retry [`Self::try_acquire`] with randomized backoff until `max_wait`.
    pub fn acquire(
        &self,
        key: &str,
        stale_after: Duration,
        max_wait: Duration,
    ) -> Result<bool, InternalError> {
        let deadline = Instant::now() + max_wait;
        let unit = self.settings.backoff_unit();
        let mut rng = rand::thread_rng();
        let mut attempts: u64 = 0;

        let acquired = loop {
            attempts += 1;
            if self.try_acquire(key, stale_after)? {
                break true;
            }

            let now = Instant::now();
            if now >= deadline {
                break false;
            }
            let pause = unit * rng.gen_range(1..=3u32);
            thread::sleep(pause.min(deadline - now));
        };

        if attempts > 1 {
            sink::record(MetricsEvent::LockWait {
                key: key.to_string(),
                attempts: attempts - 1,
            });
        }
        if !acquired {
            tracing::debug!(key, attempts, "lock wait timed out");
        }

        Ok(acquired)
    }

    /// Acquire with the configured bounds, failing with a concurrency error.
    pub fn lock(&self, key: &str) -> Result<(), InternalError> {
        if self.acquire(key, self.settings.stale_after(), self.settings.max_wait())? {
            Ok(())
        } else {
            Err(InternalError::concurrency(format!(
                "could not acquire lock '{key}' within {} ms",
                self.settings.max_wait_ms
            )))
        }
    }

    /// Release a held lock. Releasing a lock this manager does not hold is a no-op.
    pub fn release(&self, key: &str) -> Result<(), InternalError> {
        let _guard = self.guard.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.held().remove(key) {
            return Ok(());
        }

        // Someone may have broken and re-taken the lease meanwhile.
        match self.store.read(key)? {
            Some(lease) if lease.holder == self.holder_id => {
                self.store.remove(key)?;
                tracing::debug!(key, "lock released");
            }
            _ => tracing::warn!(key, "lock was lost before release"),
        }

        Ok(())
    }

    /// Release every lock this manager holds.
    pub fn release_all(&self) -> Result<(), InternalError> {
        let keys: Vec<String> = self.held().iter().cloned().collect();
        for key in keys {
            self.release(&key)?;
        }

        Ok(())
    }

    fn finish_create(&self, key: &str, lease: &Lease) -> Result<bool, InternalError> {
        let created = self.store.create(key, lease)?;
        if created {
            self.held().insert(key.to_string());
        }

        Ok(created)
    }

    fn held(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        if let Err(err) = self.release_all() {
            tracing::warn!(error = %err, "failed to release locks on teardown");
        }
    }
}
