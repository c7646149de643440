use super::{Lease, LockStore, LockStoreError};
use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

///
/// MemoryLockStore
/// Process-local marker store; shared between managers through an `Arc`.
///

#[derive(Debug, Default)]
pub struct MemoryLockStore {
    leases: Mutex<HashMap<String, Lease>>,
}

impl MemoryLockStore {
    #[must_use]
    pub fn len(&self) -> usize {
        self.leases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LockStore for MemoryLockStore {
    fn read(&self, key: &str) -> Result<Option<Lease>, LockStoreError> {
        let leases = self.leases.lock().unwrap_or_else(PoisonError::into_inner);

        Ok(leases.get(key).cloned())
    }

    fn create(&self, key: &str, lease: &Lease) -> Result<bool, LockStoreError> {
        let mut leases = self.leases.lock().unwrap_or_else(PoisonError::into_inner);
        if leases.contains_key(key) {
            return Ok(false);
        }
        leases.insert(key.to_string(), lease.clone());

        Ok(true)
    }

    fn remove(&self, key: &str) -> Result<(), LockStoreError> {
        self.leases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);

        Ok(())
    }
}
