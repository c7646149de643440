use super::{Lease, LockStore, LockStoreError};
use chrono::{DateTime, TimeDelta, Utc};
use std::{
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    time::Duration,
};

///
/// FileLockStore
///
/// One `<key>.lock` file per lock holding a JSON lease. Creation uses
/// `create_new`, so the existence check is atomic across processes.
/// Markers that cannot be parsed fall back to their modification time plus
/// `fallback_ttl`.
///

#[derive(Debug)]
pub struct FileLockStore {
    dir: PathBuf,
    fallback_ttl: Duration,
}

impl FileLockStore {
    /// Open (and create if needed) a marker directory.
    pub fn open(dir: impl AsRef<Path>, fallback_ttl: Duration) -> Result<Self, LockStoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| LockStoreError::Io {
            key: dir.display().to_string(),
            source,
        })?;

        Ok(Self { dir, fallback_ttl })
    }

    /// Marker path for one key.
    #[must_use]
    pub fn marker_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", file_stem(key)))
    }

    // Lease for a marker whose content is not a lease.
    fn lease_from_mtime(&self, key: &str, path: &Path) -> Result<Lease, LockStoreError> {
        let modified = fs::metadata(path)
            .and_then(|meta| meta.modified())
            .map_err(|source| io_error(key, source))?;
        let acquired_at: DateTime<Utc> = modified.into();
        let expires_at = TimeDelta::from_std(self.fallback_ttl)
            .ok()
            .and_then(|ttl| acquired_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Ok(Lease {
            holder: String::new(),
            acquired_at,
            expires_at,
        })
    }
}

impl LockStore for FileLockStore {
    fn read(&self, key: &str) -> Result<Option<Lease>, LockStoreError> {
        let path = self.marker_path(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_error(key, err)),
        };

        match serde_json::from_slice(&bytes) {
            Ok(lease) => Ok(Some(lease)),
            Err(_) => self.lease_from_mtime(key, &path).map(Some),
        }
    }

    fn create(&self, key: &str, lease: &Lease) -> Result<bool, LockStoreError> {
        let path = self.marker_path(key);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(err) => return Err(io_error(key, err)),
        };

        let body = serde_json::to_vec(lease)
            .map_err(|err| LockStoreError::Unavailable(err.to_string()))?;
        file.write_all(&body).map_err(|source| io_error(key, source))?;

        Ok(true)
    }

    fn remove(&self, key: &str) -> Result<(), LockStoreError> {
        match fs::remove_file(self.marker_path(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_error(key, err)),
        }
    }
}

fn io_error(key: &str, source: std::io::Error) -> LockStoreError {
    LockStoreError::Io {
        key: key.to_string(),
        source,
    }
}

// Map a lock key onto a portable file name; anything outside
// `[A-Za-z0-9._-]` is percent-escaped so distinct keys never collide.
fn file_stem(key: &str) -> String {
    let mut stem = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_' | b'-') {
            stem.push(char::from(byte));
        } else {
            stem.push_str(&format!("%{byte:02X}"));
        }
    }

    stem
}
