// SledSecretStore - Persistent secret storage using sled
//
// All secrets live under a single prefix so logout can wipe them without
// touching anything else kept in the same database.

use crate::storage::{SecretStore, StoreError};
use std::path::Path;
use tracing::debug;

const SECRET_PREFIX: &[u8] = b"secret:";

/// Statistics about the storage
#[derive(Clone, Debug)]
pub struct StorageStats {
    /// Number of secrets in the database
    pub key_count: usize,
    /// Approximate disk size in bytes
    pub disk_size_bytes: u64,
}

/// Sled-backed secret store.
///
/// Writes are flushed immediately: a pairing that was reported as complete
/// must survive a crash.
pub struct SledSecretStore {
    db: sled::Db,
}

impl SledSecretStore {
    /// Open or create a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|e| StoreError::OpenFailed(e.to_string()))?;
        Ok(Self { db })
    }

    /// Open a throwaway store that is deleted when dropped
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| StoreError::OpenFailed(e.to_string()))?;
        Ok(Self { db })
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db
            .flush()
            .map_err(|e| StoreError::FlushFailed(e.to_string()))?;
        Ok(())
    }

    /// Get storage statistics
    pub fn stats(&self) -> Result<StorageStats, StoreError> {
        Ok(StorageStats {
            key_count: self.db.scan_prefix(SECRET_PREFIX).count(),
            disk_size_bytes: self.db.size_on_disk().unwrap_or(0),
        })
    }

    fn key(key_id: &str) -> Vec<u8> {
        [SECRET_PREFIX, key_id.as_bytes()].concat()
    }
}

impl SecretStore for SledSecretStore {
    fn save(&self, key_id: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.db.insert(Self::key(key_id), bytes)?;
        self.flush()
    }

    fn read(&self, key_id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.db.get(Self::key(key_id))?.map(|v| v.to_vec()))
    }

    fn delete_all(&self) -> Result<(), StoreError> {
        let mut deleted = 0usize;
        for result in self.db.scan_prefix(SECRET_PREFIX) {
            let (key, _) = result?;
            self.db.remove(key)?;
            deleted += 1;
        }
        self.flush()?;
        debug!(deleted, "deleted stored secrets");
        Ok(())
    }

    fn exists(&self, key_id: &str) -> Result<bool, StoreError> {
        Ok(self.db.contains_key(Self::key(key_id))?)
    }
}
