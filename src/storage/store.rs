// Secret Store - Key/value persistence for pairing secrets

use parking_lot::Mutex;
use std::collections::HashMap;
use thiserror::Error;

/// Key ids used by the pairing and key agreement code
pub mod keys {
    pub const PRIVATE_KEY: &str = "pairing.private_key";
    pub const PEER_PUBLIC_KEY: &str = "pairing.peer_public_key";
    pub const AUTH_TOKEN: &str = "pairing.auth_token";
    pub const PEER_ID: &str = "pairing.peer_id";
    pub const PEER_DISPLAY_NAME: &str = "pairing.peer_display_name";
}

/// Errors from storage operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to open database: {0}")]
    OpenFailed(String),

    #[error("Database operation failed: {0}")]
    DatabaseError(String),

    #[error("Flush failed: {0}")]
    FlushFailed(String),
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::DatabaseError(err.to_string())
    }
}

/// Secure key-value persistence for secrets.
///
/// Treated as trusted and synchronous. How values are protected at rest is
/// up to the implementation.
pub trait SecretStore: Send + Sync {
    /// Store bytes under a key id, replacing any previous value
    fn save(&self, key_id: &str, bytes: &[u8]) -> Result<(), StoreError>;

    /// Read the bytes stored under a key id
    fn read(&self, key_id: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Delete every stored secret
    fn delete_all(&self) -> Result<(), StoreError>;

    /// Check whether a key id has a value
    fn exists(&self, key_id: &str) -> Result<bool, StoreError> {
        Ok(self.read(key_id)?.is_some())
    }
}

/// In-memory secret store (tests and ephemeral sessions)
#[derive(Default)]
pub struct MemorySecretStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl SecretStore for MemorySecretStore {
    fn save(&self, key_id: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.entries.lock().insert(key_id.to_string(), bytes.to_vec());
        Ok(())
    }

    fn read(&self, key_id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.lock().get(key_id).cloned())
    }

    fn delete_all(&self) -> Result<(), StoreError> {
        self.entries.lock().clear();
        Ok(())
    }

    fn exists(&self, key_id: &str) -> Result<bool, StoreError> {
        Ok(self.entries.lock().contains_key(key_id))
    }
}
