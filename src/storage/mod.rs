// Storage module - SECRET PERSISTENCE
// Opaque key-value store for pairing secrets, backed by sled or memory

mod sled_store;
mod store;

pub use sled_store::{SledSecretStore, StorageStats};
pub use store::{keys, MemorySecretStore, SecretStore, StoreError};
