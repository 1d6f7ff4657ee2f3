// Key Agreement - X25519 Diffie-Hellman followed by HKDF-SHA256
//
// The derived key is cached after the first derivation and recomputed from
// the secret store after a restart. Changing KDF_CONTEXT breaks every
// existing pairing.

use crate::crypto::{CryptoError, KeyPair, PrivateKey, PublicKey, KEY_SIZE};
use crate::storage::{keys, SecretStore, StoreError};
use hkdf::Hkdf;
use parking_lot::Mutex;
use sha2::Sha256;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Domain-separation label fed to HKDF as `info`
pub const KDF_CONTEXT: &[u8] = b"mirrorlink/e2e/v1";

/// Errors from restoring or using the agreed key
#[derive(Error, Debug)]
pub enum AgreementError {
    #[error("Not paired: no key material in the secret store")]
    NotPaired,

    #[error("Stored key material is corrupt: {0}")]
    CorruptKeyMaterial(&'static str),

    #[error("Secret store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Symmetric key shared with the paired peer (32 bytes)
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; KEY_SIZE]);

impl SharedSecret {
    /// Wrap raw key bytes
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(<redacted>)")
    }
}

/// Derive the shared symmetric key from our private key and the peer's public key.
///
/// Pure function of its inputs: both sides of a pairing derive the same key.
/// A low-order peer point yields a non-contributory exchange and is rejected.
pub fn derive_shared_secret(own: &PrivateKey, peer: &PublicKey) -> Result<SharedSecret, CryptoError> {
    let exchanged = own.inner().diffie_hellman(peer.inner());
    if !exchanged.was_contributory() {
        return Err(CryptoError::InvalidPeerKey);
    }

    let hkdf = Hkdf::<Sha256>::new(None, exchanged.as_bytes());
    let mut okm = [0u8; KEY_SIZE];
    hkdf.expand(KDF_CONTEXT, &mut okm)
        .map_err(|_| CryptoError::KeyDerivationFailed)?;

    Ok(SharedSecret(okm))
}

/// Owner of the pairing key material.
///
/// All access to the cached secret goes through the internal mutex.
pub struct KeyAgreement {
    store: Arc<dyn SecretStore>,
    cached: Mutex<Option<SharedSecret>>,
}

impl KeyAgreement {
    /// Create a key agreement backed by the given secret store
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self {
            store,
            cached: Mutex::new(None),
        }
    }

    /// Generate a fresh key pair
    pub fn generate_key_pair() -> KeyPair {
        KeyPair::generate()
    }

    /// Derive the shared key (see [`derive_shared_secret`])
    pub fn derive_shared_secret(own: &PrivateKey, peer: &PublicKey) -> Result<SharedSecret, CryptoError> {
        derive_shared_secret(own, peer)
    }

    /// Derive, persist and cache the key for a new pairing
    pub fn install(&self, key_pair: &KeyPair, peer: &PublicKey) -> Result<SharedSecret, AgreementError> {
        let secret = derive_shared_secret(key_pair.private_key(), peer)?;

        self.store
            .save(keys::PRIVATE_KEY, &key_pair.private_key().to_bytes())?;
        self.store.save(keys::PEER_PUBLIC_KEY, peer.as_bytes())?;

        *self.cached.lock() = Some(secret.clone());
        info!(peer = %peer.fingerprint(), "installed pairing key material");
        Ok(secret)
    }

    /// Recompute the shared key from the secret store.
    ///
    /// `Ok(None)` means not yet paired; unusable stored bytes are reported as
    /// [`AgreementError::CorruptKeyMaterial`].
    pub fn restore_from_store(&self) -> Result<Option<SharedSecret>, AgreementError> {
        let private = self.store.read(keys::PRIVATE_KEY)?;
        let peer = self.store.read(keys::PEER_PUBLIC_KEY)?;

        let (private, peer) = match (private, peer) {
            (Some(private), Some(peer)) => (private, peer),
            _ => return Ok(None),
        };

        let private = PrivateKey::from_bytes(&private)
            .map_err(|_| AgreementError::CorruptKeyMaterial("private key"))?;
        let peer = PublicKey::from_bytes(&peer)
            .map_err(|_| AgreementError::CorruptKeyMaterial("peer public key"))?;
        let secret = derive_shared_secret(&private, &peer)
            .map_err(|_| AgreementError::CorruptKeyMaterial("peer public key"))?;

        *self.cached.lock() = Some(secret.clone());
        debug!(peer = %peer.fingerprint(), "restored shared secret from store");
        Ok(Some(secret))
    }

    /// Get the shared key, restoring it from the store when not cached
    pub fn shared_secret(&self) -> Result<SharedSecret, AgreementError> {
        if let Some(secret) = self.cached.lock().as_ref() {
            return Ok(secret.clone());
        }
        self.restore_from_store()?.ok_or(AgreementError::NotPaired)
    }

    /// Check whether a key is cached in memory
    pub fn is_cached(&self) -> bool {
        self.cached.lock().is_some()
    }

    /// Get our public key from the store, if paired
    pub fn own_public_key(&self) -> Result<Option<PublicKey>, AgreementError> {
        match self.store.read(keys::PRIVATE_KEY)? {
            Some(bytes) => {
                let private = PrivateKey::from_bytes(&bytes)
                    .map_err(|_| AgreementError::CorruptKeyMaterial("private key"))?;
                Ok(Some(private.public_key()))
            }
            None => Ok(None),
        }
    }

    /// Drop the cached key and delete all stored secrets
    pub fn wipe(&self) -> Result<(), AgreementError> {
        self.cached.lock().take();
        self.store.delete_all()?;
        info!("wiped pairing key material");
        Ok(())
    }
}
