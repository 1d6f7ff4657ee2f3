// Pairing manager - completes a pairing and owns the stored credentials

use crate::crypto::{AgreementError, CryptoError, KeyAgreement, PublicKey, SharedSecret};
use crate::pairing::PairingAnnouncement;
use crate::storage::{keys, SecretStore, StoreError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum PairingError {
    #[error("Invalid pairing payload: {0}")]
    InvalidPayload(String),

    #[error("Pairing payload is missing {0}")]
    MissingField(&'static str),

    #[error("Peer public key is not usable")]
    InvalidPeerKey,

    #[error("Stored credential is corrupt: {0}")]
    CorruptCredential(&'static str),

    #[error(transparent)]
    Agreement(#[from] AgreementError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Stored (non-key) credentials of the current pairing
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub auth_token: String,
    pub peer_id: String,
    pub peer_display_name: Option<String>,
}

/// Pairing lifecycle: complete, inspect, log out
pub struct Pairing {
    store: Arc<dyn SecretStore>,
    agreement: KeyAgreement,
}

impl Pairing {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        let agreement = KeyAgreement::new(Arc::clone(&store));
        Self { store, agreement }
    }

    /// Access the key agreement owner
    pub fn key_agreement(&self) -> &KeyAgreement {
        &self.agreement
    }

    /// Complete pairing from an announcement.
    ///
    /// Generates our key pair, derives and caches the shared secret, and
    /// persists all credentials. Returns our public key, which the peer
    /// needs to derive the same secret.
    pub fn complete(&self, announcement: PairingAnnouncement) -> Result<PublicKey, PairingError> {
        let key_pair = KeyAgreement::generate_key_pair();
        // Reject a bad peer key before touching the existing pairing.
        KeyAgreement::derive_shared_secret(key_pair.private_key(), &announcement.public_key)
            .map_err(|e| match e {
                CryptoError::InvalidPeerKey => PairingError::InvalidPeerKey,
                other => PairingError::Agreement(other.into()),
            })?;

        if self.is_paired()? {
            warn!("replacing existing pairing");
        }
        self.agreement.wipe()?;
        self.agreement
            .install(&key_pair, &announcement.public_key)?;

        self.store
            .save(keys::AUTH_TOKEN, announcement.token.as_bytes())?;
        self.store
            .save(keys::PEER_ID, announcement.peer_id.as_bytes())?;
        if let Some(name) = &announcement.display_name {
            self.store.save(keys::PEER_DISPLAY_NAME, name.as_bytes())?;
        }

        info!(
            peer_id = %announcement.peer_id,
            own_key = %key_pair.public_key().fingerprint(),
            "pairing complete"
        );
        Ok(key_pair.public_key())
    }

    /// Check whether key material and a token are stored
    pub fn is_paired(&self) -> Result<bool, PairingError> {
        Ok(self.store.exists(keys::PRIVATE_KEY)?
            && self.store.exists(keys::PEER_PUBLIC_KEY)?
            && self.store.exists(keys::AUTH_TOKEN)?)
    }

    /// Load stored credentials, if paired
    pub fn credentials(&self) -> Result<Option<Credentials>, PairingError> {
        let auth_token = match self.read_string(keys::AUTH_TOKEN)? {
            Some(token) => token,
            None => return Ok(None),
        };
        let peer_id = self
            .read_string(keys::PEER_ID)?
            .ok_or(PairingError::CorruptCredential("peer id"))?;
        let peer_display_name = self.read_string(keys::PEER_DISPLAY_NAME)?;

        Ok(Some(Credentials {
            auth_token,
            peer_id,
            peer_display_name,
        }))
    }

    /// Get the bearer token for the transport
    pub fn auth_token(&self) -> Result<Option<String>, PairingError> {
        self.read_string(keys::AUTH_TOKEN)
    }

    /// Get the shared secret (cached or restored from the store)
    pub fn shared_secret(&self) -> Result<SharedSecret, AgreementError> {
        self.agreement.shared_secret()
    }

    /// Wipe all key material and credentials
    pub fn logout(&self) -> Result<(), PairingError> {
        self.agreement.wipe()?;
        info!("logged out");
        Ok(())
    }

    fn read_string(&self, key_id: &'static str) -> Result<Option<String>, PairingError> {
        match self.store.read(key_id)? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|_| PairingError::CorruptCredential(key_id)),
            None => Ok(None),
        }
    }
}
