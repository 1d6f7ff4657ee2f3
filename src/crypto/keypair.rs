// Key Pair - X25519 key material and its encodings

use base64::{engine::general_purpose::STANDARD, Engine};
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;
use x25519_dalek::{PublicKey as DalekPublicKey, StaticSecret};

/// Size of X25519 private scalars and public points in bytes
pub const KEY_SIZE: usize = 32;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("Invalid peer public key")]
    InvalidPeerKey,

    #[error("Key derivation failed")]
    KeyDerivationFailed,

    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed")]
    DecryptionFailed,
}

fn to_array(bytes: &[u8]) -> Result<[u8; KEY_SIZE], CryptoError> {
    bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
        expected: KEY_SIZE,
        got: bytes.len(),
    })
}

/// X25519 public key (32 bytes)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey(DalekPublicKey);

impl PublicKey {
    /// Get the raw bytes of the public key
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        self.0.as_bytes()
    }

    /// Create a public key from raw bytes
    ///
    /// Public keys only ever come from the peer, so a wrong length is
    /// reported as [`CryptoError::InvalidPeerKey`]. Points that cannot
    /// contribute to a shared secret are rejected later by
    /// [`derive_shared_secret`].
    ///
    /// [`derive_shared_secret`]: crate::crypto::derive_shared_secret
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes = to_array(bytes).map_err(|_| CryptoError::InvalidPeerKey)?;
        Ok(Self(DalekPublicKey::from(bytes)))
    }

    /// Encode as standard base64 (the form used in pairing payloads)
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.as_bytes())
    }

    /// Decode from standard base64. Undecodable input is an invalid peer key.
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|_| CryptoError::InvalidPeerKey)?;
        Self::from_bytes(&bytes)
    }

    /// Short hex fingerprint for display and logs
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.as_bytes());
        hex::encode(&digest[..8])
    }

    pub(crate) fn inner(&self) -> &DalekPublicKey {
        &self.0
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.fingerprint())
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        PublicKey::from_base64(&encoded).map_err(serde::de::Error::custom)
    }
}

/// X25519 private scalar. Zeroized on drop and never printed.
#[derive(Clone)]
pub struct PrivateKey(StaticSecret);

impl PrivateKey {
    /// Get the raw bytes of the private key (for the secret store only)
    pub fn to_bytes(&self) -> [u8; KEY_SIZE] {
        self.0.to_bytes()
    }

    /// Create a private key from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        Ok(Self(StaticSecret::from(to_array(bytes)?)))
    }

    /// Derive the matching public key
    pub fn public_key(&self) -> PublicKey {
        PublicKey(DalekPublicKey::from(&self.0))
    }

    pub(crate) fn inner(&self) -> &StaticSecret {
        &self.0
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}

/// X25519 key pair owned by the pairing for its whole lifetime
#[derive(Clone, Debug)]
pub struct KeyPair {
    private: PrivateKey,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let private = PrivateKey(StaticSecret::random_from_rng(OsRng));
        let public = private.public_key();
        Self { private, public }
    }

    /// Rebuild a key pair from a stored private key
    pub fn from_private_key(private: PrivateKey) -> Self {
        let public = private.public_key();
        Self { private, public }
    }

    /// Get the public key
    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    /// Get the private key
    pub fn private_key(&self) -> &PrivateKey {
        &self.private
    }
}
