// Encryption Codec - authenticated encryption of opaque frame payloads
//
// Frame layout: version (1) || nonce (12) || ChaCha20-Poly1305 ciphertext || tag (16)

use crate::crypto::{CryptoError, SharedSecret};
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};

/// Leading byte identifying the frame layout
pub const CODEC_VERSION: u8 = 0x01;

const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;

/// Shortest input that can possibly decrypt (empty plaintext)
pub const MIN_CIPHERTEXT_LEN: usize = 1 + NONCE_SIZE + TAG_SIZE;

/// Stateless encrypt/decrypt over a [`SharedSecret`]
pub struct EncryptionCodec;

impl EncryptionCodec {
    /// Encrypt a payload with a fresh random nonce.
    ///
    /// The output is self-contained: it carries the version byte and nonce.
    pub fn encrypt(plaintext: &[u8], key: &SharedSecret) -> Result<Vec<u8>, CryptoError> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);

        let sealed = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut out = Vec::with_capacity(1 + NONCE_SIZE + sealed.len());
        out.push(CODEC_VERSION);
        out.extend_from_slice(nonce.as_slice());
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Decrypt a frame produced by [`EncryptionCodec::encrypt`].
    ///
    /// Fails closed: truncation, an unknown version or a tag mismatch all
    /// return [`CryptoError::DecryptionFailed`] and no plaintext.
    pub fn decrypt(ciphertext: &[u8], key: &SharedSecret) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < MIN_CIPHERTEXT_LEN {
            return Err(CryptoError::DecryptionFailed);
        }

        let (version, rest) = ciphertext.split_at(1);
        if version[0] != CODEC_VERSION {
            return Err(CryptoError::DecryptionFailed);
        }

        let (nonce, sealed) = rest.split_at(NONCE_SIZE);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

        cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}
