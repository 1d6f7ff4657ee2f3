// Crypto module - END-TO-END KEYS
// X25519 key pairs, shared-secret agreement, and the authenticated frame codec

mod agreement;
mod codec;
mod keypair;

pub use agreement::{derive_shared_secret, AgreementError, KeyAgreement, SharedSecret, KDF_CONTEXT};
pub use codec::{EncryptionCodec, CODEC_VERSION, MIN_CIPHERTEXT_LEN};
pub use keypair::{CryptoError, KeyPair, PrivateKey, PublicKey, KEY_SIZE};
