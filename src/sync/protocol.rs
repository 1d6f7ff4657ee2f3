// Protocol - Envelope types for the sync channel
//
// Every decrypted frame is a JSON object tagged by `type`. The tag is read
// first; unknown tags decode to `Decoded::Ignored` so newer peers can add
// message kinds without breaking older clients.

use crate::crypto::{CryptoError, EncryptionCodec, SharedSecret};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Protocol errors. None of these leave the channel; they decide what gets dropped.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Payload is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Envelope has no string `type` tag")]
    MissingTag,

    #[error("Invalid `{tag}` payload: {reason}")]
    InvalidPayload { tag: String, reason: String },

    #[error("Encoding failed: {0}")]
    EncodeFailed(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

// ============================================================================
// PAYLOADS
// ============================================================================

/// Snapshot of an agent session
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionUpdate {
    pub session: SessionSnapshot,
}

/// A single message inside a session
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSnapshot {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageUpdate {
    pub session_id: String,
    pub message: MessageSnapshot,
}

/// Generic change to any other entity
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityUpdate {
    pub entity_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

/// Ping/pong body
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keepalive {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// Subscribe/unsubscribe body
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRef {
    pub entity_id: String,
}

/// Server-side revival circuit breaker opened
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevivalPaused {
    pub reason: String,
    pub remaining_ms: i64,
    /// Absolute epoch milliseconds on the server clock
    pub resumes_at: i64,
    pub machine_id: String,
}

/// A session was revived under a new id
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRevived {
    pub original_session_id: String,
    pub new_session_id: String,
    pub machine_id: String,
}

// ============================================================================
// ENVELOPE
// ============================================================================

/// Tagged union carried inside every encrypted frame
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum UpdateEnvelope {
    #[serde(rename = "session")]
    Session(SessionUpdate),
    #[serde(rename = "message")]
    Message(MessageUpdate),
    #[serde(rename = "update")]
    Update(EntityUpdate),
    #[serde(rename = "ping")]
    Ping(Keepalive),
    #[serde(rename = "pong")]
    Pong(Keepalive),
    #[serde(rename = "subscribe")]
    Subscribe(EntityRef),
    #[serde(rename = "unsubscribe")]
    Unsubscribe(EntityRef),
    #[serde(rename = "session-revival-paused")]
    RevivalPaused(RevivalPaused),
    #[serde(rename = "session-revived")]
    SessionRevived(SessionRevived),
}

/// Outcome of decoding a decrypted payload
#[derive(Clone, Debug, PartialEq)]
pub enum Decoded {
    Envelope(UpdateEnvelope),
    /// Well-formed, but the tag is not one this client knows
    Ignored { tag: String },
}

impl UpdateEnvelope {
    /// Tags this client understands
    pub const KNOWN_TAGS: &'static [&'static str] = &[
        "session",
        "message",
        "update",
        "ping",
        "pong",
        "subscribe",
        "unsubscribe",
        "session-revival-paused",
        "session-revived",
    ];

    /// Get the wire tag
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Session(_) => "session",
            Self::Message(_) => "message",
            Self::Update(_) => "update",
            Self::Ping(_) => "ping",
            Self::Pong(_) => "pong",
            Self::Subscribe(_) => "subscribe",
            Self::Unsubscribe(_) => "unsubscribe",
            Self::RevivalPaused(_) => "session-revival-paused",
            Self::SessionRevived(_) => "session-revived",
        }
    }

    /// Check if this kind is only ever sent by the client
    pub fn is_client_originated(&self) -> bool {
        matches!(self, Self::Subscribe(_) | Self::Unsubscribe(_))
    }

    /// Decode a decrypted payload: discriminator first, then the matching body
    pub fn decode(bytes: &[u8]) -> Result<Decoded, ProtocolError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;

        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingTag)?
            .to_string();

        if !Self::KNOWN_TAGS.contains(&tag.as_str()) {
            return Ok(Decoded::Ignored { tag });
        }

        serde_json::from_value(value)
            .map(Decoded::Envelope)
            .map_err(|e| ProtocolError::InvalidPayload {
                tag,
                reason: e.to_string(),
            })
    }

    /// Encode to JSON bytes
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::EncodeFailed(e.to_string()))
    }

    /// Encode and encrypt into a frame payload
    pub fn seal(&self, key: &SharedSecret) -> Result<Vec<u8>, ProtocolError> {
        Ok(EncryptionCodec::encrypt(&self.encode()?, key)?)
    }

    /// Decrypt and decode a frame payload.
    ///
    /// Decryption runs before any parsing; its failure is reported as
    /// [`ProtocolError::Crypto`].
    pub fn open(ciphertext: &[u8], key: &SharedSecret) -> Result<Decoded, ProtocolError> {
        let plaintext = EncryptionCodec::decrypt(ciphertext, key)?;
        Self::decode(&plaintext)
    }
}
