// Announcement - Pairing payload scanned from the host

use crate::crypto::PublicKey;
use crate::pairing::PairingError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};

/// Pairing data produced by the peer and transferred out-of-band
/// (typically a scanned code). Consumed exactly once by
/// [`Pairing::complete`](crate::pairing::Pairing::complete).
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingAnnouncement {
    /// Peer's X25519 public key (standard base64 on the wire)
    pub public_key: PublicKey,
    /// Bearer token for the transport
    pub token: String,
    /// Stable identifier of the peer
    pub peer_id: String,
    /// Optional human-readable name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Payload as it arrives, before the key is decoded
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAnnouncement {
    public_key: String,
    token: String,
    peer_id: String,
    #[serde(default)]
    display_name: Option<String>,
}

impl PairingAnnouncement {
    /// Parse a payload given either as raw JSON or as URL-safe base64 of that JSON
    pub fn parse(payload: &str) -> Result<Self, PairingError> {
        let payload = payload.trim();
        let json = if payload.starts_with('{') {
            payload.as_bytes().to_vec()
        } else {
            URL_SAFE_NO_PAD
                .decode(payload)
                .map_err(|e| PairingError::InvalidPayload(e.to_string()))?
        };

        let raw: RawAnnouncement = serde_json::from_slice(&json)
            .map_err(|e| PairingError::InvalidPayload(e.to_string()))?;
        let announcement = Self {
            public_key: PublicKey::from_base64(&raw.public_key)
                .map_err(|_| PairingError::InvalidPeerKey)?,
            token: raw.token,
            peer_id: raw.peer_id,
            display_name: raw.display_name,
        };
        announcement.validate()?;
        Ok(announcement)
    }

    /// Encode as URL-safe base64 JSON (the compact scannable form)
    pub fn encode(&self) -> Result<String, PairingError> {
        let json =
            serde_json::to_vec(self).map_err(|e| PairingError::InvalidPayload(e.to_string()))?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    fn validate(&self) -> Result<(), PairingError> {
        if self.token.trim().is_empty() {
            return Err(PairingError::MissingField("token"));
        }
        if self.peer_id.trim().is_empty() {
            return Err(PairingError::MissingField("peerId"));
        }
        Ok(())
    }
}
