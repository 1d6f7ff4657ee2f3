// Transport Traits and Core Types
// Defines the connector/sink/source seams the sync channel is written against

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;
use url::Url;

// ============================================================================
// FRAMES
// ============================================================================

/// Well-known close codes
pub mod close_code {
    /// Normal closure
    pub const NORMAL: u16 = 1000;
    /// Endpoint going away
    pub const GOING_AWAY: u16 = 1001;
    /// Policy violation (commonly used for rejected credentials)
    pub const POLICY_VIOLATION: u16 = 1008;
    /// No status code was present in the close frame
    pub const NO_STATUS: u16 = 1005;
}

/// A single transport message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Binary payload (ciphertext)
    Binary(Vec<u8>),
    /// Text payload
    Text(String),
    /// Close handshake
    Close { code: u16, reason: String },
}

// ============================================================================
// CONNECTION STATE
// ============================================================================

/// State of the sync connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    /// Check if transition to another state is valid
    pub fn can_transition_to(&self, target: &ConnectionState) -> bool {
        matches!(
            (self, target),
            (Self::Disconnected, Self::Connecting)
                | (Self::Connecting, Self::Connected)
                | (Self::Connecting, Self::Disconnected)
                | (Self::Connected, Self::Disconnected)
        )
    }

    /// Check if the connection is active (not fully disconnected)
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Disconnected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
        }
    }
}

// ============================================================================
// TRANSPORT ERRORS
// ============================================================================

/// Errors that can occur in the transport layer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    #[error("Connection timeout")]
    Timeout,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl TransportError {
    /// Check if this error means the credentials were refused
    pub fn is_auth_error(&self) -> bool {
        matches!(self, Self::AuthRejected(_))
    }

    /// Check if the operation can be retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::ConnectionFailed(_)
                | Self::SendFailed(_)
                | Self::ReceiveFailed(_)
        )
    }
}

// ============================================================================
// TRANSPORT TRAITS
// ============================================================================

/// Outbound half of a connection
#[async_trait]
pub trait FrameSink: Send {
    /// Send a frame
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Send a close frame and release the connection
    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError>;
}

/// Inbound half of a connection
#[async_trait]
pub trait FrameSource: Send {
    /// Wait for the next frame. `None` means the transport has ended.
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>>;
}

/// An open connection, split into its two halves
pub struct Connection {
    pub sink: Box<dyn FrameSink>,
    pub source: Box<dyn FrameSource>,
}

/// Opens connections to a URL
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<Connection, TransportError>;
}
