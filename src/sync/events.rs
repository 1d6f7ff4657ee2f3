// Events - Per-kind broadcast streams fed by the receive loop

use super::protocol::{EntityUpdate, MessageUpdate, RevivalPaused, SessionRevived, SessionSnapshot};
use crate::transport::{close_code, TransportError};
use tokio::sync::broadcast;
use tracing::trace;

/// Why a connection ended
#[derive(Clone, Debug, PartialEq)]
pub enum DisconnectReason {
    /// `disconnect()` was called
    Requested,
    /// The peer closed the transport
    TransportClosed { code: Option<u16>, reason: String },
    /// The transport failed while connected
    TransportError(TransportError),
    /// The connect attempt never completed
    ConnectFailed(TransportError),
}

impl DisconnectReason {
    /// Check if the server refused our credentials
    pub fn is_auth_rejected(&self) -> bool {
        match self {
            Self::ConnectFailed(error) | Self::TransportError(error) => error.is_auth_error(),
            Self::TransportClosed { code, .. } => *code == Some(close_code::POLICY_VIOLATION),
            Self::Requested => false,
        }
    }

    /// Check if an established connection dropped on its own.
    ///
    /// Failed connect attempts and requested disconnects are not drops.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::TransportClosed { .. } | Self::TransportError(_))
    }
}

/// Connection lifecycle as seen by observers
#[derive(Clone, Debug, PartialEq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected(DisconnectReason),
}

/// Non-fatal problems with individual frames or sends
#[derive(Clone, Debug, PartialEq)]
pub enum SyncError {
    /// A binary frame failed authentication; the loop kept running
    DecryptionFailed { frame_len: usize },
    /// A subscription could not be re-sent after connecting
    ReplayFailed { entity_id: String, reason: String },
}

/// Revival signals routed to the cooldown tracker
#[derive(Clone, Debug, PartialEq)]
pub enum CooldownSignal {
    Paused(RevivalPaused),
    Revived(SessionRevived),
}

/// Fan-out of decoded events.
///
/// Each stream is an independent broadcast channel. A slow consumer lags
/// and loses its oldest events; the receive loop never waits on it.
#[derive(Clone, Debug)]
pub struct EventHub {
    status: broadcast::Sender<ConnectionStatus>,
    errors: broadcast::Sender<SyncError>,
    sessions: broadcast::Sender<SessionSnapshot>,
    messages: broadcast::Sender<MessageUpdate>,
    updates: broadcast::Sender<EntityUpdate>,
    cooldown: broadcast::Sender<CooldownSignal>,
}

impl EventHub {
    /// Create a hub whose streams each buffer `capacity` events per consumer
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            status: broadcast::channel(capacity).0,
            errors: broadcast::channel(capacity).0,
            sessions: broadcast::channel(capacity).0,
            messages: broadcast::channel(capacity).0,
            updates: broadcast::channel(capacity).0,
            cooldown: broadcast::channel(capacity).0,
        }
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    pub fn subscribe_errors(&self) -> broadcast::Receiver<SyncError> {
        self.errors.subscribe()
    }

    pub fn subscribe_sessions(&self) -> broadcast::Receiver<SessionSnapshot> {
        self.sessions.subscribe()
    }

    pub fn subscribe_messages(&self) -> broadcast::Receiver<MessageUpdate> {
        self.messages.subscribe()
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<EntityUpdate> {
        self.updates.subscribe()
    }

    pub fn subscribe_cooldown(&self) -> broadcast::Receiver<CooldownSignal> {
        self.cooldown.subscribe()
    }

    pub(crate) fn publish_status(&self, status: ConnectionStatus) {
        trace!(?status, "status");
        let _ = self.status.send(status);
    }

    pub(crate) fn publish_error(&self, error: SyncError) {
        let _ = self.errors.send(error);
    }

    pub(crate) fn publish_session(&self, session: SessionSnapshot) {
        let _ = self.sessions.send(session);
    }

    pub(crate) fn publish_message(&self, message: MessageUpdate) {
        let _ = self.messages.send(message);
    }

    pub(crate) fn publish_update(&self, update: EntityUpdate) {
        let _ = self.updates.send(update);
    }

    pub(crate) fn publish_cooldown(&self, signal: CooldownSignal) {
        let _ = self.cooldown.send(signal);
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_EVENT_BUFFER)
    }
}
