// Channel - Encrypted real-time connection to the relay
//
// One `ChannelInner` behind a tokio mutex owns the writer, the key snapshot,
// the subscription set and the receive task. Each connect bumps an epoch;
// a receive loop or a late connect result only touches state for its own
// epoch.

use super::events::{ConnectionStatus, CooldownSignal, DisconnectReason, EventHub, SyncError};
use super::protocol::{Decoded, EntityRef, Keepalive, ProtocolError, UpdateEnvelope};
use crate::config::{ClientConfig, ConfigError};
use crate::crypto::{AgreementError, SharedSecret};
use crate::pairing::{Pairing, PairingError};
use crate::transport::{
    close_code, Connection, ConnectionState, Connector, Frame, FrameSink, FrameSource,
    TransportError,
};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, trace, warn};
use url::Url;

/// Channel errors
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("No shared secret; pair with a peer first")]
    EncryptionKeyMissing,

    #[error("No auth token stored")]
    AuthTokenMissing,

    #[error("Channel is already connecting or connected")]
    AlreadyConnected,

    #[error("Channel is not connected")]
    NotConnected,

    #[error("Connect attempt was superseded")]
    Cancelled,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Agreement(AgreementError),

    #[error(transparent)]
    Pairing(#[from] PairingError),
}

impl ChannelError {
    /// Check if `connect_with_retry` may try again
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(error) => error.is_retryable(),
            _ => false,
        }
    }
}

impl From<AgreementError> for ChannelError {
    fn from(error: AgreementError) -> Self {
        match error {
            AgreementError::NotPaired => Self::EncryptionKeyMissing,
            other => Self::Agreement(other),
        }
    }
}

/// Snapshot of channel counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub frames_received: u64,
    pub frames_sent: u64,
    pub undecryptable_frames: u64,
    pub malformed_envelopes: u64,
    pub dispatched_envelopes: u64,
    pub ignored_envelopes: u64,
}

#[derive(Default)]
struct Counters {
    frames_received: AtomicU64,
    frames_sent: AtomicU64,
    undecryptable_frames: AtomicU64,
    malformed_envelopes: AtomicU64,
    dispatched_envelopes: AtomicU64,
    ignored_envelopes: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ChannelStats {
        ChannelStats {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            undecryptable_frames: self.undecryptable_frames.load(Ordering::Relaxed),
            malformed_envelopes: self.malformed_envelopes.load(Ordering::Relaxed),
            dispatched_envelopes: self.dispatched_envelopes.load(Ordering::Relaxed),
            ignored_envelopes: self.ignored_envelopes.load(Ordering::Relaxed),
        }
    }
}

struct ChannelInner {
    state: ConnectionState,
    epoch: u64,
    writer: Option<Box<dyn FrameSink>>,
    /// Key snapshot taken at connect; re-pairing applies on the next connect
    secret: Option<SharedSecret>,
    subscriptions: BTreeSet<String>,
    recv_task: Option<JoinHandle<()>>,
}

impl ChannelInner {
    async fn send_envelope(
        &mut self,
        envelope: &UpdateEnvelope,
        counters: &Counters,
    ) -> Result<(), ChannelError> {
        let secret = self.secret.as_ref().ok_or(ChannelError::NotConnected)?;
        let writer = self.writer.as_mut().ok_or(ChannelError::NotConnected)?;
        let sealed = envelope.seal(secret)?;
        writer.send(Frame::Binary(sealed)).await?;
        Counters::bump(&counters.frames_sent);
        trace!(tag = envelope.tag(), "sent envelope");
        Ok(())
    }

    fn transition(&mut self, target: ConnectionState) {
        if !self.state.can_transition_to(&target) {
            warn!(from = %self.state, to = %target, "unexpected channel state transition");
        }
        self.state = target;
    }

    /// Drop everything tied to the current connection
    fn reset(&mut self) -> (Option<Box<dyn FrameSink>>, Option<JoinHandle<()>>) {
        self.transition(ConnectionState::Disconnected);
        self.secret = None;
        (self.writer.take(), self.recv_task.take())
    }
}

struct Shared {
    inner: Mutex<ChannelInner>,
    /// Kept outside `inner` so `Drop` never has to wait for the async lock
    recv_abort: parking_lot::Mutex<Option<AbortHandle>>,
    hub: EventHub,
    counters: Counters,
}

// ============================================================================
// SYNC CHANNEL
// ============================================================================

/// Encrypted, multiplexed update channel
pub struct SyncChannel {
    config: ClientConfig,
    pairing: Arc<Pairing>,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
}

impl SyncChannel {
    /// Create a disconnected channel
    pub fn new(config: ClientConfig, pairing: Arc<Pairing>, connector: Arc<dyn Connector>) -> Self {
        let hub = EventHub::new(config.event_buffer);
        Self {
            config,
            pairing,
            connector,
            shared: Arc::new(Shared {
                inner: Mutex::new(ChannelInner {
                    state: ConnectionState::Disconnected,
                    epoch: 0,
                    writer: None,
                    secret: None,
                    subscriptions: BTreeSet::new(),
                    recv_task: None,
                }),
                recv_abort: parking_lot::Mutex::new(None),
                hub,
                counters: Counters::default(),
            }),
        }
    }

    /// Get the event streams
    pub fn events(&self) -> &EventHub {
        &self.shared.hub
    }

    pub async fn state(&self) -> ConnectionState {
        self.shared.inner.lock().await.state
    }

    /// Get the registered subscriptions, sorted
    pub async fn subscriptions(&self) -> Vec<String> {
        self.shared.inner.lock().await.subscriptions.iter().cloned().collect()
    }

    pub fn stats(&self) -> ChannelStats {
        self.shared.counters.snapshot()
    }

    /// Connect with the configured timeout
    pub async fn connect(&self) -> Result<(), ChannelError> {
        self.connect_with_timeout(self.config.connect_timeout()).await
    }

    /// Open the transport, start the receive loop and replay subscriptions
    pub async fn connect_with_timeout(&self, limit: Duration) -> Result<(), ChannelError> {
        let secret = self.pairing.shared_secret()?;
        let token = self
            .pairing
            .auth_token()?
            .ok_or(ChannelError::AuthTokenMissing)?;
        let url = build_connect_url(&self.config.server_url, &self.config.token_query_param, &token)?;

        let epoch = {
            let mut inner = self.shared.inner.lock().await;
            if inner.state.is_active() {
                return Err(ChannelError::AlreadyConnected);
            }
            inner.transition(ConnectionState::Connecting);
            inner.epoch += 1;
            inner.epoch
        };
        self.shared.hub.publish_status(ConnectionStatus::Connecting);
        info!(epoch, host = url.host_str().unwrap_or_default(), "connecting");

        let outcome = match tokio::time::timeout(limit, self.connector.connect(&url)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        };

        let Connection { mut sink, source } = match outcome {
            Ok(connection) => connection,
            Err(error) => {
                warn!(epoch, %error, "connect failed");
                let mut inner = self.shared.inner.lock().await;
                if inner.epoch == epoch && inner.state == ConnectionState::Connecting {
                    inner.reset();
                    self.shared
                        .hub
                        .publish_status(ConnectionStatus::Disconnected(
                            DisconnectReason::ConnectFailed(error.clone()),
                        ));
                }
                return Err(ChannelError::Transport(error));
            }
        };

        let mut inner = self.shared.inner.lock().await;
        if inner.epoch != epoch || inner.state != ConnectionState::Connecting {
            drop(inner);
            debug!(epoch, "connect superseded; closing late transport");
            let _ = sink.close(close_code::NORMAL, "superseded").await;
            return Err(ChannelError::Cancelled);
        }

        inner.transition(ConnectionState::Connected);
        inner.writer = Some(sink);
        inner.secret = Some(secret.clone());
        let task = tokio::spawn(receive_loop(Arc::clone(&self.shared), source, secret, epoch));
        *self.shared.recv_abort.lock() = Some(task.abort_handle());
        inner.recv_task = Some(task);
        self.shared.hub.publish_status(ConnectionStatus::Connected);
        info!(epoch, "connected");

        let pending: Vec<String> = inner.subscriptions.iter().cloned().collect();
        for entity_id in pending {
            let envelope = UpdateEnvelope::Subscribe(EntityRef {
                entity_id: entity_id.clone(),
            });
            if let Err(error) = inner.send_envelope(&envelope, &self.shared.counters).await {
                warn!(%entity_id, %error, "subscription replay failed");
                self.shared.hub.publish_error(SyncError::ReplayFailed {
                    entity_id,
                    reason: error.to_string(),
                });
            }
        }

        Ok(())
    }

    /// Connect, retrying retryable transport failures per the reconnect policy.
    ///
    /// Returns the number of attempts it took.
    pub async fn connect_with_retry(&self) -> Result<u32, ChannelError> {
        let policy = &self.config.reconnect;
        let mut failures = 0u32;
        loop {
            match self.connect().await {
                Ok(()) => return Ok(failures + 1),
                Err(error) if error.is_retryable() && policy.should_retry(failures + 1) => {
                    failures += 1;
                    let delay = policy.delay_for(failures);
                    warn!(attempt = failures, ?delay, %error, "connect failed; retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Run `connect_with_retry` unless a connection is already up or in progress.
    ///
    /// Returns the attempt count, or 0 when nothing had to be done.
    pub async fn ensure_connected(&self) -> Result<u32, ChannelError> {
        if self.state().await.is_active() {
            debug!("already connected; skipping reconnect");
            return Ok(0);
        }
        match self.connect_with_retry().await {
            // Lost a race with another connect
            Err(ChannelError::AlreadyConnected) => Ok(0),
            other => other,
        }
    }

    /// Close with normal closure and stop the receive loop. Safe to call repeatedly.
    pub async fn disconnect(&self) -> Result<(), ChannelError> {
        let (writer, task) = {
            let mut inner = self.shared.inner.lock().await;
            if inner.state == ConnectionState::Disconnected {
                return Ok(());
            }
            inner.epoch += 1;
            inner.reset()
        };

        if let Some(task) = &task {
            task.abort();
        }
        if let Some(mut writer) = writer {
            if let Err(error) = writer.close(close_code::NORMAL, "client disconnect").await {
                debug!(%error, "close frame not delivered");
            }
        }
        if let Some(task) = task {
            let _ = task.await;
        }

        self.shared
            .hub
            .publish_status(ConnectionStatus::Disconnected(DisconnectReason::Requested));
        info!("disconnected");
        Ok(())
    }

    /// Register interest in an entity; sent now if connected, else on the next connect.
    ///
    /// If the send fails the subscription stays registered and is replayed
    /// on the next connect.
    pub async fn subscribe(&self, entity_id: &str) -> Result<(), ChannelError> {
        let mut inner = self.shared.inner.lock().await;
        if !inner.subscriptions.insert(entity_id.to_string()) {
            debug!(%entity_id, "already subscribed");
            return Ok(());
        }
        if inner.state != ConnectionState::Connected {
            debug!(%entity_id, "subscription deferred until connected");
            return Ok(());
        }
        let envelope = UpdateEnvelope::Subscribe(EntityRef {
            entity_id: entity_id.to_string(),
        });
        inner.send_envelope(&envelope, &self.shared.counters).await
    }

    /// Drop interest in an entity. Unknown ids are a no-op.
    pub async fn unsubscribe(&self, entity_id: &str) -> Result<(), ChannelError> {
        let mut inner = self.shared.inner.lock().await;
        if !inner.subscriptions.remove(entity_id) {
            return Ok(());
        }
        if inner.state != ConnectionState::Connected {
            return Ok(());
        }
        let envelope = UpdateEnvelope::Unsubscribe(EntityRef {
            entity_id: entity_id.to_string(),
        });
        inner.send_envelope(&envelope, &self.shared.counters).await
    }

    /// Encrypt and send an envelope on the open connection
    pub async fn send(&self, envelope: &UpdateEnvelope) -> Result<(), ChannelError> {
        let mut inner = self.shared.inner.lock().await;
        if inner.state != ConnectionState::Connected {
            return Err(ChannelError::NotConnected);
        }
        inner.send_envelope(envelope, &self.shared.counters).await
    }

    /// Dispatch an already-decoded envelope as if it had arrived on the wire
    pub async fn process_sync_update(&self, envelope: UpdateEnvelope) {
        self.shared.dispatch(envelope, None).await;
    }
}

impl Drop for SyncChannel {
    fn drop(&mut self) {
        if let Some(handle) = self.shared.recv_abort.lock().take() {
            handle.abort();
        }
    }
}

/// Append the bearer token to the transport URL
pub fn build_connect_url(base: &str, param: &str, token: &str) -> Result<Url, ChannelError> {
    let mut url = Url::parse(base).map_err(|e| ConfigError::InvalidUrl {
        url: base.to_string(),
        reason: e.to_string(),
    })?;
    url.query_pairs_mut().append_pair(param, token);
    Ok(url)
}

// ============================================================================
// RECEIVE LOOP
// ============================================================================

async fn receive_loop(
    shared: Arc<Shared>,
    mut source: Box<dyn FrameSource>,
    secret: SharedSecret,
    epoch: u64,
) {
    let reason = loop {
        let frame = match source.next_frame().await {
            Some(Ok(frame)) => frame,
            Some(Err(error)) => break DisconnectReason::TransportError(error),
            None => {
                break DisconnectReason::TransportClosed {
                    code: None,
                    reason: "stream ended".into(),
                }
            }
        };
        Counters::bump(&shared.counters.frames_received);

        match frame {
            Frame::Binary(bytes) => shared.handle_ciphertext(&bytes, &secret, epoch).await,
            Frame::Text(text) => debug!(len = text.len(), "ignoring text frame"),
            Frame::Close { code, reason } => {
                break DisconnectReason::TransportClosed {
                    code: Some(code),
                    reason,
                }
            }
        }
    };

    shared.finish(epoch, reason).await;
}

impl Shared {
    async fn handle_ciphertext(&self, bytes: &[u8], secret: &SharedSecret, epoch: u64) {
        match UpdateEnvelope::open(bytes, secret) {
            Ok(Decoded::Envelope(envelope)) => self.dispatch(envelope, Some(epoch)).await,
            Ok(Decoded::Ignored { tag }) => {
                Counters::bump(&self.counters.ignored_envelopes);
                debug!(%tag, "ignoring unknown envelope type");
            }
            Err(ProtocolError::Crypto(_)) => {
                Counters::bump(&self.counters.undecryptable_frames);
                warn!(frame_len = bytes.len(), "dropping undecryptable frame");
                self.hub.publish_error(SyncError::DecryptionFailed {
                    frame_len: bytes.len(),
                });
            }
            Err(error) => {
                Counters::bump(&self.counters.malformed_envelopes);
                debug!(%error, "dropping malformed envelope");
            }
        }
    }

    async fn dispatch(&self, envelope: UpdateEnvelope, epoch: Option<u64>) {
        match envelope {
            UpdateEnvelope::Ping(ping) => {
                trace!(timestamp = ?ping.timestamp, "ping");
                self.reply_pong(ping, epoch).await;
                return;
            }
            UpdateEnvelope::Pong(_) => {
                trace!("pong");
                return;
            }
            UpdateEnvelope::Subscribe(_) | UpdateEnvelope::Unsubscribe(_) => {
                debug!("ignoring client-originated envelope from peer");
                return;
            }
            UpdateEnvelope::Session(update) => self.hub.publish_session(update.session),
            UpdateEnvelope::Message(update) => self.hub.publish_message(update),
            UpdateEnvelope::Update(update) => self.hub.publish_update(update),
            UpdateEnvelope::RevivalPaused(paused) => {
                info!(machine_id = %paused.machine_id, resumes_at = paused.resumes_at, "revival paused");
                self.hub.publish_cooldown(CooldownSignal::Paused(paused));
            }
            UpdateEnvelope::SessionRevived(revived) => {
                info!(session_id = %revived.original_session_id, new_session_id = %revived.new_session_id, "session revived");
                self.hub.publish_cooldown(CooldownSignal::Revived(revived));
            }
        }
        Counters::bump(&self.counters.dispatched_envelopes);
    }

    async fn reply_pong(&self, ping: Keepalive, epoch: Option<u64>) {
        let mut inner = self.inner.lock().await;
        if epoch.is_some_and(|epoch| epoch != inner.epoch) {
            return;
        }
        if inner.state != ConnectionState::Connected {
            return;
        }
        let pong = UpdateEnvelope::Pong(Keepalive {
            timestamp: ping.timestamp,
        });
        if let Err(error) = inner.send_envelope(&pong, &self.counters).await {
            debug!(%error, "failed to answer ping");
        }
    }

    async fn finish(&self, epoch: u64, reason: DisconnectReason) {
        let mut inner = self.inner.lock().await;
        if inner.epoch != epoch {
            return;
        }
        // Our own task handle; dropping it detaches.
        let _ = inner.reset();
        drop(inner);

        if reason.is_auth_rejected() {
            warn!(epoch, ?reason, "connection closed: credentials rejected");
        } else {
            info!(epoch, ?reason, "connection closed");
        }
        self.hub
            .publish_status(ConnectionStatus::Disconnected(reason));
    }
}
