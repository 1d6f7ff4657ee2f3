// In-Memory Transport
// Pairs a client connection with a MemoryPeer handle in the same process.
// Used by the integration tests to play the remote side of the channel.

use crate::transport::{Connection, Connector, Frame, FrameSink, FrameSource, TransportError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::mpsc;
use url::Url;

/// Connector whose connections terminate in [`MemoryPeer`]s
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
    failures: Mutex<VecDeque<TransportError>>,
    hang: AtomicBool,
    attempts: AtomicUsize,
}

/// Receives the peer end of every successful connect
pub struct MemoryListener {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryListener {
    /// Wait for the next connection
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }
}

impl MemoryConnector {
    pub fn new() -> (Self, MemoryListener) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let connector = Self {
            accept_tx,
            failures: Mutex::new(VecDeque::new()),
            hang: AtomicBool::new(false),
            attempts: AtomicUsize::new(0),
        };
        (connector, MemoryListener { accept_rx })
    }

    /// Make the next connect attempt fail with the given error
    pub fn fail_next(&self, error: TransportError) {
        self.failures.lock().push_back(error);
    }

    /// Make connect attempts never complete
    pub fn set_hang(&self, hang: bool) {
        self.hang.store(hang, Ordering::SeqCst);
    }

    /// Number of connect attempts so far
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &Url) -> Result<Connection, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let scripted = self.failures.lock().pop_front();
        if let Some(error) = scripted {
            return Err(error);
        }

        let (to_client, client_rx) = mpsc::unbounded_channel();
        let (client_tx, from_client) = mpsc::unbounded_channel();

        let peer = MemoryPeer {
            url: url.clone(),
            to_client,
            from_client,
        };
        self.accept_tx
            .send(peer)
            .map_err(|_| TransportError::ConnectionFailed("listener closed".to_string()))?;

        Ok(Connection {
            sink: Box::new(MemorySink { tx: client_tx }),
            source: Box::new(MemorySource { rx: client_rx }),
        })
    }
}

/// Remote end of an in-memory connection
pub struct MemoryPeer {
    url: Url,
    to_client: mpsc::UnboundedSender<Result<Frame, TransportError>>,
    from_client: mpsc::UnboundedReceiver<Frame>,
}

impl MemoryPeer {
    /// URL the client connected to
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Deliver a frame to the client. Returns false once the client is gone.
    pub fn send(&self, frame: Frame) -> bool {
        self.to_client.send(Ok(frame)).is_ok()
    }

    /// Deliver a binary frame to the client
    pub fn send_binary(&self, bytes: Vec<u8>) -> bool {
        self.send(Frame::Binary(bytes))
    }

    /// Deliver a transport error to the client
    pub fn fail(&self, error: TransportError) -> bool {
        self.to_client.send(Err(error)).is_ok()
    }

    /// Send a close frame to the client
    pub fn close(&self, code: u16, reason: &str) -> bool {
        self.send(Frame::Close {
            code,
            reason: reason.to_string(),
        })
    }

    /// Wait for the next frame sent by the client
    pub async fn recv(&mut self) -> Option<Frame> {
        self.from_client.recv().await
    }

    /// Take a frame sent by the client without waiting
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.from_client.try_recv().ok()
    }
}

struct MemorySink {
    tx: mpsc::UnboundedSender<Frame>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.tx
            .send(frame)
            .map_err(|_| TransportError::SendFailed("peer gone".to_string()))
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        // Closing towards a peer that already left is not an error.
        let _ = self.tx.send(Frame::Close {
            code,
            reason: reason.to_string(),
        });
        Ok(())
    }
}

struct MemorySource {
    rx: mpsc::UnboundedReceiver<Result<Frame, TransportError>>,
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        self.rx.recv().await
    }
}
