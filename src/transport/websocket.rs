// WebSocket Transport Implementation
// tokio-tungstenite client; the URL already carries the bearer token

use crate::transport::{Connection, Connector, Frame, FrameSink, FrameSource, TransportError, close_code};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects over WebSocket (`ws://` or `wss://`)
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &Url) -> Result<Connection, TransportError> {
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(TransportError::InvalidUrl(format!(
                "URL must use ws:// or wss:// scheme, got: {}",
                url.scheme()
            )));
        }

        let (stream, _response) = connect_async(url.as_str()).await.map_err(map_handshake_error)?;
        debug!(host = url.host_str().unwrap_or_default(), "websocket handshake complete");

        let (writer, reader) = stream.split();
        Ok(Connection {
            sink: Box::new(WsSink(writer)),
            source: Box::new(WsSource(reader)),
        })
    }
}

fn map_handshake_error(error: WsError) -> TransportError {
    match error {
        WsError::Http(response) => {
            let status = response.status();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                TransportError::AuthRejected(format!("HTTP {}", status))
            } else {
                TransportError::ConnectionFailed(format!("HTTP {}", status))
            }
        }
        other => TransportError::ConnectionFailed(other.to_string()),
    }
}

struct WsSink(SplitSink<WsStream, Message>);

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let message = match frame {
            Frame::Binary(bytes) => Message::Binary(bytes),
            Frame::Text(text) => Message::Text(text),
            Frame::Close { code, reason } => Message::Close(Some(CloseFrame {
                code: CloseCode::from(code),
                reason: reason.into(),
            })),
        };
        self.0
            .send(message)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        self.send(Frame::Close {
            code,
            reason: reason.to_string(),
        })
        .await?;
        // The peer may already be gone; the close frame above is what matters.
        let _ = self.0.close().await;
        Ok(())
    }
}

struct WsSource(SplitStream<WsStream>);

#[async_trait]
impl FrameSource for WsSource {
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        loop {
            let message = match self.0.next().await? {
                Ok(message) => message,
                Err(error) => return Some(Err(TransportError::ReceiveFailed(error.to_string()))),
            };

            match message {
                Message::Binary(bytes) => return Some(Ok(Frame::Binary(bytes))),
                Message::Text(text) => return Some(Ok(Frame::Text(text))),
                Message::Close(frame) => {
                    let (code, reason) = match frame {
                        Some(frame) => (u16::from(frame.code), frame.reason.into_owned()),
                        None => (close_code::NO_STATUS, String::new()),
                    };
                    return Some(Ok(Frame::Close { code, reason }));
                }
                // tungstenite answers pings itself
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
    }
}
