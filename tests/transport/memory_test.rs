// Memory Transport Tests
// Tests for the in-process connector used to drive channel scenarios

use mirrorlink::transport::{
    close_code, ConnectionState, Connector, Frame, MemoryConnector, TransportError,
};
use url::Url;

fn url() -> Url {
    Url::parse("ws://relay.test/v1/updates?token=abc").unwrap()
}

// ============================================================================
// CONNECT
// ============================================================================

#[tokio::test]
async fn test_connect_hands_peer_to_listener() {
    let (connector, mut listener) = MemoryConnector::new();

    let _connection = connector.connect(&url()).await.unwrap();
    let peer = listener.accept().await.unwrap();

    assert_eq!(peer.url().query(), Some("token=abc"));
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test]
async fn test_scripted_failure_applies_once() {
    let (connector, _listener) = MemoryConnector::new();
    connector.fail_next(TransportError::AuthRejected("401".into()));

    let first = connector.connect(&url()).await;
    assert!(matches!(first, Err(TransportError::AuthRejected(_))));
    assert!(connector.connect(&url()).await.is_ok());
    assert_eq!(connector.attempts(), 2);
}

// ============================================================================
// FRAMES
// ============================================================================

#[tokio::test]
async fn test_frames_flow_both_ways() {
    let (connector, mut listener) = MemoryConnector::new();
    let mut connection = connector.connect(&url()).await.unwrap();
    let mut peer = listener.accept().await.unwrap();

    assert!(peer.send_binary(vec![1, 2, 3]));
    let received = connection.source.next_frame().await.unwrap().unwrap();
    assert_eq!(received, Frame::Binary(vec![1, 2, 3]));

    connection.sink.send(Frame::Text("hi".into())).await.unwrap();
    assert_eq!(peer.recv().await, Some(Frame::Text("hi".into())));
}

#[tokio::test]
async fn test_close_reaches_peer() {
    let (connector, mut listener) = MemoryConnector::new();
    let mut connection = connector.connect(&url()).await.unwrap();
    let mut peer = listener.accept().await.unwrap();

    connection
        .sink
        .close(close_code::NORMAL, "bye")
        .await
        .unwrap();

    assert_eq!(
        peer.recv().await,
        Some(Frame::Close {
            code: close_code::NORMAL,
            reason: "bye".into()
        })
    );
}

#[tokio::test]
async fn test_dropped_peer_ends_stream() {
    let (connector, mut listener) = MemoryConnector::new();
    let mut connection = connector.connect(&url()).await.unwrap();
    let peer = listener.accept().await.unwrap();

    drop(peer);

    assert!(connection.source.next_frame().await.is_none());
    assert!(connection.sink.send(Frame::Binary(vec![0])).await.is_err());
}

#[tokio::test]
async fn test_peer_error_is_delivered() {
    let (connector, mut listener) = MemoryConnector::new();
    let mut connection = connector.connect(&url()).await.unwrap();
    let peer = listener.accept().await.unwrap();

    peer.fail(TransportError::ReceiveFailed("reset".into()));

    assert_eq!(
        connection.source.next_frame().await,
        Some(Err(TransportError::ReceiveFailed("reset".into())))
    );
}

// ============================================================================
// STATE
// ============================================================================

#[test]
fn test_connection_state_display_and_activity() {
    assert!(!ConnectionState::Disconnected.is_active());
    assert!(ConnectionState::Connecting.is_active());
    assert!(ConnectionState::Connected.is_active());
    assert_eq!(ConnectionState::Connected.to_string(), "connected");
}
