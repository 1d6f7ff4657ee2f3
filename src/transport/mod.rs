// Transport module - THE WIRE (abstract)
// Message-oriented bidirectional connections: WebSocket for production, in-memory for tests

mod memory;
mod traits;
mod websocket;

pub use traits::{
    // Core traits
    Connector, FrameSink, FrameSource,
    // Connection types
    Connection, ConnectionState, Frame,
    // Errors
    TransportError,
    // Close codes
    close_code,
};

pub use memory::{MemoryConnector, MemoryListener, MemoryPeer};
pub use websocket::WebSocketConnector;
