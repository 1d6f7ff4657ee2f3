// Sync module - HOW UPDATES ARRIVE
// Encrypted real-time channel, tagged-union envelope protocol, and fan-out of decoded events

mod channel;
mod events;
mod protocol;
mod reconnect;

pub use channel::{build_connect_url, ChannelError, ChannelStats, SyncChannel};
pub use events::{ConnectionStatus, CooldownSignal, DisconnectReason, EventHub, SyncError};
pub use protocol::{
    Decoded, EntityRef, EntityUpdate, Keepalive, MessageSnapshot, MessageUpdate, ProtocolError,
    RevivalPaused, SessionRevived, SessionSnapshot, SessionUpdate, UpdateEnvelope,
};
pub use reconnect::ReconnectPolicy;
