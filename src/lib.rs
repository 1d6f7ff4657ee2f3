// mirrorlink - remote control client for a headless agent CLI
//
// Pairs with a machine over an out-of-band code, keeps an end-to-end
// encrypted update channel to the relay, and tracks the server's session
// revival cooldown.

pub mod api;
pub mod client;
pub mod config;
pub mod cooldown;
pub mod crypto;
pub mod pairing;
pub mod storage;
pub mod sync;
pub mod transport;

pub use client::MirrorClient;
pub use config::{ClientConfig, ConfigError};
