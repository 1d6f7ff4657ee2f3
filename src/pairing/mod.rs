// Pairing module - BOOTSTRAPPING TRUST
// Consumes the out-of-band pairing announcement and persists credentials

mod announcement;
mod manager;

pub use announcement::PairingAnnouncement;
pub use manager::{Credentials, Pairing, PairingError};
