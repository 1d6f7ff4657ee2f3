// Cooldown module - REVIVAL CIRCUIT BREAKER STATE
// Tracks the server's revival cooldown for the banner and records local revival failures

mod clock;
mod state;
mod tracker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use state::{ClearCause, CooldownState, RevivalFailure, TrackerEvent};
pub use tracker::RevivalCooldownTracker;
