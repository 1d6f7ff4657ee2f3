// State - Cooldown and failure records

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Active revival cooldown
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CooldownState {
    pub reason: String,
    pub resumes_at: DateTime<Utc>,
    /// Machine that reported the cooldown
    pub source_id: String,
    pub started_at: DateTime<Utc>,
}

impl CooldownState {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.resumes_at
    }

    /// Whole seconds left, rounded up, never negative
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> u64 {
        // Negative deltas fail the conversion
        let Ok(left) = (self.resumes_at - now).to_std() else {
            return 0;
        };
        if left.subsec_nanos() > 0 {
            left.as_secs() + 1
        } else {
            left.as_secs()
        }
    }
}

/// A revival that failed locally and awaits user action
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RevivalFailure {
    pub entity_id: String,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Why a cooldown ended
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ClearCause {
    /// `resumes_at` passed
    Expired,
    /// A revival arrived before expiry
    Revived,
}

/// Tracker notifications for the UI layer
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrackerEvent {
    CooldownStarted(CooldownState),
    CooldownCleared { source_id: String, cause: ClearCause },
    FailureRecorded(RevivalFailure),
    FailureCleared { entity_id: String },
}
