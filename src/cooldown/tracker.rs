// Tracker - Revival cooldown banner state
//
// The server may report overlapping cooldowns; the furthest `resumes_at`
// wins and earlier ones are ignored. A revival clears the cooldown at once.
// A single ticker task re-evaluates expiry; readers compute remaining time
// from the clock on demand, so a missed tick never shows a stale value.

use super::clock::{Clock, SystemClock};
use super::state::{ClearCause, CooldownState, RevivalFailure, TrackerEvent};
use crate::api::{ApiError, ArchiveApi};
use crate::sync::{CooldownSignal, RevivalPaused, SessionRevived};
use chrono::DateTime;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 64;
const DEFAULT_FAILURE_REASON: &str = "revival failed";

#[derive(Default)]
struct TrackerState {
    active: Option<CooldownState>,
    failures: BTreeMap<String, RevivalFailure>,
    ticker: Option<JoinHandle<()>>,
}

struct TrackerShared {
    clock: Arc<dyn Clock>,
    tick: Duration,
    state: Mutex<TrackerState>,
    events: broadcast::Sender<TrackerEvent>,
}

impl TrackerShared {
    /// Clear the cooldown if it has run out. Returns true when nothing is left to count down.
    fn expire_if_due(&self) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let Some(expired) = state.active.as_ref().map(|active| active.is_expired(now)) else {
            state.ticker = None;
            return true;
        };
        if !expired {
            return false;
        }

        let cleared = state.active.take();
        if let Some(ticker) = state.ticker.take() {
            ticker.abort();
        }
        drop(state);

        if let Some(cleared) = cleared {
            info!(source_id = %cleared.source_id, "revival cooldown expired");
            let _ = self.events.send(TrackerEvent::CooldownCleared {
                source_id: cleared.source_id,
                cause: ClearCause::Expired,
            });
        }
        true
    }
}

/// Revival cooldown and failure tracker. Cloning shares the same state.
#[derive(Clone)]
pub struct RevivalCooldownTracker {
    shared: Arc<TrackerShared>,
}

impl RevivalCooldownTracker {
    /// Create a tracker that re-evaluates expiry every `tick`
    pub fn new(clock: Arc<dyn Clock>, tick: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(TrackerShared {
                clock,
                tick: tick.max(Duration::from_millis(1)),
                state: Mutex::new(TrackerState::default()),
                events,
            }),
        }
    }

    pub fn with_system_clock(tick: Duration) -> Self {
        Self::new(Arc::new(SystemClock), tick)
    }

    /// Subscribe to tracker notifications
    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.shared.events.subscribe()
    }

    // ========================================================================
    // COOLDOWN
    // ========================================================================

    /// Record a cooldown ending at `resumes_at_ms` (epoch milliseconds).
    ///
    /// Returns false when an active cooldown already ends at the same time
    /// or later.
    pub fn on_cooldown_started(&self, reason: &str, resumes_at_ms: i64, source_id: &str) -> bool {
        let Some(resumes_at) = DateTime::from_timestamp_millis(resumes_at_ms) else {
            warn!(resumes_at_ms, "ignoring cooldown with out-of-range timestamp");
            return false;
        };

        let mut state = self.shared.state.lock();
        if let Some(active) = &state.active {
            if active.resumes_at >= resumes_at {
                debug!(%source_id, resumes_at_ms, "cooldown does not extend the active one");
                return false;
            }
        }

        let cooldown = CooldownState {
            reason: reason.to_string(),
            resumes_at,
            source_id: source_id.to_string(),
            started_at: self.shared.clock.now(),
        };
        state.active = Some(cooldown.clone());
        self.restart_ticker(&mut state);
        drop(state);

        info!(%source_id, %resumes_at, "revival cooldown started");
        let _ = self.shared.events.send(TrackerEvent::CooldownStarted(cooldown));
        true
    }

    /// Record a `session-revival-paused` signal
    pub fn on_revival_paused(&self, paused: &RevivalPaused) -> bool {
        self.on_cooldown_started(&paused.reason, paused.resumes_at, &paused.machine_id)
    }

    /// A revival happened: clear the cooldown regardless of its timestamps,
    /// and resolve any failure recorded for the revived entity
    pub fn on_entity_revived(&self, source_id: &str) {
        self.clear_cooldown(source_id);
        self.dismiss_failure(source_id);
    }

    /// Record a `session-revived` signal; also resolves any failure on the old session
    pub fn on_session_revived(&self, revived: &SessionRevived) {
        self.on_entity_revived(&revived.machine_id);
        self.dismiss_failure(&revived.original_session_id);
    }

    fn clear_cooldown(&self, source_id: &str) {
        let mut state = self.shared.state.lock();
        let Some(cleared) = state.active.take() else {
            return;
        };
        if let Some(ticker) = state.ticker.take() {
            ticker.abort();
        }
        drop(state);

        if cleared.source_id != source_id {
            debug!(active = %cleared.source_id, %source_id, "revival from another source clears cooldown");
        }
        info!(%source_id, "revival cooldown cleared by revival");
        let _ = self.shared.events.send(TrackerEvent::CooldownCleared {
            source_id: cleared.source_id,
            cause: ClearCause::Revived,
        });
    }

    /// Run one countdown step. Returns true when no cooldown remains.
    pub fn expire_if_due(&self) -> bool {
        self.shared.expire_if_due()
    }

    /// Get the active cooldown, if it has not expired
    pub fn active_cooldown(&self) -> Option<CooldownState> {
        let now = self.shared.clock.now();
        self.shared
            .state
            .lock()
            .active
            .clone()
            .filter(|active| !active.is_expired(now))
    }

    /// Whole seconds until revival resumes, 0 when no cooldown is active
    pub fn remaining_seconds(&self) -> u64 {
        let now = self.shared.clock.now();
        self.shared
            .state
            .lock()
            .active
            .as_ref()
            .map(|active| active.remaining_seconds(now))
            .unwrap_or(0)
    }

    pub fn is_showing_banner(&self) -> bool {
        let now = self.shared.clock.now();
        self.shared
            .state
            .lock()
            .active
            .as_ref()
            .is_some_and(|active| !active.is_expired(now))
    }

    /// Check if a countdown task is running
    pub fn is_ticking(&self) -> bool {
        self.shared
            .state
            .lock()
            .ticker
            .as_ref()
            .is_some_and(|ticker| !ticker.is_finished())
    }

    fn restart_ticker(&self, state: &mut TrackerState) {
        if let Some(old) = state.ticker.take() {
            old.abort();
        }
        let Ok(runtime) = Handle::try_current() else {
            debug!("no runtime; cooldown expiry evaluated on read");
            return;
        };

        let weak: Weak<TrackerShared> = Arc::downgrade(&self.shared);
        let period = self.shared.tick;
        state.ticker = Some(runtime.spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(shared) = weak.upgrade() else { break };
                if shared.expire_if_due() {
                    break;
                }
            }
        }));
    }

    // ========================================================================
    // FAILURES
    // ========================================================================

    /// Record a local revival failure for an entity, replacing any earlier one
    pub fn on_local_failure_signal(&self, entity_id: &str, reason: &str) {
        let failure = RevivalFailure {
            entity_id: entity_id.to_string(),
            reason: reason.to_string(),
            occurred_at: self.shared.clock.now(),
        };
        self.shared
            .state
            .lock()
            .failures
            .insert(entity_id.to_string(), failure.clone());

        warn!(%entity_id, %reason, "revival failed");
        let _ = self.shared.events.send(TrackerEvent::FailureRecorded(failure));
    }

    /// Drop the failure record for an entity. Returns false if there was none.
    pub fn dismiss_failure(&self, entity_id: &str) -> bool {
        let removed = self.shared.state.lock().failures.remove(entity_id).is_some();
        if removed {
            let _ = self.shared.events.send(TrackerEvent::FailureCleared {
                entity_id: entity_id.to_string(),
            });
        }
        removed
    }

    /// Archive the failed session through the API, then clear the record.
    ///
    /// On any error the record stays so the user can retry.
    pub async fn archive_failure(&self, entity_id: &str, api: &dyn ArchiveApi) -> Result<(), ApiError> {
        let reason = self
            .failure(entity_id)
            .map(|failure| failure.reason)
            .unwrap_or_else(|| DEFAULT_FAILURE_REASON.to_string());

        api.archive_session(entity_id, &reason).await?;
        info!(%entity_id, "archived failed session");
        self.dismiss_failure(entity_id);
        Ok(())
    }

    pub fn failure(&self, entity_id: &str) -> Option<RevivalFailure> {
        self.shared.state.lock().failures.get(entity_id).cloned()
    }

    /// Get all open failures, ordered by entity id
    pub fn failures(&self) -> Vec<RevivalFailure> {
        self.shared.state.lock().failures.values().cloned().collect()
    }

    // ========================================================================
    // WIRING
    // ========================================================================

    /// Feed cooldown signals from a channel into this tracker until the stream closes
    pub fn attach(&self, mut signals: broadcast::Receiver<CooldownSignal>) -> JoinHandle<()> {
        let tracker = self.clone();
        tokio::spawn(async move {
            loop {
                match signals.recv().await {
                    Ok(CooldownSignal::Paused(paused)) => {
                        tracker.on_revival_paused(&paused);
                    }
                    Ok(CooldownSignal::Revived(revived)) => tracker.on_session_revived(&revived),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "cooldown listener lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Stop the countdown task. State is kept and still evaluated on read.
    pub fn stop(&self) {
        if let Some(ticker) = self.shared.state.lock().ticker.take() {
            ticker.abort();
        }
    }
}
