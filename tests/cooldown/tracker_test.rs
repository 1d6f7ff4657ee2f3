// Tracker Tests
// Tests for revival cooldown tracking, failures and archiving

use async_trait::async_trait;
use mirrorlink::api::{ApiError, ArchiveApi};
use mirrorlink::cooldown::{ClearCause, ManualClock, RevivalCooldownTracker, TrackerEvent};
use mirrorlink::sync::{CooldownSignal, RevivalPaused, SessionRevived};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const NOW: i64 = 1_700_000_000_000;

fn tracker() -> (RevivalCooldownTracker, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::at_epoch_ms(NOW));
    let tracker = RevivalCooldownTracker::new(clock.clone(), Duration::from_secs(1));
    (tracker, clock)
}

fn resumes_at(tracker: &RevivalCooldownTracker) -> Option<i64> {
    tracker
        .active_cooldown()
        .map(|cooldown| cooldown.resumes_at.timestamp_millis())
}

fn revived(machine: &str, original: &str) -> SessionRevived {
    SessionRevived {
        original_session_id: original.into(),
        new_session_id: format!("{original}-new"),
        machine_id: machine.into(),
    }
}

#[derive(Default)]
struct RecordingApi {
    calls: Mutex<Vec<(String, String)>>,
    reject_with: Option<u16>,
}

#[async_trait]
impl ArchiveApi for RecordingApi {
    async fn archive_session(&self, session_id: &str, reason: &str) -> Result<(), ApiError> {
        self.calls
            .lock()
            .push((session_id.to_string(), reason.to_string()));
        match self.reject_with {
            Some(status) => Err(ApiError::Status {
                status,
                body: "nope".into(),
            }),
            None => Ok(()),
        }
    }
}

// ============================================================================
// MONOTONIC REPLACEMENT
// ============================================================================

#[tokio::test]
async fn test_earlier_cooldown_is_ignored() {
    let (tracker, _) = tracker();

    assert!(tracker.on_cooldown_started("first", NOW + 30_000, "machine-1"));
    assert!(!tracker.on_cooldown_started("stale", NOW + 10_000, "machine-1"));

    let active = tracker.active_cooldown().unwrap();
    assert_eq!(active.reason, "first");
    assert_eq!(resumes_at(&tracker), Some(NOW + 30_000));
}

#[tokio::test]
async fn test_later_cooldown_replaces() {
    let (tracker, _) = tracker();

    tracker.on_cooldown_started("first", NOW + 30_000, "machine-1");
    assert!(tracker.on_cooldown_started("longer", NOW + 60_000, "machine-2"));

    let active = tracker.active_cooldown().unwrap();
    assert_eq!(active.reason, "longer");
    assert_eq!(active.source_id, "machine-2");
    assert_eq!(tracker.remaining_seconds(), 60);
}

#[tokio::test]
async fn test_equal_deadline_is_ignored() {
    let (tracker, _) = tracker();
    let mut events = tracker.subscribe();

    tracker.on_cooldown_started("a", NOW + 5_000, "machine-1");
    assert!(!tracker.on_cooldown_started("b", NOW + 5_000, "machine-1"));

    assert!(matches!(events.try_recv(), Ok(TrackerEvent::CooldownStarted(_))));
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_cooldown_storm_keeps_furthest() {
    let (tracker, _) = tracker();

    let accepted: Vec<bool> = [5_000, 2_000, 20_000]
        .into_iter()
        .map(|offset| {
            tracker.on_revival_paused(&RevivalPaused {
                reason: format!("+{offset}"),
                remaining_ms: offset,
                resumes_at: NOW + offset,
                machine_id: "machine-1".into(),
            })
        })
        .collect();

    assert_eq!(accepted, vec![true, false, true]);
    assert_eq!(resumes_at(&tracker), Some(NOW + 20_000));
    assert_eq!(tracker.remaining_seconds(), 20);
}

// ============================================================================
// DERIVED VALUES
// ============================================================================

#[tokio::test]
async fn test_remaining_is_recomputed_from_clock() {
    let (tracker, clock) = tracker();
    tracker.on_cooldown_started("limit", NOW + 2_500, "machine-1");

    assert_eq!(tracker.remaining_seconds(), 3);
    assert!(tracker.is_showing_banner());

    clock.advance(Duration::from_millis(600));
    assert_eq!(tracker.remaining_seconds(), 2);

    clock.advance(Duration::from_millis(1_900));
    assert_eq!(tracker.remaining_seconds(), 0);
    assert!(!tracker.is_showing_banner());
}

#[tokio::test]
async fn test_banner_never_shows_zero_seconds() {
    let (tracker, clock) = tracker();
    tracker.on_cooldown_started("limit", NOW + 2_000, "machine-1");

    clock.advance(Duration::from_micros(1_000_500));
    assert_eq!(tracker.remaining_seconds(), 1);

    clock.advance(Duration::from_micros(999_000));
    assert!(tracker.is_showing_banner());
    assert_eq!(tracker.remaining_seconds(), 1);

    clock.advance(Duration::from_micros(500));
    assert!(!tracker.is_showing_banner());
    assert_eq!(tracker.remaining_seconds(), 0);
}

#[tokio::test]
async fn test_past_cooldown_is_expired_without_revival() {
    let (tracker, _) = tracker();

    tracker.on_cooldown_started("late news", NOW - 1_000, "machine-1");

    assert!(!tracker.is_showing_banner());
    assert_eq!(tracker.remaining_seconds(), 0);
    assert!(tracker.active_cooldown().is_none());
    assert!(tracker.expire_if_due());
}

#[tokio::test]
async fn test_no_cooldown_defaults() {
    let (tracker, _) = tracker();

    assert_eq!(tracker.remaining_seconds(), 0);
    assert!(!tracker.is_showing_banner());
    assert!(tracker.active_cooldown().is_none());
    assert!(!tracker.is_ticking());
}

// ============================================================================
// COUNTDOWN
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_countdown_clears_on_expiry() {
    let (tracker, clock) = tracker();
    let mut events = tracker.subscribe();
    tracker.on_cooldown_started("limit", NOW + 2_000, "machine-1");
    assert!(tracker.is_ticking());
    assert!(matches!(events.recv().await, Ok(TrackerEvent::CooldownStarted(_))));

    clock.advance(Duration::from_millis(2_000));
    tokio::time::sleep(Duration::from_millis(1_100)).await;

    assert_eq!(
        events.recv().await.unwrap(),
        TrackerEvent::CooldownCleared {
            source_id: "machine-1".into(),
            cause: ClearCause::Expired,
        }
    );
    assert!(!tracker.is_showing_banner());
    tokio::task::yield_now().await;
    assert!(!tracker.is_ticking());
}

#[tokio::test(start_paused = true)]
async fn test_countdown_keeps_running_until_due() {
    let (tracker, clock) = tracker();
    tracker.on_cooldown_started("limit", NOW + 5_000, "machine-1");

    clock.advance(Duration::from_millis(1_000));
    tokio::time::sleep(Duration::from_millis(1_100)).await;

    assert!(tracker.is_showing_banner());
    assert!(tracker.is_ticking());
    assert_eq!(tracker.remaining_seconds(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_replacement_restarts_single_ticker() {
    let (tracker, clock) = tracker();
    let mut events = tracker.subscribe();
    tracker.on_cooldown_started("a", NOW + 1_000, "machine-1");
    tracker.on_cooldown_started("b", NOW + 3_000, "machine-1");

    clock.advance(Duration::from_millis(1_500));
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert!(tracker.is_showing_banner());

    clock.advance(Duration::from_millis(1_500));
    tokio::time::sleep(Duration::from_millis(1_000)).await;

    let mut cleared = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, TrackerEvent::CooldownCleared { .. }) {
            cleared += 1;
        }
    }
    assert_eq!(cleared, 1);
    assert!(!tracker.is_showing_banner());
}

#[tokio::test(start_paused = true)]
async fn test_stop_keeps_state_readable() {
    let (tracker, clock) = tracker();
    tracker.on_cooldown_started("limit", NOW + 2_000, "machine-1");

    tracker.stop();
    assert!(!tracker.is_ticking());

    clock.advance(Duration::from_millis(3_000));
    assert!(!tracker.is_showing_banner());
    assert_eq!(tracker.remaining_seconds(), 0);
}

// ============================================================================
// REVIVAL
// ============================================================================

#[tokio::test]
async fn test_revival_clears_future_cooldown() {
    let (tracker, _) = tracker();
    let mut events = tracker.subscribe();
    tracker.on_cooldown_started("limit", NOW + 600_000, "machine-1");

    tracker.on_entity_revived("machine-1");

    assert!(!tracker.is_showing_banner());
    assert!(!tracker.is_ticking());
    assert_eq!(tracker.remaining_seconds(), 0);
    events.try_recv().unwrap();
    assert_eq!(
        events.try_recv().unwrap(),
        TrackerEvent::CooldownCleared {
            source_id: "machine-1".into(),
            cause: ClearCause::Revived,
        }
    );
}

#[tokio::test]
async fn test_revival_from_other_source_still_clears() {
    let (tracker, _) = tracker();
    tracker.on_cooldown_started("limit", NOW + 60_000, "machine-1");

    tracker.on_entity_revived("machine-2");

    assert!(tracker.active_cooldown().is_none());
}

#[tokio::test]
async fn test_cooldown_after_revival_is_accepted() {
    let (tracker, _) = tracker();
    tracker.on_cooldown_started("first", NOW + 60_000, "machine-1");
    tracker.on_entity_revived("machine-1");

    assert!(tracker.on_cooldown_started("second", NOW + 10_000, "machine-1"));
    assert_eq!(resumes_at(&tracker), Some(NOW + 10_000));
}

#[tokio::test]
async fn test_session_revived_clears_cooldown_and_failure() {
    let (tracker, _) = tracker();
    tracker.on_cooldown_started("limit", NOW + 60_000, "machine-1");
    tracker.on_local_failure_signal("s-1", "agent crashed");
    tracker.on_local_failure_signal("s-2", "agent crashed");

    tracker.on_session_revived(&revived("machine-1", "s-1"));

    assert!(!tracker.is_showing_banner());
    assert!(tracker.failure("s-1").is_none());
    assert!(tracker.failure("s-2").is_some());
}

// ============================================================================
// FAILURES
// ============================================================================

#[tokio::test]
async fn test_failures_are_independent_of_cooldown() {
    let (tracker, clock) = tracker();
    tracker.on_local_failure_signal("s-1", "spawn failed");
    tracker.on_cooldown_started("limit", NOW + 1_000, "machine-1");

    clock.advance(Duration::from_secs(5));
    tracker.expire_if_due();

    let failure = tracker.failure("s-1").unwrap();
    assert_eq!(failure.reason, "spawn failed");
    assert_eq!(failure.occurred_at.timestamp_millis(), NOW);
}

#[tokio::test]
async fn test_newer_failure_replaces_older() {
    let (tracker, _) = tracker();
    tracker.on_local_failure_signal("s-1", "first");
    tracker.on_local_failure_signal("s-1", "second");
    tracker.on_local_failure_signal("s-0", "other");

    let failures = tracker.failures();
    assert_eq!(failures.len(), 2);
    assert_eq!(failures[0].entity_id, "s-0");
    assert_eq!(failures[1].reason, "second");
}

#[tokio::test]
async fn test_dismiss_failure() {
    let (tracker, _) = tracker();
    let mut events = tracker.subscribe();
    tracker.on_local_failure_signal("s-1", "spawn failed");

    assert!(tracker.dismiss_failure("s-1"));
    assert!(!tracker.dismiss_failure("s-1"));

    assert!(matches!(events.try_recv(), Ok(TrackerEvent::FailureRecorded(_))));
    assert_eq!(
        events.try_recv().unwrap(),
        TrackerEvent::FailureCleared {
            entity_id: "s-1".into()
        }
    );
    assert!(events.try_recv().is_err());
}

// ============================================================================
// ARCHIVE
// ============================================================================

#[tokio::test]
async fn test_archive_success_clears_failure() {
    let (tracker, _) = tracker();
    let api = RecordingApi::default();
    tracker.on_local_failure_signal("s-1", "spawn failed");

    tracker.archive_failure("s-1", &api).await.unwrap();

    assert!(tracker.failure("s-1").is_none());
    assert_eq!(
        api.calls.lock().clone(),
        vec![("s-1".to_string(), "spawn failed".to_string())]
    );
}

#[tokio::test]
async fn test_archive_rejection_keeps_failure_open() {
    let (tracker, _) = tracker();
    let api = RecordingApi {
        reject_with: Some(503),
        ..Default::default()
    };
    tracker.on_local_failure_signal("s-1", "spawn failed");

    let result = tracker.archive_failure("s-1", &api).await;

    assert!(matches!(result, Err(ApiError::Status { status: 503, .. })));
    assert!(tracker.failure("s-1").is_some());
}

// ============================================================================
// WIRING
// ============================================================================

#[tokio::test]
async fn test_attach_follows_signal_stream() {
    let (tracker, _) = tracker();
    let mut events = tracker.subscribe();
    let (tx, rx) = broadcast::channel(8);
    let handle = tracker.attach(rx);

    tx.send(CooldownSignal::Paused(RevivalPaused {
        reason: "circuit open".into(),
        remaining_ms: 10_000,
        resumes_at: NOW + 10_000,
        machine_id: "machine-1".into(),
    }))
    .unwrap();
    assert!(matches!(
        events.recv().await,
        Ok(TrackerEvent::CooldownStarted(_))
    ));
    assert!(tracker.is_showing_banner());

    tx.send(CooldownSignal::Revived(revived("machine-1", "s-1")))
        .unwrap();
    assert!(matches!(
        events.recv().await,
        Ok(TrackerEvent::CooldownCleared {
            cause: ClearCause::Revived,
            ..
        })
    ));

    drop(tx);
    handle.await.unwrap();
}
