// Cooldown State Tests
// Tests for expiry and remaining-time arithmetic

use chrono::{DateTime, Duration, Utc};
use mirrorlink::cooldown::{Clock, CooldownState, ManualClock, SystemClock};

fn at(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap()
}

fn cooldown_until(ms: i64) -> CooldownState {
    CooldownState {
        reason: "circuit open".into(),
        resumes_at: at(ms),
        source_id: "machine-1".into(),
        started_at: at(0),
    }
}

// ============================================================================
// REMAINING SECONDS
// ============================================================================

#[test]
fn test_whole_seconds() {
    assert_eq!(cooldown_until(30_000).remaining_seconds(at(0)), 30);
}

#[test]
fn test_partial_seconds_round_up() {
    let state = cooldown_until(30_000);

    assert_eq!(state.remaining_seconds(at(29_999)), 1);
    assert_eq!(state.remaining_seconds(at(28_500)), 2);
    assert_eq!(state.remaining_seconds(at(1)), 30);
}

#[test]
fn test_past_deadline_is_zero() {
    let state = cooldown_until(30_000);

    assert_eq!(state.remaining_seconds(at(30_000)), 0);
    assert_eq!(state.remaining_seconds(at(90_000)), 0);
}

// ============================================================================
// EXPIRY
// ============================================================================

#[test]
fn test_expired_at_and_after_deadline() {
    let state = cooldown_until(10_000);

    assert!(!state.is_expired(at(9_999)));
    assert!(state.is_expired(at(10_000)));
    assert!(state.is_expired(at(10_001)));
}

#[test]
fn test_past_cooldown_is_expired_immediately() {
    let now = Utc::now();
    let state = CooldownState {
        reason: "stale".into(),
        resumes_at: now - Duration::seconds(5),
        source_id: "machine-1".into(),
        started_at: now,
    };

    assert!(state.is_expired(now));
    assert_eq!(state.remaining_seconds(now), 0);
}

// ============================================================================
// CLOCKS
// ============================================================================

#[test]
fn test_manual_clock_set_and_advance() {
    let clock = ManualClock::new(at(5_000));
    clock.advance(std::time::Duration::from_millis(250));
    assert_eq!(clock.now(), at(5_250));

    clock.set(at(1_000));
    assert_eq!(clock.now(), at(1_000));
}

#[test]
fn test_system_clock_moves_forward() {
    let clock = SystemClock;
    let first = clock.now();
    let second = clock.now();

    assert!(second >= first);
}
