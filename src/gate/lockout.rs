//! Per-client failure tracking and lockout windows.
//!
//! Flow Overview:
//! 1) Every failed credential check increments the client's failure count. The
//!    first failure of a window records `window_start`.
//! 2) A failure that arrives after the window elapsed starts a fresh window.
//! 3) The failure that brings the count to the attempt limit locks the client
//!    until `now + penalty`.
//! 4) Once a lockout expires the record is dropped, so the next failure begins a
//!    fresh window with a fresh count.
//! 5) A successful verification clears the record.
//!
//! State is process-local: a restart clears every lockout.

use chrono::{DateTime, Duration, Utc};
use dashmap::{DashMap, mapref::entry::Entry};
use std::sync::Arc;

use super::clock::Clock;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_ATTEMPT_WINDOW_SECONDS: i64 = 15 * 60;
pub const DEFAULT_LOCKOUT_SECONDS: i64 = 15 * 60;
/// Upper bound for both the attempt window and the lockout penalty.
pub const MAX_POLICY_SECONDS: i64 = 365 * 24 * 60 * 60;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockoutPolicy {
    max_attempts: u32,
    window: Duration,
    penalty: Duration,
}

impl LockoutPolicy {
    /// At least one attempt is always allowed. The window and the penalty are
    /// clamped to `0..=MAX_POLICY_SECONDS`.
    #[must_use]
    pub fn new(max_attempts: u32, window: Duration, penalty: Duration) -> Self {
        let bound =
            |value: Duration| value.clamp(Duration::zero(), Duration::seconds(MAX_POLICY_SECONDS));
        Self {
            max_attempts: max_attempts.max(1),
            window: bound(window),
            penalty: bound(penalty),
        }
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    #[must_use]
    pub fn penalty(&self) -> Duration {
        self.penalty
    }
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_ATTEMPTS,
            Duration::seconds(DEFAULT_ATTEMPT_WINDOW_SECONDS),
            Duration::seconds(DEFAULT_LOCKOUT_SECONDS),
        )
    }
}

/// Result of recording a failed attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttemptOutcome {
    pub attempts_remaining: u32,
    pub locked_until: Option<DateTime<Utc>>,
}

impl AttemptOutcome {
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked_until.is_some()
    }
}

/// Failure accounting keyed by client identifier.
///
/// Implementations must make each operation atomic per key. A shared store
/// (for example a TTL-keyed cache) can implement this without changing callers.
pub trait AttemptLimiter: Send + Sync {
    fn is_locked_out(&self, client_id: &str) -> bool;
    fn locked_until(&self, client_id: &str) -> Option<DateTime<Utc>>;
    fn record_failed_attempt(&self, client_id: &str) -> AttemptOutcome;
    fn clear_failed_attempts(&self, client_id: &str);

    /// Drop records that no longer affect any decision. Returns how many were removed.
    fn prune_expired(&self) -> usize {
        0
    }
}

#[derive(Clone, Copy, Debug)]
struct AttemptRecord {
    failure_count: u32,
    window_start: DateTime<Utc>,
    locked_until: Option<DateTime<Utc>>,
}

impl AttemptRecord {
    fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            failure_count: 0,
            window_start: now,
            locked_until: None,
        }
    }

    fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| now < until)
    }

    fn lockout_expired(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| now >= until)
    }

    fn is_stale(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match self.locked_until {
            Some(until) => now >= until,
            None => now - self.window_start > window,
        }
    }
}

/// In-memory [`AttemptLimiter`].
#[derive(Debug)]
pub struct LockoutTracker {
    policy: LockoutPolicy,
    clock: Arc<dyn Clock>,
    records: DashMap<String, AttemptRecord>,
}

impl LockoutTracker {
    #[must_use]
    pub fn new(policy: LockoutPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            clock,
            records: DashMap::new(),
        }
    }

    #[must_use]
    pub fn policy(&self) -> &LockoutPolicy {
        &self.policy
    }

    /// Number of clients currently tracked.
    #[must_use]
    pub fn tracked_clients(&self) -> usize {
        self.records.len()
    }
}

impl AttemptLimiter for LockoutTracker {
    fn is_locked_out(&self, client_id: &str) -> bool {
        let now = self.clock.now();
        match self.records.entry(client_id.to_string()) {
            Entry::Occupied(entry) => {
                if entry.get().lockout_expired(now) {
                    entry.remove();
                    return false;
                }
                entry.get().is_locked(now)
            }
            Entry::Vacant(_) => false,
        }
    }

    fn locked_until(&self, client_id: &str) -> Option<DateTime<Utc>> {
        let now = self.clock.now();
        self.records
            .get(client_id)
            .and_then(|record| record.locked_until.filter(|until| now < *until))
    }

    fn record_failed_attempt(&self, client_id: &str) -> AttemptOutcome {
        let now = self.clock.now();
        let mut entry = self
            .records
            .entry(client_id.to_string())
            .or_insert_with(|| AttemptRecord::fresh(now));
        let record = entry.value_mut();

        if let Some(until) = record.locked_until {
            if now < until {
                // Raced past the lock check; the running lockout stands as is.
                return AttemptOutcome {
                    attempts_remaining: 0,
                    locked_until: Some(until),
                };
            }
            *record = AttemptRecord::fresh(now);
        }

        if now - record.window_start > self.policy.window {
            *record = AttemptRecord::fresh(now);
        }

        record.failure_count = record.failure_count.saturating_add(1);

        if record.failure_count >= self.policy.max_attempts {
            let until = now
                .checked_add_signed(self.policy.penalty)
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            record.locked_until = Some(until);
            return AttemptOutcome {
                attempts_remaining: 0,
                locked_until: Some(until),
            };
        }

        AttemptOutcome {
            attempts_remaining: self.policy.max_attempts - record.failure_count,
            locked_until: None,
        }
    }

    fn clear_failed_attempts(&self, client_id: &str) {
        self.records.remove(client_id);
    }

    fn prune_expired(&self) -> usize {
        let now = self.clock.now();
        let window = self.policy.window;
        let before = self.records.len();
        self.records
            .retain(|_, record| !record.is_stale(now, window));
        before.saturating_sub(self.records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::clock::{Clock, ManualClock};

    const CLIENT: &str = "203.0.113.7";

    fn tracker() -> (Arc<ManualClock>, LockoutTracker) {
        let clock = Arc::new(ManualClock::default());
        let tracker = LockoutTracker::new(LockoutPolicy::default(), clock.clone());
        (clock, tracker)
    }

    #[test]
    fn policy_durations_are_bounded() {
        let policy = LockoutPolicy::new(
            0,
            Duration::seconds(-5),
            Duration::seconds(10_000_000_000_000),
        );
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(policy.window(), Duration::zero());
        assert_eq!(policy.penalty(), Duration::seconds(MAX_POLICY_SECONDS));
    }

    #[test]
    fn huge_penalty_locks_without_overflow() {
        let clock = Arc::new(ManualClock::default());
        let policy = LockoutPolicy::new(
            5,
            Duration::minutes(15),
            Duration::seconds(10_000_000_000_000),
        );
        let tracker = LockoutTracker::new(policy, clock.clone());
        for _ in 0..4 {
            let _ = tracker.record_failed_attempt(CLIENT);
        }
        let fifth = tracker.record_failed_attempt(CLIENT);
        assert_eq!(
            fifth.locked_until,
            Some(clock.now() + Duration::seconds(MAX_POLICY_SECONDS))
        );
        assert!(tracker.is_locked_out(CLIENT));
    }

    #[test]
    fn lockout_near_the_end_of_time_saturates() {
        let clock = Arc::new(ManualClock::new(
            DateTime::<Utc>::MAX_UTC - Duration::minutes(1),
        ));
        let policy = LockoutPolicy::new(1, Duration::minutes(15), Duration::minutes(15));
        let tracker = LockoutTracker::new(policy, clock);
        let outcome = tracker.record_failed_attempt(CLIENT);
        assert!(outcome.is_locked());
        assert!(tracker.is_locked_out(CLIENT));
    }

    #[test]
    fn unknown_client_is_not_locked() {
        let (_clock, tracker) = tracker();
        assert!(!tracker.is_locked_out(CLIENT));
        assert_eq!(tracker.locked_until(CLIENT), None);
    }

    #[test]
    fn attempts_remaining_counts_down_then_locks() {
        let (_clock, tracker) = tracker();
        let remaining: Vec<u32> = (0..4)
            .map(|_| tracker.record_failed_attempt(CLIENT).attempts_remaining)
            .collect();
        assert_eq!(remaining, vec![4, 3, 2, 1]);
        assert!(!tracker.is_locked_out(CLIENT));

        let fifth = tracker.record_failed_attempt(CLIENT);
        assert_eq!(fifth.attempts_remaining, 0);
        assert!(fifth.is_locked());
        assert!(tracker.is_locked_out(CLIENT));
        assert_eq!(tracker.locked_until(CLIENT), fifth.locked_until);
    }

    #[test]
    fn lockout_lasts_for_the_penalty() {
        let (clock, tracker) = tracker();
        for _ in 0..5 {
            let _ = tracker.record_failed_attempt(CLIENT);
        }
        clock.advance(Duration::minutes(14));
        assert!(tracker.is_locked_out(CLIENT));

        clock.advance(Duration::minutes(1));
        assert!(!tracker.is_locked_out(CLIENT));
    }

    #[test]
    fn failure_after_expiry_starts_fresh_window() {
        let (clock, tracker) = tracker();
        for _ in 0..5 {
            let _ = tracker.record_failed_attempt(CLIENT);
        }
        clock.advance(Duration::minutes(16));

        let next = tracker.record_failed_attempt(CLIENT);
        assert_eq!(next.attempts_remaining, 4);
        assert_eq!(next.locked_until, None);
        assert!(!tracker.is_locked_out(CLIENT));
    }

    #[test]
    fn failure_while_locked_does_not_extend_lock() {
        let (clock, tracker) = tracker();
        let mut locked_until = None;
        for _ in 0..5 {
            locked_until = tracker.record_failed_attempt(CLIENT).locked_until;
        }
        clock.advance(Duration::minutes(5));

        let raced = tracker.record_failed_attempt(CLIENT);
        assert_eq!(raced.attempts_remaining, 0);
        assert_eq!(raced.locked_until, locked_until);
    }

    #[test]
    fn old_failures_fall_out_of_the_window() {
        let (clock, tracker) = tracker();
        for _ in 0..4 {
            let _ = tracker.record_failed_attempt(CLIENT);
        }
        clock.advance(Duration::minutes(16));

        let next = tracker.record_failed_attempt(CLIENT);
        assert_eq!(next.attempts_remaining, 4);
        assert!(!tracker.is_locked_out(CLIENT));
    }

    #[test]
    fn success_clears_the_count() {
        let (_clock, tracker) = tracker();
        for _ in 0..4 {
            let _ = tracker.record_failed_attempt(CLIENT);
        }
        tracker.clear_failed_attempts(CLIENT);

        let next = tracker.record_failed_attempt(CLIENT);
        assert_eq!(next.attempts_remaining, 4);
    }

    #[test]
    fn clients_are_tracked_independently() {
        let (_clock, tracker) = tracker();
        for _ in 0..5 {
            let _ = tracker.record_failed_attempt(CLIENT);
        }
        assert!(tracker.is_locked_out(CLIENT));
        assert!(!tracker.is_locked_out("198.51.100.1"));
        assert_eq!(
            tracker
                .record_failed_attempt("198.51.100.1")
                .attempts_remaining,
            4
        );
    }

    #[test]
    fn prune_drops_only_stale_records() {
        let (clock, tracker) = tracker();
        for _ in 0..5 {
            let _ = tracker.record_failed_attempt("locked");
        }
        let _ = tracker.record_failed_attempt("counting");
        assert_eq!(tracker.prune_expired(), 0);

        clock.advance(Duration::minutes(10));
        let _ = tracker.record_failed_attempt("recent");
        clock.advance(Duration::minutes(6));

        assert_eq!(tracker.prune_expired(), 2);
        assert_eq!(tracker.tracked_clients(), 1);
        assert_eq!(tracker.record_failed_attempt("recent").attempts_remaining, 3);
    }

    #[test]
    fn concurrent_failures_are_not_lost() {
        let clock = Arc::new(ManualClock::default());
        let policy = LockoutPolicy::new(1000, Duration::minutes(15), Duration::minutes(15));
        let tracker = Arc::new(LockoutTracker::new(policy, clock));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = tracker.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let _ = tracker.record_failed_attempt(CLIENT);
                    }
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().is_ok());
        }

        let last = tracker.record_failed_attempt(CLIENT);
        assert_eq!(last.attempts_remaining, 1000 - 801);
    }

    #[test]
    fn concurrent_failures_lock_exactly_at_the_limit() {
        let clock = Arc::new(ManualClock::default());
        let tracker = Arc::new(LockoutTracker::new(LockoutPolicy::default(), clock));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let tracker = tracker.clone();
                std::thread::spawn(move || tracker.record_failed_attempt(CLIENT))
            })
            .collect();
        let outcomes: Vec<AttemptOutcome> = handles
            .into_iter()
            .filter_map(|handle| handle.join().ok())
            .collect();

        assert_eq!(outcomes.len(), 16);
        let unlocked = outcomes.iter().filter(|o| !o.is_locked()).count();
        assert_eq!(unlocked, 4);
        let lock_times: std::collections::HashSet<_> =
            outcomes.iter().filter_map(|o| o.locked_until).collect();
        assert_eq!(lock_times.len(), 1);
    }
}
