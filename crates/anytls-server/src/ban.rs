//! Brute-force throttling of authentication failures per source address.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use anytls_core::defaults::{BAN_DURATION, FAIL_WINDOW, MAX_AUTH_FAILURES};

#[derive(Debug)]
struct FailureRecord {
    count: u32,
    first_fail: Instant,
    banned_at: Option<Instant>,
}

/// Sliding-window failure counter with temporary bans.
///
/// Failures inside one window accumulate; crossing the threshold bans the
/// address for the ban duration, during which further failures are not
/// counted. Missing records are a clean slate; the limiter never errors.
#[derive(Debug)]
pub struct FailureLimiter {
    max_failures: u32,
    window: Duration,
    ban_duration: Duration,
    failures: Mutex<HashMap<String, FailureRecord>>,
}

impl FailureLimiter {
    pub fn new() -> Self {
        Self::with_policy(MAX_AUTH_FAILURES, FAIL_WINDOW, BAN_DURATION)
    }

    pub fn with_policy(max_failures: u32, window: Duration, ban_duration: Duration) -> Self {
        Self {
            max_failures,
            window,
            ban_duration,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Record one authentication failure from `ip`.
    pub fn record(&self, ip: &str) {
        let now = Instant::now();
        let mut failures = self.failures.lock();

        let Some(record) = failures.get_mut(ip) else {
            failures.insert(
                ip.to_string(),
                FailureRecord {
                    count: 1,
                    first_fail: now,
                    banned_at: None,
                },
            );
            return;
        };

        // The count is frozen while banned.
        if record.banned_at.is_some() {
            return;
        }

        if now.duration_since(record.first_fail) > self.window {
            record.count = 1;
            record.first_fail = now;
            return;
        }

        record.count += 1;
        if record.count > self.max_failures {
            record.banned_at = Some(now);
        }
    }

    /// Whether `ip` is currently banned. An expired ban is evicted here.
    pub fn is_banned(&self, ip: &str) -> bool {
        let mut failures = self.failures.lock();
        let Some(record) = failures.get(ip) else {
            return false;
        };
        let Some(banned_at) = record.banned_at else {
            return false;
        };
        if banned_at.elapsed() > self.ban_duration {
            failures.remove(ip);
            return false;
        }
        true
    }

    /// Evict every record whose ban expired or whose window elapsed without
    /// a ban. Idempotent; runs on each pull tick.
    pub fn sweep(&self) {
        let now = Instant::now();
        let mut failures = self.failures.lock();
        failures.retain(|_, record| match record.banned_at {
            Some(banned_at) => now.duration_since(banned_at) <= self.ban_duration,
            None => now.duration_since(record.first_fail) <= self.window,
        });
    }
}

impl Default for FailureLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> FailureLimiter {
        FailureLimiter::with_policy(10, Duration::from_secs(60), Duration::from_secs(300))
    }

    #[test]
    fn ten_failures_stay_unbanned_eleventh_bans() {
        let limiter = limiter();
        for _ in 0..10 {
            limiter.record("10.0.0.5");
        }
        assert!(!limiter.is_banned("10.0.0.5"));

        limiter.record("10.0.0.5");
        assert!(limiter.is_banned("10.0.0.5"));
    }

    #[test]
    fn addresses_are_independent() {
        let limiter = limiter();
        for _ in 0..11 {
            limiter.record("10.0.0.5");
        }
        assert!(limiter.is_banned("10.0.0.5"));
        assert!(!limiter.is_banned("10.0.0.6"));
    }

    #[test]
    fn window_expiry_resets_count_to_one() {
        let limiter = FailureLimiter::with_policy(
            10,
            Duration::from_millis(20),
            Duration::from_secs(300),
        );
        for _ in 0..10 {
            limiter.record("1.2.3.4");
        }
        std::thread::sleep(Duration::from_millis(30));

        // outside the window: this failure restarts the count at one
        limiter.record("1.2.3.4");
        for _ in 0..9 {
            limiter.record("1.2.3.4");
        }
        assert!(!limiter.is_banned("1.2.3.4"));
        limiter.record("1.2.3.4");
        assert!(limiter.is_banned("1.2.3.4"));
    }

    #[test]
    fn ban_expires_and_record_is_evicted() {
        let limiter =
            FailureLimiter::with_policy(1, Duration::from_secs(60), Duration::from_millis(20));
        limiter.record("9.9.9.9");
        limiter.record("9.9.9.9");
        assert!(limiter.is_banned("9.9.9.9"));

        std::thread::sleep(Duration::from_millis(30));
        assert!(!limiter.is_banned("9.9.9.9"));

        // eviction happened: one failure is again far from the threshold
        limiter.record("9.9.9.9");
        assert!(!limiter.is_banned("9.9.9.9"));
    }

    #[test]
    fn failures_while_banned_do_not_extend() {
        let limiter =
            FailureLimiter::with_policy(1, Duration::from_secs(60), Duration::from_millis(40));
        limiter.record("8.8.8.8");
        limiter.record("8.8.8.8");
        assert!(limiter.is_banned("8.8.8.8"));

        // frozen while banned: these must not re-arm the ban
        std::thread::sleep(Duration::from_millis(25));
        limiter.record("8.8.8.8");
        std::thread::sleep(Duration::from_millis(25));
        assert!(!limiter.is_banned("8.8.8.8"));
    }

    #[test]
    fn sweep_evicts_expired_records() {
        let limiter = FailureLimiter::with_policy(
            1,
            Duration::from_millis(10),
            Duration::from_millis(10),
        );
        limiter.record("a");
        limiter.record("b");
        limiter.record("b"); // banned

        std::thread::sleep(Duration::from_millis(20));
        limiter.sweep();
        limiter.sweep(); // idempotent

        assert!(limiter.failures.lock().is_empty());
    }
}
