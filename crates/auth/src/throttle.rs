use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use dashmap::DashMap;

const SWEEP_EVERY_CHECKS: u64 = 512;

/// One throttle window for one key.
#[derive(Debug, Clone, Copy)]
struct Window {
    opened_at: Instant,
    attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    Allowed,
    Denied { retry_after: Duration },
}

/// Per-key login throttle: at most `max_attempts` per decay window.
///
/// Keys are caller-chosen (typically `ip:username`). The window fully
/// resets once the decay period elapses, so a locked-out key decays back
/// to a clean slate rather than sliding.
pub struct LoginThrottle {
    max_attempts: u32,
    decay: Duration,
    windows: DashMap<String, Window>,
    checks_seen: AtomicU64,
}

impl LoginThrottle {
    #[must_use]
    pub fn new(max_attempts: u32, decay: Duration) -> Self {
        Self {
            max_attempts,
            decay,
            windows: DashMap::new(),
            checks_seen: AtomicU64::new(0),
        }
    }

    /// Record an attempt for `key` and decide whether it may proceed.
    pub fn check(&self, key: &str) -> ThrottleDecision {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> ThrottleDecision {
        if self.max_attempts == 0 {
            return ThrottleDecision::Denied {
                retry_after: self.decay.max(Duration::from_secs(1)),
            };
        }

        let decision = {
            let mut window = self.windows.entry(key.to_string()).or_insert(Window {
                opened_at: now,
                attempts: 0,
            });
            let elapsed = now.duration_since(window.opened_at);
            if elapsed >= self.decay {
                window.opened_at = now;
                window.attempts = 0;
            }
            if window.attempts < self.max_attempts {
                window.attempts += 1;
                ThrottleDecision::Allowed
            } else {
                ThrottleDecision::Denied {
                    retry_after: self.decay.saturating_sub(elapsed),
                }
            }
        };

        self.sweep_if_due(now);
        decision
    }

    /// Forget a key, e.g. after a successful login.
    pub fn clear(&self, key: &str) {
        self.windows.remove(key);
    }

    fn sweep_if_due(&self, now: Instant) {
        let seen = self.checks_seen.fetch_add(1, Ordering::Relaxed) + 1;
        if !seen.is_multiple_of(SWEEP_EVERY_CHECKS) {
            return;
        }
        let stale_after = self.decay.saturating_mul(3);
        self.windows
            .retain(|_, window| now.duration_since(window.opened_at) <= stale_after);
    }
}
