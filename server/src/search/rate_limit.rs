//! Process-wide search quota tracking.
//!
//! One counter and one window shared by every concurrent turn in the
//! process; nothing is partitioned per user and nothing survives a restart.
//! Two turns racing near the quota boundary may both pass the check and
//! both record, overshooting the quota slightly — tolerable skew for an
//! advisory free-tier budget.

use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Window {
    count: u32,
    started: Instant,
}

/// Fixed-quota, fixed-window request counter.
///
/// Checking and recording are separate operations because the provider call
/// sits between them and counts against the quota whether or not it
/// succeeds. The `*_at` variants take an explicit instant so tests can
/// drive the clock.
#[derive(Debug)]
pub struct RateLimiter {
    quota: u32,
    window: Duration,
    state: Mutex<Window>,
}

impl RateLimiter {
    pub fn new(quota: u32, window: Duration) -> Self {
        Self {
            quota,
            window,
            state: Mutex::new(Window {
                count: 0,
                started: Instant::now(),
            }),
        }
    }

    /// True when another request fits in the current window.
    pub fn can_make_request(&self) -> bool {
        self.can_make_request_at(Instant::now())
    }

    pub fn can_make_request_at(&self, now: Instant) -> bool {
        let mut window = self.state.lock().expect("rate limiter poisoned");
        if now.duration_since(window.started) > self.window {
            window.started = now;
            window.count = 0;
        }
        window.count < self.quota
    }

    /// Count one request against the window, successful or not.
    pub fn record_request(&self) {
        let mut window = self.state.lock().expect("rate limiter poisoned");
        window.count += 1;
    }

    /// Current `(count, quota)` for logging and diagnostics.
    pub fn usage(&self) -> (u32, u32) {
        let window = self.state.lock().expect("rate limiter poisoned");
        (window.count, self.quota)
    }
}
