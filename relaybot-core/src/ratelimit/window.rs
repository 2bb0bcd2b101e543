// File: src/ratelimit/window.rs

use std::time::{Duration, Instant};

use tracing::debug;

/// API errors in a row after which the window cap drops to the degraded value.
const ERROR_STREAK_LIMIT: u32 = 3;

/// Global fixed window counting completion calls across every user.
#[derive(Debug)]
pub struct RateWindow {
    call_count: u32,
    window_reset_at: Instant,
    window: Duration,
    max_calls: u32,
    degraded_max_calls: u32,
    consecutive_errors: u32,
}

impl RateWindow {
    pub fn new(window: Duration, max_calls: u32, degraded_max_calls: u32, now: Instant) -> Self {
        Self {
            call_count: 0,
            window_reset_at: now + window,
            window,
            max_calls,
            degraded_max_calls: degraded_max_calls.min(max_calls),
            consecutive_errors: 0,
        }
    }

    /// Resets the window if it has elapsed, then admits the call iff the
    /// count is under the current cap.
    pub fn check_at(&mut self, now: Instant) -> bool {
        if now >= self.window_reset_at {
            if self.call_count > 0 {
                debug!("Rate window elapsed after {} calls, resetting", self.call_count);
            }
            self.call_count = 0;
            self.consecutive_errors = 0;
            self.window_reset_at = now + self.window;
        }

        if self.call_count >= self.current_cap() {
            return false;
        }
        self.call_count += 1;
        true
    }

    pub fn record_success(&mut self) {
        self.consecutive_errors = 0;
    }

    pub fn record_failure(&mut self) {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
    }

    pub fn current_cap(&self) -> u32 {
        if self.consecutive_errors > ERROR_STREAK_LIMIT {
            self.degraded_max_calls
        } else {
            self.max_calls
        }
    }

    pub fn call_count(&self) -> u32 {
        self.call_count
    }

    pub fn window_reset_at(&self) -> Instant {
        self.window_reset_at
    }
}
