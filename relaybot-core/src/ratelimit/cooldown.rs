// File: src/ratelimit/cooldown.rs

use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// Per-user minimum interval between accepted requests.
///
/// The timestamp is written when the check passes, not when the reply is
/// sent, so a slow completion does not open a window for a burst.
pub struct CooldownTracker {
    last_request: DashMap<String, Instant>,
    cooldown: Duration,
}

impl CooldownTracker {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            last_request: DashMap::new(),
            cooldown,
        }
    }

    /// True (and records `now`) iff at least `cooldown` has elapsed since the
    /// last accepted request for `user_key`. No state change on false.
    pub fn check_at(&self, user_key: &str, now: Instant) -> bool {
        match self.last_request.entry(user_key.to_string()) {
            Entry::Occupied(mut last) => {
                if now.saturating_duration_since(*last.get()) >= self.cooldown {
                    last.insert(now);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
        }
    }

    /// Time left before `user_key` may pass again.
    pub fn remaining_at(&self, user_key: &str, now: Instant) -> Option<Duration> {
        let last = *self.last_request.get(user_key)?;
        self.cooldown
            .checked_sub(now.saturating_duration_since(last))
            .filter(|d| !d.is_zero())
    }

    /// Forgets users idle for longer than `max_idle`; returns how many.
    pub fn purge_idle_at(&self, now: Instant, max_idle: Duration) -> usize {
        let before = self.last_request.len();
        self.last_request
            .retain(|_, last| now.saturating_duration_since(*last) <= max_idle);
        before.saturating_sub(self.last_request.len())
    }

    pub fn len(&self) -> usize {
        self.last_request.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_request.is_empty()
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}
