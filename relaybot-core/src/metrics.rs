// File: src/metrics.rs

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Lock-free counters updated from the message pipeline.
pub struct BotMetrics {
    processed: AtomicU64,
    replied: AtomicU64,
    dropped: AtomicU64,
    errors: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    api_calls: AtomicU64,
    api_errors: AtomicU64,
    api_latency_micros: AtomicU64,
    rate_limited: AtomicU64,
    fallback_replies: AtomicU64,
    started_at: DateTime<Utc>,
    last_reply_at: Mutex<Option<DateTime<Utc>>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterValues {
    pub processed: u64,
    pub replied: u64,
    pub dropped: u64,
    pub errors: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub api_calls: u64,
    pub api_errors: u64,
    pub rate_limited: u64,
    pub fallback_replies: u64,
}

/// Share of `part` in `total` as a percentage with one decimal.
fn percentage(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        (part as f64 / total as f64 * 1000.0).round() / 10.0
    }
}

impl BotMetrics {
    pub fn new() -> Self {
        Self {
            processed: AtomicU64::new(0),
            replied: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            api_calls: AtomicU64::new(0),
            api_errors: AtomicU64::new(0),
            api_latency_micros: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
            fallback_replies: AtomicU64::new(0),
            started_at: Utc::now(),
            last_reply_at: Mutex::new(None),
        }
    }

    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reply(&self) {
        self.replied.fetch_add(1, Ordering::Relaxed);
        *self.last_reply_at.lock() = Some(Utc::now());
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// One finished completion call, successful or not.
    pub fn record_api_call(&self, latency: Duration, success: bool) {
        self.api_calls.fetch_add(1, Ordering::Relaxed);
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.api_latency_micros.fetch_add(micros, Ordering::Relaxed);
        if !success {
            self.api_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// A request turned away by the global call window.
    pub fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback(&self) {
        self.fallback_replies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn counters(&self) -> CounterValues {
        CounterValues {
            processed: self.processed.load(Ordering::Relaxed),
            replied: self.replied.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            api_calls: self.api_calls.load(Ordering::Relaxed),
            api_errors: self.api_errors.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            fallback_replies: self.fallback_replies.load(Ordering::Relaxed),
        }
    }

    /// Percentage of cache lookups that hit, 0 when nothing was looked up.
    pub fn cache_hit_rate(&self) -> f64 {
        let c = self.counters();
        percentage(c.cache_hits, c.cache_hits + c.cache_misses)
    }

    /// Percentage of completion calls that failed.
    pub fn api_error_rate(&self) -> f64 {
        let c = self.counters();
        percentage(c.api_errors, c.api_calls)
    }

    /// Mean completion call latency in milliseconds, 0 before the first call.
    pub fn avg_api_latency_ms(&self) -> f64 {
        let calls = self.api_calls.load(Ordering::Relaxed);
        if calls == 0 {
            return 0.0;
        }
        let micros = self.api_latency_micros.load(Ordering::Relaxed);
        (micros as f64 / calls as f64 / 100.0).round() / 10.0
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn last_reply_at(&self) -> Option<DateTime<Utc>> {
        *self.last_reply_at.lock()
    }
}

impl Default for BotMetrics {
    fn default() -> Self {
        Self::new()
    }
}
