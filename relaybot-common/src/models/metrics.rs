// File: relaybot-common/src/models/metrics.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time readout of the bot counters and container sizes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub processed: u64,
    pub replied: u64,
    pub dropped: u64,
    pub errors: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
    pub api_calls: u64,
    pub api_errors: u64,
    /// Percentage of completion calls that failed.
    pub api_error_rate: f64,
    pub avg_api_latency_ms: f64,
    pub rate_limited: u64,
    pub fallback_replies: u64,
    pub cache_size: usize,
    /// Turns held across all conversations.
    pub history_len: usize,
    pub conversations: usize,
    pub cooldown_entries: usize,
    pub known_users: usize,
    pub circuit_state: String,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub last_reply_at: Option<DateTime<Utc>>,
}
