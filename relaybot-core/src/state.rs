// File: src/state.rs

use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info};

use relaybot_ai::ConversationHistory;
use relaybot_common::models::{MetricsSnapshot, GLOBAL_SCOPE};

use crate::cache::{normalize_key, ResponseCache};
use crate::metrics::BotMetrics;
use crate::ratelimit::{RateLimitConfig, RateLimiter};

/// Per-chat conversations kept before the least recently used one is dropped.
pub const DEFAULT_MAX_CONVERSATIONS: usize = 500;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub max_entries: usize,
    /// Prompts are folded to this many characters before lookup.
    pub key_length: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_entries: 50,
            key_length: 100,
        }
    }
}

/// Counts returned by one maintenance sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_cache_entries: usize,
    pub stale_cooldowns: usize,
    pub forgotten_users: usize,
}

struct Conversation {
    history: ConversationHistory,
    last_used: Instant,
}

/// Everything the pipeline mutates, owned in one place and shared behind an
/// `Arc` by the dispatcher, the generator, maintenance and the admin server.
///
/// History and cache entries are partitioned by conversation scope (see
/// [`relaybot_common::models::InboundMessage::conversation_scope`]); the
/// unscoped helpers operate on [`GLOBAL_SCOPE`].
pub struct BotState {
    cache: Mutex<ResponseCache>,
    cache_key_length: usize,
    persona: String,
    history_pairs: usize,
    conversations: DashMap<String, Conversation>,
    max_conversations: usize,
    limiter: RateLimiter,
    metrics: BotMetrics,
    /// Last interaction per user key.
    seen_users: DashMap<String, Instant>,
}

impl BotState {
    pub fn new(
        persona: impl Into<String>,
        history_pairs: usize,
        cache: CacheConfig,
        limits: RateLimitConfig,
    ) -> Self {
        let persona = persona.into();
        let conversations = DashMap::new();
        conversations.insert(
            GLOBAL_SCOPE.to_string(),
            Conversation {
                history: ConversationHistory::new(persona.clone(), history_pairs),
                last_used: Instant::now(),
            },
        );
        Self {
            cache: Mutex::new(ResponseCache::new(cache.ttl, cache.max_entries)),
            cache_key_length: cache.key_length,
            persona,
            history_pairs,
            conversations,
            max_conversations: DEFAULT_MAX_CONVERSATIONS,
            limiter: RateLimiter::new(limits),
            metrics: BotMetrics::new(),
            seen_users: DashMap::new(),
        }
    }

    /// Caps the number of scoped conversations, the global one included.
    pub fn with_max_conversations(mut self, max: usize) -> Self {
        self.max_conversations = max.max(2);
        self
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn metrics(&self) -> &BotMetrics {
        &self.metrics
    }

    pub fn cache_key(&self, scope: &str, prompt: &str) -> String {
        let key = normalize_key(prompt, self.cache_key_length);
        if scope == GLOBAL_SCOPE {
            key
        } else {
            format!("{scope}:{key}")
        }
    }

    pub fn cached_reply(&self, prompt: &str) -> Option<String> {
        self.cached_reply_in(GLOBAL_SCOPE, prompt)
    }

    /// Looks the prompt up within `scope` and records the hit or miss.
    pub fn cached_reply_in(&self, scope: &str, prompt: &str) -> Option<String> {
        let key = self.cache_key(scope, prompt);
        let hit = self.cache.lock().get(&key);
        match hit {
            Some(_) => self.metrics.record_cache_hit(),
            None => self.metrics.record_cache_miss(),
        }
        hit
    }

    pub fn store_reply(&self, prompt: &str, reply: &str) {
        self.store_reply_in(GLOBAL_SCOPE, prompt, reply);
    }

    pub fn store_reply_in(&self, scope: &str, prompt: &str, reply: &str) {
        let key = self.cache_key(scope, prompt);
        self.cache.lock().put(key, reply);
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn clear_cache(&self) -> usize {
        let mut cache = self.cache.lock();
        let cleared = cache.len();
        cache.clear();
        info!("Cleared {} cached replies", cleared);
        cleared
    }

    pub fn with_history<R>(&self, f: impl FnOnce(&mut ConversationHistory) -> R) -> R {
        self.with_history_in(GLOBAL_SCOPE, f)
    }

    /// Runs `f` on the history of `scope`, creating it with the persona on
    /// first use. Keep `f` short and never await inside it.
    pub fn with_history_in<R>(&self, scope: &str, f: impl FnOnce(&mut ConversationHistory) -> R) -> R {
        if !self.conversations.contains_key(scope) {
            self.make_room_for_conversation();
        }
        let mut conversation = self
            .conversations
            .entry(scope.to_string())
            .or_insert_with(|| Conversation {
                history: ConversationHistory::new(self.persona.clone(), self.history_pairs),
                last_used: Instant::now(),
            });
        conversation.last_used = Instant::now();
        f(&mut conversation.history)
    }

    fn make_room_for_conversation(&self) {
        while self.conversations.len() >= self.max_conversations {
            let oldest = self
                .conversations
                .iter()
                .filter(|c| c.key() != GLOBAL_SCOPE)
                .min_by_key(|c| c.value().last_used)
                .map(|c| c.key().clone());
            match oldest {
                Some(scope) => {
                    debug!("Dropping least recently used conversation {}", scope);
                    self.conversations.remove(&scope);
                }
                None => break,
            }
        }
    }

    /// Turns in the global conversation, persona included.
    pub fn history_len(&self) -> usize {
        self.history_len_in(GLOBAL_SCOPE)
    }

    /// Turns in the conversation of `scope`; 1 (the persona) if it does not exist yet.
    pub fn history_len_in(&self, scope: &str) -> usize {
        self.conversations
            .get(scope)
            .map(|c| c.history.len())
            .unwrap_or(1)
    }

    pub fn conversation_count(&self) -> usize {
        self.conversations.len()
    }

    /// Resets the global conversation and drops every scoped one.
    pub fn reset_history(&self) {
        self.conversations.retain(|scope, _| scope == GLOBAL_SCOPE);
        if let Some(mut global) = self.conversations.get_mut(GLOBAL_SCOPE) {
            global.history.reset();
        }
        info!("Conversation history reset");
    }

    pub fn mark_seen(&self, user_key: &str) -> bool {
        self.mark_seen_at(user_key, Instant::now())
    }

    /// Marks `user_key` as seen; true when this is its first interaction
    /// since the user was last forgotten by a sweep.
    pub fn mark_seen_at(&self, user_key: &str, now: Instant) -> bool {
        self.seen_users.insert(user_key.to_string(), now).is_none()
    }

    pub fn known_users(&self) -> usize {
        self.seen_users.len()
    }

    pub fn sweep(&self) -> SweepReport {
        self.sweep_at(Instant::now())
    }

    /// Drops expired cache entries, idle cooldown records and users idle for
    /// as long as a cooldown record may be.
    pub fn sweep_at(&self, now: Instant) -> SweepReport {
        let horizon = self.limiter.idle_horizon();
        let users_before = self.seen_users.len();
        self.seen_users
            .retain(|_, last| now.saturating_duration_since(*last) <= horizon);

        let report = SweepReport {
            expired_cache_entries: self.cache.lock().purge_expired_at(now),
            stale_cooldowns: self.limiter.purge_stale_cooldowns_at(now),
            forgotten_users: users_before.saturating_sub(self.seen_users.len()),
        };
        debug!(
            expired = report.expired_cache_entries,
            cooldowns = report.stale_cooldowns,
            users = report.forgotten_users,
            "Maintenance sweep finished"
        );
        report
    }

    /// Logs a one-line performance summary.
    pub fn log_summary(&self) {
        let s = self.metrics_snapshot();
        info!(
            "Summary: uptime {}s, processed {}, replied {}, errors {}, API calls {} ({:.1} ms avg, {:.1}% errors), rate limited {}, cache hit rate {:.1}%",
            s.uptime_secs,
            s.processed,
            s.replied,
            s.errors,
            s.api_calls,
            s.avg_api_latency_ms,
            s.api_error_rate,
            s.rate_limited,
            s.cache_hit_rate
        );
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        let c = self.metrics.counters();
        let started_at = self.metrics.started_at();
        MetricsSnapshot {
            processed: c.processed,
            replied: c.replied,
            dropped: c.dropped,
            errors: c.errors,
            cache_hits: c.cache_hits,
            cache_misses: c.cache_misses,
            cache_hit_rate: self.metrics.cache_hit_rate(),
            api_calls: c.api_calls,
            api_errors: c.api_errors,
            api_error_rate: self.metrics.api_error_rate(),
            avg_api_latency_ms: self.metrics.avg_api_latency_ms(),
            rate_limited: c.rate_limited,
            fallback_replies: c.fallback_replies,
            cache_size: self.cache_len(),
            history_len: self.conversations.iter().map(|c| c.history.len()).sum(),
            conversations: self.conversation_count(),
            cooldown_entries: self.limiter.cooldown_entries(),
            known_users: self.known_users(),
            circuit_state: self.limiter.circuit_state().to_string(),
            started_at,
            uptime_secs: (Utc::now() - started_at).num_seconds(),
            last_reply_at: self.metrics.last_reply_at(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> BotState {
        BotState::new(
            "persona",
            2,
            CacheConfig {
                ttl: Duration::from_secs(60),
                max_entries: 2,
                key_length: 10,
            },
            RateLimitConfig::default(),
        )
    }

    #[test]
    fn test_mark_seen_only_first_time() {
        let s = state();
        assert!(s.mark_seen("twitch-irc:1"));
        assert!(!s.mark_seen("twitch-irc:1"));
        assert!(s.mark_seen("telegram:1"));
        assert_eq!(s.known_users(), 2);
    }

    #[test]
    fn test_idle_users_are_forgotten_by_sweep() {
        let s = BotState::new(
            "persona",
            2,
            CacheConfig::default(),
            RateLimitConfig {
                cooldown: Duration::from_secs(10),
                purge_multiplier: 3,
                ..Default::default()
            },
        );
        let t0 = Instant::now();
        s.mark_seen_at("old", t0);
        s.mark_seen_at("fresh", t0 + Duration::from_secs(20));

        let report = s.sweep_at(t0 + Duration::from_secs(31));
        assert_eq!(report.forgotten_users, 1);
        assert_eq!(s.known_users(), 1);
        // a forgotten user gets first-interaction treatment again
        assert!(s.mark_seen("old"));
        assert!(!s.mark_seen("fresh"));
    }

    #[test]
    fn test_cache_lookup_uses_folded_key_and_counts() {
        let s = state();
        assert_eq!(s.cached_reply("Hello"), None);
        s.store_reply("  HELLO ", "hi there");
        assert_eq!(s.cached_reply("hello"), Some("hi there".to_string()));

        let snap = s.metrics_snapshot();
        assert_eq!(snap.cache_hits, 1);
        assert_eq!(snap.cache_misses, 1);
        assert_eq!(snap.cache_hit_rate, 50.0);
        assert_eq!(snap.cache_size, 1);
    }

    #[test]
    fn test_scopes_do_not_share_cache_or_history() {
        let s = state();
        s.store_reply_in("7", "hello", "private answer");
        assert_eq!(s.cached_reply_in("-100", "hello"), None);
        assert_eq!(s.cached_reply("hello"), None);
        assert_eq!(s.cached_reply_in("7", "hello"), Some("private answer".to_string()));

        s.with_history_in("7", |h| h.append("secret", "ok"));
        assert_eq!(s.history_len_in("7"), 3);
        assert_eq!(s.history_len_in("-100"), 1);
        assert_eq!(s.history_len(), 1);
        let group = s.with_history_in("-100", |h| h.prompt_with("hi"));
        assert_eq!(group.len(), 2);
        assert_eq!(group[0].content(), "persona");
    }

    #[test]
    fn test_conversation_count_is_bounded() {
        let s = state().with_max_conversations(3);
        let tick = || std::thread::sleep(Duration::from_millis(2));
        s.with_history_in("a", |h| h.append("u", "a"));
        tick();
        s.with_history_in("b", |h| h.append("u", "b"));
        tick();
        s.with_history_in("a", |h| h.append("u2", "a2"));
        tick();
        s.with_history_in("c", |h| h.append("u", "c"));

        // "b" was least recently used; the global conversation is never dropped
        assert_eq!(s.conversation_count(), 3);
        assert_eq!(s.history_len_in("a"), 5);
        assert_eq!(s.history_len_in("b"), 1);
        assert_eq!(s.history_len_in("c"), 3);
    }

    #[test]
    fn test_clear_and_reset() {
        let s = state();
        s.store_reply("a", "1");
        s.with_history(|h| h.append("u", "a"));
        s.with_history_in("7", |h| h.append("u", "a"));
        assert_eq!(s.history_len(), 3);
        assert_eq!(s.metrics_snapshot().history_len, 6);

        assert_eq!(s.clear_cache(), 1);
        s.reset_history();
        let snap = s.metrics_snapshot();
        assert_eq!(snap.cache_size, 0);
        assert_eq!(snap.history_len, 1);
        assert_eq!(snap.conversations, 1);
        assert_eq!(snap.circuit_state, "CLOSED");
    }

    #[test]
    fn test_sweep_removes_expired_entries() {
        let s = state();
        s.store_reply("a", "1");
        let report = s.sweep_at(Instant::now() + Duration::from_secs(61));
        assert_eq!(report.expired_cache_entries, 1);
        assert_eq!(s.cache_len(), 0);
    }
}
