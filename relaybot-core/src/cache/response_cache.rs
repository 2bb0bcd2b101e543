// File: src/cache/response_cache.rs

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

/// Case-folds, trims and caps a prompt to its first `max_chars` characters.
///
/// Prompts that differ only in case, surrounding whitespace, or past the
/// cutoff share a slot.
pub fn normalize_key(prompt: &str, max_chars: usize) -> String {
    prompt.trim().to_lowercase().chars().take(max_chars).collect()
}

/// Single cached reply
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: String,
    pub inserted_at: Instant,
    seq: u64,
}

/// Bounded prompt → reply store with TTL expiry and insertion-order eviction.
///
/// Eviction is FIFO on insertion, reads never change an entry's position.
/// Expired entries are dropped lazily on `get` and by `purge_expired`.
pub struct ResponseCache {
    entries: HashMap<String, CacheEntry>,
    /// insertion sequence → key, oldest first
    order: BTreeMap<u64, String>,
    next_seq: u64,
    ttl: Duration,
    max_entries: usize,
}

impl ResponseCache {
    /// `max_entries` is clamped to at least 1.
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_seq: 0,
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    pub fn get(&mut self, key: &str) -> Option<String> {
        self.get_at(key, Instant::now())
    }

    pub fn get_at(&mut self, key: &str, now: Instant) -> Option<String> {
        let expired = self
            .entries
            .get(key)
            .map(|e| now.saturating_duration_since(e.inserted_at) >= self.ttl)?;

        if expired {
            trace!("Cache entry expired on read: {:?}", key);
            self.remove(key);
            return None;
        }
        self.entries.get(key).map(|e| e.value.clone())
    }

    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.put_at(key, value, Instant::now());
    }

    /// Stores `value`; an existing key is re-inserted as the newest entry.
    pub fn put_at(&mut self, key: impl Into<String>, value: impl Into<String>, now: Instant) {
        let key = key.into();
        self.remove(&key);

        while self.entries.len() >= self.max_entries {
            self.evict_oldest();
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, key.clone());
        self.entries.insert(key, CacheEntry {
            value: value.into(),
            inserted_at: now,
            seq,
        });
    }

    /// Drops every entry older than the TTL; returns how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    pub fn purge_expired_at(&mut self, now: Instant) -> usize {
        let ttl = self.ttl;
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| now.saturating_duration_since(e.inserted_at) >= ttl)
            .map(|(k, _)| k.clone())
            .collect();

        for key in &stale {
            self.remove(key);
        }
        if !stale.is_empty() {
            debug!("Purged {} expired cache entries", stale.len());
        }
        stale.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Keys from oldest to newest insertion.
    pub fn keys(&self) -> Vec<String> {
        self.order.values().cloned().collect()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    fn remove(&mut self, key: &str) {
        if let Some(entry) = self.entries.remove(key) {
            self.order.remove(&entry.seq);
        }
    }

    fn evict_oldest(&mut self) {
        if let Some((_, key)) = self.order.pop_first() {
            trace!("Cache full, evicting oldest entry {:?}", key);
            self.entries.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(300);

    #[test]
    fn test_fifo_eviction_keeps_newest() {
        let mut cache = ResponseCache::new(TTL, 2);
        let now = Instant::now();
        cache.put_at("a", "1", now);
        cache.put_at("b", "2", now);
        cache.put_at("c", "3", now);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.keys(), vec!["b".to_string(), "c".to_string()]);
        assert_eq!(cache.get_at("a", now), None);
        assert_eq!(cache.get_at("c", now), Some("3".to_string()));
    }

    #[test]
    fn test_reads_do_not_refresh_position() {
        let mut cache = ResponseCache::new(TTL, 2);
        let now = Instant::now();
        cache.put_at("a", "1", now);
        cache.put_at("b", "2", now);
        // an LRU would keep "a" after this read
        assert!(cache.get_at("a", now).is_some());
        cache.put_at("c", "3", now);
        assert!(!cache.contains_key("a"));
        assert!(cache.contains_key("b"));
    }

    #[test]
    fn test_bound_holds_for_long_sequences() {
        let mut cache = ResponseCache::new(TTL, 5);
        let now = Instant::now();
        for i in 0..100 {
            cache.put_at(format!("k{i}"), "v", now);
            assert!(cache.len() <= 5);
        }
        let expected: Vec<String> = (95..100).map(|i| format!("k{i}")).collect();
        assert_eq!(cache.keys(), expected);
    }

    #[test]
    fn test_expired_entry_is_absent_and_removed() {
        let mut cache = ResponseCache::new(Duration::from_millis(100), 10);
        let t0 = Instant::now();
        cache.put_at("k", "v", t0);

        assert_eq!(cache.get_at("k", t0 + Duration::from_millis(99)), Some("v".to_string()));
        assert_eq!(cache.get_at("k", t0 + Duration::from_millis(100)), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_reinsert_moves_key_to_newest() {
        let mut cache = ResponseCache::new(TTL, 2);
        let now = Instant::now();
        cache.put_at("a", "1", now);
        cache.put_at("b", "2", now);
        cache.put_at("a", "1b", now);
        cache.put_at("c", "3", now);

        assert_eq!(cache.keys(), vec!["a".to_string(), "c".to_string()]);
        assert_eq!(cache.get_at("a", now), Some("1b".to_string()));
    }

    #[test]
    fn test_purge_expired() {
        let mut cache = ResponseCache::new(Duration::from_secs(10), 10);
        let t0 = Instant::now();
        cache.put_at("old", "v", t0);
        cache.put_at("new", "v", t0 + Duration::from_secs(8));

        assert_eq!(cache.purge_expired_at(t0 + Duration::from_secs(12)), 1);
        assert_eq!(cache.keys(), vec!["new".to_string()]);
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("  Hello World  ", 100), "hello world");
        assert_eq!(normalize_key("ABCDEFG", 3), "abc");
        assert_eq!(normalize_key("ÉCOLE", 2), "éc");
    }
}
