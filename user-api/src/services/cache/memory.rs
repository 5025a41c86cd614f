use async_trait::async_trait;
use dashmap::{mapref::entry::Entry as MapEntry, DashMap};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

use super::{glob_match, CacheStore, RateLimitDecision};

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    List(VecDeque<String>),
    /// Request timestamps in epoch milliseconds, oldest first.
    Window(VecDeque<i64>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value, ttl_secs: u64) -> Self {
        let mut entry = Self {
            value,
            expires_at: None,
        };
        entry.expire_in(Duration::from_secs(ttl_secs));
        entry
    }

    fn expire_in(&mut self, ttl: Duration) {
        self.expires_at = (!ttl.is_zero()).then(|| Instant::now() + ttl);
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-process backend used when Redis is not configured.
///
/// Each key is guarded by its DashMap shard lock, so every operation on a
/// single key is atomic. Expiry is checked lazily on access against the
/// tokio clock.
pub struct InMemoryCache {
    entries: DashMap<String, Entry>,
    origin: Instant,
    origin_ms: i64,
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            origin: Instant::now(),
            origin_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Wall-clock milliseconds derived from the tokio clock.
    fn now_ms(&self) -> i64 {
        self.origin_ms + self.origin.elapsed().as_millis() as i64
    }

    /// Drop `key` if it has expired.
    fn evict_expired(&self, key: &str) {
        let now = Instant::now();
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
    }

    /// Live entry for mutation, created with `init` when absent or expired.
    fn live_entry(
        &self,
        key: &str,
        init: impl FnOnce() -> Entry,
    ) -> dashmap::mapref::one::RefMut<'_, String, Entry> {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(init());
                }
                occupied.into_ref()
            }
            MapEntry::Vacant(vacant) => vacant.insert(init()),
        }
    }

    fn matching_keys(&self, pattern: &str) -> Vec<String> {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|e| !e.value().is_expired(now) && glob_match(pattern, e.key()))
            .map(|e| e.key().clone())
            .collect()
    }
}

fn wrong_type(key: &str) -> anyhow::Error {
    anyhow::anyhow!("WRONGTYPE operation against key '{}' holding the wrong kind of value", key)
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        self.evict_expired(key);
        match self.entries.get(key) {
            Some(entry) => match &entry.value {
                Value::Text(text) => Ok(Some(text.clone())),
                _ => Err(wrong_type(key)),
            },
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> anyhow::Result<()> {
        self.entries
            .insert(key.to_string(), Entry::new(Value::Text(value.to_string()), ttl_secs));
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<bool> {
        self.evict_expired(key);
        Ok(self.entries.remove(key).is_some())
    }

    async fn delete_pattern(&self, pattern: &str) -> anyhow::Result<u64> {
        let mut removed = 0;
        for key in self.matching_keys(pattern) {
            if self.entries.remove(&key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn keys(&self, pattern: &str, limit: usize) -> anyhow::Result<Vec<String>> {
        let mut keys = self.matching_keys(pattern);
        keys.truncate(limit);
        Ok(keys)
    }

    async fn incr_by(&self, key: &str, amount: i64, ttl_secs: u64) -> anyhow::Result<i64> {
        let mut entry = self.live_entry(key, || Entry::new(Value::Text("0".to_string()), 0));
        let current: i64 = match &entry.value {
            Value::Text(text) => text
                .parse()
                .map_err(|_| anyhow::anyhow!("Value at '{}' is not an integer", key))?,
            _ => return Err(wrong_type(key)),
        };
        let next = current + amount;
        entry.value = Value::Text(next.to_string());
        entry.expire_in(Duration::from_secs(ttl_secs));
        Ok(next)
    }

    async fn list_push(&self, key: &str, value: &str, ttl_secs: u64) -> anyhow::Result<()> {
        let mut entry = self.live_entry(key, || Entry::new(Value::List(VecDeque::new()), 0));
        match &mut entry.value {
            Value::List(list) => list.push_front(value.to_string()),
            _ => return Err(wrong_type(key)),
        }
        entry.expire_in(Duration::from_secs(ttl_secs));
        Ok(())
    }

    async fn list_range(&self, key: &str) -> anyhow::Result<Vec<String>> {
        self.evict_expired(key);
        match self.entries.get(key) {
            Some(entry) => match &entry.value {
                Value::List(list) => Ok(list.iter().cloned().collect()),
                _ => Err(wrong_type(key)),
            },
            None => Ok(Vec::new()),
        }
    }

    async fn list_remove(&self, key: &str, value: &str) -> anyhow::Result<u64> {
        self.evict_expired(key);
        let Some(mut entry) = self.entries.get_mut(key) else {
            return Ok(0);
        };
        let removed = match &mut entry.value {
            Value::List(list) => {
                let before = list.len();
                list.retain(|v| v != value);
                (before - list.len()) as u64
            }
            _ => return Err(wrong_type(key)),
        };
        let now_empty = matches!(&entry.value, Value::List(list) if list.is_empty());
        drop(entry);
        if now_empty {
            self.entries.remove(key);
        }
        Ok(removed)
    }

    async fn sliding_window(
        &self,
        key: &str,
        limit: u32,
        window_ms: u64,
    ) -> anyhow::Result<RateLimitDecision> {
        let now_ms = self.now_ms();
        let cutoff = now_ms - window_ms as i64;

        let mut entry = self.live_entry(key, || Entry::new(Value::Window(VecDeque::new()), 0));
        let Value::Window(stamps) = &mut entry.value else {
            return Err(wrong_type(key));
        };

        while stamps.front().is_some_and(|&t| t <= cutoff) {
            stamps.pop_front();
        }
        let count = stamps.len() as u32;
        stamps.push_back(now_ms);
        let oldest = stamps.front().copied();
        entry.expire_in(Duration::from_millis(window_ms));

        Ok(RateLimitDecision::from_count(count, limit, now_ms, oldest, window_ms))
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> anyhow::Result<bool> {
        let now = Instant::now();
        let removed = self.entries.remove_if(key, |_, entry| {
            !entry.is_expired(now) && matches!(&entry.value, Value::Text(v) if v == expected)
        });
        Ok(removed.is_some())
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_set_get_expires() {
        let cache = InMemoryCache::new();
        cache.set("k", "v", 2).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_replaces() {
        let cache = InMemoryCache::new();
        cache.set("k", "v1", 60).await.unwrap();
        cache.set("k", "v2", 60).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_incr_by() {
        let cache = InMemoryCache::new();
        assert_eq!(cache.incr_by("c", 1, 60).await.unwrap(), 1);
        assert_eq!(cache.incr_by("c", 5, 60).await.unwrap(), 6);
        assert_eq!(cache.get("c").await.unwrap().as_deref(), Some("6"));
    }

    #[tokio::test]
    async fn test_list_newest_first_and_remove() {
        let cache = InMemoryCache::new();
        cache.list_push("l", "a", 60).await.unwrap();
        cache.list_push("l", "b", 60).await.unwrap();
        cache.list_push("l", "a", 60).await.unwrap();
        assert_eq!(cache.list_range("l").await.unwrap(), vec!["a", "b", "a"]);

        assert_eq!(cache.list_remove("l", "a").await.unwrap(), 2);
        assert_eq!(cache.list_range("l").await.unwrap(), vec!["b"]);
        assert!(cache.get("l").await.is_err());
    }

    #[tokio::test]
    async fn test_delete_pattern_and_keys() {
        let cache = InMemoryCache::new();
        cache.set("cache:users:list:v1:a", "1", 60).await.unwrap();
        cache.set("cache:users:list:v2:b", "1", 60).await.unwrap();
        cache.set("cache:users:item:v1:1", "1", 60).await.unwrap();

        assert_eq!(cache.keys("cache:users:*", 10).await.unwrap().len(), 3);
        assert_eq!(cache.keys("cache:users:*", 1).await.unwrap().len(), 1);
        assert_eq!(cache.delete_pattern("cache:users:list:*").await.unwrap(), 2);
        assert_eq!(cache.keys("cache:*", 10).await.unwrap(), vec!["cache:users:item:v1:1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sliding_window_count_then_add() {
        let cache = InMemoryCache::new();

        for expected_remaining in [2, 1, 0] {
            let d = cache.sliding_window("rl", 3, 1_000).await.unwrap();
            assert!(d.allowed);
            assert_eq!(d.remaining, expected_remaining);
        }

        let denied = cache.sliding_window("rl", 3, 1_000).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.current_count, 3);
        assert_eq!(denied.remaining, 0);

        tokio::time::advance(Duration::from_millis(1_001)).await;
        let d = cache.sliding_window("rl", 3, 1_000).await.unwrap();
        assert!(d.allowed);
        assert_eq!(d.current_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sliding_window_denied_attempts_are_recorded() {
        let cache = InMemoryCache::new();
        assert!(cache.sliding_window("rl", 1, 1_000).await.unwrap().allowed);

        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(!cache.sliding_window("rl", 1, 1_000).await.unwrap().allowed);

        // The first request has aged out but the denied one is still counted.
        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(!cache.sliding_window("rl", 1, 1_000).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_compare_and_delete() {
        let cache = InMemoryCache::new();
        cache.set("refresh_token:1", "abc", 60).await.unwrap();

        assert!(!cache.compare_and_delete("refresh_token:1", "xyz").await.unwrap());
        assert!(cache.compare_and_delete("refresh_token:1", "abc").await.unwrap());
        assert!(!cache.compare_and_delete("refresh_token:1", "abc").await.unwrap());
    }

    #[tokio::test]
    async fn test_wrong_type_errors() {
        let cache = InMemoryCache::new();
        cache.set("k", "v", 0).await.unwrap();
        assert!(cache.list_push("k", "x", 0).await.is_err());
        assert!(cache.incr_by("k", 1, 0).await.is_err());
    }
}
