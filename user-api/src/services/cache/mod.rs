//! Key-value backend for response caching, counters, refresh tokens,
//! rate-limit windows and the audit log.
//!
//! [`CacheStore`] is the raw backend contract. [`Cache`] wraps an optional
//! store with a per-call timeout and degrades every failure: reads miss,
//! writes report `false`, rate-limit checks admit.

mod memory;
mod redis;

pub use memory::InMemoryCache;
pub use redis::RedisCache;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub const DAY_SECS: u64 = 24 * 60 * 60;

/// Outcome of a sliding-window admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    /// Unix epoch milliseconds at which the oldest counted request leaves the window.
    pub reset_time: i64,
    /// Milliseconds from now until `reset_time`.
    pub reset_after_ms: u64,
    /// Requests in the window before this one was recorded.
    pub current_count: u32,
}

impl RateLimitDecision {
    /// Decision computed from the pre-addition count.
    pub fn from_count(count: u32, limit: u32, now_ms: i64, oldest_ms: Option<i64>, window_ms: u64) -> Self {
        let allowed = count < limit;
        let reset_time = oldest_ms.unwrap_or(now_ms) + window_ms as i64;
        Self {
            allowed,
            remaining: if allowed { limit - count - 1 } else { 0 },
            reset_time,
            reset_after_ms: (reset_time - now_ms).max(0) as u64,
            current_count: count,
        }
    }

    fn open(limit: u32, window_ms: u64) -> Self {
        let now_ms = chrono::Utc::now().timestamp_millis();
        Self {
            allowed: true,
            remaining: limit.saturating_sub(1),
            reset_time: now_ms + window_ms as i64,
            reset_after_ms: window_ms,
            current_count: 0,
        }
    }

    /// Whole seconds until the window frees a slot, at least 1.
    pub fn retry_after_secs(&self) -> u64 {
        self.reset_after_ms.div_ceil(1000).max(1)
    }
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    /// `ttl_secs == 0` stores without expiry.
    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> anyhow::Result<()>;

    async fn delete(&self, key: &str) -> anyhow::Result<bool>;

    /// Delete every key matching a glob (`*`, `?`). Returns the number removed.
    async fn delete_pattern(&self, pattern: &str) -> anyhow::Result<u64>;

    async fn keys(&self, pattern: &str, limit: usize) -> anyhow::Result<Vec<String>>;

    /// Atomically add `amount` and re-stamp the expiry.
    async fn incr_by(&self, key: &str, amount: i64, ttl_secs: u64) -> anyhow::Result<i64>;

    /// Prepend to a list (newest first) and re-stamp the list expiry.
    async fn list_push(&self, key: &str, value: &str, ttl_secs: u64) -> anyhow::Result<()>;

    async fn list_range(&self, key: &str) -> anyhow::Result<Vec<String>>;

    async fn list_remove(&self, key: &str, value: &str) -> anyhow::Result<u64>;

    /// Prune, count, decide, then record the attempt, as one atomic unit.
    async fn sliding_window(
        &self,
        key: &str,
        limit: u32,
        window_ms: u64,
    ) -> anyhow::Result<RateLimitDecision>;

    /// Delete `key` only if it currently holds `expected`.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> anyhow::Result<bool>;

    async fn health_check(&self) -> anyhow::Result<()>;

    fn backend_name(&self) -> &'static str;
}

/// Fail-open façade over an optional [`CacheStore`].
#[derive(Clone)]
pub struct Cache {
    store: Option<Arc<dyn CacheStore>>,
    timeout: Duration,
}

impl Cache {
    pub fn new(store: Arc<dyn CacheStore>, timeout: Duration) -> Self {
        Self {
            store: Some(store),
            timeout,
        }
    }

    pub fn disabled() -> Self {
        Self {
            store: None,
            timeout: Duration::ZERO,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryCache::new()), Duration::from_millis(500))
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.as_ref().map_or("disabled", |s| s.backend_name())
    }

    async fn bounded<T>(
        &self,
        op: &'static str,
        key: &str,
        fut: impl Future<Output = anyhow::Result<T>>,
    ) -> Option<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                tracing::warn!(op, key, error = %e, "Cache operation failed");
                None
            }
            Err(_) => {
                tracing::warn!(
                    op,
                    key,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Cache operation timed out"
                );
                None
            }
        }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let store = self.store.as_ref()?;
        self.bounded("get", key, store.get(key)).await.flatten()
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, error = %e, "Discarding undecodable cache value");
                None
            }
        }
    }

    pub async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> bool {
        let Some(store) = self.store.as_ref() else {
            return false;
        };
        self.bounded("set", key, store.set(key, value, ttl_secs))
            .await
            .is_some()
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl_secs: u64) -> bool {
        match serde_json::to_string(value) {
            Ok(raw) => self.set(key, &raw, ttl_secs).await,
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to encode cache value");
                false
            }
        }
    }

    pub async fn delete(&self, key: &str) -> bool {
        let Some(store) = self.store.as_ref() else {
            return false;
        };
        self.bounded("delete", key, store.delete(key))
            .await
            .unwrap_or(false)
    }

    pub async fn delete_pattern(&self, pattern: &str) -> u64 {
        let Some(store) = self.store.as_ref() else {
            return 0;
        };
        self.bounded("delete_pattern", pattern, store.delete_pattern(pattern))
            .await
            .unwrap_or(0)
    }

    pub async fn keys(&self, pattern: &str, limit: usize) -> Vec<String> {
        let Some(store) = self.store.as_ref() else {
            return Vec::new();
        };
        self.bounded("keys", pattern, store.keys(pattern, limit))
            .await
            .unwrap_or_default()
    }

    pub async fn incr_by(&self, key: &str, amount: i64, ttl_secs: u64) -> Option<i64> {
        let store = self.store.as_ref()?;
        self.bounded("incr_by", key, store.incr_by(key, amount, ttl_secs))
            .await
    }

    /// Bump the per-day counter `metrics:{name}:{YYYY-MM-DD}`.
    pub async fn increment_counter(&self, name: &str, amount: i64) -> Option<i64> {
        self.incr_by(&counter_key(name, &today()), amount, DAY_SECS)
            .await
    }

    /// Read a per-day counter; missing or unreadable counts as zero.
    pub async fn counter(&self, name: &str, date: &str) -> i64 {
        self.get(&counter_key(name, date))
            .await
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    pub async fn list_push(&self, key: &str, value: &str, ttl_secs: u64) -> bool {
        let Some(store) = self.store.as_ref() else {
            return false;
        };
        self.bounded("list_push", key, store.list_push(key, value, ttl_secs))
            .await
            .is_some()
    }

    pub async fn list_range(&self, key: &str) -> Vec<String> {
        let Some(store) = self.store.as_ref() else {
            return Vec::new();
        };
        self.bounded("list_range", key, store.list_range(key))
            .await
            .unwrap_or_default()
    }

    pub async fn list_remove(&self, key: &str, value: &str) -> u64 {
        let Some(store) = self.store.as_ref() else {
            return 0;
        };
        self.bounded("list_remove", key, store.list_remove(key, value))
            .await
            .unwrap_or(0)
    }

    /// Sliding-window admission. Admits when the backend is unavailable.
    pub async fn sliding_window(&self, key: &str, limit: u32, window_ms: u64) -> RateLimitDecision {
        let Some(store) = self.store.as_ref() else {
            return RateLimitDecision::open(limit, window_ms);
        };
        self.bounded("sliding_window", key, store.sliding_window(key, limit, window_ms))
            .await
            .unwrap_or_else(|| RateLimitDecision::open(limit, window_ms))
    }

    /// Returns `false` when the value did not match or the backend is unavailable.
    pub async fn compare_and_delete(&self, key: &str, expected: &str) -> bool {
        let Some(store) = self.store.as_ref() else {
            return false;
        };
        self.bounded("compare_and_delete", key, store.compare_and_delete(key, expected))
            .await
            .unwrap_or(false)
    }

    pub async fn health_check(&self) -> bool {
        let Some(store) = self.store.as_ref() else {
            return false;
        };
        self.bounded("health_check", "", store.health_check())
            .await
            .is_some()
    }
}

pub fn today() -> String {
    chrono::Utc::now().format("%Y-%m-%d").to_string()
}

pub fn counter_key(name: &str, date: &str) -> String {
    format!("metrics:{}:{}", name, date)
}

/// Redis-style glob match supporting `*` and `?`.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }

    p[pi..].iter().all(|c| *c == '*')
}
