use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client, Script};

use super::{CacheStore, RateLimitDecision};

const COMPARE_AND_DELETE: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

const SCAN_BATCH: usize = 200;

#[derive(Clone)]
pub struct RedisCache {
    manager: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self, anyhow::Error> {
        tracing::info!("Connecting to Redis");
        let client = Client::open(url)?;

        // ConnectionManager reconnects on its own after the first connection.
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self { manager })
    }

    async fn scan(&self, pattern: &str, limit: usize) -> Result<Vec<String>, anyhow::Error> {
        let mut conn = self.manager.clone();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to scan keys: {}", e))?;

            keys.extend(batch);
            if next == 0 || keys.len() >= limit {
                break;
            }
            cursor = next;
        }

        keys.truncate(limit);
        Ok(keys)
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to get cache: {}", e))
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> anyhow::Result<()> {
        let mut conn = self.manager.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if ttl_secs > 0 {
            cmd.arg("EX").arg(ttl_secs);
        }
        cmd.query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to set cache: {}", e))
    }

    async fn delete(&self, key: &str) -> anyhow::Result<bool> {
        let mut conn = self.manager.clone();
        let removed: u64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to delete key: {}", e))?;
        Ok(removed > 0)
    }

    async fn delete_pattern(&self, pattern: &str) -> anyhow::Result<u64> {
        let keys = self.scan(pattern, usize::MAX).await?;
        let mut conn = self.manager.clone();
        let mut removed = 0;

        for chunk in keys.chunks(SCAN_BATCH) {
            let n: u64 = redis::cmd("DEL")
                .arg(chunk)
                .query_async(&mut conn)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to delete keys: {}", e))?;
            removed += n;
        }

        Ok(removed)
    }

    async fn keys(&self, pattern: &str, limit: usize) -> anyhow::Result<Vec<String>> {
        self.scan(pattern, limit).await
    }

    async fn incr_by(&self, key: &str, amount: i64, ttl_secs: u64) -> anyhow::Result<i64> {
        let mut conn = self.manager.clone();
        let mut pipe = redis::pipe();
        pipe.atomic().cmd("INCRBY").arg(key).arg(amount);
        if ttl_secs > 0 {
            pipe.cmd("EXPIRE").arg(key).arg(ttl_secs).ignore();
        }
        let (value,): (i64,) = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to increment counter: {}", e))?;
        Ok(value)
    }

    async fn list_push(&self, key: &str, value: &str, ttl_secs: u64) -> anyhow::Result<()> {
        let mut conn = self.manager.clone();
        let mut pipe = redis::pipe();
        pipe.atomic().cmd("LPUSH").arg(key).arg(value).ignore();
        if ttl_secs > 0 {
            pipe.cmd("EXPIRE").arg(key).arg(ttl_secs).ignore();
        }
        pipe.query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to push to list: {}", e))
    }

    async fn list_range(&self, key: &str) -> anyhow::Result<Vec<String>> {
        let mut conn = self.manager.clone();
        redis::cmd("LRANGE")
            .arg(key)
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read list: {}", e))
    }

    async fn list_remove(&self, key: &str, value: &str) -> anyhow::Result<u64> {
        let mut conn = self.manager.clone();
        redis::cmd("LREM")
            .arg(key)
            .arg(0)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to remove from list: {}", e))
    }

    async fn sliding_window(
        &self,
        key: &str,
        limit: u32,
        window_ms: u64,
    ) -> anyhow::Result<RateLimitDecision> {
        let mut conn = self.manager.clone();
        let now_ms = chrono::Utc::now().timestamp_millis();
        let cutoff = now_ms - window_ms as i64;
        let member = format!("{}-{}", now_ms, uuid::Uuid::new_v4());

        let (count, oldest): (u32, Vec<(String, i64)>) = redis::pipe()
            .atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(cutoff)
            .ignore()
            .cmd("ZCARD")
            .arg(key)
            .cmd("ZADD")
            .arg(key)
            .arg(now_ms)
            .arg(&member)
            .ignore()
            .cmd("PEXPIRE")
            .arg(key)
            .arg(window_ms)
            .ignore()
            .cmd("ZRANGE")
            .arg(key)
            .arg(0)
            .arg(0)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to evaluate rate limit window: {}", e))?;

        let oldest_ms = oldest.first().map(|(_, score)| *score);
        Ok(RateLimitDecision::from_count(
            count, limit, now_ms, oldest_ms, window_ms,
        ))
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> anyhow::Result<bool> {
        let mut conn = self.manager.clone();
        let removed: i64 = Script::new(COMPARE_AND_DELETE)
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to compare-and-delete: {}", e))?;
        Ok(removed == 1)
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
