//! Per-day request counters kept in the cache backend.
//!
//! Process-local Prometheus metrics are recorded by
//! `service_core::middleware::metrics`; these counters are shared by every
//! instance using the same backend.

use chrono::{Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use super::cache::{today, Cache};

const KEY_SCAN_CAP: usize = 1000;
pub const MAX_DAILY_DAYS: u32 = 30;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSummary {
    pub date: String,
    pub total_requests: i64,
    pub total_errors: i64,
    pub error_rate: f64,
    pub average_response_time_ms: f64,
    pub cache_hits: i64,
    pub cache_misses: i64,
    pub cache_hit_rate: f64,
    pub rate_limited: i64,
    pub status_codes: BTreeMap<String, i64>,
    pub methods: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyMetrics {
    pub date: String,
    pub total_requests: i64,
    pub total_errors: i64,
    pub average_response_time_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EndpointMetrics {
    pub endpoint: String,
    pub count: i64,
}

fn ratio(part: i64, whole: i64) -> f64 {
    if whole <= 0 {
        0.0
    } else {
        (part as f64 / whole as f64 * 10_000.0).round() / 100.0
    }
}

fn average(total: i64, count: i64) -> f64 {
    if count <= 0 {
        0.0
    } else {
        (total as f64 / count as f64 * 100.0).round() / 100.0
    }
}

#[derive(Clone)]
pub struct MetricsService {
    cache: Cache,
}

impl MetricsService {
    pub fn new(cache: Cache) -> Self {
        Self { cache }
    }

    /// Count one finished request under today's counters.
    pub async fn record_request(&self, method: &str, endpoint: &str, status: u16, elapsed_ms: u64) {
        let mut counters = vec![
            ("requests_total".to_string(), 1),
            (format!("requests_method_{}", method), 1),
            (format!("status_{}", status), 1),
            ("response_time_ms_total".to_string(), elapsed_ms as i64),
            (format!("endpoint:{} {}", method, endpoint), 1),
        ];
        if status >= 400 {
            counters.push(("errors_total".to_string(), 1));
        }

        for (name, amount) in counters {
            self.cache.increment_counter(&name, amount).await;
        }
    }

    pub async fn record_cache_hit(&self, hit: bool) {
        let name = if hit { "cache_hits" } else { "cache_misses" };
        self.cache.increment_counter(name, 1).await;
    }

    pub async fn record_rate_limited(&self) {
        self.cache.increment_counter("rate_limited", 1).await;
    }

    /// Counters named `{prefix}{suffix}` for `date`, keyed by suffix.
    async fn counter_family(&self, prefix: &str, date: &str) -> BTreeMap<String, i64> {
        let key_prefix = format!("metrics:{}", prefix);
        let key_suffix = format!(":{}", date);
        let mut family = BTreeMap::new();

        for key in self
            .cache
            .keys(&format!("{}*{}", key_prefix, key_suffix), KEY_SCAN_CAP)
            .await
        {
            let Some(name) = key
                .strip_prefix(&key_prefix)
                .and_then(|rest| rest.strip_suffix(&key_suffix))
            else {
                continue;
            };
            let value = self
                .cache
                .get(&key)
                .await
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            family.insert(name.to_string(), value);
        }

        family
    }

    pub async fn summary(&self) -> MetricsSummary {
        let date = today();
        let total_requests = self.cache.counter("requests_total", &date).await;
        let total_errors = self.cache.counter("errors_total", &date).await;
        let response_time = self.cache.counter("response_time_ms_total", &date).await;
        let cache_hits = self.cache.counter("cache_hits", &date).await;
        let cache_misses = self.cache.counter("cache_misses", &date).await;

        MetricsSummary {
            total_requests,
            total_errors,
            error_rate: ratio(total_errors, total_requests),
            average_response_time_ms: average(response_time, total_requests),
            cache_hits,
            cache_misses,
            cache_hit_rate: ratio(cache_hits, cache_hits + cache_misses),
            rate_limited: self.cache.counter("rate_limited", &date).await,
            status_codes: self.counter_family("status_", &date).await,
            methods: self.counter_family("requests_method_", &date).await,
            date,
        }
    }

    /// Totals for the trailing `days` days, today first.
    pub async fn daily(&self, days: u32) -> Vec<DailyMetrics> {
        let days = days.clamp(1, MAX_DAILY_DAYS);
        let today = Utc::now().date_naive();
        let mut out = Vec::with_capacity(days as usize);

        for offset in 0..days {
            let date = (today - Duration::days(offset as i64))
                .format("%Y-%m-%d")
                .to_string();
            let total_requests = self.cache.counter("requests_total", &date).await;
            let response_time = self.cache.counter("response_time_ms_total", &date).await;
            out.push(DailyMetrics {
                total_errors: self.cache.counter("errors_total", &date).await,
                average_response_time_ms: average(response_time, total_requests),
                total_requests,
                date,
            });
        }

        out
    }

    /// Today's per-endpoint request counts, busiest first.
    pub async fn endpoints(&self) -> Vec<EndpointMetrics> {
        let mut endpoints: Vec<EndpointMetrics> = self
            .counter_family("endpoint:", &today())
            .await
            .into_iter()
            .map(|(endpoint, count)| EndpointMetrics { endpoint, count })
            .collect();
        endpoints.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.endpoint.cmp(&b.endpoint)));
        endpoints
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_summary_aggregates_today() {
        let metrics = MetricsService::new(Cache::in_memory());
        metrics.record_request("GET", "/api/users", 200, 10).await;
        metrics.record_request("GET", "/api/users/:id", 404, 30).await;
        metrics.record_request("POST", "/api/auth/login", 200, 20).await;
        metrics.record_cache_hit(true).await;
        metrics.record_cache_hit(false).await;
        metrics.record_cache_hit(false).await;
        metrics.record_cache_hit(true).await;

        let summary = metrics.summary().await;
        assert_eq!(summary.total_requests, 3);
        assert_eq!(summary.total_errors, 1);
        assert_eq!(summary.error_rate, 33.33);
        assert_eq!(summary.average_response_time_ms, 20.0);
        assert_eq!(summary.cache_hit_rate, 50.0);
        assert_eq!(summary.status_codes.get("200"), Some(&2));
        assert_eq!(summary.methods.get("GET"), Some(&2));
    }

    #[tokio::test]
    async fn test_endpoints_sorted_by_count() {
        let metrics = MetricsService::new(Cache::in_memory());
        metrics.record_request("GET", "/api/users/:id", 200, 1).await;
        metrics.record_request("GET", "/api/users/:id", 200, 1).await;
        metrics.record_request("GET", "/api/users", 200, 1).await;

        let endpoints = metrics.endpoints().await;
        assert_eq!(endpoints[0].endpoint, "GET /api/users/:id");
        assert_eq!(endpoints[0].count, 2);
        assert_eq!(endpoints.len(), 2);
    }

    #[tokio::test]
    async fn test_daily_window() {
        let metrics = MetricsService::new(Cache::in_memory());
        metrics.record_request("GET", "/health", 200, 4).await;

        let days = metrics.daily(100).await;
        assert_eq!(days.len(), MAX_DAILY_DAYS as usize);
        assert_eq!(days[0].total_requests, 1);
        assert_eq!(days[1].total_requests, 0);
    }
}
