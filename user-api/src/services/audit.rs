//! Audit log kept in the cache backend.
//!
//! Entries live under `audit:entry:{id}` with a TTL from their severity.
//! `audit:user:{id}` and `audit:action:{action}` list entry ids newest first;
//! each push re-stamps the list with the newest entry's TTL, so a list can
//! outlive older members or drop them early. Readers skip ids whose entry is
//! gone and `cleanup` prunes them.

use chrono::{Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use super::cache::Cache;
use crate::models::{AuditAction, AuditEntry, AuditEvent, AuditFilters, Severity};

const ENTRY_PREFIX: &str = "audit:entry:";
const SCAN_CAP: usize = 1000;
const CLEANUP_INDEX_CAP: usize = 10_000;
const STATS_TTL_SECS: u64 = 91 * 24 * 60 * 60;

pub const DEFAULT_QUERY_LIMIT: usize = 50;
pub const MAX_QUERY_LIMIT: usize = 1000;
pub const DEFAULT_EXPORT_LIMIT: usize = 1000;
pub const MAX_EXPORT_LIMIT: usize = 10_000;
pub const MAX_STATS_DAYS: u32 = 90;

const CSV_HEADER: &str = "ID,Timestamp,User ID,User Email,User Type,Action,Resource,Resource ID,Severity,Success,IP Address,User Agent";

fn entry_key(id: &str) -> String {
    format!("{}{}", ENTRY_PREFIX, id)
}

fn user_index_key(user_id: u64) -> String {
    format!("audit:user:{}", user_id)
}

fn action_index_key(action: AuditAction) -> String {
    format!("audit:action:{}", action.as_str())
}

fn stats_key(date: &str, name: &str) -> String {
    format!("audit:stats:{}:{}", date, name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            _ => Err(format!("Unsupported export format: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditPage {
    pub entries: Vec<AuditEntry>,
    pub total: usize,
    /// Limit and offset actually applied, after clamping.
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditCounts {
    pub total: i64,
    pub failed: i64,
    pub by_severity: BTreeMap<&'static str, i64>,
    pub by_action: BTreeMap<&'static str, i64>,
}

impl AuditCounts {
    fn absorb(&mut self, other: &AuditCounts) {
        self.total += other.total;
        self.failed += other.failed;
        for (k, v) in &other.by_severity {
            *self.by_severity.entry(*k).or_default() += v;
        }
        for (k, v) in &other.by_action {
            *self.by_action.entry(*k).or_default() += v;
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyAuditStats {
    pub date: String,
    #[serde(flatten)]
    pub counts: AuditCounts,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditStats {
    pub period_days: u32,
    pub totals: AuditCounts,
    pub daily: Vec<DailyAuditStats>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditCleanupReport {
    pub indexes_scanned: usize,
    pub stale_ids_removed: u64,
}

#[derive(Clone)]
pub struct AuditLog {
    cache: Cache,
}

impl AuditLog {
    pub fn new(cache: Cache) -> Self {
        Self { cache }
    }

    /// Persist an audit event. Storage is best effort: the entry is returned
    /// even when the backend could not keep it.
    pub async fn record(&self, event: AuditEvent) -> AuditEntry {
        let entry = AuditEntry {
            id: uuid::Uuid::now_v7().to_string(),
            timestamp: Utc::now(),
            user_id: event.context.user_id,
            user_email: event.context.user_email,
            user_type: event.context.user_type,
            action: event.action,
            resource: event.resource,
            resource_id: event.resource_id,
            severity: event.severity,
            success: event.success,
            ip_address: event.context.ip_address,
            user_agent: event.context.user_agent,
            details: event.details,
        };
        let ttl = entry.severity.retention_secs();

        if !self.cache.set_json(&entry_key(&entry.id), &entry, ttl).await {
            tracing::warn!(audit_id = %entry.id, action = %entry.action, "Audit entry not persisted");
        }
        if let Some(user_id) = entry.user_id {
            self.cache
                .list_push(&user_index_key(user_id), &entry.id, ttl)
                .await;
        }
        self.cache
            .list_push(&action_index_key(entry.action), &entry.id, ttl)
            .await;

        let date = entry.timestamp.format("%Y-%m-%d").to_string();
        let mut counters = vec![
            stats_key(&date, "total"),
            stats_key(&date, &format!("severity:{}", entry.severity.as_str())),
            stats_key(&date, &format!("action:{}", entry.action.as_str())),
        ];
        if !entry.success {
            counters.push(stats_key(&date, "failed"));
        }
        for key in counters {
            self.cache.incr_by(&key, 1, STATS_TTL_SECS).await;
        }

        tracing::info!(
            audit_id = %entry.id,
            action = %entry.action,
            severity = entry.severity.as_str(),
            success = entry.success,
            user_id = entry.user_id,
            "Audit event recorded"
        );

        entry
    }

    async fn candidate_ids(&self, filters: &AuditFilters) -> Vec<String> {
        if let Some(user_id) = filters.user_id {
            return self.cache.list_range(&user_index_key(user_id)).await;
        }
        if let Some(action) = filters.action {
            return self.cache.list_range(&action_index_key(action)).await;
        }
        self.cache
            .keys(&format!("{}*", ENTRY_PREFIX), SCAN_CAP)
            .await
            .into_iter()
            .filter_map(|key| key.strip_prefix(ENTRY_PREFIX).map(str::to_string))
            .collect()
    }

    async fn search(&self, filters: &AuditFilters, default_limit: usize, max_limit: usize) -> AuditPage {
        let mut entries = Vec::new();
        for id in self.candidate_ids(filters).await {
            if let Some(entry) = self.cache.get_json::<AuditEntry>(&entry_key(&id)).await {
                if filters.matches(&entry) {
                    entries.push(entry);
                }
            }
        }

        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
        entries.dedup_by(|a, b| a.id == b.id);

        let total = entries.len();
        let limit = filters.limit.unwrap_or(default_limit).clamp(1, max_limit);
        let offset = filters.offset.unwrap_or(0);
        let entries = entries.into_iter().skip(offset).take(limit).collect();

        AuditPage {
            entries,
            total,
            limit,
            offset,
        }
    }

    pub async fn query(&self, filters: &AuditFilters) -> AuditPage {
        self.search(filters, DEFAULT_QUERY_LIMIT, MAX_QUERY_LIMIT).await
    }

    /// Per-day counters for the trailing `days` days, today first.
    pub async fn stats(&self, days: u32) -> AuditStats {
        let days = days.clamp(1, MAX_STATS_DAYS);
        let today = Utc::now().date_naive();
        let mut totals = AuditCounts::default();
        let mut daily = Vec::with_capacity(days as usize);

        for offset in 0..days {
            let date = (today - Duration::days(offset as i64)).format("%Y-%m-%d").to_string();
            let counts = self.day_counts(&date).await;
            totals.absorb(&counts);
            daily.push(DailyAuditStats { date, counts });
        }

        AuditStats {
            period_days: days,
            totals,
            daily,
        }
    }

    async fn day_counts(&self, date: &str) -> AuditCounts {
        let mut counts = AuditCounts {
            total: self.read_counter(&stats_key(date, "total")).await,
            failed: self.read_counter(&stats_key(date, "failed")).await,
            ..Default::default()
        };

        if counts.total == 0 {
            return counts;
        }

        for severity in Severity::ALL {
            let n = self
                .read_counter(&stats_key(date, &format!("severity:{}", severity.as_str())))
                .await;
            if n > 0 {
                counts.by_severity.insert(severity.as_str(), n);
            }
        }
        for action in AuditAction::ALL {
            let n = self
                .read_counter(&stats_key(date, &format!("action:{}", action.as_str())))
                .await;
            if n > 0 {
                counts.by_action.insert(action.as_str(), n);
            }
        }

        counts
    }

    async fn read_counter(&self, key: &str) -> i64 {
        self.cache
            .get(key)
            .await
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    /// Render matching entries as JSON or CSV.
    pub async fn export(&self, filters: &AuditFilters, format: ExportFormat) -> anyhow::Result<String> {
        let page = self
            .search(filters, DEFAULT_EXPORT_LIMIT, MAX_EXPORT_LIMIT)
            .await;

        match format {
            ExportFormat::Json => Ok(serde_json::to_string_pretty(&page.entries)?),
            ExportFormat::Csv => Ok(to_csv(&page.entries)),
        }
    }

    /// Prune index ids whose entries have expired.
    pub async fn cleanup(&self) -> AuditCleanupReport {
        let mut report = AuditCleanupReport::default();
        let mut indexes = self.cache.keys("audit:user:*", CLEANUP_INDEX_CAP).await;
        indexes.extend(self.cache.keys("audit:action:*", CLEANUP_INDEX_CAP).await);

        for index in indexes {
            report.indexes_scanned += 1;
            for id in self.cache.list_range(&index).await {
                if self.cache.get(&entry_key(&id)).await.is_none() {
                    report.stale_ids_removed += self.cache.list_remove(&index, &id).await;
                }
            }
        }

        tracing::info!(
            indexes_scanned = report.indexes_scanned,
            stale_ids_removed = report.stale_ids_removed,
            "Audit index cleanup finished"
        );
        report
    }
}

fn csv_field(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

fn to_csv(entries: &[AuditEntry]) -> String {
    let mut out = String::from(CSV_HEADER);
    out.push('\n');

    for e in entries {
        let fields = [
            e.id.clone(),
            e.timestamp.to_rfc3339(),
            e.user_id.map(|id| id.to_string()).unwrap_or_default(),
            e.user_email.clone().unwrap_or_default(),
            e.user_type.clone().unwrap_or_default(),
            e.action.as_str().to_string(),
            e.resource.clone().unwrap_or_default(),
            e.resource_id.clone().unwrap_or_default(),
            e.severity.as_str().to_string(),
            e.success.to_string(),
            e.ip_address.clone().unwrap_or_default(),
            e.user_agent.clone().unwrap_or_default(),
        ];
        let row: Vec<String> = fields.iter().map(|f| csv_field(f)).collect();
        out.push_str(&row.join(","));
        out.push('\n');
    }

    out
}
