use chrono::{DateTime, Utc};
use serde::Deserialize;
use validator::Validate;

use crate::models::{AuditAction, AuditFilters, Severity};

/// Query string shared by the audit listing and export endpoints.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AuditQuery {
    pub user_id: Option<u64>,
    pub action: Option<AuditAction>,
    pub severity: Option<Severity>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub success: Option<bool>,
    #[validate(range(min = 1, max = 10000, message = "Limit must be between 1 and 10000"))]
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub format: Option<String>,
}

impl AuditQuery {
    pub fn filters(&self) -> AuditFilters {
        AuditFilters {
            user_id: self.user_id,
            action: self.action,
            severity: self.severity,
            start_date: self.start_date,
            end_date: self.end_date,
            success: self.success,
            limit: self.limit,
            offset: self.offset,
        }
    }
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct DaysQuery {
    #[validate(range(min = 1, message = "Days must be at least 1"))]
    pub days: Option<u32>,
}
