//! Audit entry model - security and compliance logging.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Audit severity; drives retention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn retention_days(&self) -> u64 {
        match self {
            Severity::Low => 30,
            Severity::Medium => 90,
            Severity::High => 365,
            Severity::Critical => 1825,
        }
    }

    pub fn retention_secs(&self) -> u64 {
        self.retention_days() * 24 * 60 * 60
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Severity::ALL
            .into_iter()
            .find(|sev| sev.as_str() == s)
            .ok_or_else(|| format!("Invalid severity: {}", s))
    }
}

/// Audited actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Login,
    LoginFailed,
    Logout,
    TokenRefresh,
    TokenRefreshFailed,
    UserCreated,
    UserUpdated,
    UserDeleted,
    AdminDeleteAttempt,
    UnauthorizedAccess,
    RateLimitExceeded,
    AuditExported,
    AuditCleanup,
    SessionCleanup,
}

impl AuditAction {
    pub const ALL: [AuditAction; 14] = [
        AuditAction::Login,
        AuditAction::LoginFailed,
        AuditAction::Logout,
        AuditAction::TokenRefresh,
        AuditAction::TokenRefreshFailed,
        AuditAction::UserCreated,
        AuditAction::UserUpdated,
        AuditAction::UserDeleted,
        AuditAction::AdminDeleteAttempt,
        AuditAction::UnauthorizedAccess,
        AuditAction::RateLimitExceeded,
        AuditAction::AuditExported,
        AuditAction::AuditCleanup,
        AuditAction::SessionCleanup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Login => "login",
            AuditAction::LoginFailed => "login_failed",
            AuditAction::Logout => "logout",
            AuditAction::TokenRefresh => "token_refresh",
            AuditAction::TokenRefreshFailed => "token_refresh_failed",
            AuditAction::UserCreated => "user_created",
            AuditAction::UserUpdated => "user_updated",
            AuditAction::UserDeleted => "user_deleted",
            AuditAction::AdminDeleteAttempt => "admin_delete_attempt",
            AuditAction::UnauthorizedAccess => "unauthorized_access",
            AuditAction::RateLimitExceeded => "rate_limit_exceeded",
            AuditAction::AuditExported => "audit_exported",
            AuditAction::AuditCleanup => "audit_cleanup",
            AuditAction::SessionCleanup => "session_cleanup",
        }
    }

    pub fn default_severity(&self) -> Severity {
        match self {
            AuditAction::Login
            | AuditAction::Logout
            | AuditAction::TokenRefresh
            | AuditAction::AuditCleanup
            | AuditAction::SessionCleanup => Severity::Low,
            AuditAction::LoginFailed
            | AuditAction::TokenRefreshFailed
            | AuditAction::UserCreated
            | AuditAction::UserUpdated
            | AuditAction::RateLimitExceeded
            | AuditAction::AuditExported => Severity::Medium,
            AuditAction::UserDeleted | AuditAction::UnauthorizedAccess => Severity::High,
            AuditAction::AdminDeleteAttempt => Severity::Critical,
        }
    }
}

impl std::str::FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AuditAction::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| format!("Invalid audit action: {}", s))
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_type: Option<String>,
    pub action: AuditAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    pub severity: Severity,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub details: serde_json::Value,
}

/// Who/where of a request, attached to audit events.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub user_id: Option<u64>,
    pub user_email: Option<String>,
    pub user_type: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Builder-style event handed to the audit log.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub action: AuditAction,
    pub severity: Severity,
    pub success: bool,
    pub resource: Option<String>,
    pub resource_id: Option<String>,
    pub details: serde_json::Value,
    pub context: RequestContext,
}

impl AuditEvent {
    pub fn new(action: AuditAction, context: &RequestContext) -> Self {
        Self {
            action,
            severity: action.default_severity(),
            success: true,
            resource: None,
            resource_id: None,
            details: serde_json::Value::Object(Default::default()),
            context: context.clone(),
        }
    }

    pub fn failed(mut self) -> Self {
        self.success = false;
        self
    }

    pub fn resource(mut self, resource: &str, id: impl ToString) -> Self {
        self.resource = Some(resource.to_string());
        self.resource_id = Some(id.to_string());
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Query filters for the audit log.
#[derive(Debug, Clone, Default)]
pub struct AuditFilters {
    pub user_id: Option<u64>,
    pub action: Option<AuditAction>,
    pub severity: Option<Severity>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub success: Option<bool>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl AuditFilters {
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(user_id) = self.user_id {
            if entry.user_id != Some(user_id) {
                return false;
            }
        }
        if let Some(action) = self.action {
            if entry.action != action {
                return false;
            }
        }
        if let Some(severity) = self.severity {
            if entry.severity != severity {
                return false;
            }
        }
        if let Some(start) = self.start_date {
            if entry.timestamp < start {
                return false;
            }
        }
        if let Some(end) = self.end_date {
            if entry.timestamp > end {
                return false;
            }
        }
        if let Some(success) = self.success {
            if entry.success != success {
                return false;
            }
        }
        true
    }
}
