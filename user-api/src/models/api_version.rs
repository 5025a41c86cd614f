//! Supported API versions and the features each one exposes.

use serde::Serialize;

pub const FEATURE_AUDIT_LOGS: &str = "audit_logs";

pub const LATEST_VERSION: &str = "v2";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiVersion {
    pub version: &'static str,
    pub status: &'static str,
    pub release_date: &'static str,
    pub features: &'static [&'static str],
    pub changelog: &'static [&'static str],
}

impl ApiVersion {
    pub fn supports(&self, feature: &str) -> bool {
        self.features.contains(&feature)
    }
}

pub const VERSIONS: &[ApiVersion] = &[
    ApiVersion {
        version: "v1",
        status: "stable",
        release_date: "2024-01-15",
        features: &[
            "authentication",
            "user_management",
            "pagination",
            "caching",
            "rate_limiting",
        ],
        changelog: &[
            "JWT access and refresh tokens",
            "User CRUD with pagination and filtering",
            "Response caching for user reads",
            "Sliding-window rate limiting",
        ],
    },
    ApiVersion {
        version: "v2",
        status: "current",
        release_date: "2024-06-01",
        features: &[
            "authentication",
            "user_management",
            "pagination",
            "caching",
            "rate_limiting",
            FEATURE_AUDIT_LOGS,
            "metrics",
            "advanced_filtering",
        ],
        changelog: &[
            "Audit log query, statistics and export endpoints",
            "Daily request metrics",
            "Substring filters on user listing",
        ],
    },
];

pub fn find(version: &str) -> Option<&'static ApiVersion> {
    VERSIONS.iter().find(|v| v.version == version)
}

pub fn supported_versions() -> Vec<&'static str> {
    VERSIONS.iter().map(|v| v.version).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_logs_only_in_v2() {
        assert!(!find("v1").unwrap().supports(FEATURE_AUDIT_LOGS));
        assert!(find("v2").unwrap().supports(FEATURE_AUDIT_LOGS));
        assert!(find(LATEST_VERSION).is_some());
        assert!(find("v3").is_none());
    }
}
