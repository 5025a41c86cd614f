use axum::{extract::State, response::IntoResponse};
use serde::Serialize;

use crate::dtos::ApiResponse;
use crate::middleware::RequestedVersion;
use crate::models::api_version::{self, ApiVersion, LATEST_VERSION, VERSIONS};
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    #[serde(flatten)]
    pub version: &'static ApiVersion,
    pub is_default: bool,
    pub is_latest: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionList {
    pub versions: Vec<VersionInfo>,
    pub default_version: String,
    pub latest_version: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangelogEntry {
    pub version: &'static str,
    pub release_date: &'static str,
    pub changes: &'static [&'static str],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionHealth {
    pub status: &'static str,
    pub version: &'static str,
    pub supported_versions: Vec<&'static str>,
}

fn info(version: &'static ApiVersion, default_version: &str) -> VersionInfo {
    VersionInfo {
        version,
        is_default: version.version == default_version,
        is_latest: version.version == LATEST_VERSION,
    }
}

/// GET /version
pub async fn current(State(state): State<AppState>, version: RequestedVersion) -> impl IntoResponse {
    ApiResponse::data(info(version.0, &state.config.versioning.default_version))
}

/// GET /version/all
pub async fn all(State(state): State<AppState>) -> impl IntoResponse {
    let default_version = &state.config.versioning.default_version;
    ApiResponse::data(VersionList {
        versions: VERSIONS.iter().map(|v| info(v, default_version)).collect(),
        default_version: default_version.clone(),
        latest_version: LATEST_VERSION,
    })
}

/// GET /version/changelog, newest first.
pub async fn changelog() -> impl IntoResponse {
    let entries: Vec<ChangelogEntry> = VERSIONS
        .iter()
        .rev()
        .map(|v| ChangelogEntry {
            version: v.version,
            release_date: v.release_date,
            changes: v.changelog,
        })
        .collect();
    ApiResponse::data(entries)
}

/// GET /version/health
pub async fn health(version: RequestedVersion) -> impl IntoResponse {
    ApiResponse::data(VersionHealth {
        status: "healthy",
        version: version.as_str(),
        supported_versions: api_version::supported_versions(),
    })
}
