use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: String,
    pub version: String,
    pub timestamp: String,
    pub uptime_seconds: i64,
    pub cache: CacheHealth,
}

#[derive(Debug, Serialize)]
pub struct CacheHealth {
    pub backend: &'static str,
    pub status: &'static str,
}

/// GET /health
///
/// Reports `degraded` when the cache backend does not answer.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let cache_status = if !state.cache.is_enabled() {
        "disabled"
    } else if state.cache.health_check().await {
        "connected"
    } else {
        "unavailable"
    };

    let status = if cache_status == "unavailable" {
        "degraded"
    } else {
        "healthy"
    };

    (
        StatusCode::OK,
        Json(HealthResponse {
            status,
            service: state.config.service_name.clone(),
            version: state.config.service_version.clone(),
            timestamp: Utc::now().to_rfc3339(),
            uptime_seconds: (Utc::now() - state.started_at).num_seconds(),
            cache: CacheHealth {
                backend: state.cache.backend_name(),
                status: cache_status,
            },
        }),
    )
}
