use axum::{extract::State, http::header, response::IntoResponse};
use service_core::error::AppError;

use crate::dtos::audit::DaysQuery;
use crate::dtos::ApiResponse;
use crate::utils::ValidatedQuery;
use crate::AppState;

const DEFAULT_DAILY_DAYS: u32 = 7;

/// GET /metrics
pub async fn summary(State(state): State<AppState>) -> impl IntoResponse {
    ApiResponse::data(state.metrics.summary().await)
}

/// GET /metrics/daily?days=N
pub async fn daily(
    State(state): State<AppState>,
    ValidatedQuery(query): ValidatedQuery<DaysQuery>,
) -> impl IntoResponse {
    let days = query.days.unwrap_or(DEFAULT_DAILY_DAYS);
    ApiResponse::data(state.metrics.daily(days).await)
}

/// GET /metrics/endpoints
pub async fn endpoints(State(state): State<AppState>) -> impl IntoResponse {
    ApiResponse::data(state.metrics.endpoints().await)
}

/// GET /metrics/prometheus
pub async fn prometheus(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let handle = state
        .prometheus
        .as_ref()
        .ok_or(AppError::ServiceUnavailable)?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    ))
}
