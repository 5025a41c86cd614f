use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use std::time::Instant;

use crate::AppState;

/// Feed the shared daily counters, labelled by route template.
pub async fn daily_metrics_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let endpoint = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(req).await;

    let elapsed_ms = start.elapsed().as_millis() as u64;
    state
        .metrics
        .record_request(&method, &endpoint, response.status().as_u16(), elapsed_ms)
        .await;

    response
}
