use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use service_core::error::AppError;
use service_core::middleware::rate_limit::client_ip;

use super::context::request_context;
use crate::models::{AuditAction, AuditEvent};
use crate::services::cache::RateLimitDecision;
use crate::AppState;

pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const RESET_HEADER: &str = "x-ratelimit-reset";

pub fn rate_limit_key(ip: &str) -> String {
    format!("rate_limit:{}", ip)
}

fn apply_headers(headers: &mut HeaderMap, limit: u32, decision: &RateLimitDecision) {
    let reset_secs = (decision.reset_time + 999) / 1000;
    headers.insert(LIMIT_HEADER, HeaderValue::from(limit));
    headers.insert(REMAINING_HEADER, HeaderValue::from(decision.remaining));
    headers.insert(RESET_HEADER, HeaderValue::from(reset_secs));
}

/// Sliding-window limit per client address, shared across instances through
/// the cache backend. Admits everything when the backend is unavailable.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let Some(ip) = client_ip(req.headers(), req.extensions()) else {
        tracing::warn!("Could not determine client address for rate limiting");
        return next.run(req).await;
    };

    let limit = state.config.rate_limit.max_requests;
    let decision = state
        .cache
        .sliding_window(
            &rate_limit_key(&ip.to_string()),
            limit,
            state.config.rate_limit.window_ms,
        )
        .await;

    if !decision.allowed {
        tracing::warn!(
            client_ip = %ip,
            current_count = decision.current_count,
            limit,
            "Rate limit exceeded"
        );
        state.metrics.record_rate_limited().await;

        let ctx = request_context(req.headers(), req.extensions());
        state
            .audit
            .record(
                AuditEvent::new(AuditAction::RateLimitExceeded, &ctx)
                    .failed()
                    .details(json!({
                        "method": req.method().as_str(),
                        "path": req.uri().path(),
                        "limit": limit,
                        "currentCount": decision.current_count,
                    })),
            )
            .await;

        let mut response = AppError::TooManyRequests(
            "Too many requests, please try again later.".to_string(),
            Some(decision.retry_after_secs()),
        )
        .into_response();
        apply_headers(response.headers_mut(), limit, &decision);
        return response;
    }

    let mut response = next.run(req).await;
    apply_headers(response.headers_mut(), limit, &decision);
    response
}
