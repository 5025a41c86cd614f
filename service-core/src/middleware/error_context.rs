//! Single translation boundary for failed requests.
//!
//! Every response produced from an [`AppError`](crate::error::AppError) carries
//! its [`ErrorBody`] as an extension. This middleware logs it together with the
//! request context and rewrites the body with the request path, dropping
//! internal details for server errors unless they are explicitly exposed.

use axum::{
    body::Body,
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use super::rate_limit::client_ip;
use crate::error::ErrorBody;

#[derive(Debug, Clone, Default)]
pub struct ErrorContextConfig {
    /// Keep `details` on 5xx responses (development only).
    pub expose_internal_details: bool,
}

pub async fn error_context_middleware(
    State(config): State<ErrorContextConfig>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let client = client_ip(req.headers(), req.extensions())
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let response = next.run(req).await;

    let Some(mut body) = response.extensions().get::<ErrorBody>().cloned() else {
        return response;
    };

    let status = response.status();
    if status.is_server_error() {
        tracing::error!(
            method = %method,
            path = %path,
            client_ip = %client,
            status = status.as_u16(),
            error = %body.error,
            details = ?body.details,
            "Request failed"
        );
        if !config.expose_internal_details {
            body.details = None;
        }
    } else {
        tracing::warn!(
            method = %method,
            path = %path,
            client_ip = %client,
            status = status.as_u16(),
            error = %body.error,
            "Request rejected"
        );
    }

    body.path = Some(path);

    let (mut parts, _) = response.into_parts();
    parts.headers.remove(header::CONTENT_LENGTH);
    let bytes = serde_json::to_vec(&body).unwrap_or_default();
    Response::from_parts(parts, Body::from(bytes))
}
