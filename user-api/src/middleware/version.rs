//! API version detection.
//!
//! Runs in front of the API router. A `/api/vN` path prefix is stripped so a
//! single route table serves every version; otherwise the version comes from
//! `X-API-Version`, `Accept-Version`, the `version` query parameter or the
//! configured default, in that order.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, uri::PathAndQuery, HeaderMap, HeaderValue, StatusCode, Uri},
    middleware::Next,
    response::Response,
};
use serde_json::json;
use service_core::error::{error_response, AppError, ErrorBody};

use crate::models::api_version::{self, ApiVersion};
use crate::AppState;

pub const API_VERSION_HEADER: &str = "x-api-version";
pub const ACCEPT_VERSION_HEADER: &str = "accept-version";
pub const DEFAULT_VERSION_HEADER: &str = "x-api-default-version";

/// Version resolved for the current request.
#[derive(Debug, Clone, Copy)]
pub struct RequestedVersion(pub &'static ApiVersion);

impl RequestedVersion {
    pub fn as_str(&self) -> &'static str {
        self.0.version
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for RequestedVersion
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestedVersion>()
            .copied()
            .ok_or_else(|| {
                AppError::InternalError(anyhow::anyhow!(
                    "API version missing from request extensions"
                ))
            })
    }
}

/// Split `/api/vN/rest` into (`vN`, `/api/rest`).
fn split_path_version(path: &str) -> Option<(&str, String)> {
    let rest = path.strip_prefix("/api/")?;
    let (segment, tail) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    };

    let digits = segment.strip_prefix('v')?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    Some((segment, format!("/api{}", tail)))
}

fn header_version(headers: &HeaderMap) -> Option<String> {
    [API_VERSION_HEADER, ACCEPT_VERSION_HEADER]
        .into_iter()
        .find_map(|name| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        })
}

fn query_version(query: Option<&str>) -> Option<String> {
    serde_urlencoded::from_str::<Vec<(String, String)>>(query?)
        .ok()?
        .into_iter()
        .find(|(k, v)| k == "version" && !v.is_empty())
        .map(|(_, v)| v)
}

fn unsupported(requested: &str) -> Response {
    let body = ErrorBody {
        details: Some(json!({
            "requestedVersion": requested,
            "supportedVersions": api_version::supported_versions(),
        })),
        ..ErrorBody::new(format!("Unsupported API version: {}", requested))
    };
    error_response(StatusCode::BAD_REQUEST, body)
}

pub async fn version_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let default_version = state.config.versioning.default_version.clone();

    let requested = match split_path_version(req.uri().path()) {
        Some((version, stripped)) => {
            let version = version.to_string();
            let path_and_query = match req.uri().query() {
                Some(q) => format!("{}?{}", stripped, q),
                None => stripped,
            };
            let mut parts = req.uri().clone().into_parts();
            parts.path_and_query = Some(
                PathAndQuery::try_from(path_and_query)
                    .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Invalid path: {}", e)))?,
            );
            *req.uri_mut() = Uri::from_parts(parts)
                .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Invalid path: {}", e)))?;
            version
        }
        None => header_version(req.headers())
            .or_else(|| query_version(req.uri().query()))
            .unwrap_or_else(|| default_version.clone()),
    };

    let Some(version) = api_version::find(&requested) else {
        tracing::warn!(requested_version = %requested, "Unsupported API version requested");
        return Ok(unsupported(&requested));
    };

    req.extensions_mut().insert(RequestedVersion(version));

    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(API_VERSION_HEADER, HeaderValue::from_static(version.version));
    if let Ok(value) = HeaderValue::from_str(&default_version) {
        headers.insert(DEFAULT_VERSION_HEADER, value);
    }

    Ok(response)
}
