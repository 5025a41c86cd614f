//! Read-through response cache for user reads.

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use super::version::RequestedVersion;
use crate::dtos::user::UserListQuery;
use crate::services::users::{item_cache_key, list_cache_key};
use crate::AppState;

pub const CACHE_HEADER: &str = "x-cache";
pub const CACHE_KEY_HEADER: &str = "x-cache-key";
pub const CACHE_TTL_HEADER: &str = "x-cache-ttl";

/// Largest body the cache will buffer for storage.
const MAX_CACHED_BODY: usize = 2 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    UserList,
    UserItem,
}

#[derive(Clone)]
pub struct ResponseCache {
    pub state: AppState,
    pub policy: CachePolicy,
}

impl ResponseCache {
    pub fn new(state: AppState, policy: CachePolicy) -> Self {
        Self { state, policy }
    }

    fn ttl(&self) -> u64 {
        match self.policy {
            CachePolicy::UserList => self.state.config.cache.users_list_ttl_seconds,
            CachePolicy::UserItem => self.state.config.cache.user_ttl_seconds,
        }
    }

    /// None when the request cannot be cached; the handler then reports
    /// whatever is wrong with it.
    fn key(&self, version: &str, req: &Request) -> Option<String> {
        match self.policy {
            CachePolicy::UserList => {
                let query: UserListQuery =
                    serde_urlencoded::from_str(req.uri().query().unwrap_or("")).ok()?;
                query.validate().ok()?;
                Some(list_cache_key(version, &query))
            }
            CachePolicy::UserItem => {
                let id = req
                    .uri()
                    .path()
                    .rsplit('/')
                    .next()?
                    .parse::<u64>()
                    .ok()
                    .filter(|id| *id > 0)?;
                Some(item_cache_key(version, id))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub body: Value,
}

fn cache_headers(headers: &mut HeaderMap, outcome: &'static str, key: &str, ttl: u64) {
    headers.insert(CACHE_HEADER, HeaderValue::from_static(outcome));
    if let Ok(value) = HeaderValue::from_str(key) {
        headers.insert(CACHE_KEY_HEADER, value);
    }
    headers.insert(CACHE_TTL_HEADER, HeaderValue::from(ttl));
}

pub async fn response_cache_middleware(
    State(cache): State<ResponseCache>,
    req: Request,
    next: Next,
) -> Response {
    if req.method() != Method::GET {
        return next.run(req).await;
    }

    let Some(version) = req.extensions().get::<RequestedVersion>().copied() else {
        return next.run(req).await;
    };
    let Some(key) = cache.key(version.as_str(), &req) else {
        return next.run(req).await;
    };

    let ttl = cache.ttl();
    let state = &cache.state;

    if let Some(hit) = state.cache.get_json::<CachedResponse>(&key).await {
        tracing::debug!(cache_key = %key, "Response cache hit");
        state.metrics.record_cache_hit(true).await;

        let status = StatusCode::from_u16(hit.status).unwrap_or(StatusCode::OK);
        let mut response = (status, Json(hit.body)).into_response();
        cache_headers(response.headers_mut(), "HIT", &key, ttl);
        return response;
    }

    state.metrics.record_cache_hit(false).await;
    let response = next.run(req).await;

    if response.status() != StatusCode::OK {
        let mut response = response;
        cache_headers(response.headers_mut(), "MISS", &key, ttl);
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, MAX_CACHED_BODY).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(error = %e, cache_key = %key, "Failed to buffer response for caching");
            parts.headers.remove(header::CONTENT_LENGTH);
            return Response::from_parts(parts, Body::empty());
        }
    };

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(body) => {
            let entry = CachedResponse {
                status: parts.status.as_u16(),
                body,
            };
            if !state.cache.set_json(&key, &entry, ttl).await {
                tracing::debug!(cache_key = %key, "Response not cached");
            }
        }
        Err(e) => tracing::warn!(error = %e, cache_key = %key, "Response body is not JSON; not cached"),
    }

    cache_headers(&mut parts.headers, "MISS", &key, ttl);
    Response::from_parts(parts, Body::from(bytes))
}
