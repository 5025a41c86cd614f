use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, Extensions, HeaderMap},
};
use service_core::middleware::rate_limit::client_ip;
use std::convert::Infallible;

use crate::models::RequestContext;
use crate::services::Claims;

/// Audit context from request headers and, when authenticated, the token claims.
pub fn request_context(headers: &HeaderMap, extensions: &Extensions) -> RequestContext {
    let claims = extensions.get::<Claims>();
    RequestContext {
        user_id: claims.map(|c| c.id),
        user_email: claims.map(|c| c.email.clone()),
        user_type: claims.map(|c| c.token_type.clone()),
        ip_address: client_ip(headers, extensions).map(|ip| ip.to_string()),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(request_context(&parts.headers, &parts.extensions))
    }
}
