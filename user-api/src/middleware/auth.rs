use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use serde_json::json;
use service_core::error::AppError;

use super::context::request_context;
use crate::models::{AuditAction, AuditEvent};
use crate::services::Claims;
use crate::AppState;

/// Require a valid bearer access token.
///
/// A missing header or another scheme is 401; a token that fails
/// verification is 403 and leaves an `unauthorized_access` audit entry.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string);

    let Some(token) = token else {
        return Err(AppError::Unauthorized(anyhow::anyhow!(
            "Access token required"
        )));
    };

    let claims = match state.tokens.verify_access(&token) {
        Ok(claims) => claims,
        Err(err) => {
            let ctx = request_context(req.headers(), req.extensions());
            state
                .audit
                .record(
                    AuditEvent::new(AuditAction::UnauthorizedAccess, &ctx)
                        .failed()
                        .details(json!({
                            "reason": err.to_string(),
                            "method": req.method().as_str(),
                            "path": req.uri().path(),
                        })),
                )
                .await;
            return Err(err.into());
        }
    };

    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}

/// Extractor for the claims of the authenticated caller.
pub struct AuthUser(pub Claims);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let claims = parts.extensions.get::<Claims>().ok_or_else(|| {
            AppError::Unauthorized(anyhow::anyhow!("Access token required"))
        })?;

        Ok(AuthUser(claims.clone()))
    }
}
