use axum::{extract::State, response::IntoResponse};
use service_core::error::AppError;

use crate::dtos::auth::{LoginRequest, RefreshRequest};
use crate::dtos::ApiResponse;
use crate::middleware::AuthUser;
use crate::models::RequestContext;
use crate::utils::ValidatedJson;
use crate::AppState;

/// POST /auth/login
pub async fn login(
    State(state): State<AppState>,
    ctx: RequestContext,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let session = state.auth.login(&req.email, req.password, &ctx).await?;
    Ok(ApiResponse::with_message("Login successful", session))
}

/// POST /auth/refresh
pub async fn refresh(
    State(state): State<AppState>,
    ctx: RequestContext,
    ValidatedJson(req): ValidatedJson<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    let session = state.auth.refresh(&req.refresh_token, &ctx).await?;
    Ok(ApiResponse::with_message("Token refreshed", session))
}

/// POST /auth/logout
pub async fn logout(
    State(state): State<AppState>,
    _user: AuthUser,
    ctx: RequestContext,
) -> Result<impl IntoResponse, AppError> {
    state.auth.logout(&ctx).await?;
    Ok(ApiResponse::message("Logged out successfully"))
}

pub async fn stats(State(state): State<AppState>, _user: AuthUser) -> impl IntoResponse {
    ApiResponse::data(state.auth.stats().await)
}

pub async fn cleanup(
    State(state): State<AppState>,
    _user: AuthUser,
    ctx: RequestContext,
) -> impl IntoResponse {
    let report = state.auth.cleanup(&ctx).await;
    ApiResponse::with_message("Session cleanup completed", report)
}
