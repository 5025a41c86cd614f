use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use service_core::error::AppError;

use crate::dtos::user::{CreateUserRequest, UpdateUserRequest, UserListQuery};
use crate::dtos::ApiResponse;
use crate::middleware::{AuthUser, RequestedVersion};
use crate::models::RequestContext;
use crate::utils::{ValidatedJson, ValidatedQuery};
use crate::AppState;

/// Path ids are positive integers; anything else is a 400, not a 404.
pub fn parse_id(raw: &str, what: &str) -> Result<u64, AppError> {
    raw.parse::<u64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Invalid {} ID", what)))
}

/// GET /users
pub async fn list_users(
    State(state): State<AppState>,
    _user: AuthUser,
    version: RequestedVersion,
    ValidatedQuery(query): ValidatedQuery<UserListQuery>,
) -> impl IntoResponse {
    let base_url = format!("/api/{}/users", version.as_str());
    ApiResponse::data(state.users.list(&query, &base_url).await)
}

/// GET /users/:id
pub async fn get_user(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_id(&id, "user")?;
    Ok(ApiResponse::data(state.users.get(id).await?))
}

/// POST /users
pub async fn create_user(
    State(state): State<AppState>,
    _user: AuthUser,
    ctx: RequestContext,
    ValidatedJson(req): ValidatedJson<CreateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.users.create(req, &ctx).await?;
    Ok((
        StatusCode::CREATED,
        ApiResponse::with_message("User created successfully", user),
    ))
}

/// PUT /users/:id
pub async fn update_user(
    State(state): State<AppState>,
    _user: AuthUser,
    ctx: RequestContext,
    Path(id): Path<String>,
    ValidatedJson(req): ValidatedJson<UpdateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_id(&id, "user")?;
    let user = state.users.update(id, req, &ctx).await?;
    Ok(ApiResponse::with_message("User updated successfully", user))
}

/// DELETE /users/:id
pub async fn delete_user(
    State(state): State<AppState>,
    _user: AuthUser,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_id(&id, "user")?;
    state.users.delete(id, &ctx).await?;
    Ok(ApiResponse::message("User deleted successfully"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("42", "user").unwrap(), 42);
        assert!(parse_id("0", "user").is_err());
        assert!(parse_id("-3", "user").is_err());
        assert!(parse_id("abc", "user").is_err());
    }
}
