use axum::{
    extract::{FromRequest, FromRequestParts, Query, Request},
    http::request::Parts,
    Json,
};
use serde::de::DeserializeOwned;
use service_core::error::AppError;
use validator::{Validate, ValidationError};

/// JSON body extractor that runs `validator` rules before the handler sees it.
pub struct ValidatedJson<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Invalid JSON body: {}", e)))?;

        value.validate()?;

        Ok(ValidatedJson(value))
    }
}

/// Query string extractor with the same rules as [`ValidatedJson`].
pub struct ValidatedQuery<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequestParts<S> for ValidatedQuery<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Invalid query string: {}", e)))?;

        value.validate()?;

        Ok(ValidatedQuery(value))
    }
}

pub fn validate_user_type(value: &str) -> Result<(), ValidationError> {
    match value {
        "admin" | "user" => Ok(()),
        _ => {
            let mut err = ValidationError::new("user_type");
            err.message = Some("Type must be either 'admin' or 'user'".into());
            Err(err)
        }
    }
}
