use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Bad request: {0}")]
    BadRequest(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Unauthorized: {0}")]
    Unauthorized(anyhow::Error),

    #[error("Forbidden: {0}")]
    Forbidden(anyhow::Error),

    #[error("Too many requests: {0}")]
    TooManyRequests(String, Option<u64>),

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Service Unavailable")]
    ServiceUnavailable,

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

/// Failure envelope written by [`AppError`].
///
/// A copy travels in the response extensions so the error-context middleware
/// can log it and complete it with the request path.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            details: None,
            retry_after: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
            path: None,
        }
    }
}

fn validation_details(errors: &validator::ValidationErrors) -> Value {
    let mut fields = serde_json::Map::new();
    for (field, errs) in errors.field_errors() {
        let messages = errs
            .iter()
            .map(|e| {
                Value::String(
                    e.message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| e.code.to_string()),
                )
            })
            .collect();
        fields.insert(field.to_string(), Value::Array(messages));
    }
    Value::Object(fields)
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::TooManyRequests(..) => StatusCode::TOO_MANY_REQUESTS,
            AppError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::InternalError(_) | AppError::ConfigError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        let body = match self {
            AppError::ValidationError(err) => ErrorBody {
                details: Some(validation_details(&err)),
                ..ErrorBody::new("Validation failed")
            },
            AppError::BadRequest(err)
            | AppError::NotFound(err)
            | AppError::Unauthorized(err)
            | AppError::Forbidden(err) => ErrorBody::new(err.to_string()),
            AppError::TooManyRequests(msg, retry) => ErrorBody {
                retry_after: retry,
                ..ErrorBody::new(msg)
            },
            AppError::InternalError(err) => ErrorBody {
                details: Some(Value::String(format!("{:#}", err))),
                ..ErrorBody::new("Internal server error")
            },
            AppError::ServiceUnavailable => ErrorBody::new("Service unavailable"),
            AppError::ConfigError(err) => ErrorBody {
                details: Some(Value::String(err.to_string())),
                ..ErrorBody::new("Configuration error")
            },
        };

        error_response(status, body)
    }
}

/// Write a failure envelope and attach it for the error-context middleware.
pub fn error_response(status: StatusCode, body: ErrorBody) -> Response {
    let retry_after = body.retry_after;
    let mut res = (status, Json(body.clone())).into_response();
    res.extensions_mut().insert(body);

    if let Some(retry) = retry_after {
        res.headers_mut()
            .insert(axum::http::header::RETRY_AFTER, retry.into());
    }

    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    #[derive(Validate)]
    struct Signup {
        #[validate(email(message = "Invalid email format"))]
        email: String,
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::Unauthorized(anyhow::anyhow!("x")).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::Forbidden(anyhow::anyhow!("x")).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::TooManyRequests("slow down".into(), Some(3)).status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn test_validation_details_are_per_field() {
        let err = Signup {
            email: "nope".to_string(),
        }
        .validate()
        .unwrap_err();

        let details = validation_details(&err);
        assert_eq!(details["email"][0], "Invalid email format");
    }

    #[test]
    fn test_retry_after_header() {
        let res = AppError::TooManyRequests("slow down".into(), Some(42)).into_response();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(res.headers()["retry-after"], "42");

        let body = res.extensions().get::<ErrorBody>().unwrap();
        assert_eq!(body.retry_after, Some(42));
        assert!(!body.success);
    }
}
