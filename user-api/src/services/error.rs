use service_core::error::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Email already exists")]
    DuplicateEmail,

    #[error("{0}")]
    ForbiddenOperation(String),

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    ExpiredToken,

    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotFound(_) => AppError::NotFound(anyhow::anyhow!(err.to_string())),
            ServiceError::DuplicateEmail | ServiceError::Validation(_) => {
                AppError::BadRequest(anyhow::anyhow!(err.to_string()))
            }
            ServiceError::ForbiddenOperation(_)
            | ServiceError::InvalidToken
            | ServiceError::ExpiredToken
            | ServiceError::InvalidRefreshToken => {
                AppError::Forbidden(anyhow::anyhow!(err.to_string()))
            }
            ServiceError::InvalidCredentials => {
                AppError::Unauthorized(anyhow::anyhow!(err.to_string()))
            }
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ServiceError::NotFound("User".into()), StatusCode::NOT_FOUND),
            (ServiceError::DuplicateEmail, StatusCode::BAD_REQUEST),
            (
                ServiceError::ForbiddenOperation("no".into()),
                StatusCode::FORBIDDEN,
            ),
            (ServiceError::InvalidCredentials, StatusCode::UNAUTHORIZED),
            (ServiceError::ExpiredToken, StatusCode::FORBIDDEN),
            (ServiceError::InvalidRefreshToken, StatusCode::FORBIDDEN),
        ];

        for (err, status) in cases {
            assert_eq!(AppError::from(err).status(), status);
        }
    }

    #[test]
    fn test_messages() {
        assert_eq!(ServiceError::NotFound("User".into()).to_string(), "User not found");
        assert_eq!(
            ServiceError::InvalidCredentials.to_string(),
            "Invalid email or password"
        );
    }
}
