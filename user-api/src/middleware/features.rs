use axum::{extract::Request, middleware::Next, response::Response};
use service_core::error::AppError;

use super::version::RequestedVersion;
use crate::models::api_version::FEATURE_AUDIT_LOGS;

/// Hide audit routes from versions that do not declare the feature.
pub async fn require_audit_logs(
    version: RequestedVersion,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if !version.0.supports(FEATURE_AUDIT_LOGS) {
        return Err(AppError::NotFound(anyhow::anyhow!(
            "Audit logs are not available in API version {}",
            version.as_str()
        )));
    }

    Ok(next.run(req).await)
}
