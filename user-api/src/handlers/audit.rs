//! Audit log endpoints. Routed only for versions declaring `audit_logs`.

use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use service_core::error::AppError;

use super::users::parse_id;
use crate::dtos::audit::{AuditQuery, DaysQuery};
use crate::dtos::ApiResponse;
use crate::middleware::AuthUser;
use crate::models::{AuditAction, AuditEntry, AuditEvent, RequestContext};
use crate::services::audit::{AuditPage, ExportFormat};
use crate::utils::ValidatedQuery;
use crate::AppState;

const DEFAULT_STATS_DAYS: u32 = 7;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogPage {
    pub entries: Vec<AuditEntry>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

impl AuditLogPage {
    fn new(page: AuditPage) -> Self {
        Self {
            entries: page.entries,
            total: page.total,
            limit: page.limit,
            offset: page.offset,
        }
    }
}

/// GET /audit
pub async fn list_audit_logs(
    State(state): State<AppState>,
    _user: AuthUser,
    ValidatedQuery(query): ValidatedQuery<AuditQuery>,
) -> impl IntoResponse {
    let page = state.audit.query(&query.filters()).await;
    ApiResponse::data(AuditLogPage::new(page))
}

/// GET /audit/stats
pub async fn audit_stats(
    State(state): State<AppState>,
    _user: AuthUser,
    ValidatedQuery(query): ValidatedQuery<DaysQuery>,
) -> impl IntoResponse {
    let days = query.days.unwrap_or(DEFAULT_STATS_DAYS);
    ApiResponse::data(state.audit.stats(days).await)
}

/// GET /audit/export?format=json|csv
pub async fn export_audit_logs(
    State(state): State<AppState>,
    _user: AuthUser,
    ctx: RequestContext,
    ValidatedQuery(query): ValidatedQuery<AuditQuery>,
) -> Result<impl IntoResponse, AppError> {
    let format: ExportFormat = query
        .format
        .as_deref()
        .unwrap_or("json")
        .parse()
        .map_err(|e: String| AppError::BadRequest(anyhow::anyhow!(e)))?;

    let body = state.audit.export(&query.filters(), format).await?;

    let (content_type, extension) = match format {
        ExportFormat::Json => ("application/json", "json"),
        ExportFormat::Csv => ("text/csv; charset=utf-8", "csv"),
    };

    state
        .audit
        .record(
            AuditEvent::new(AuditAction::AuditExported, &ctx)
                .details(json!({ "format": extension, "bytes": body.len() })),
        )
        .await;

    let disposition = format!(
        "attachment; filename=\"audit-logs-{}.{}\"",
        Utc::now().format("%Y-%m-%d"),
        extension
    );

    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    ))
}

/// POST /audit/cleanup
pub async fn cleanup_audit_logs(
    State(state): State<AppState>,
    _user: AuthUser,
    ctx: RequestContext,
) -> impl IntoResponse {
    let report = state.audit.cleanup().await;
    state
        .audit
        .record(AuditEvent::new(AuditAction::AuditCleanup, &ctx).details(json!({
            "indexesScanned": report.indexes_scanned,
            "staleIdsRemoved": report.stale_ids_removed,
        })))
        .await;

    ApiResponse::with_message("Audit cleanup completed", report)
}

/// GET /audit/user/:userId
pub async fn user_audit_logs(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(user_id): Path<String>,
    ValidatedQuery(mut query): ValidatedQuery<AuditQuery>,
) -> Result<impl IntoResponse, AppError> {
    query.user_id = Some(parse_id(&user_id, "user")?);
    let page = state.audit.query(&query.filters()).await;
    Ok(ApiResponse::data(AuditLogPage::new(page)))
}

/// GET /audit/action/:action
pub async fn action_audit_logs(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(action): Path<String>,
    ValidatedQuery(mut query): ValidatedQuery<AuditQuery>,
) -> Result<impl IntoResponse, AppError> {
    let action: AuditAction = action
        .parse()
        .map_err(|e: String| AppError::BadRequest(anyhow::anyhow!(e)))?;
    query.action = Some(action);
    let page = state.audit.query(&query.filters()).await;
    Ok(ApiResponse::data(AuditLogPage::new(page)))
}
