//! 审计日志的 HTTP 处理器（仅管理员）

use crate::{
    auth::middleware::AuthContext,
    error::AppError,
    middleware::AppState,
    models::audit::*,
    services::AuditAction,
};
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

const MAX_LIMIT: i64 = 500;

#[derive(Debug, Deserialize)]
pub struct AuditLogQuery {
    pub user_id: Option<Uuid>,
    pub household_id: Option<Uuid>,
    pub action: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<Uuid>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub success_only: Option<bool>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Default, Deserialize)]
pub struct CleanupRequest {
    pub retention_days: Option<u32>,
}

/// 查询审计日志
pub async fn list_audit_logs(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Query(query): Query<AuditLogQuery>,
) -> Result<impl IntoResponse, AppError> {
    auth_context.require_admin()?;

    let limit = query.limit.clamp(1, MAX_LIMIT);
    let offset = query.offset.max(0);
    let filters = AuditLogFilters {
        user_id: query.user_id,
        household_id: query.household_id,
        action: query.action,
        resource_type: query.resource_type,
        resource_id: query.resource_id,
        start_time: query.start_time,
        end_time: query.end_time,
        success_only: query.success_only,
    };

    let logs = state
        .audit_service
        .query_logs(&filters, limit, offset)
        .await?;
    let total = state.audit_service.count_logs(&filters).await?;

    Ok(Json(json!({
        "logs": logs,
        "count": logs.len(),
        "total": total,
        "limit": limit,
        "offset": offset
    })))
}

/// 单条审计日志（附带完整性校验）
pub async fn get_audit_log(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<Json<AuditLogResponse>, AppError> {
    auth_context.require_admin()?;

    let log = state.audit_service.get_log(id).await?;
    Ok(Json(AuditLogResponse::from(log)))
}

/// 清理过期审计日志
pub async fn cleanup_audit_logs(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    body: Option<Json<CleanupRequest>>,
) -> Result<impl IntoResponse, AppError> {
    auth_context.require_admin()?;

    let request = body.map(|Json(r)| r).unwrap_or_default();
    let retention_days = request
        .retention_days
        .unwrap_or_else(|| state.audit_service.default_retention_days());

    let entry = PendingAuditEntry::new(AuditAction::AuditCleanup).actor(auth_context.user_id);
    let deleted = match state.audit_service.cleanup(retention_days).await {
        Ok(deleted) => deleted,
        Err(e) => {
            state.audit_service.record(entry.failed(e.to_string()));
            return Err(e);
        }
    };

    let entry = entry.new_values(json!({
        "retention_days": retention_days,
        "deleted": deleted
    }));
    if let Err(e) = state.audit_service.record_sync(entry).await {
        tracing::warn!(error = %e, "Failed to record audit cleanup");
    }

    Ok(Json(json!({
        "deleted": deleted,
        "retention_days": retention_days
    })))
}
