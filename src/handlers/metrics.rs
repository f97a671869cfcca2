//! 指标处理器
//! 提供 /metrics 端点

use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::{db, middleware::AppState, services::audit_service::AuditStats};

/// 指标响应
#[derive(Serialize)]
pub struct MetricsResponse {
    pub process_uptime_secs: u64,
    pub db_pool_size: u32,
    pub db_pool_idle: usize,
    pub audit: AuditStats,
}

/// 指标快照
pub async fn metrics_export(State(state): State<Arc<AppState>>) -> Json<MetricsResponse> {
    let pool = db::pool_stats(&state.db);

    Json(MetricsResponse {
        process_uptime_secs: crate::handlers::health::get_uptime(),
        db_pool_size: pool.size,
        db_pool_idle: pool.idle,
        audit: state.audit_service.stats(),
    })
}
