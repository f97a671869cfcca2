//! 路由注册
//! 创建所有 API 路由并应用中间件

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{compression::CompressionLayer, limit::RequestBodyLimitLayer};

use crate::{handlers, middleware::AppState};

/// 请求体上限
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// 创建应用路由
pub fn create_router(state: Arc<AppState>) -> Router {
    // 公开端点（健康检查、指标）
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .route("/metrics", get(handlers::metrics::metrics_export));

    // 需要会话的路由
    let authenticated_routes = Router::new()
        // 账目
        .route(
            "/movements",
            get(handlers::movement::list_movements).post(handlers::movement::create_movement),
        )
        .route(
            "/movements/debts/consolidate",
            get(handlers::movement::consolidate_debts),
        )
        .route(
            "/movements/{id}",
            get(handlers::movement::get_movement)
                .patch(handlers::movement::update_movement)
                .delete(handlers::movement::delete_movement),
        )
        // 审计日志（管理员）
        .route("/admin/audit-logs", get(handlers::audit::list_audit_logs))
        .route(
            "/admin/audit-logs/cleanup",
            post(handlers::audit::cleanup_audit_logs),
        )
        .route("/admin/audit-logs/{id}", get(handlers::audit::get_audit_log))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::auth::middleware::session_auth_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .merge(authenticated_routes)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(CompressionLayer::new())
        .layer(axum::middleware::from_fn(crate::middleware::request_tracking_middleware))
        .with_state(state)
}
