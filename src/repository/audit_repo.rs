//! Audit repository (审计数据访问)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{error::AppError, models::audit::*};

/// 审计日志存储
///
/// 后台写入线程和管理端查询共用这一接口。
#[async_trait]
pub trait AuditStore: Send + Sync + 'static {
    async fn insert_audit_log(&self, log: &AuditLog) -> Result<(), AppError>;

    async fn query_audit_logs(
        &self,
        filters: &AuditLogFilters,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditLog>, AppError>;

    async fn count_audit_logs(&self, filters: &AuditLogFilters) -> Result<i64, AppError>;

    async fn find_audit_log(&self, id: Uuid) -> Result<Option<AuditLog>, AppError>;

    /// 删除早于 `cutoff` 的条目，返回删除数量
    async fn delete_audit_logs_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError>;
}

#[derive(Clone)]
pub struct AuditRepository {
    db: PgPool,
}

impl AuditRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

/// 追加过滤条件（查询与计数共用）
fn push_filters<'a>(qb: &mut QueryBuilder<'a, Postgres>, filters: &'a AuditLogFilters) {
    if let Some(user_id) = filters.user_id {
        qb.push(" AND actor_user_id = ").push_bind(user_id);
    }
    if let Some(household_id) = filters.household_id {
        qb.push(" AND household_id = ").push_bind(household_id);
    }
    if let Some(action) = &filters.action {
        qb.push(" AND action = ").push_bind(action);
    }
    if let Some(resource_type) = &filters.resource_type {
        qb.push(" AND resource_type = ").push_bind(resource_type);
    }
    if let Some(resource_id) = filters.resource_id {
        qb.push(" AND resource_id = ").push_bind(resource_id);
    }
    if let Some(start_time) = filters.start_time {
        qb.push(" AND created_at >= ").push_bind(start_time);
    }
    if let Some(end_time) = filters.end_time {
        qb.push(" AND created_at <= ").push_bind(end_time);
    }
    if filters.success_only == Some(true) {
        qb.push(" AND success = TRUE");
    }
}

#[async_trait]
impl AuditStore for AuditRepository {
    async fn insert_audit_log(&self, log: &AuditLog) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (
                id, action, resource_type, resource_id, actor_user_id, household_id,
                old_values, new_values, success, error_message, checksum, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(log.id)
        .bind(&log.action)
        .bind(&log.resource_type)
        .bind(log.resource_id)
        .bind(log.actor_user_id)
        .bind(log.household_id)
        .bind(&log.old_values)
        .bind(&log.new_values)
        .bind(log.success)
        .bind(&log.error_message)
        .bind(&log.checksum)
        .bind(log.created_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn query_audit_logs(
        &self,
        filters: &AuditLogFilters,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditLog>, AppError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM audit_logs WHERE 1=1");
        push_filters(&mut qb, filters);
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let logs = qb.build_query_as::<AuditLog>().fetch_all(&self.db).await?;
        Ok(logs)
    }

    async fn count_audit_logs(&self, filters: &AuditLogFilters) -> Result<i64, AppError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM audit_logs WHERE 1=1");
        push_filters(&mut qb, filters);

        let count: i64 = qb.build_query_scalar().fetch_one(&self.db).await?;
        Ok(count)
    }

    async fn find_audit_log(&self, id: Uuid) -> Result<Option<AuditLog>, AppError> {
        let log = sqlx::query_as::<_, AuditLog>("SELECT * FROM audit_logs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(log)
    }

    async fn delete_audit_logs_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM audit_logs WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected())
    }
}
