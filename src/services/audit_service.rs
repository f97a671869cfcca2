//! 审计日志服务
//!
//! 生产者通过 `record` 把条目放进有界队列后立即返回，
//! 单个后台任务按 FIFO 顺序逐条落库。队列满时丢弃最新条目。

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::Utc;
use serde::Serialize;
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    config::AuditConfig,
    error::AppError,
    models::audit::*,
    repository::audit_repo::AuditStore,
};

/// 审计操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    // 认证
    AuthLogin,
    AuthLogout,

    // 家庭与成员
    HouseholdCreate,
    HouseholdUpdate,
    HouseholdDelete,
    MemberAdd,
    MemberRemove,

    // 目录
    ContactCreate,
    ContactUpdate,
    ContactDelete,
    AccountCreate,
    AccountUpdate,
    AccountDelete,
    PaymentMethodCreate,
    PaymentMethodUpdate,
    PaymentMethodDelete,
    CategoryCreate,
    CategoryUpdate,
    CategoryDelete,
    BudgetSet,
    BudgetDelete,

    // 账目
    MovementCreate,
    MovementUpdate,
    MovementDelete,

    // 管理
    AuditCleanup,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::AuthLogin => "auth.login",
            AuditAction::AuthLogout => "auth.logout",

            AuditAction::HouseholdCreate => "household.create",
            AuditAction::HouseholdUpdate => "household.update",
            AuditAction::HouseholdDelete => "household.delete",
            AuditAction::MemberAdd => "member.add",
            AuditAction::MemberRemove => "member.remove",

            AuditAction::ContactCreate => "contact.create",
            AuditAction::ContactUpdate => "contact.update",
            AuditAction::ContactDelete => "contact.delete",
            AuditAction::AccountCreate => "account.create",
            AuditAction::AccountUpdate => "account.update",
            AuditAction::AccountDelete => "account.delete",
            AuditAction::PaymentMethodCreate => "payment_method.create",
            AuditAction::PaymentMethodUpdate => "payment_method.update",
            AuditAction::PaymentMethodDelete => "payment_method.delete",
            AuditAction::CategoryCreate => "category.create",
            AuditAction::CategoryUpdate => "category.update",
            AuditAction::CategoryDelete => "category.delete",
            AuditAction::BudgetSet => "budget.set",
            AuditAction::BudgetDelete => "budget.delete",

            AuditAction::MovementCreate => "movement.create",
            AuditAction::MovementUpdate => "movement.update",
            AuditAction::MovementDelete => "movement.delete",

            AuditAction::AuditCleanup => "audit_log.cleanup",
        }
    }

    pub fn resource_type(&self) -> &'static str {
        match self {
            AuditAction::AuthLogin | AuditAction::AuthLogout => "session",
            AuditAction::HouseholdCreate
            | AuditAction::HouseholdUpdate
            | AuditAction::HouseholdDelete => "household",
            AuditAction::MemberAdd | AuditAction::MemberRemove => "member",
            AuditAction::ContactCreate | AuditAction::ContactUpdate | AuditAction::ContactDelete => {
                "contact"
            }
            AuditAction::AccountCreate | AuditAction::AccountUpdate | AuditAction::AccountDelete => {
                "account"
            }
            AuditAction::PaymentMethodCreate
            | AuditAction::PaymentMethodUpdate
            | AuditAction::PaymentMethodDelete => "payment_method",
            AuditAction::CategoryCreate
            | AuditAction::CategoryUpdate
            | AuditAction::CategoryDelete => "category",
            AuditAction::BudgetSet | AuditAction::BudgetDelete => "budget",
            AuditAction::MovementCreate
            | AuditAction::MovementUpdate
            | AuditAction::MovementDelete => "movement",
            AuditAction::AuditCleanup => "audit_log",
        }
    }
}

impl PendingAuditEntry {
    /// 以成功状态开始构造条目
    pub fn new(action: AuditAction) -> Self {
        PendingAuditEntry {
            action: action.as_str().to_string(),
            resource_type: action.resource_type().to_string(),
            resource_id: None,
            actor_user_id: None,
            household_id: None,
            old_values: None,
            new_values: None,
            success: true,
            error_message: None,
        }
    }

    pub fn actor(mut self, user_id: Uuid) -> Self {
        self.actor_user_id = Some(user_id);
        self
    }

    pub fn household(mut self, household_id: Uuid) -> Self {
        self.household_id = Some(household_id);
        self
    }

    pub fn resource(mut self, resource_id: Option<Uuid>) -> Self {
        self.resource_id = resource_id;
        self
    }

    pub fn old_values(mut self, values: serde_json::Value) -> Self {
        self.old_values = Some(values);
        self
    }

    pub fn new_values(mut self, values: serde_json::Value) -> Self {
        self.new_values = Some(values);
        self
    }

    /// 操作失败
    pub fn failed(mut self, message: impl Into<String>) -> Self {
        self.success = false;
        self.error_message = Some(message.into());
        self
    }

    /// 操作成功但附带说明（例如主库已写入、旧账本同步失败）
    pub fn note(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

#[derive(Default)]
struct AuditCounters {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    persisted: AtomicU64,
    failed: AtomicU64,
}

/// 审计队列统计
#[derive(Debug, Clone, Serialize)]
pub struct AuditStats {
    pub enqueued: u64,
    pub dropped: u64,
    pub persisted: u64,
    pub failed: u64,
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub worker_alive: bool,
}

#[derive(Clone)]
pub struct AuditService {
    sender: mpsc::Sender<PendingAuditEntry>,
    store: Arc<dyn AuditStore>,
    counters: Arc<AuditCounters>,
    write_timeout: Duration,
    retention_days: u32,
}

impl AuditService {
    /// 创建服务并启动后台写入任务
    ///
    /// 返回的 `JoinHandle` 在所有 `AuditService` 克隆被释放、队列排空后结束。
    pub fn start(store: Arc<dyn AuditStore>, config: &AuditConfig) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let counters = Arc::new(AuditCounters::default());
        let write_timeout = Duration::from_secs(config.write_timeout_secs);

        let handle = tokio::spawn(run_worker(
            receiver,
            store.clone(),
            counters.clone(),
            write_timeout,
        ));

        info!(
            capacity = config.queue_capacity,
            write_timeout_secs = config.write_timeout_secs,
            "Audit worker started"
        );

        let service = AuditService {
            sender,
            store,
            counters,
            write_timeout,
            retention_days: config.retention_days,
        };
        (service, handle)
    }

    /// 记录一条审计（不阻塞、不返回错误）
    pub fn record(&self, entry: PendingAuditEntry) {
        match self.sender.try_send(entry) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("audit_enqueued_total").increment(1);
            }
            Err(TrySendError::Full(entry)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("audit_dropped_total").increment(1);
                warn!(
                    action = %entry.action,
                    resource_id = ?entry.resource_id,
                    "Audit queue full, entry dropped"
                );
            }
            Err(TrySendError::Closed(entry)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("audit_dropped_total").increment(1);
                error!(
                    action = %entry.action,
                    resource_id = ?entry.resource_id,
                    "Audit worker stopped, entry dropped"
                );
            }
        }
    }

    /// 同步写入，返回前条目已落库
    pub async fn record_sync(&self, entry: PendingAuditEntry) -> Result<AuditLog, AppError> {
        let log = AuditLog::from_pending(entry, Utc::now());

        match tokio::time::timeout(self.write_timeout, self.store.insert_audit_log(&log)).await {
            Ok(Ok(())) => {
                self.counters.persisted.fetch_add(1, Ordering::Relaxed);
                Ok(log)
            }
            Ok(Err(e)) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("audit_persist_failures_total").increment(1);
                Err(e)
            }
            Err(_) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("audit_persist_failures_total").increment(1);
                Err(AppError::Timeout("audit log write".to_string()))
            }
        }
    }

    pub fn stats(&self) -> AuditStats {
        let queue_capacity = self.sender.max_capacity();
        AuditStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            persisted: self.counters.persisted.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            queue_depth: queue_capacity.saturating_sub(self.sender.capacity()),
            queue_capacity,
            worker_alive: self.is_worker_alive(),
        }
    }

    pub fn is_worker_alive(&self) -> bool {
        !self.sender.is_closed()
    }

    pub fn default_retention_days(&self) -> u32 {
        self.retention_days
    }

    /// 查询审计日志
    pub async fn query_logs(
        &self,
        filters: &AuditLogFilters,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditLog>, AppError> {
        self.store.query_audit_logs(filters, limit, offset).await
    }

    /// 查询审计日志数量
    pub async fn count_logs(&self, filters: &AuditLogFilters) -> Result<i64, AppError> {
        self.store.count_audit_logs(filters).await
    }

    pub async fn get_log(&self, id: Uuid) -> Result<AuditLog, AppError> {
        self.store
            .find_audit_log(id)
            .await?
            .ok_or_else(|| AppError::not_found("audit log"))
    }

    /// 删除超过保留期的审计日志
    pub async fn cleanup(&self, retention_days: u32) -> Result<u64, AppError> {
        if retention_days == 0 {
            return Err(AppError::validation("retention_days debe ser mayor a cero"));
        }

        let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));
        let deleted = self.store.delete_audit_logs_before(cutoff).await?;

        info!(retention_days, deleted, %cutoff, "Audit logs cleaned up");
        Ok(deleted)
    }
}

async fn run_worker(
    mut receiver: mpsc::Receiver<PendingAuditEntry>,
    store: Arc<dyn AuditStore>,
    counters: Arc<AuditCounters>,
    write_timeout: Duration,
) {
    while let Some(entry) = receiver.recv().await {
        let log = AuditLog::from_pending(entry, Utc::now());

        match tokio::time::timeout(write_timeout, store.insert_audit_log(&log)).await {
            Ok(Ok(())) => {
                counters.persisted.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("audit_persist_failures_total").increment(1);
                error!(
                    error = %e,
                    action = %log.action,
                    resource_id = ?log.resource_id,
                    "Failed to persist audit log"
                );
            }
            Err(_) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("audit_persist_failures_total").increment(1);
                error!(
                    action = %log.action,
                    resource_id = ?log.resource_id,
                    timeout_secs = write_timeout.as_secs(),
                    "Audit log write timed out"
                );
            }
        }
    }

    info!("Audit worker stopped");
}

/// 定期清理任务，间隔为 0 时不启动
pub fn spawn_retention_task(service: AuditService, interval_hours: u64) -> Option<JoinHandle<()>> {
    if interval_hours == 0 {
        return None;
    }

    let period = Duration::from_secs(interval_hours * 3600);
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // 第一次 tick 立即返回，跳过启动时的清理
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let days = service.default_retention_days();
            if let Err(e) = service.cleanup(days).await {
                warn!(error = %e, "Scheduled audit cleanup failed");
            }
        }
    }))
}
