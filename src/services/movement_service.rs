//! 账目服务
//!
//! 写路径：校验 -> 引用归属检查 -> 主库事务 -> 旧账本同步 -> 审计。
//! 每次创建、更新、删除恰好产生一条审计（成功或失败）。

use serde::Serialize;
use sqlx::PgPool;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::AppError,
    models::{audit::PendingAuditEntry, debt::DebtConsolidation, movement::*},
    repository::{DirectoryRepository, MovementRepository},
    services::{
        audit_service::{AuditAction, AuditService},
        debt_service::consolidate_debts,
        legacy_sync::{LegacySyncCoordinator, SyncOperation},
    },
    validation::validate_movement,
};

pub const DEFAULT_PAGE_SIZE: i64 = 100;
pub const MAX_PAGE_SIZE: i64 = 500;

#[derive(Debug, Serialize)]
pub struct MovementPage {
    pub movements: Vec<Movement>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Clone)]
pub struct MovementService {
    movements: MovementRepository,
    directory: DirectoryRepository,
    legacy: LegacySyncCoordinator,
    audit: AuditService,
}

impl MovementService {
    pub fn new(db: PgPool, legacy: LegacySyncCoordinator, audit: AuditService) -> Self {
        Self {
            movements: MovementRepository::new(db.clone()),
            directory: DirectoryRepository::new(db),
            legacy,
            audit,
        }
    }

    fn audit_entry(action: AuditAction, scope: HouseholdScope) -> PendingAuditEntry {
        PendingAuditEntry::new(action)
            .actor(scope.user_id)
            .household(scope.household_id)
    }

    /// 读取并确认属于调用者的家庭
    async fn load_scoped(&self, scope: HouseholdScope, id: Uuid) -> Result<Movement, AppError> {
        let movement = self
            .movements
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::not_found("movement"))?;

        if movement.household_id != scope.household_id {
            warn!(
                movement_id = %id,
                household_id = %scope.household_id,
                "Cross-household movement access"
            );
            return Err(AppError::Forbidden);
        }
        Ok(movement)
    }

    async fn reload(&self, id: Uuid) -> Result<Movement, AppError> {
        self.movements
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::internal_error("movement vanished after write"))
    }

    /// 创建账目
    #[instrument(skip(self, request), fields(household_id = %scope.household_id))]
    pub async fn create(
        &self,
        scope: HouseholdScope,
        request: CreateMovementRequest,
    ) -> Result<Movement, AppError> {
        let entry = Self::audit_entry(AuditAction::MovementCreate, scope);

        let movement = match self.persist_create(scope, &request).await {
            Ok(movement) => movement,
            Err(e) => {
                let payload = serde_json::to_value(&request).unwrap_or_default();
                self.audit.record(entry.new_values(payload).failed(e.to_string()));
                return Err(e);
            }
        };

        let sync = self.legacy.forward(SyncOperation::Create, &movement).await;
        self.finish_write(
            entry.resource(Some(movement.id)).new_values(movement.snapshot()),
            "create",
            &sync,
        );

        info!(movement_id = %movement.id, movement_type = %movement.movement_type, "Movement created");
        sync.map(|_| movement)
    }

    async fn persist_create(
        &self,
        scope: HouseholdScope,
        request: &CreateMovementRequest,
    ) -> Result<Movement, AppError> {
        request.validate()?;
        let draft = MovementDraft::from_create(request)?;
        let valid = validate_movement(&draft)?;
        self.directory
            .verify_references(scope.household_id, &valid)
            .await?;

        let id = self.movements.insert(scope, &valid).await?;
        self.reload(id).await
    }

    /// 按 id 查询
    #[instrument(skip(self))]
    pub async fn get(&self, scope: HouseholdScope, id: Uuid) -> Result<Movement, AppError> {
        self.load_scoped(scope, id).await
    }

    /// 列表查询
    #[instrument(skip(self, filters))]
    pub async fn list(
        &self,
        scope: HouseholdScope,
        filters: &MovementListFilters,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<MovementPage, AppError> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let offset = offset.unwrap_or(0).max(0);

        let movements = self
            .movements
            .list(scope.household_id, filters, limit, offset)
            .await?;
        let total = self.movements.count(scope.household_id, filters).await?;

        Ok(MovementPage {
            movements,
            total,
            limit,
            offset,
        })
    }

    /// 更新账目（PATCH 语义，合并后整体重新校验）
    #[instrument(skip(self, request), fields(household_id = %scope.household_id))]
    pub async fn update(
        &self,
        scope: HouseholdScope,
        id: Uuid,
        request: UpdateMovementRequest,
    ) -> Result<Movement, AppError> {
        let entry = Self::audit_entry(AuditAction::MovementUpdate, scope).resource(Some(id));

        let existing = match self.load_scoped(scope, id).await {
            Ok(existing) => existing,
            Err(e) => {
                self.audit.record(entry.failed(e.to_string()));
                return Err(e);
            }
        };
        let entry = entry.old_values(existing.snapshot());

        let updated = match self.persist_update(scope, &existing, &request).await {
            Ok(updated) => updated,
            Err(e) => {
                let payload = serde_json::to_value(&request).unwrap_or_default();
                self.audit.record(entry.new_values(payload).failed(e.to_string()));
                return Err(e);
            }
        };

        let sync = self.legacy.forward(SyncOperation::Update, &updated).await;
        self.finish_write(entry.new_values(updated.snapshot()), "update", &sync);

        info!(movement_id = %id, "Movement updated");
        sync.map(|_| updated)
    }

    async fn persist_update(
        &self,
        scope: HouseholdScope,
        existing: &Movement,
        request: &UpdateMovementRequest,
    ) -> Result<Movement, AppError> {
        request.validate()?;
        let draft = MovementDraft::from_existing(existing).apply(request)?;
        let valid = validate_movement(&draft)?;
        self.directory
            .verify_references(scope.household_id, &valid)
            .await?;

        if !self.movements.update(existing.id, &valid).await? {
            return Err(AppError::not_found("movement"));
        }
        self.reload(existing.id).await
    }

    /// 删除账目
    #[instrument(skip(self), fields(household_id = %scope.household_id))]
    pub async fn delete(&self, scope: HouseholdScope, id: Uuid) -> Result<(), AppError> {
        let entry = Self::audit_entry(AuditAction::MovementDelete, scope).resource(Some(id));

        let existing = match self.load_scoped(scope, id).await {
            Ok(existing) => existing,
            Err(e) => {
                self.audit.record(entry.failed(e.to_string()));
                return Err(e);
            }
        };
        let entry = entry.old_values(existing.snapshot());

        match self.movements.delete(id).await {
            Ok(true) => {}
            Ok(false) => {
                let e = AppError::not_found("movement");
                self.audit.record(entry.failed(e.to_string()));
                return Err(e);
            }
            Err(e) => {
                self.audit.record(entry.failed(e.to_string()));
                return Err(e);
            }
        }

        let sync = self.legacy.forward(SyncOperation::Delete, &existing).await;
        self.finish_write(entry, "delete", &sync);

        info!(movement_id = %id, "Movement deleted");
        sync
    }

    /// 债务合并（只读）
    #[instrument(skip(self))]
    pub async fn consolidate_debts(
        &self,
        scope: HouseholdScope,
        month: Option<MonthRange>,
    ) -> Result<DebtConsolidation, AppError> {
        let movements = self
            .movements
            .list_for_debt_consolidation(scope.household_id, month)
            .await?;
        Ok(consolidate_debts(&movements))
    }

    /// 主库已提交：记审计和指标。同步失败不算业务失败，只在审计里注明
    fn finish_write(&self, entry: PendingAuditEntry, op: &'static str, sync: &Result<(), AppError>) {
        let entry = match sync {
            Ok(()) => entry,
            Err(e) => entry.note(format!("legacy sync failed: {}", e)),
        };
        self.audit.record(entry);
        metrics::counter!("movements_written_total", "op" => op).increment(1);
    }
}
