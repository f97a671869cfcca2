//! Audit domain models

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Persisted audit log entry
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditLog {
    pub id: Uuid,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<Uuid>,
    pub actor_user_id: Option<Uuid>,
    pub household_id: Option<Uuid>,
    pub old_values: Option<serde_json::Value>,
    pub new_values: Option<serde_json::Value>,
    pub success: bool,
    pub error_message: Option<String>,
    pub checksum: String,
    pub created_at: DateTime<Utc>,
}

impl AuditLog {
    /// 在持久化时刻生成完整条目
    ///
    /// 时间截断到微秒，与 Postgres TIMESTAMPTZ 精度一致，
    /// 否则读回后校验和对不上。
    pub fn from_pending(entry: PendingAuditEntry, persisted_at: DateTime<Utc>) -> Self {
        let mut log = AuditLog {
            id: Uuid::new_v4(),
            action: entry.action,
            resource_type: entry.resource_type,
            resource_id: entry.resource_id,
            actor_user_id: entry.actor_user_id,
            household_id: entry.household_id,
            old_values: entry.old_values,
            new_values: entry.new_values,
            success: entry.success,
            error_message: entry.error_message,
            checksum: String::new(),
            created_at: persisted_at.trunc_subsecs(6),
        };
        log.checksum = log.compute_checksum();
        log
    }

    /// SHA-256 over every content field, hex encoded
    pub fn compute_checksum(&self) -> String {
        fn opt<T: ToString>(v: &Option<T>) -> String {
            v.as_ref().map(|x| x.to_string()).unwrap_or_default()
        }

        let mut hasher = Sha256::new();
        for part in [
            self.id.to_string(),
            self.action.clone(),
            self.resource_type.clone(),
            opt(&self.resource_id),
            opt(&self.actor_user_id),
            opt(&self.household_id),
            opt(&self.old_values),
            opt(&self.new_values),
            self.success.to_string(),
            opt(&self.error_message),
            self.created_at.timestamp_micros().to_string(),
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0x1f]);
        }
        hex::encode(hasher.finalize())
    }

    pub fn integrity_ok(&self) -> bool {
        self.checksum == self.compute_checksum()
    }
}

/// 尚未落库的审计条目（生产者提交到队列的内容）
#[derive(Debug, Clone, Serialize)]
pub struct PendingAuditEntry {
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<Uuid>,
    pub actor_user_id: Option<Uuid>,
    pub household_id: Option<Uuid>,
    pub old_values: Option<serde_json::Value>,
    pub new_values: Option<serde_json::Value>,
    pub success: bool,
    pub error_message: Option<String>,
}

/// Audit log filters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditLogFilters {
    pub user_id: Option<Uuid>,
    pub household_id: Option<Uuid>,
    pub action: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<Uuid>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub success_only: Option<bool>,
}

impl AuditLogFilters {
    /// 内存中的匹配逻辑，与仓库层 SQL 条件保持一致
    pub fn matches(&self, log: &AuditLog) -> bool {
        self.user_id.map_or(true, |v| log.actor_user_id == Some(v))
            && self.household_id.map_or(true, |v| log.household_id == Some(v))
            && self.action.as_ref().map_or(true, |v| &log.action == v)
            && self.resource_type.as_ref().map_or(true, |v| &log.resource_type == v)
            && self.resource_id.map_or(true, |v| log.resource_id == Some(v))
            && self.start_time.map_or(true, |v| log.created_at >= v)
            && self.end_time.map_or(true, |v| log.created_at <= v)
            && (self.success_only != Some(true) || log.success)
    }
}

/// 单条审计日志响应（附带完整性校验结果）
#[derive(Debug, Serialize)]
pub struct AuditLogResponse {
    #[serde(flatten)]
    pub log: AuditLog,
    pub integrity_ok: bool,
}

impl From<AuditLog> for AuditLogResponse {
    fn from(log: AuditLog) -> Self {
        let integrity_ok = log.integrity_ok();
        AuditLogResponse { log, integrity_ok }
    }
}
