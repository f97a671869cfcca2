//! 旧账本双写
//!
//! 主库提交之后，把账目转换成旧系统（电子表格）的格式并同步推送。
//! 不重试：失败时主库数据保留，调用方收到 `UpstreamUnavailable`。

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, Secret};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    config::LegacySyncConfig,
    error::AppError,
    models::movement::{Movement, MovementType},
};

/// 同步的写操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOperation {
    Create,
    Update,
    Delete,
}

impl SyncOperation {
    pub fn accion(&self) -> &'static str {
        match self {
            SyncOperation::Create => "crear",
            SyncOperation::Update => "actualizar",
            SyncOperation::Delete => "eliminar",
        }
    }
}

/// 旧系统的账目类型名
pub fn legacy_type_name(movement_type: MovementType) -> &'static str {
    match movement_type {
        MovementType::Household => "Gasto del hogar",
        MovementType::Split => "Gasto compartido",
        MovementType::DebtPayment => "Pago de deuda",
    }
}

/// 旧系统接收的记录格式
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegacyMovementRecord {
    pub accion: &'static str,
    pub id: Uuid,
    pub hogar_id: Uuid,
    pub tipo: &'static str,
    pub fecha: String,
    pub descripcion: String,
    pub monto: Decimal,
    pub categoria: Option<String>,
    pub pagador: Option<String>,
    pub contraparte: Option<String>,
    pub metodo_pago: Option<String>,
    pub cuenta_receptora: Option<String>,
    /// "Nombre (50.00%), Otro (50.00%)"
    pub participantes: String,
}

impl LegacyMovementRecord {
    pub fn from_movement(operation: SyncOperation, movement: &Movement) -> Self {
        let participantes = movement
            .participants
            .iter()
            .map(|p| {
                let name = p.name.clone().unwrap_or_else(|| {
                    p.party()
                        .map(|party| party.id().to_string())
                        .unwrap_or_default()
                });
                let percent = (p.percentage * Decimal::ONE_HUNDRED).round_dp(2);
                let mut percent = percent.normalize();
                percent.rescale(2);
                format!("{} ({}%)", name, percent)
            })
            .collect::<Vec<_>>()
            .join(", ");

        LegacyMovementRecord {
            accion: operation.accion(),
            id: movement.id,
            hogar_id: movement.household_id,
            tipo: legacy_type_name(movement.movement_type),
            fecha: movement.movement_date.format("%Y-%m-%d").to_string(),
            descripcion: movement.description.clone(),
            monto: movement.amount,
            categoria: movement.category_name.clone(),
            pagador: movement.payer_name.clone(),
            contraparte: movement.counterparty_name.clone(),
            metodo_pago: movement.payment_method_name.clone(),
            cuenta_receptora: movement.receiver_account_name.clone(),
            participantes,
        }
    }
}

#[derive(Debug, Error)]
pub enum LegacySyncError {
    #[error("legacy ledger request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("legacy ledger responded with status {status}: {body}")]
    Status { status: u16, body: String },
}

/// 旧账本接口
#[async_trait]
pub trait LegacyLedger: Send + Sync + 'static {
    async fn push(&self, record: &LegacyMovementRecord) -> Result<(), LegacySyncError>;
}

/// 基于 webhook 的旧账本实现
pub struct HttpLegacyLedger {
    client: Client,
    webhook_url: String,
    api_key: Secret<String>,
}

impl HttpLegacyLedger {
    pub fn new(
        webhook_url: impl Into<String>,
        api_key: Secret<String>,
        timeout: Duration,
    ) -> Result<Self, LegacySyncError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            webhook_url: webhook_url.into(),
            api_key,
        })
    }
}

#[async_trait]
impl LegacyLedger for HttpLegacyLedger {
    async fn push(&self, record: &LegacyMovementRecord) -> Result<(), LegacySyncError> {
        let response = self
            .client
            .post(&self.webhook_url)
            .header("X-API-Key", self.api_key.expose_secret().as_str())
            .json(record)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    debug!(status, error = %e, "Failed to read legacy ledger error body");
                    String::new()
                }
            };
            return Err(LegacySyncError::Status { status, body });
        }

        debug!(movement_id = %record.id, accion = record.accion, "Legacy ledger accepted record");
        Ok(())
    }
}

/// 双写协调器，未配置旧账本时为空操作
#[derive(Clone, Default)]
pub struct LegacySyncCoordinator {
    ledger: Option<Arc<dyn LegacyLedger>>,
}

impl LegacySyncCoordinator {
    pub fn disabled() -> Self {
        Self { ledger: None }
    }

    pub fn new(ledger: Arc<dyn LegacyLedger>) -> Self {
        Self {
            ledger: Some(ledger),
        }
    }

    pub fn from_config(config: &LegacySyncConfig) -> Result<Self, AppError> {
        let (Some(url), true) = (config.webhook_url.as_deref(), config.is_enabled()) else {
            info!("Legacy ledger sync disabled");
            return Ok(Self::disabled());
        };
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| AppError::Config("legacy_sync.api_key is required".to_string()))?;

        let ledger = HttpLegacyLedger::new(url, api_key, Duration::from_secs(config.timeout_secs))
            .map_err(|e| AppError::Config(e.to_string()))?;

        info!(webhook_url = %url, "Legacy ledger sync enabled");
        Ok(Self::new(Arc::new(ledger)))
    }

    pub fn is_enabled(&self) -> bool {
        self.ledger.is_some()
    }

    /// 推送一次，失败即返回 `UpstreamUnavailable`
    #[instrument(skip(self, movement), fields(movement_id = %movement.id))]
    pub async fn forward(
        &self,
        operation: SyncOperation,
        movement: &Movement,
    ) -> Result<(), AppError> {
        let Some(ledger) = &self.ledger else {
            return Ok(());
        };

        let record = LegacyMovementRecord::from_movement(operation, movement);
        ledger.push(&record).await.map_err(|e| {
            metrics::counter!("legacy_sync_failures_total").increment(1);
            warn!(error = %e, accion = operation.accion(), "Legacy ledger sync failed");
            AppError::upstream(Some(movement.id), e.to_string())
        })
    }
}
