//! Debt consolidation models

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

/// 债务人欠某个债权人的净额
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreditorBalance {
    pub creditor_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creditor_name: Option<String>,
    pub amount: Decimal,
}

/// 债务人 id -> 其欠款列表
pub type DebtConsolidation = BTreeMap<Uuid, Vec<CreditorBalance>>;
