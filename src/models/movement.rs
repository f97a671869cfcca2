//! Movement domain models

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::error::AppError;

/// 账目类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "movement_type", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    /// 整个家庭的支出
    Household,
    /// 按参与者分摊的支出
    Split,
    /// 两方之间的还款
    DebtPayment,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Household => "HOUSEHOLD",
            MovementType::Split => "SPLIT",
            MovementType::DebtPayment => "DEBT_PAYMENT",
        }
    }
}

impl std::fmt::Display for MovementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 账目涉及的一方：家庭成员或外部联系人
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum PartyRef {
    Member(Uuid),
    Contact(Uuid),
}

impl PartyRef {
    /// 从互斥的 (user_id, contact_id) 字段对构造
    ///
    /// 两者同时给出时报错；都为空时返回 `None`，由调用方决定是否必填。
    pub fn from_pair(
        user_id: Option<Uuid>,
        contact_id: Option<Uuid>,
        role: &str,
    ) -> Result<Option<PartyRef>, AppError> {
        match (user_id, contact_id) {
            (Some(_), Some(_)) => Err(AppError::validation(format!(
                "El {} debe ser un miembro o un contacto, no ambos",
                role
            ))),
            (Some(id), None) => Ok(Some(PartyRef::Member(id))),
            (None, Some(id)) => Ok(Some(PartyRef::Contact(id))),
            (None, None) => Ok(None),
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            PartyRef::Member(id) | PartyRef::Contact(id) => *id,
        }
    }

    pub fn is_member(&self) -> bool {
        matches!(self, PartyRef::Member(_))
    }

    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            PartyRef::Member(id) => Some(*id),
            PartyRef::Contact(_) => None,
        }
    }

    pub fn contact_id(&self) -> Option<Uuid> {
        match self {
            PartyRef::Member(_) => None,
            PartyRef::Contact(id) => Some(*id),
        }
    }
}

/// 分摊参与者（仅 SPLIT）
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Participant {
    pub id: Uuid,
    pub movement_id: Uuid,
    #[serde(rename = "user_id")]
    pub participant_user_id: Option<Uuid>,
    #[serde(rename = "contact_id")]
    pub participant_contact_id: Option<Uuid>,
    /// 0-1 之间的小数，不是 0-100
    pub percentage: Decimal,
    pub exact_amount: Option<Decimal>,
    pub name: Option<String>,
    /// 该参与者实际承担的金额
    #[sqlx(skip)]
    #[serde(default)]
    pub amount: Decimal,
}

impl Participant {
    pub fn party(&self) -> Option<PartyRef> {
        match (self.participant_user_id, self.participant_contact_id) {
            (Some(id), None) => Some(PartyRef::Member(id)),
            (None, Some(id)) => Some(PartyRef::Contact(id)),
            _ => None,
        }
    }

    /// 精确金额优先，否则按比例折算
    pub fn share_of(&self, total: Decimal) -> Decimal {
        self.exact_amount
            .unwrap_or_else(|| (self.percentage * total).round_dp(2))
    }
}

/// 账目（已解析名称）
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Movement {
    pub id: Uuid,
    pub household_id: Uuid,
    #[serde(rename = "type")]
    pub movement_type: MovementType,
    pub description: String,
    pub amount: Decimal,
    pub movement_date: NaiveDate,

    pub category_id: Option<Uuid>,
    pub category_name: Option<String>,

    pub payer_user_id: Option<Uuid>,
    pub payer_contact_id: Option<Uuid>,
    pub payer_name: Option<String>,

    pub counterparty_user_id: Option<Uuid>,
    pub counterparty_contact_id: Option<Uuid>,
    pub counterparty_name: Option<String>,

    pub payment_method_id: Option<Uuid>,
    pub payment_method_name: Option<String>,
    pub receiver_account_id: Option<Uuid>,
    pub receiver_account_name: Option<String>,

    pub generated_from_template_id: Option<Uuid>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[sqlx(skip)]
    #[serde(default)]
    pub participants: Vec<Participant>,
}

impl Movement {
    pub fn payer(&self) -> Option<PartyRef> {
        PartyRef::from_pair(self.payer_user_id, self.payer_contact_id, "pagador")
            .ok()
            .flatten()
    }

    pub fn counterparty(&self) -> Option<PartyRef> {
        PartyRef::from_pair(
            self.counterparty_user_id,
            self.counterparty_contact_id,
            "contraparte",
        )
        .ok()
        .flatten()
    }

    /// 附加参与者并计算各自承担的金额
    pub fn attach_participants(&mut self, mut participants: Vec<Participant>) {
        for p in participants.iter_mut() {
            p.amount = p.share_of(self.amount);
        }
        self.participants = participants;
    }

    /// 审计快照
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// 参与者输入：百分比或精确金额二选一，精确金额优先
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParticipantInput {
    pub user_id: Option<Uuid>,
    pub contact_id: Option<Uuid>,
    pub percentage: Option<Decimal>,
    pub exact_amount: Option<Decimal>,
}

impl From<&Participant> for ParticipantInput {
    fn from(p: &Participant) -> Self {
        ParticipantInput {
            user_id: p.participant_user_id,
            contact_id: p.participant_contact_id,
            percentage: if p.exact_amount.is_some() {
                None
            } else {
                Some(p.percentage)
            },
            exact_amount: p.exact_amount,
        }
    }
}

fn validate_positive_amount(amount: &Decimal) -> Result<(), validator::ValidationError> {
    if amount.is_sign_positive() && !amount.is_zero() {
        Ok(())
    } else {
        Err(validator::ValidationError::new("amount_not_positive")
            .with_message("El monto debe ser mayor a cero".into()))
    }
}

/// 创建账目请求
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateMovementRequest {
    #[serde(rename = "type")]
    pub movement_type: MovementType,
    #[validate(custom(function = "validate_positive_amount"))]
    pub amount: Decimal,
    #[validate(length(max = 500, message = "La descripción no puede superar 500 caracteres"))]
    pub description: String,
    pub movement_date: Option<NaiveDate>,
    pub category_id: Option<Uuid>,
    pub payer_user_id: Option<Uuid>,
    pub payer_contact_id: Option<Uuid>,
    pub counterparty_user_id: Option<Uuid>,
    pub counterparty_contact_id: Option<Uuid>,
    pub payment_method_id: Option<Uuid>,
    pub receiver_account_id: Option<Uuid>,
    pub participants: Option<Vec<ParticipantInput>>,
    pub generated_from_template_id: Option<Uuid>,
}

/// 区分 "字段缺省" 与 "显式置空"
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// 更新账目请求（PATCH 语义）
///
/// 给出付款方任一字段即整体替换付款方，对方同理。
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateMovementRequest {
    #[serde(rename = "type")]
    pub movement_type: Option<MovementType>,
    #[validate(custom(function = "validate_positive_amount"))]
    pub amount: Option<Decimal>,
    #[validate(length(max = 500, message = "La descripción no puede superar 500 caracteres"))]
    pub description: Option<String>,
    pub movement_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "nullable")]
    pub category_id: Option<Option<Uuid>>,
    pub payer_user_id: Option<Uuid>,
    pub payer_contact_id: Option<Uuid>,
    pub counterparty_user_id: Option<Uuid>,
    pub counterparty_contact_id: Option<Uuid>,
    #[serde(default, deserialize_with = "nullable")]
    pub payment_method_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "nullable")]
    pub receiver_account_id: Option<Option<Uuid>>,
    pub participants: Option<Vec<ParticipantInput>>,
}

/// 待校验的完整账目状态（创建请求或 "现有记录 + 补丁"）
#[derive(Debug, Clone, PartialEq)]
pub struct MovementDraft {
    pub movement_type: MovementType,
    pub amount: Decimal,
    pub description: String,
    pub movement_date: Option<NaiveDate>,
    pub category_id: Option<Uuid>,
    pub payer: Option<PartyRef>,
    pub counterparty: Option<PartyRef>,
    pub payment_method_id: Option<Uuid>,
    pub receiver_account_id: Option<Uuid>,
    pub participants: Vec<ParticipantInput>,
    pub generated_from_template_id: Option<Uuid>,
}

impl MovementDraft {
    pub fn from_create(req: &CreateMovementRequest) -> Result<Self, AppError> {
        Ok(MovementDraft {
            movement_type: req.movement_type,
            amount: req.amount,
            description: req.description.clone(),
            movement_date: req.movement_date,
            category_id: req.category_id,
            payer: PartyRef::from_pair(req.payer_user_id, req.payer_contact_id, "pagador")?,
            counterparty: PartyRef::from_pair(
                req.counterparty_user_id,
                req.counterparty_contact_id,
                "contraparte",
            )?,
            payment_method_id: req.payment_method_id,
            receiver_account_id: req.receiver_account_id,
            participants: req.participants.clone().unwrap_or_default(),
            generated_from_template_id: req.generated_from_template_id,
        })
    }

    pub fn from_existing(movement: &Movement) -> Self {
        MovementDraft {
            movement_type: movement.movement_type,
            amount: movement.amount,
            description: movement.description.clone(),
            movement_date: Some(movement.movement_date),
            category_id: movement.category_id,
            payer: movement.payer(),
            counterparty: movement.counterparty(),
            payment_method_id: movement.payment_method_id,
            receiver_account_id: movement.receiver_account_id,
            participants: movement.participants.iter().map(ParticipantInput::from).collect(),
            generated_from_template_id: movement.generated_from_template_id,
        }
    }

    /// 把补丁合并到当前状态
    ///
    /// 类型不再是 SPLIT 时参与者清空；新类型不需要对方时对方清空。
    pub fn apply(mut self, patch: &UpdateMovementRequest) -> Result<Self, AppError> {
        if let Some(t) = patch.movement_type {
            self.movement_type = t;
        }
        if let Some(amount) = patch.amount {
            self.amount = amount;
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(date) = patch.movement_date {
            self.movement_date = Some(date);
        }
        if let Some(category) = patch.category_id {
            self.category_id = category;
        }
        if patch.payer_user_id.is_some() || patch.payer_contact_id.is_some() {
            self.payer = PartyRef::from_pair(patch.payer_user_id, patch.payer_contact_id, "pagador")?;
        }
        if patch.counterparty_user_id.is_some() || patch.counterparty_contact_id.is_some() {
            self.counterparty = PartyRef::from_pair(
                patch.counterparty_user_id,
                patch.counterparty_contact_id,
                "contraparte",
            )?;
        }
        if let Some(pm) = patch.payment_method_id {
            self.payment_method_id = pm;
        }
        if let Some(account) = patch.receiver_account_id {
            self.receiver_account_id = account;
        }
        if let Some(participants) = &patch.participants {
            self.participants = participants.clone();
        }

        if self.movement_type != MovementType::Split {
            self.participants.clear();
        }
        if self.movement_type != MovementType::DebtPayment {
            self.counterparty = None;
            self.receiver_account_id = None;
        }

        Ok(self)
    }
}

/// 已校验、可持久化的参与者
#[derive(Debug, Clone, PartialEq)]
pub struct NewParticipant {
    pub party: PartyRef,
    pub percentage: Decimal,
    pub exact_amount: Option<Decimal>,
}

/// 已通过校验的账目
#[derive(Debug, Clone, PartialEq)]
pub struct ValidMovement {
    pub movement_type: MovementType,
    pub amount: Decimal,
    pub description: String,
    pub movement_date: NaiveDate,
    pub category_id: Option<Uuid>,
    pub payer: PartyRef,
    pub counterparty: Option<PartyRef>,
    pub payment_method_id: Option<Uuid>,
    pub receiver_account_id: Option<Uuid>,
    pub participants: Vec<NewParticipant>,
    pub generated_from_template_id: Option<Uuid>,
}

/// 自然月区间 [start, end)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl MonthRange {
    /// 解析 `YYYY-MM`
    pub fn parse(month: &str) -> Result<Self, AppError> {
        let invalid = || AppError::BadRequest(format!("Mes inválido '{}', use YYYY-MM", month));

        let start = NaiveDate::parse_from_str(&format!("{}-01", month.trim()), "%Y-%m-%d")
            .map_err(|_| invalid())?;
        let end = if start.month() == 12 {
            NaiveDate::from_ymd_opt(start.year() + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(start.year(), start.month() + 1, 1)
        }
        .ok_or_else(invalid)?;

        Ok(MonthRange { start, end })
    }
}

/// 账目列表过滤器
#[derive(Debug, Clone, Default)]
pub struct MovementListFilters {
    pub movement_type: Option<MovementType>,
    pub category_id: Option<Uuid>,
    pub member_id: Option<Uuid>,
    pub start_date: Option<NaiveDate>,
    /// 不含
    pub end_date: Option<NaiveDate>,
}

/// 账目操作作用域：调用者及其所属家庭
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HouseholdScope {
    pub household_id: Uuid,
    pub user_id: Uuid,
}
