//! 家庭目录查询（成员、联系人、分类、支付方式、账户）
//!
//! 这些表由应用其它部分维护，这里只校验账目引用的归属。

use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::AppError,
    models::movement::{PartyRef, ValidMovement},
};

/// 按家庭归属的引用类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    Contact,
    Category,
    PaymentMethod,
    Account,
}

impl ReferenceKind {
    fn table(&self) -> &'static str {
        match self {
            ReferenceKind::Contact => "contacts",
            ReferenceKind::Category => "categories",
            ReferenceKind::PaymentMethod => "payment_methods",
            ReferenceKind::Account => "accounts",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ReferenceKind::Contact => "contacto",
            ReferenceKind::Category => "categoría",
            ReferenceKind::PaymentMethod => "método de pago",
            ReferenceKind::Account => "cuenta",
        }
    }
}

/// 账户类型，储蓄和支票账户可以入账
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Savings,
    Checking,
    Cash,
}

impl AccountType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "savings" => Some(AccountType::Savings),
            "checking" => Some(AccountType::Checking),
            "cash" => Some(AccountType::Cash),
            _ => None,
        }
    }

    pub fn can_receive_income(&self) -> bool {
        matches!(self, AccountType::Savings | AccountType::Checking)
    }
}

#[derive(Clone)]
pub struct DirectoryRepository {
    db: PgPool,
}

impl DirectoryRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// 用户是否属于该家庭
    ///
    /// 用户存在但属于其他家庭时返回 Forbidden，不存在时返回校验错误。
    pub async fn require_member(&self, household_id: Uuid, user_id: Uuid) -> Result<(), AppError> {
        let is_member: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM household_members WHERE household_id = $1 AND user_id = $2)",
        )
        .bind(household_id)
        .bind(user_id)
        .fetch_one(&self.db)
        .await?;

        if is_member {
            return Ok(());
        }

        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
            .bind(user_id)
            .fetch_one(&self.db)
            .await?;

        if exists {
            tracing::warn!(%household_id, %user_id, "Cross-household member reference");
            Err(AppError::Forbidden)
        } else {
            Err(AppError::validation(format!("El miembro {} no existe", user_id)))
        }
    }

    /// 引用对象必须属于该家庭
    pub async fn require_owned(
        &self,
        kind: ReferenceKind,
        household_id: Uuid,
        id: Uuid,
    ) -> Result<(), AppError> {
        let sql = format!("SELECT household_id FROM {} WHERE id = $1", kind.table());
        let owner: Option<Uuid> = sqlx::query_scalar(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        match owner {
            Some(owner) if owner == household_id => Ok(()),
            Some(_) => {
                tracing::warn!(%household_id, reference = %id, kind = kind.table(), "Cross-household reference");
                Err(AppError::Forbidden)
            }
            None => Err(AppError::validation(format!(
                "No existe {} con id {}",
                kind.label(),
                id
            ))),
        }
    }

    /// 收款账户必须属于该家庭且能入账
    pub async fn require_income_account(
        &self,
        household_id: Uuid,
        account_id: Uuid,
    ) -> Result<(), AppError> {
        self.require_owned(ReferenceKind::Account, household_id, account_id)
            .await?;

        let account_type: String =
            sqlx::query_scalar("SELECT account_type FROM accounts WHERE id = $1")
                .bind(account_id)
                .fetch_one(&self.db)
                .await?;

        let income_capable = AccountType::parse(&account_type)
            .map(|t| t.can_receive_income())
            .unwrap_or(false);
        if !income_capable {
            return Err(AppError::validation(
                "La cuenta receptora debe ser de ahorros o corriente",
            ));
        }
        Ok(())
    }

    pub async fn require_party(&self, household_id: Uuid, party: PartyRef) -> Result<(), AppError> {
        match party {
            PartyRef::Member(id) => self.require_member(household_id, id).await,
            PartyRef::Contact(id) => {
                self.require_owned(ReferenceKind::Contact, household_id, id)
                    .await
            }
        }
    }

    /// 校验一条账目的全部外部引用
    pub async fn verify_references(
        &self,
        household_id: Uuid,
        movement: &ValidMovement,
    ) -> Result<(), AppError> {
        self.require_party(household_id, movement.payer).await?;

        if let Some(counterparty) = movement.counterparty {
            self.require_party(household_id, counterparty).await?;
        }
        for participant in &movement.participants {
            self.require_party(household_id, participant.party).await?;
        }
        if let Some(category_id) = movement.category_id {
            self.require_owned(ReferenceKind::Category, household_id, category_id)
                .await?;
        }
        if let Some(payment_method_id) = movement.payment_method_id {
            self.require_owned(ReferenceKind::PaymentMethod, household_id, payment_method_id)
                .await?;
        }
        if let Some(account_id) = movement.receiver_account_id {
            self.require_income_account(household_id, account_id).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_income_capable_accounts() {
        assert!(AccountType::Savings.can_receive_income());
        assert!(AccountType::Checking.can_receive_income());
        assert!(!AccountType::Cash.can_receive_income());
        assert_eq!(AccountType::parse("checking"), Some(AccountType::Checking));
        assert_eq!(AccountType::parse("credit"), None);
    }
}
