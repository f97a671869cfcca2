//! Movement repository (账目数据访问)

use std::collections::HashMap;

use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use tracing::error;
use uuid::Uuid;

use crate::{
    error::AppError,
    models::movement::*,
};

/// 带名称解析的账目查询
const MOVEMENT_SELECT: &str = r#"
    SELECT
        m.id, m.household_id, m.movement_type, m.description, m.amount, m.movement_date,
        m.category_id, c.name AS category_name,
        m.payer_user_id, m.payer_contact_id, COALESCE(pu.name, pc.name) AS payer_name,
        m.counterparty_user_id, m.counterparty_contact_id,
        COALESCE(cu.name, cc.name) AS counterparty_name,
        m.payment_method_id, pm.name AS payment_method_name,
        m.receiver_account_id, ra.name AS receiver_account_name,
        m.generated_from_template_id, m.created_by, m.created_at, m.updated_at
    FROM movements m
    LEFT JOIN categories c ON c.id = m.category_id
    LEFT JOIN users pu ON pu.id = m.payer_user_id
    LEFT JOIN contacts pc ON pc.id = m.payer_contact_id
    LEFT JOIN users cu ON cu.id = m.counterparty_user_id
    LEFT JOIN contacts cc ON cc.id = m.counterparty_contact_id
    LEFT JOIN payment_methods pm ON pm.id = m.payment_method_id
    LEFT JOIN accounts ra ON ra.id = m.receiver_account_id
"#;

const PARTICIPANT_SELECT: &str = r#"
    SELECT
        p.id, p.movement_id, p.participant_user_id, p.participant_contact_id,
        p.percentage, p.exact_amount, COALESCE(u.name, c.name) AS name
    FROM movement_participants p
    LEFT JOIN users u ON u.id = p.participant_user_id
    LEFT JOIN contacts c ON c.id = p.participant_contact_id
    WHERE p.movement_id = ANY($1)
    ORDER BY p.created_at, p.id
"#;

#[derive(Clone)]
pub struct MovementRepository {
    db: PgPool,
}

impl MovementRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// 在同一事务中写入账目和参与者
    pub async fn insert(
        &self,
        scope: HouseholdScope,
        movement: &ValidMovement,
    ) -> Result<Uuid, AppError> {
        let mut tx = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to begin transaction");
            AppError::Database(e)
        })?;

        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO movements (
                id, household_id, movement_type, description, amount, movement_date,
                category_id, payer_user_id, payer_contact_id,
                counterparty_user_id, counterparty_contact_id,
                payment_method_id, receiver_account_id, generated_from_template_id, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(id)
        .bind(scope.household_id)
        .bind(movement.movement_type)
        .bind(&movement.description)
        .bind(movement.amount)
        .bind(movement.movement_date)
        .bind(movement.category_id)
        .bind(movement.payer.user_id())
        .bind(movement.payer.contact_id())
        .bind(movement.counterparty.and_then(|c| c.user_id()))
        .bind(movement.counterparty.and_then(|c| c.contact_id()))
        .bind(movement.payment_method_id)
        .bind(movement.receiver_account_id)
        .bind(movement.generated_from_template_id)
        .bind(scope.user_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to insert movement");
            AppError::Database(e)
        })?;

        Self::insert_participants(&mut tx, id, &movement.participants).await?;

        tx.commit().await.map_err(|e| {
            error!(error = %e, movement_id = %id, "Failed to commit transaction");
            AppError::Database(e)
        })?;

        Ok(id)
    }

    async fn insert_participants(
        tx: &mut Transaction<'_, Postgres>,
        movement_id: Uuid,
        participants: &[NewParticipant],
    ) -> Result<(), AppError> {
        for participant in participants {
            sqlx::query(
                r#"
                INSERT INTO movement_participants (
                    id, movement_id, participant_user_id, participant_contact_id,
                    percentage, exact_amount
                )
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(movement_id)
            .bind(participant.party.user_id())
            .bind(participant.party.contact_id())
            .bind(participant.percentage)
            .bind(participant.exact_amount)
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                error!(error = %e, %movement_id, "Failed to insert participant");
                AppError::Database(e)
            })?;
        }
        Ok(())
    }

    /// 按 id 查询（不做家庭过滤，由服务层判断归属）
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Movement>, AppError> {
        let mut qb = QueryBuilder::<Postgres>::new(MOVEMENT_SELECT);
        qb.push(" WHERE m.id = ").push_bind(id);

        let movement = qb
            .build_query_as::<Movement>()
            .fetch_optional(&self.db)
            .await?;

        match movement {
            Some(movement) => {
                let mut movements = vec![movement];
                self.load_participants(&mut movements).await?;
                Ok(movements.pop())
            }
            None => Ok(None),
        }
    }

    /// 查询家庭账目列表
    pub async fn list(
        &self,
        household_id: Uuid,
        filters: &MovementListFilters,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Movement>, AppError> {
        let mut qb = QueryBuilder::<Postgres>::new(MOVEMENT_SELECT);
        qb.push(" WHERE m.household_id = ").push_bind(household_id);
        push_filters(&mut qb, filters);
        qb.push(" ORDER BY m.movement_date DESC, m.created_at DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let mut movements = qb
            .build_query_as::<Movement>()
            .fetch_all(&self.db)
            .await?;
        self.load_participants(&mut movements).await?;

        Ok(movements)
    }

    /// 统计家庭账目数量
    pub async fn count(
        &self,
        household_id: Uuid,
        filters: &MovementListFilters,
    ) -> Result<i64, AppError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM movements m");
        qb.push(" WHERE m.household_id = ").push_bind(household_id);
        push_filters(&mut qb, filters);

        let count: i64 = qb.build_query_scalar().fetch_one(&self.db).await?;
        Ok(count)
    }

    /// 债务合并所需的账目（SPLIT 与 DEBT_PAYMENT），可按月限定
    pub async fn list_for_debt_consolidation(
        &self,
        household_id: Uuid,
        month: Option<MonthRange>,
    ) -> Result<Vec<Movement>, AppError> {
        let mut qb = QueryBuilder::<Postgres>::new(MOVEMENT_SELECT);
        qb.push(" WHERE m.household_id = ").push_bind(household_id);
        qb.push(" AND m.movement_type IN ('SPLIT', 'DEBT_PAYMENT')");
        if let Some(range) = month {
            qb.push(" AND m.movement_date >= ").push_bind(range.start);
            qb.push(" AND m.movement_date < ").push_bind(range.end);
        }
        qb.push(" ORDER BY m.movement_date, m.created_at");

        let mut movements = qb
            .build_query_as::<Movement>()
            .fetch_all(&self.db)
            .await?;
        self.load_participants(&mut movements).await?;

        Ok(movements)
    }

    /// 更新账目并整体替换参与者
    pub async fn update(&self, id: Uuid, movement: &ValidMovement) -> Result<bool, AppError> {
        let mut tx = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to begin transaction");
            AppError::Database(e)
        })?;

        let result = sqlx::query(
            r#"
            UPDATE movements
            SET
                movement_type = $2,
                description = $3,
                amount = $4,
                movement_date = $5,
                category_id = $6,
                payer_user_id = $7,
                payer_contact_id = $8,
                counterparty_user_id = $9,
                counterparty_contact_id = $10,
                payment_method_id = $11,
                receiver_account_id = $12,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(movement.movement_type)
        .bind(&movement.description)
        .bind(movement.amount)
        .bind(movement.movement_date)
        .bind(movement.category_id)
        .bind(movement.payer.user_id())
        .bind(movement.payer.contact_id())
        .bind(movement.counterparty.and_then(|c| c.user_id()))
        .bind(movement.counterparty.and_then(|c| c.contact_id()))
        .bind(movement.payment_method_id)
        .bind(movement.receiver_account_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!(error = %e, movement_id = %id, "Failed to update movement");
            AppError::Database(e)
        })?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query("DELETE FROM movement_participants WHERE movement_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        Self::insert_participants(&mut tx, id, &movement.participants).await?;

        tx.commit().await.map_err(|e| {
            error!(error = %e, movement_id = %id, "Failed to commit transaction");
            AppError::Database(e)
        })?;

        Ok(true)
    }

    /// 删除账目，参与者随外键级联删除
    pub async fn delete(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM movements WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn load_participants(&self, movements: &mut [Movement]) -> Result<(), AppError> {
        let ids: Vec<Uuid> = movements
            .iter()
            .filter(|m| m.movement_type == MovementType::Split)
            .map(|m| m.id)
            .collect();
        if ids.is_empty() {
            return Ok(());
        }

        let rows = sqlx::query_as::<_, Participant>(PARTICIPANT_SELECT)
            .bind(&ids)
            .fetch_all(&self.db)
            .await?;

        let mut by_movement: HashMap<Uuid, Vec<Participant>> = HashMap::new();
        for row in rows {
            by_movement.entry(row.movement_id).or_default().push(row);
        }
        for movement in movements.iter_mut() {
            if let Some(participants) = by_movement.remove(&movement.id) {
                movement.attach_participants(participants);
            }
        }

        Ok(())
    }
}

fn push_filters<'a>(qb: &mut QueryBuilder<'a, Postgres>, filters: &'a MovementListFilters) {
    if let Some(movement_type) = filters.movement_type {
        qb.push(" AND m.movement_type = ").push_bind(movement_type);
    }
    if let Some(category_id) = filters.category_id {
        qb.push(" AND m.category_id = ").push_bind(category_id);
    }
    if let Some(start_date) = filters.start_date {
        qb.push(" AND m.movement_date >= ").push_bind(start_date);
    }
    if let Some(end_date) = filters.end_date {
        qb.push(" AND m.movement_date < ").push_bind(end_date);
    }
    if let Some(member_id) = filters.member_id {
        qb.push(" AND (m.payer_user_id = ")
            .push_bind(member_id)
            .push(" OR m.counterparty_user_id = ")
            .push_bind(member_id)
            .push(
                " OR EXISTS (SELECT 1 FROM movement_participants mp \
                 WHERE mp.movement_id = m.id AND mp.participant_user_id = ",
            )
            .push_bind(member_id)
            .push("))");
    }
}
