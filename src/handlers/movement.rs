//! 账目的 HTTP 处理器

use crate::{
    auth::middleware::AuthContext,
    error::AppError,
    middleware::AppState,
    models::{debt::DebtConsolidation, movement::*},
};
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{Days, NaiveDate};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

/// 账目列表查询参数
#[derive(Debug, Default, Deserialize)]
pub struct MovementQuery {
    #[serde(rename = "type")]
    pub movement_type: Option<MovementType>,
    pub category_id: Option<Uuid>,
    pub member_id: Option<Uuid>,
    /// YYYY-MM，优先于 start_date/end_date
    pub month: Option<String>,
    pub start_date: Option<NaiveDate>,
    /// 含当天
    pub end_date: Option<NaiveDate>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl MovementQuery {
    pub fn to_filters(&self) -> Result<MovementListFilters, AppError> {
        let (start_date, end_date) = match self.month.as_deref() {
            Some(month) => {
                let range = MonthRange::parse(month)?;
                (Some(range.start), Some(range.end))
            }
            None => (
                self.start_date,
                self.end_date.and_then(|d| d.checked_add_days(Days::new(1))),
            ),
        };

        Ok(MovementListFilters {
            movement_type: self.movement_type,
            category_id: self.category_id,
            member_id: self.member_id,
            start_date,
            end_date,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct DebtQuery {
    pub month: Option<String>,
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    body.map(|Json(value)| value)
        .map_err(|e| AppError::BadRequest(e.body_text()))
}

/// 创建账目
pub async fn create_movement(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    body: Result<Json<CreateMovementRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let scope = auth_context.household_scope()?;
    let request = json_body(body)?;

    let movement = state.movement_service.create(scope, request).await?;
    Ok((StatusCode::CREATED, Json(movement)))
}

/// 账目列表
pub async fn list_movements(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Query(query): Query<MovementQuery>,
) -> Result<impl IntoResponse, AppError> {
    let scope = auth_context.household_scope()?;
    let filters = query.to_filters()?;

    let page = state
        .movement_service
        .list(scope, &filters, query.limit, query.offset)
        .await?;
    Ok(Json(page))
}

/// 账目详情
pub async fn get_movement(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<Json<Movement>, AppError> {
    let scope = auth_context.household_scope()?;
    let movement = state.movement_service.get(scope, id).await?;
    Ok(Json(movement))
}

/// 更新账目
pub async fn update_movement(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Path(id): Path<Uuid>,
    body: Result<Json<UpdateMovementRequest>, JsonRejection>,
) -> Result<Json<Movement>, AppError> {
    let scope = auth_context.household_scope()?;
    let request = json_body(body)?;

    let movement = state.movement_service.update(scope, id, request).await?;
    Ok(Json(movement))
}

/// 删除账目
pub async fn delete_movement(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let scope = auth_context.household_scope()?;
    state.movement_service.delete(scope, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// 债务合并
pub async fn consolidate_debts(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Query(query): Query<DebtQuery>,
) -> Result<Json<DebtConsolidation>, AppError> {
    let scope = auth_context.household_scope()?;
    let month = query.month.as_deref().map(MonthRange::parse).transpose()?;

    let debts = state.movement_service.consolidate_debts(scope, month).await?;
    Ok(Json(debts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_month_overrides_date_range() {
        let query = MovementQuery {
            month: Some("2025-02".to_string()),
            start_date: NaiveDate::from_ymd_opt(2020, 1, 1),
            ..Default::default()
        };
        let filters = query.to_filters().unwrap();
        assert_eq!(filters.start_date, NaiveDate::from_ymd_opt(2025, 2, 1));
        assert_eq!(filters.end_date, NaiveDate::from_ymd_opt(2025, 3, 1));
    }

    #[test]
    fn test_end_date_is_inclusive() {
        let query = MovementQuery {
            end_date: NaiveDate::from_ymd_opt(2025, 2, 28),
            ..Default::default()
        };
        let filters = query.to_filters().unwrap();
        assert_eq!(filters.end_date, NaiveDate::from_ymd_opt(2025, 3, 1));
    }
}
