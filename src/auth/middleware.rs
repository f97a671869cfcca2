//! 会话认证中间件

use crate::{
    auth::jwt::SessionClaims, error::AppError, middleware::AppState, models::movement::HouseholdScope,
};
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use uuid::Uuid;

pub const ADMIN_ROLE: &str = "admin";

/// 认证上下文（附加到请求扩展）
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub household_id: Option<Uuid>,
    pub roles: Vec<String>,
}

impl AuthContext {
    pub fn from_claims(claims: SessionClaims) -> Result<Self, AppError> {
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AppError::Unauthorized)?;
        let household_id = claims
            .household_id
            .as_deref()
            .map(Uuid::parse_str)
            .transpose()
            .map_err(|_| AppError::Unauthorized)?;

        Ok(AuthContext {
            user_id,
            household_id,
            roles: claims.roles,
        })
    }

    /// 账目操作的家庭作用域，未加入家庭的用户无权访问
    pub fn household_scope(&self) -> Result<HouseholdScope, AppError> {
        self.household_id
            .map(|household_id| HouseholdScope {
                household_id,
                user_id: self.user_id,
            })
            .ok_or(AppError::Forbidden)
    }

    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r == ADMIN_ROLE)
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.is_admin() {
            Ok(())
        } else {
            tracing::warn!(user_id = %self.user_id, "Admin endpoint denied");
            Err(AppError::Forbidden)
        }
    }
}

// 实现 FromRequestParts 以便在 handler 中直接提取 AuthContext
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or(AppError::Unauthorized)
    }
}

/// 提取会话令牌：优先读 Cookie，其次 Authorization: Bearer
pub fn extract_token(headers: &HeaderMap, cookie_name: &str) -> Result<String, AppError> {
    let from_cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == cookie_name && !value.is_empty())
        .map(|(_, value)| value.to_string());

    if let Some(token) = from_cookie {
        return Ok(token);
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or(AppError::Unauthorized)
}

/// 会话认证中间件 - 必须认证
pub async fn session_auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_token(req.headers(), &state.config.security.session_cookie_name)?;
    let claims = state.jwt_service.validate_session_token(&token)?;
    let auth_context = AuthContext::from_claims(claims)?;

    req.extensions_mut().insert(auth_context);

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_token_from_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            "theme=dark; ledger_session=abc.def.ghi".parse().unwrap(),
        );

        let token = extract_token(&headers, "ledger_session").unwrap();
        assert_eq!(token, "abc.def.ghi");
    }

    #[test]
    fn test_extract_token_from_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer test_token_123".parse().unwrap());

        let token = extract_token(&headers, "ledger_session").unwrap();
        assert_eq!(token, "test_token_123");
    }

    #[test]
    fn test_extract_token_missing() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, "other=1".parse().unwrap());
        assert!(extract_token(&headers, "ledger_session").is_err());

        headers.insert(header::AUTHORIZATION, "InvalidFormat".parse().unwrap());
        assert!(extract_token(&headers, "ledger_session").is_err());
    }

    #[test]
    fn test_household_scope_requires_household() {
        let ctx = AuthContext {
            user_id: Uuid::new_v4(),
            household_id: None,
            roles: vec![],
        };
        assert!(matches!(ctx.household_scope(), Err(AppError::Forbidden)));
        assert!(matches!(ctx.require_admin(), Err(AppError::Forbidden)));
    }
}
