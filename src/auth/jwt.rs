//! 会话令牌
//!
//! 登录由应用其它部分负责，这里只签发和校验 HS256 会话令牌。

use crate::{config::SecurityConfig, error::AppError};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session token claims
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionClaims {
    /// Subject (user ID)
    pub sub: String,

    /// 用户所属家庭，尚未加入家庭时为空
    #[serde(default)]
    pub household_id: Option<String>,

    #[serde(default)]
    pub roles: Vec<String>,

    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    session_exp_secs: u64,
}

impl JwtService {
    pub fn from_config(config: &SecurityConfig) -> Result<Self, AppError> {
        let secret = config.session_secret.expose_secret();

        // HS256 至少 32 字节
        if secret.len() < 32 {
            return Err(AppError::Config("Session secret too short (min 32 chars)".to_string()));
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            session_exp_secs: config.session_exp_secs,
        })
    }

    /// 签发会话令牌
    pub fn issue_session_token(
        &self,
        user_id: Uuid,
        household_id: Option<Uuid>,
        roles: Vec<String>,
    ) -> Result<String, AppError> {
        let now = Utc::now();
        let expiration = now + Duration::seconds(self.session_exp_secs as i64);

        let claims = SessionClaims {
            sub: user_id.to_string(),
            household_id: household_id.map(|id| id.to_string()),
            roles,
            iat: now.timestamp(),
            exp: expiration.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::default(), &claims, &self.encoding_key).map_err(|e| {
            tracing::error!("Failed to encode session token: {:?}", e);
            AppError::Internal(format!("Failed to encode session token: {}", e))
        })
    }

    pub fn validate_session_token(&self, token: &str) -> Result<SessionClaims, AppError> {
        Ok(
            decode::<SessionClaims>(token, &self.decoding_key, &Validation::new(Algorithm::HS256))
                .map_err(|e| {
                    tracing::debug!("Session token validation failed: {:?}", e);
                    AppError::Unauthorized
                })?
                .claims,
        )
    }
}
