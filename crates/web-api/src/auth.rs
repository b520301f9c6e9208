//! JWT 认证
//!
//! 令牌由外部身份服务签发，本服务只校验签名与过期时间，
//! 并从声明中取出用户 id、显示名与角色。

use application::{AuthError, Authenticator};
use axum::http::HeaderMap;
use config::JwtConfig;
use domain::{Identity, UserId};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

/// JWT Claims 结构
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub name: String,
    pub role: String,
    pub exp: i64, // 过期时间 (Unix timestamp)
}

/// JWT Token 服务
#[derive(Clone)]
pub struct JwtService {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_ref());
        let decoding_key = DecodingKey::from_secret(config.secret.as_ref());

        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    /// 签发 token（本地工具与测试使用）
    pub fn generate_token(&self, identity: &Identity) -> Result<String, ApiError> {
        let exp = chrono::Utc::now() + chrono::Duration::hours(self.config.expiration_hours);
        let claims = Claims {
            sub: identity.user_id.into(),
            name: identity.display_name.clone(),
            role: identity.role.clone(),
            exp: exp.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|err| ApiError::internal_server_error(format!("Token generation failed: {}", err)))
    }

    /// 验证并解析 JWT token
    pub fn verify_token(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|token_data| token_data.claims)
            .map_err(|err| AuthError::Rejected(err.to_string()))
    }

    /// 从 `Authorization: Bearer` 头中提取身份
    pub fn identity_from_headers(&self, headers: &HeaderMap) -> Result<Identity, AuthError> {
        self.authenticate(bearer_token(headers)?)
    }
}

/// 取出 Bearer token；没有该头时返回 `Ok(None)`
pub fn bearer_token(headers: &HeaderMap) -> Result<Option<&str>, AuthError> {
    let Some(value) = headers.get(axum::http::header::AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value.to_str().map_err(|_| AuthError::Malformed)?;
    value
        .strip_prefix("Bearer ")
        .map(Some)
        .ok_or(AuthError::Malformed)
}

impl Authenticator for JwtService {
    fn authenticate(&self, credential: Option<&str>) -> Result<Identity, AuthError> {
        let token = credential
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(AuthError::Missing)?;
        let claims = self.verify_token(token)?;
        Ok(Identity::new(UserId::from(claims.sub), claims.name, claims.role))
    }
}
