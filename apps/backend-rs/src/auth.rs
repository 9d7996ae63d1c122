use axum::http::{header::AUTHORIZATION, HeaderMap};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sqlx::Row;

use crate::{
    config::AppConfig,
    error::{AppError, AppResult},
    state::AppState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Worker,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Worker => "worker",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Self::Admin),
            "worker" => Some(Self::Worker),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub role: Role,
    pub token_type: TokenKind,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
    pub token_type: &'static str,
    pub expires_in: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id: i64,
    pub email: String,
    pub role: Role,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

fn signing_secret(config: &AppConfig) -> AppResult<&str> {
    config.jwt_signing_secret().ok_or_else(|| {
        AppError::ServiceUnavailable("JWT_SECRET is not configured.".to_string())
    })
}

fn encode_token(
    config: &AppConfig,
    user_id: i64,
    email: &str,
    role: Role,
    kind: TokenKind,
) -> AppResult<String> {
    let now = Utc::now();
    let ttl = match kind {
        TokenKind::Access => Duration::minutes(config.access_token_ttl_minutes.max(1)),
        TokenKind::Refresh => Duration::days(config.refresh_token_ttl_days.max(1)),
    };
    let claims = Claims {
        sub: user_id.to_string(),
        email: email.to_string(),
        role,
        token_type: kind,
        exp: (now + ttl).timestamp(),
        iat: now.timestamp(),
        jti: uuid::Uuid::new_v4().to_string(),
    };
    let key = EncodingKey::from_secret(signing_secret(config)?.as_bytes());
    encode(&Header::new(Algorithm::HS256), &claims, &key)
        .map_err(|error| AppError::Internal(format!("Could not sign token: {error}")))
}

pub fn issue_tokens(
    config: &AppConfig,
    user_id: i64,
    email: &str,
    role: Role,
) -> AppResult<TokenPair> {
    Ok(TokenPair {
        access: encode_token(config, user_id, email, role, TokenKind::Access)?,
        refresh: encode_token(config, user_id, email, role, TokenKind::Refresh)?,
        token_type: "Bearer",
        expires_in: config.access_token_ttl_minutes.max(1) * 60,
    })
}

pub fn decode_token(config: &AppConfig, token: &str, expected: TokenKind) -> AppResult<Claims> {
    let key = DecodingKey::from_secret(signing_secret(config)?.as_bytes());
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;

    let claims = decode::<Claims>(token, &key, &validation)
        .map_err(|_| AppError::Unauthorized("Invalid or expired token.".to_string()))?
        .claims;
    if claims.token_type != expected {
        return Err(AppError::Unauthorized("Wrong token type.".to_string()));
    }
    Ok(claims)
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let raw = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = raw.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(token.trim()).filter(|token| !token.is_empty())
}

/// Resolve the caller from the bearer token. The role is re-read from the
/// database so deactivations and role changes apply immediately.
pub async fn require_user(state: &AppState, headers: &HeaderMap) -> AppResult<AuthUser> {
    let token = bearer_token(headers).ok_or_else(|| {
        AppError::Unauthorized("Authentication credentials were not provided.".to_string())
    })?;
    let claims = decode_token(&state.config, token, TokenKind::Access)?;
    let user_id = claims
        .sub
        .parse::<i64>()
        .map_err(|_| AppError::Unauthorized("Invalid token subject.".to_string()))?;

    let pool = state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })?;
    let row = sqlx::query("SELECT email, role, is_active FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::Unauthorized("User no longer exists.".to_string()))?;

    if !row.try_get::<bool, _>("is_active").unwrap_or(false) {
        return Err(AppError::Unauthorized("User account is disabled.".to_string()));
    }
    let role = row
        .try_get::<String, _>("role")
        .ok()
        .and_then(|raw| Role::parse(&raw))
        .unwrap_or(Role::Worker);

    Ok(AuthUser {
        id: user_id,
        email: row.try_get::<String, _>("email").unwrap_or(claims.email),
        role,
    })
}

pub async fn require_user_id(state: &AppState, headers: &HeaderMap) -> AppResult<i64> {
    Ok(require_user(state, headers).await?.id)
}

pub async fn require_role(
    state: &AppState,
    headers: &HeaderMap,
    allowed: &[Role],
) -> AppResult<AuthUser> {
    let user = require_user(state, headers).await?;
    if !allowed.contains(&user.role) {
        return Err(AppError::Forbidden(
            "You do not have permission to perform this action.".to_string(),
        ));
    }
    Ok(user)
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderMap, HeaderValue};
    use chrono::Utc;
    use jsonwebtoken::{encode, EncodingKey, Header};

    use super::*;
    use crate::config::AppConfig;

    fn test_config() -> AppConfig {
        let mut config = AppConfig::from_env();
        config.environment = "test".to_string();
        config.jwt_secret = Some("unit-test-secret".to_string());
        config
    }

    #[test]
    fn issued_tokens_decode_with_their_kind() {
        let config = test_config();
        let pair = issue_tokens(&config, 42, "ana@villanueva.pe", Role::Admin).unwrap();

        let access = decode_token(&config, &pair.access, TokenKind::Access).unwrap();
        assert_eq!(access.sub, "42");
        assert_eq!(access.role, Role::Admin);

        let refresh = decode_token(&config, &pair.refresh, TokenKind::Refresh).unwrap();
        assert_eq!(refresh.email, "ana@villanueva.pe");
        assert_eq!(pair.expires_in, config.access_token_ttl_minutes * 60);
    }

    #[test]
    fn refresh_token_is_not_an_access_token() {
        let config = test_config();
        let pair = issue_tokens(&config, 7, "w@villanueva.pe", Role::Worker).unwrap();
        assert!(matches!(
            decode_token(&config, &pair.refresh, TokenKind::Access),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let config = test_config();
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: "1".to_string(),
            email: "old@villanueva.pe".to_string(),
            role: Role::Worker,
            token_type: TokenKind::Access,
            exp: now - 3600,
            iat: now - 7200,
            jti: "expired".to_string(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"unit-test-secret"),
        )
        .unwrap();
        assert!(decode_token(&config, &token, TokenKind::Access).is_err());
    }

    #[test]
    fn production_without_secret_refuses_to_sign() {
        let mut config = test_config();
        config.environment = "production".to_string();
        config.jwt_secret = None;
        assert!(matches!(
            issue_tokens(&config, 1, "a@b.pe", Role::Admin),
            Err(AppError::ServiceUnavailable(_))
        ));
    }

    #[test]
    fn parses_bearer_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers), Some("abc.def"));
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic Zm9v"));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn roles_parse_case_insensitively() {
        assert_eq!(Role::parse("ADMIN"), Some(Role::Admin));
        assert_eq!(Role::parse(" worker "), Some(Role::Worker));
        assert_eq!(Role::parse("owner"), None);
    }
}
