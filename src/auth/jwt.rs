use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::model::User;

pub const DEFAULT_ACCESS_TTL_SECS: i64 = 3600;
pub const DEFAULT_REFRESH_TTL_SECS: i64 = 7 * 86_400;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    /// Tenant id.
    pub tid: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    #[serde(rename = "type")]
    pub token_type: String,
    pub iat: i64,
    pub exp: i64,
}

pub fn issue_token(
    user: &User,
    secret: &str,
    token_type: &str,
    ttl_secs: i64,
) -> CoreResult<String> {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: user.id.clone(),
        tid: user.tenant_id.clone(),
        roles: user.roles.iter().map(|r| r.role.clone()).collect(),
        permissions: user.permissions.clone(),
        token_type: token_type.to_string(),
        iat: now,
        exp: now + ttl_secs,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| CoreError::Fatal(format!("signing jwt: {e}")))
}

pub fn verify_token(token: &str, secret: &str, expected_type: &str) -> CoreResult<Claims> {
    let claims = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| CoreError::Unauthorized("invalid or expired token".into()))?
    .claims;
    if claims.token_type != expected_type {
        return Err(CoreError::Unauthorized(format!(
            "expected a {expected_type} token"
        )));
    }
    Ok(claims)
}
