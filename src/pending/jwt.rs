use async_trait::async_trait;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, CoreResult};

use super::{CreateOptions, PendingStore, PendingSummary, RawPending, VerifiedOperation};

/// Stateless backend: the token IS the signed payload. Nothing is stored,
/// so `delete` is a no-op and `list` is unsupported.
pub struct JwtPendingStore {
    secret: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct PendingClaims {
    op: String,
    data: Value,
    meta: Value,
    iat: i64,
    exp: i64,
}

impl JwtPendingStore {
    pub fn new(secret: impl Into<String>) -> Self {
        JwtPendingStore {
            secret: secret.into(),
        }
    }

    fn decode_claims(&self, token: &str, op: &str) -> Option<PendingClaims> {
        let mut validation = Validation::default();
        // Pending-op expiry is exact; the default 60s leeway would let an
        // expired OTP verify.
        validation.leeway = 0;
        let claims = decode::<PendingClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .ok()?
        .claims;
        if claims.op != op {
            return None;
        }
        Some(claims)
    }
}

#[async_trait]
impl PendingStore for JwtPendingStore {
    async fn create(&self, op: &str, data: Value, opts: CreateOptions) -> CoreResult<String> {
        let now = chrono::Utc::now().timestamp();
        let claims = PendingClaims {
            op: op.to_string(),
            data,
            meta: opts.metadata,
            iat: now,
            exp: now + opts.expires_in_secs as i64,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| CoreError::Fatal(format!("signing pending token: {e}")))
    }

    async fn verify(&self, token: &str, op: &str) -> CoreResult<Option<VerifiedOperation>> {
        Ok(self.decode_claims(token, op).map(|claims| VerifiedOperation {
            data: claims.data,
            metadata: claims.meta,
            created_at: claims.iat,
        }))
    }

    async fn delete(&self, _token: &str, _op: &str) -> CoreResult<bool> {
        Ok(false)
    }

    async fn list(&self, _op_filter: Option<&str>) -> CoreResult<Vec<PendingSummary>> {
        Err(CoreError::Validation(
            "the jwt pending backend cannot enumerate tokens".into(),
        ))
    }

    async fn get_raw(&self, token: &str, op: &str) -> CoreResult<Option<RawPending>> {
        Ok(self.decode_claims(token, op).map(|claims| {
            let now = chrono::Utc::now().timestamp();
            RawPending {
                op: claims.op,
                data: claims.data,
                metadata: claims.meta,
                created_at: claims.iat,
                expires_at: claims.exp,
                ttl_remaining_secs: (claims.exp - now).max(0),
            }
        }))
    }
}
