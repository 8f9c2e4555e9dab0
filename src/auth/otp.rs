use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::error::{CoreError, CoreResult};
use crate::pending::{CreateOptions, PendingStore};

/// Pending-operation type carrying an in-flight OTP.
pub const OTP_OP: &str = "otp_verification";

const DEFAULT_CODE_LENGTH: usize = 6;
const DEFAULT_EXPIRES_SECS: u64 = 600;
const RESEND_INTERVAL_SECS: i64 = 60;

/// Where the code actually goes (email, sms, ...). Transport adapters are
/// external collaborators; the service only knows this seam.
#[async_trait]
pub trait OtpTransport: Send + Sync {
    async fn deliver(&self, recipient: &str, channel: &str, code: &str) -> CoreResult<()>;
}

#[derive(Debug, Clone)]
pub struct OtpRequest {
    pub tenant_id: String,
    pub user_id: Option<String>,
    pub recipient: String,
    pub channel: String,
    pub purpose: String,
}

#[derive(Debug, Clone)]
pub struct OtpIssued {
    pub otp_token: String,
    pub expires_in: u64,
}

fn hash_code(code: &str) -> String {
    hex::encode(Sha256::digest(code.as_bytes()))
}

fn random_code(length: usize) -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    (0..length)
        .map(|_| char::from_digit(rng.random_range(0..10), 10).unwrap_or('0'))
        .collect()
}

/// OTP issuance and verification over the pending-operation store. Only
/// the SHA-256 of the code is ever stored; single-use needs a stateful
/// backend (redis or memory), since the JWT backend cannot delete.
pub struct OtpService {
    pending: Arc<dyn PendingStore>,
    code_length: usize,
    expires_in: u64,
}

impl OtpService {
    pub fn new(pending: Arc<dyn PendingStore>) -> Self {
        OtpService {
            pending,
            code_length: DEFAULT_CODE_LENGTH,
            expires_in: DEFAULT_EXPIRES_SECS,
        }
    }

    pub fn with_settings(mut self, code_length: usize, expires_in: u64) -> Self {
        self.code_length = code_length.clamp(4, 10);
        self.expires_in = expires_in.max(1);
        self
    }

    pub async fn send(
        &self,
        req: &OtpRequest,
        transport: &dyn OtpTransport,
    ) -> CoreResult<OtpIssued> {
        self.send_with_expiry(req, transport, self.expires_in).await
    }

    pub async fn send_with_expiry(
        &self,
        req: &OtpRequest,
        transport: &dyn OtpTransport,
        expires_in: u64,
    ) -> CoreResult<OtpIssued> {
        let code = random_code(self.code_length);
        let token = self
            .pending
            .create(
                OTP_OP,
                json!({
                    "code_hash": hash_code(&code),
                    "tenant_id": req.tenant_id,
                    "user_id": req.user_id,
                    "recipient": req.recipient,
                    "channel": req.channel,
                    "purpose": req.purpose,
                    "sent_at": chrono::Utc::now().timestamp(),
                }),
                CreateOptions {
                    expires_in_secs: expires_in,
                    metadata: serde_json::Value::Null,
                },
            )
            .await?;

        if let Err(e) = transport.deliver(&req.recipient, &req.channel, &code).await {
            let _ = self.pending.delete(&token, OTP_OP).await;
            return Err(e);
        }

        Ok(OtpIssued {
            otp_token: token,
            expires_in,
        })
    }

    /// Check the code and consume the token. Wrong codes do not consume;
    /// a second verify after success reports the token gone.
    pub async fn verify(&self, otp_token: &str, code: &str, tenant_id: &str) -> CoreResult<()> {
        let verified = self
            .pending
            .verify(otp_token, OTP_OP)
            .await?
            .ok_or_else(|| {
                CoreError::Unauthorized("verification code expired or already used".into())
            })?;

        let stored_tenant = verified
            .data
            .get("tenant_id")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        if stored_tenant != tenant_id {
            return Err(CoreError::Unauthorized("verification code tenant mismatch".into()));
        }

        let stored_hash = verified
            .data
            .get("code_hash")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        if stored_hash != hash_code(code) {
            return Err(CoreError::Unauthorized("invalid verification code".into()));
        }

        if !self.pending.delete(otp_token, OTP_OP).await? {
            return Err(CoreError::Conflict(
                "verification code already used".into(),
            ));
        }
        Ok(())
    }

    /// Re-send for an existing token, at most once a minute. The old token
    /// is invalidated and a fresh one returned.
    pub async fn resend(
        &self,
        otp_token: &str,
        transport: &dyn OtpTransport,
    ) -> CoreResult<OtpIssued> {
        let verified = self
            .pending
            .verify(otp_token, OTP_OP)
            .await?
            .ok_or_else(|| {
                CoreError::Unauthorized("verification code expired or already used".into())
            })?;

        let sent_at = verified
            .data
            .get("sent_at")
            .and_then(|v| v.as_i64())
            .unwrap_or(verified.created_at);
        let elapsed = chrono::Utc::now().timestamp() - sent_at;
        if elapsed < RESEND_INTERVAL_SECS {
            return Err(CoreError::RateLimited {
                retry_after_secs: (RESEND_INTERVAL_SECS - elapsed).max(1) as u64,
            });
        }

        let req = OtpRequest {
            tenant_id: str_field(&verified.data, "tenant_id"),
            user_id: verified
                .data
                .get("user_id")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            recipient: str_field(&verified.data, "recipient"),
            channel: str_field(&verified.data, "channel"),
            purpose: str_field(&verified.data, "purpose"),
        };

        self.pending.delete(otp_token, OTP_OP).await?;
        self.send(&req, transport).await
    }
}

fn str_field(data: &serde_json::Value, key: &str) -> String {
    data.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_random_digits() {
        let a = random_code(6);
        let b = random_code(6);
        assert_eq!(a.len(), 6);
        assert!(a.chars().all(|c| c.is_ascii_digit()));
        // Two draws colliding is possible but vanishingly unlikely; a
        // hardcoded generator would fail this immediately.
        let draws: Vec<String> = (0..32).map(|_| random_code(6)).collect();
        assert!(draws.iter().any(|d| d != &draws[0]) || a != b);
    }
}
