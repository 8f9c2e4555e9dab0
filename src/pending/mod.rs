pub mod jwt;
pub mod memory;
pub mod redis;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreResult;

/// A time-bounded signed handle for an operation awaiting confirmation
/// (OTP verification, KYC approval, high-value bonus approval).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOperation {
    pub op: String,
    pub data: Value,
    pub metadata: Value,
    pub created_at: i64,
    pub expires_at: i64,
}

/// What `verify` hands back on success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifiedOperation {
    pub data: Value,
    pub metadata: Value,
    pub created_at: i64,
}

/// Admin inspection view, including the remaining TTL.
#[derive(Debug, Clone, Serialize)]
pub struct RawPending {
    pub op: String,
    pub data: Value,
    pub metadata: Value,
    pub created_at: i64,
    pub expires_at: i64,
    pub ttl_remaining_secs: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingSummary {
    pub token: String,
    pub op: String,
    pub expires_at: i64,
}

#[derive(Debug, Clone)]
pub struct CreateOptions {
    pub expires_in_secs: u64,
    pub metadata: Value,
}

impl Default for CreateOptions {
    fn default() -> Self {
        CreateOptions {
            expires_in_secs: 600,
            metadata: Value::Null,
        }
    }
}

/// The store contract shared by both backends.
///
/// `verify` is side-effect-free; single-use semantics belong to the caller,
/// which pairs `verify` with `delete` and treats delete's `true` as the
/// "we won the race" signal.
#[async_trait]
pub trait PendingStore: Send + Sync {
    /// Create a token carrying an opaque payload. Returns the token string.
    async fn create(&self, op: &str, data: Value, opts: CreateOptions) -> CoreResult<String>;

    /// Check signature/existence, operation match, and expiry. Returns
    /// `None` for anything invalid rather than distinguishing failure modes
    /// to the caller.
    async fn verify(&self, token: &str, op: &str) -> CoreResult<Option<VerifiedOperation>>;

    /// Remove the token. Returns whether this call actually removed it;
    /// the JWT backend is stateless and always reports `false`.
    async fn delete(&self, token: &str, op: &str) -> CoreResult<bool>;

    /// Enumerate live operations (redis backend only).
    async fn list(&self, op_filter: Option<&str>) -> CoreResult<Vec<PendingSummary>>;

    /// Admin inspection with remaining TTL.
    async fn get_raw(&self, token: &str, op: &str) -> CoreResult<Option<RawPending>>;
}
