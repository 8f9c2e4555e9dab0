use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::CoreResult;

use super::{CreateOptions, PendingOperation, PendingStore, PendingSummary, RawPending, VerifiedOperation};

/// In-process backend with the redis backend's semantics (real deletion,
/// enumerable), for single-process deployments and tests. The in-process
/// counterpart of `LocalBus`.
pub struct MemoryPendingStore {
    entries: Mutex<HashMap<String, PendingOperation>>,
}

impl MemoryPendingStore {
    pub fn new() -> Self {
        MemoryPendingStore {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn key(op: &str, token: &str) -> String {
        format!("{op}:{token}")
    }
}

impl Default for MemoryPendingStore {
    fn default() -> Self {
        Self::new()
    }
}

fn random_token() -> String {
    use rand::Rng;
    let bytes: [u8; 16] = rand::rng().random();
    hex::encode(bytes)
}

#[async_trait]
impl PendingStore for MemoryPendingStore {
    async fn create(&self, op: &str, data: Value, opts: CreateOptions) -> CoreResult<String> {
        let now = chrono::Utc::now().timestamp();
        let token = random_token();
        let pending = PendingOperation {
            op: op.to_string(),
            data,
            metadata: opts.metadata,
            created_at: now,
            expires_at: now + opts.expires_in_secs as i64,
        };
        self.entries
            .lock()
            .await
            .insert(Self::key(op, &token), pending);
        Ok(token)
    }

    async fn verify(&self, token: &str, op: &str) -> CoreResult<Option<VerifiedOperation>> {
        let now = chrono::Utc::now().timestamp();
        let entries = self.entries.lock().await;
        Ok(entries
            .get(&Self::key(op, token))
            .filter(|p| p.expires_at > now)
            .map(|p| VerifiedOperation {
                data: p.data.clone(),
                metadata: p.metadata.clone(),
                created_at: p.created_at,
            }))
    }

    async fn delete(&self, token: &str, op: &str) -> CoreResult<bool> {
        Ok(self
            .entries
            .lock()
            .await
            .remove(&Self::key(op, token))
            .is_some())
    }

    async fn list(&self, op_filter: Option<&str>) -> CoreResult<Vec<PendingSummary>> {
        let now = chrono::Utc::now().timestamp();
        let entries = self.entries.lock().await;
        Ok(entries
            .iter()
            .filter(|(_, p)| p.expires_at > now)
            .filter(|(_, p)| op_filter.is_none_or(|op| p.op == op))
            .map(|(key, p)| PendingSummary {
                token: key.rsplit(':').next().unwrap_or_default().to_string(),
                op: p.op.clone(),
                expires_at: p.expires_at,
            })
            .collect())
    }

    async fn get_raw(&self, token: &str, op: &str) -> CoreResult<Option<RawPending>> {
        let now = chrono::Utc::now().timestamp();
        let entries = self.entries.lock().await;
        Ok(entries
            .get(&Self::key(op, token))
            .filter(|p| p.expires_at > now)
            .map(|p| RawPending {
                op: p.op.clone(),
                data: p.data.clone(),
                metadata: p.metadata.clone(),
                created_at: p.created_at,
                expires_at: p.expires_at,
                ttl_remaining_secs: (p.expires_at - now).max(0),
            }))
    }
}
