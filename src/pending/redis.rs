use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde_json::Value;

use crate::error::CoreResult;

use super::{CreateOptions, PendingOperation, PendingStore, PendingSummary, RawPending, VerifiedOperation};

/// Redis backend: the token is a 128-bit random id, the payload lives at
/// `{prefix}{op}:{token}` with a TTL. Deletion is real, so the delete
/// return value is an authoritative race-winner signal.
pub struct RedisPendingStore {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisPendingStore {
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
        RedisPendingStore {
            conn,
            prefix: prefix.into(),
        }
    }

    pub async fn connect(url: &str, prefix: impl Into<String>) -> CoreResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| crate::error::CoreError::Configuration(format!("redis url: {e}")))?;
        let conn = client.get_connection_manager().await?;
        Ok(Self::new(conn, prefix))
    }

    fn key(&self, op: &str, token: &str) -> String {
        format!("{}{}:{}", self.prefix, op, token)
    }

    async fn load(&self, op: &str, token: &str) -> CoreResult<Option<PendingOperation>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(self.key(op, token)).await?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        let pending: PendingOperation = serde_json::from_str(&raw)?;
        if pending.expires_at <= chrono::Utc::now().timestamp() {
            return Ok(None);
        }
        Ok(Some(pending))
    }
}

fn random_token() -> String {
    use rand::Rng;
    let bytes: [u8; 16] = rand::rng().random();
    hex::encode(bytes)
}

#[async_trait]
impl PendingStore for RedisPendingStore {
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
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(
                self.key(op, &token),
                serde_json::to_string(&pending)?,
                opts.expires_in_secs.max(1),
            )
            .await?;
        Ok(token)
    }

    async fn verify(&self, token: &str, op: &str) -> CoreResult<Option<VerifiedOperation>> {
        Ok(self.load(op, token).await?.map(|p| VerifiedOperation {
            data: p.data,
            metadata: p.metadata,
            created_at: p.created_at,
        }))
    }

    async fn delete(&self, token: &str, op: &str) -> CoreResult<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(self.key(op, token)).await?;
        Ok(removed > 0)
    }

    async fn list(&self, op_filter: Option<&str>) -> CoreResult<Vec<PendingSummary>> {
        let pattern = match op_filter {
            Some(op) => format!("{}{}:*", self.prefix, op),
            None => format!("{}*", self.prefix),
        };
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut summaries = Vec::new();
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;
            for key in keys {
                let raw: Option<String> = conn.get(&key).await?;
                let Some(raw) = raw else { continue };
                let Ok(pending) = serde_json::from_str::<PendingOperation>(&raw) else {
                    continue;
                };
                let token = key
                    .rsplit(':')
                    .next()
                    .unwrap_or_default()
                    .to_string();
                summaries.push(PendingSummary {
                    token,
                    op: pending.op,
                    expires_at: pending.expires_at,
                });
            }
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(summaries)
    }

    async fn get_raw(&self, token: &str, op: &str) -> CoreResult<Option<RawPending>> {
        let Some(pending) = self.load(op, token).await? else {
            return Ok(None);
        };
        let mut conn = self.conn.clone();
        let ttl: i64 = conn.ttl(self.key(op, token)).await?;
        Ok(Some(RawPending {
            op: pending.op,
            data: pending.data,
            metadata: pending.metadata,
            created_at: pending.created_at,
            expires_at: pending.expires_at,
            ttl_remaining_secs: ttl.max(0),
        }))
    }
}
