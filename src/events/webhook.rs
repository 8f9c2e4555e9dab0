use std::sync::Arc;
use std::time::Duration;

use hmac::{Hmac, Mac};
use rusqlite::Connection;
use serde_json::Value;
use sha2::Sha256;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::db::Db;
use crate::error::{CoreError, CoreResult};
use crate::model::{DomainEvent, WebhookSubscription};

const MAX_ATTEMPTS: u32 = 10;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(300);
/// Concurrent in-flight deliveries. Non-critical work that can't get a
/// permit is dropped with a warning; critical work waits.
const DELIVERY_PERMITS: usize = 64;

/// `X-Signature` value: hex HMAC-SHA256 of the body under the
/// subscription's secret.
pub fn sign(body: &str, secret: &str) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// The wire body of a delivery, with `occurred_at` rendered ISO-8601.
pub fn delivery_body(event: &DomainEvent) -> String {
    let occurred = chrono::DateTime::from_timestamp(event.occurred_at, 0)
        .unwrap_or_default()
        .to_rfc3339();
    serde_json::json!({
        "id": event.id,
        "type": event.event_type,
        "tenant_id": event.tenant_id,
        "user_id": event.user_id,
        "occurred_at": occurred,
        "payload": event.payload,
    })
    .to_string()
}

// ── Subscription storage ────────────────────────────────────────────

pub fn create_subscription(
    conn: &Connection,
    tenant_id: &str,
    url: &str,
    event_types: &[String],
    secret: &str,
    headers: Option<Value>,
) -> CoreResult<WebhookSubscription> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO webhook_subscriptions (id, tenant_id, url, event_types, secret, active, headers)
         VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
        rusqlite::params![
            id,
            tenant_id,
            url,
            serde_json::to_string(event_types)?,
            secret,
            headers.as_ref().map(|h| h.to_string()),
        ],
    )?;
    Ok(WebhookSubscription {
        id,
        tenant_id: tenant_id.to_string(),
        url: url.to_string(),
        event_types: event_types.to_vec(),
        secret: secret.to_string(),
        active: true,
        headers,
    })
}

pub fn subscriptions_for(
    conn: &Connection,
    tenant_id: &str,
    event_type: &str,
) -> CoreResult<Vec<WebhookSubscription>> {
    let mut stmt = conn.prepare(
        "SELECT id, tenant_id, url, event_types, secret, active, headers
         FROM webhook_subscriptions WHERE tenant_id = ?1 AND active = 1",
    )?;
    let rows = stmt
        .query_map([tenant_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows
        .into_iter()
        .map(|(id, tenant_id, url, event_types, secret, active, headers)| WebhookSubscription {
            id,
            tenant_id,
            url,
            event_types: serde_json::from_str(&event_types).unwrap_or_default(),
            secret,
            active: active != 0,
            headers: headers.and_then(|h| serde_json::from_str(&h).ok()),
        })
        .filter(|sub| sub.wants(event_type))
        .collect())
}

// ── Delivery worker ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct DeliveryJob {
    /// Row id in webhook_deliveries when persisted (critical events).
    row_id: Option<String>,
    event_id: String,
    event_type: String,
    tenant_id: String,
    url: String,
    body: String,
    secret: String,
    headers: Option<Value>,
}

/// Delivers webhook POSTs with exponential backoff. Critical event types
/// are persisted before the first attempt and survive a restart; the rest
/// are fire-and-retry in memory only.
pub struct WebhookDeliverer {
    core: Db,
    http: reqwest::Client,
    permits: Arc<Semaphore>,
}

impl WebhookDeliverer {
    pub fn new(core: Db) -> Self {
        WebhookDeliverer {
            core,
            http: reqwest::Client::new(),
            permits: Arc::new(Semaphore::new(DELIVERY_PERMITS)),
        }
    }

    pub async fn enqueue(
        self: &Arc<Self>,
        subscription: &WebhookSubscription,
        event: &DomainEvent,
        critical: bool,
    ) -> CoreResult<()> {
        let body = delivery_body(event);
        let mut job = DeliveryJob {
            row_id: None,
            event_id: event.id.clone(),
            event_type: event.event_type.clone(),
            tenant_id: event.tenant_id.clone(),
            url: subscription.url.clone(),
            body,
            secret: subscription.secret.clone(),
            headers: subscription.headers.clone(),
        };

        if critical {
            let row_id = Uuid::new_v4().to_string();
            let conn = self.core.lock().await;
            conn.execute(
                "INSERT INTO webhook_deliveries
                     (id, subscription_id, event_id, event_type, tenant_id, url, body, secret, headers)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    row_id,
                    subscription.id,
                    job.event_id,
                    job.event_type,
                    job.tenant_id,
                    job.url,
                    job.body,
                    job.secret,
                    job.headers.as_ref().map(|h| h.to_string()),
                ],
            )?;
            job.row_id = Some(row_id);
        }

        let this = self.clone();
        if critical {
            let permit = self.permits.clone().acquire_owned().await.map_err(|_| {
                CoreError::Fatal("webhook delivery semaphore closed".into())
            })?;
            tokio::spawn(async move {
                let _permit = permit;
                this.deliver(job).await;
            });
        } else {
            match self.permits.clone().try_acquire_owned() {
                Ok(permit) => {
                    tokio::spawn(async move {
                        let _permit = permit;
                        this.deliver(job).await;
                    });
                }
                Err(_) => {
                    tracing::warn!(
                        event_type = %job.event_type,
                        url = %job.url,
                        "webhook delivery buffer full, dropping non-critical event"
                    );
                }
            }
        }
        Ok(())
    }

    /// Re-enqueue deliveries that did not finish before the last shutdown.
    pub async fn resume_pending(self: &Arc<Self>) -> CoreResult<usize> {
        let jobs: Vec<DeliveryJob> = {
            let conn = self.core.lock().await;
            let mut stmt = conn.prepare(
                "SELECT id, event_id, event_type, tenant_id, url, body, secret, headers
                 FROM webhook_deliveries WHERE status = 'pending'",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(DeliveryJob {
                        row_id: Some(row.get(0)?),
                        event_id: row.get(1)?,
                        event_type: row.get(2)?,
                        tenant_id: row.get(3)?,
                        url: row.get(4)?,
                        body: row.get(5)?,
                        secret: row.get(6)?,
                        headers: row
                            .get::<_, Option<String>>(7)?
                            .and_then(|h| serde_json::from_str(&h).ok()),
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        let count = jobs.len();
        for job in jobs {
            let this = self.clone();
            tokio::spawn(async move {
                this.deliver(job).await;
            });
        }
        Ok(count)
    }

    async fn deliver(&self, job: DeliveryJob) {
        let mut backoff = INITIAL_BACKOFF;
        for attempt in 1..=MAX_ATTEMPTS {
            match self.attempt(&job).await {
                Ok(()) => {
                    self.mark(&job, "delivered", attempt, None).await;
                    return;
                }
                Err(err) => {
                    tracing::warn!(
                        url = %job.url,
                        event_id = %job.event_id,
                        attempt,
                        error = %err,
                        "webhook delivery attempt failed"
                    );
                    if attempt == MAX_ATTEMPTS {
                        self.mark(&job, "failed", attempt, Some(&err)).await;
                        return;
                    }
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    async fn attempt(&self, job: &DeliveryJob) -> Result<(), String> {
        let mut request = self
            .http
            .post(&job.url)
            .header("Content-Type", "application/json")
            .header("X-Event-Id", &job.event_id)
            .header("X-Event-Type", &job.event_type)
            .header("X-Tenant-Id", &job.tenant_id)
            .header("X-Signature", sign(&job.body, &job.secret))
            .timeout(Duration::from_secs(15));
        if let Some(Value::Object(headers)) = &job.headers {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(name.as_str(), value);
                }
            }
        }
        let response = request
            .body(job.body.clone())
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("status {}", response.status()))
        }
    }

    async fn mark(&self, job: &DeliveryJob, status: &str, attempts: u32, error: Option<&str>) {
        let Some(row_id) = &job.row_id else { return };
        let conn = self.core.lock().await;
        let result = conn.execute(
            "UPDATE webhook_deliveries SET status = ?1, attempts = ?2, last_error = ?3 WHERE id = ?4",
            rusqlite::params![status, attempts, error, row_id],
        );
        if let Err(e) = result {
            tracing::error!(row_id = %row_id, error = %e, "failed to record delivery outcome");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_stable_hex_hmac() {
        let sig = sign("{\"a\":1}", "topsecret");
        assert_eq!(sig.len(), 64);
        assert_eq!(sig, sign("{\"a\":1}", "topsecret"));
        assert_ne!(sig, sign("{\"a\":2}", "topsecret"));
        assert_ne!(sig, sign("{\"a\":1}", "othersecret"));
    }
}
