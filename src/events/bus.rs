use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::StreamExt;

use crate::error::{CoreError, CoreResult};

/// A message as seen on the bus: the channel it was published to plus the
/// serialized event.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub channel: String,
    pub payload: String,
}

/// Pub/sub seam between the dispatcher and realtime consumers. Channels
/// are `events:{tenant_id}:{event_type}`; subscription patterns support a
/// trailing `*`.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, channel: &str, payload: String) -> CoreResult<()>;

    /// Messages matching `pattern`, in publish order per publisher.
    async fn subscribe(&self, pattern: &str) -> CoreResult<mpsc::Receiver<BusMessage>>;
}

pub fn event_channel(tenant_id: &str, event_type: &str) -> String {
    format!("events:{tenant_id}:{event_type}")
}

fn channel_matches(pattern: &str, channel: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => channel.starts_with(prefix),
        None => pattern == channel,
    }
}

const SUBSCRIBER_BUFFER: usize = 1024;

// ── In-process bus ──────────────────────────────────────────────────

/// Broadcast-backed bus for single-process deployments and tests. Same
/// contract as the redis bus, including the pattern syntax.
pub struct LocalBus {
    tx: broadcast::Sender<BusMessage>,
}

impl LocalBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(SUBSCRIBER_BUFFER);
        LocalBus { tx }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for LocalBus {
    async fn publish(&self, channel: &str, payload: String) -> CoreResult<()> {
        // No subscribers is fine; the audit row is the source of truth.
        let _ = self.tx.send(BusMessage {
            channel: channel.to_string(),
            payload,
        });
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> CoreResult<mpsc::Receiver<BusMessage>> {
        let mut rx = self.tx.subscribe();
        let (out_tx, out_rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let pattern = pattern.to_string();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(msg) => {
                        if channel_matches(&pattern, &msg.channel)
                            && out_tx.send(msg).await.is_err()
                        {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "bus subscriber lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(out_rx)
    }
}

// ── Redis bus ───────────────────────────────────────────────────────

/// Redis pub/sub: one shared publisher connection plus a dedicated
/// subscriber connection per subscription.
pub struct RedisBus {
    client: redis::Client,
    publisher: redis::aio::ConnectionManager,
}

impl RedisBus {
    pub async fn connect(url: &str) -> CoreResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| CoreError::Configuration(format!("redis url: {e}")))?;
        let publisher = client.get_connection_manager().await?;
        Ok(RedisBus { client, publisher })
    }
}

#[async_trait]
impl EventBus for RedisBus {
    async fn publish(&self, channel: &str, payload: String) -> CoreResult<()> {
        let mut conn = self.publisher.clone();
        let _: () = redis::AsyncCommands::publish(&mut conn, channel, payload).await?;
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> CoreResult<mpsc::Receiver<BusMessage>> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.psubscribe(pattern).await?;
        let (out_tx, out_rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let channel = msg.get_channel_name().to_string();
                let Ok(payload) = msg.get_payload::<String>() else {
                    continue;
                };
                if out_tx.send(BusMessage { channel, payload }).await.is_err() {
                    break;
                }
            }
        });
        Ok(out_rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_matching() {
        assert!(channel_matches("events:t1:*", "events:t1:bonus.awarded"));
        assert!(channel_matches("events:t1:bonus.awarded", "events:t1:bonus.awarded"));
        assert!(!channel_matches("events:t1:*", "events:t2:bonus.awarded"));
        assert!(channel_matches("*", "anything"));
    }
}
