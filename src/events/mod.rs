pub mod bus;
pub mod realtime;
pub mod webhook;

use std::sync::Arc;

use rusqlite::Connection;
use serde_json::Value;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::db::Db;
use crate::error::CoreResult;
use crate::model::DomainEvent;

pub use bus::{EventBus, LocalBus, RedisBus, event_channel};
pub use realtime::{RoomRegistry, tenant_room, user_room};
pub use webhook::WebhookDeliverer;

/// Event types that must survive any backpressure: their webhook
/// deliveries persist across restarts and realtime subscribers replay them
/// from the audit log after a gap.
pub const CRITICAL_EVENTS: &[&str] = &["bonus.awarded", "wallet.deposit.completed"];

pub fn is_critical(event_type: &str) -> bool {
    CRITICAL_EVENTS.contains(&event_type)
}

/// Normalizes domain events and fans them out: audit row first (the
/// at-least-once source of truth), then bus, webhooks, and realtime rooms.
pub struct EventDispatcher {
    core: Db,
    bus: Arc<dyn EventBus>,
    rooms: Arc<RoomRegistry>,
    webhooks: Arc<WebhookDeliverer>,
}

impl EventDispatcher {
    pub fn new(
        core: Db,
        bus: Arc<dyn EventBus>,
        rooms: Arc<RoomRegistry>,
        webhooks: Arc<WebhookDeliverer>,
    ) -> Self {
        EventDispatcher {
            core,
            bus,
            rooms,
            webhooks,
        }
    }

    pub fn rooms(&self) -> &Arc<RoomRegistry> {
        &self.rooms
    }

    pub async fn emit(
        &self,
        ctx: &RequestContext,
        event_type: &str,
        tenant_id: &str,
        user_id: Option<&str>,
        payload: Value,
    ) -> CoreResult<DomainEvent> {
        let event = DomainEvent {
            id: Uuid::new_v4().to_string(),
            event_type: event_type.to_string(),
            tenant_id: tenant_id.to_string(),
            user_id: user_id.map(|s| s.to_string()),
            occurred_at: chrono::Utc::now().timestamp(),
            payload,
            correlation_id: Some(ctx.correlation_id.clone()),
        };

        // 1. Audit row. (event_type, id) is the primary key, so a replayed
        //    emit of the same event is a conflict, not a duplicate.
        let subscriptions = {
            let conn = self.core.lock().await;
            conn.execute(
                "INSERT INTO events (id, event_type, tenant_id, user_id, payload, correlation_id, occurred_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    event.id,
                    event.event_type,
                    event.tenant_id,
                    event.user_id,
                    event.payload.to_string(),
                    event.correlation_id,
                    event.occurred_at,
                ],
            )?;
            webhook::subscriptions_for(&conn, tenant_id, event_type)?
        };

        // 2. Bus. Failure here is logged, not fatal: the audit row already
        //    exists and consumers can catch up from it.
        let serialized = serde_json::to_string(&event)?;
        if let Err(e) = self
            .bus
            .publish(&event_channel(tenant_id, event_type), serialized)
            .await
        {
            tracing::warn!(event_id = %event.id, error = %e, "bus publish failed");
        }

        // 3. Webhooks.
        let critical = is_critical(event_type);
        for subscription in &subscriptions {
            if let Err(e) = self.webhooks.enqueue(subscription, &event, critical).await {
                tracing::warn!(
                    subscription_id = %subscription.id,
                    event_id = %event.id,
                    error = %e,
                    "webhook enqueue failed"
                );
            }
        }

        // 4. Realtime rooms.
        if let Some(user_id) = &event.user_id {
            self.rooms.publish(&user_room(user_id), &event);
        }
        self.rooms.publish(&tenant_room(tenant_id), &event);

        Ok(event)
    }

    /// Emit a saga's queued events in order, after its commit.
    pub async fn emit_queued(
        &self,
        ctx: &RequestContext,
        tenant_id: &str,
        user_id: Option<&str>,
        queued: Vec<(String, Value)>,
    ) -> CoreResult<Vec<DomainEvent>> {
        let mut emitted = Vec::with_capacity(queued.len());
        for (event_type, payload) in queued {
            emitted.push(self.emit(ctx, &event_type, tenant_id, user_id, payload).await?);
        }
        Ok(emitted)
    }

    /// Recent critical events for a user's rooms, used by SSE/WS clients
    /// to fill gaps on reconnect.
    pub async fn replay_critical(
        &self,
        tenant_id: &str,
        user_id: &str,
        since: i64,
    ) -> CoreResult<Vec<DomainEvent>> {
        let conn = self.core.lock().await;
        load_events(&conn, tenant_id, Some(user_id), since, true)
    }
}

pub fn load_events(
    conn: &Connection,
    tenant_id: &str,
    user_id: Option<&str>,
    since: i64,
    critical_only: bool,
) -> CoreResult<Vec<DomainEvent>> {
    let mut sql = String::from(
        "SELECT id, event_type, tenant_id, user_id, payload, correlation_id, occurred_at
         FROM events WHERE tenant_id = ?1 AND occurred_at >= ?2",
    );
    if user_id.is_some() {
        sql.push_str(" AND (user_id = ?3 OR user_id IS NULL)");
    }
    sql.push_str(" ORDER BY occurred_at, id");

    let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<DomainEvent> {
        Ok(DomainEvent {
            id: row.get(0)?,
            event_type: row.get(1)?,
            tenant_id: row.get(2)?,
            user_id: row.get(3)?,
            payload: crate::registry::parse_json(row.get::<_, String>(4)?),
            correlation_id: row.get(5)?,
            occurred_at: row.get(6)?,
        })
    };

    let mut stmt = conn.prepare(&sql)?;
    let events: Vec<DomainEvent> = match user_id {
        Some(user_id) => stmt
            .query_map(rusqlite::params![tenant_id, since, user_id], map_row)?
            .collect::<Result<Vec<_>, _>>()?,
        None => stmt
            .query_map(rusqlite::params![tenant_id, since], map_row)?
            .collect::<Result<Vec<_>, _>>()?,
    };
    Ok(events
        .into_iter()
        .filter(|e| !critical_only || is_critical(&e.event_type))
        .collect())
}
