use std::collections::VecDeque;
use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use tokio::sync::broadcast;
use tokio_stream::Stream;

use crate::events::{tenant_room, user_room};

use crate::api::error::ApiError;
use crate::api::middleware::AuthUser;
use crate::api::state::AppState;

const HEARTBEAT: Duration = Duration::from_secs(30);
/// How far back critical events are replayed for a reconnecting client.
const REPLAY_WINDOW_SECS: i64 = 3600;
const DEDUP_WINDOW: usize = 128;

/// Server-sent events for the caller's rooms (`user:{id}` and
/// `tenant:{id}`): replay of recent critical events, then live traffic,
/// with keepalive comments every 30 seconds.
pub async fn event_stream(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    // Subscribe before loading the replay so nothing falls in the gap;
    // duplicates are filtered by event id below.
    let rooms = state.platform.events.rooms().clone();
    let mut user_rx = rooms.subscribe(&user_room(&auth.user_id));
    let mut tenant_rx = rooms.subscribe(&tenant_room(&auth.tenant_id));

    let since = chrono::Utc::now().timestamp() - REPLAY_WINDOW_SECS;
    let replay = state
        .platform
        .events
        .replay_critical(&auth.tenant_id, &auth.user_id, since)
        .await?;

    let stream = async_stream::stream! {
        let mut seen: VecDeque<String> = VecDeque::with_capacity(DEDUP_WINDOW);
        let remember = |seen: &mut VecDeque<String>, id: &str| {
            if seen.iter().any(|s| s == id) {
                return false;
            }
            if seen.len() == DEDUP_WINDOW {
                seen.pop_front();
            }
            seen.push_back(id.to_string());
            true
        };

        for event in replay {
            if remember(&mut seen, &event.id) {
                let data = serde_json::to_string(&event).unwrap_or_default();
                yield Ok(Event::default().event(event.event_type.clone()).data(data));
            }
        }

        let mut heartbeat = tokio::time::interval(HEARTBEAT);
        heartbeat.tick().await; // the first tick fires immediately

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    yield Ok(Event::default().comment("keepalive"));
                }
                received = user_rx.recv() => {
                    match received {
                        Ok(event) => {
                            if remember(&mut seen, &event.id) {
                                let data = serde_json::to_string(&event).unwrap_or_default();
                                yield Ok(Event::default().event(event.event_type.clone()).data(data));
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            yield Ok(Event::default().event("lagged")
                                .data(format!("{{\"missed\":{missed}}}")));
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                received = tenant_rx.recv() => {
                    match received {
                        Ok(event) => {
                            if remember(&mut seen, &event.id) {
                                let data = serde_json::to_string(&event).unwrap_or_default();
                                yield Ok(Event::default().event(event.event_type.clone()).data(data));
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            yield Ok(Event::default().event("lagged")
                                .data(format!("{{\"missed\":{missed}}}")));
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
    };

    Ok(Sse::new(stream))
}
