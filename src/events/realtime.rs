use std::collections::HashMap;

use tokio::sync::broadcast;

use crate::model::DomainEvent;

/// Per-subscriber buffer. Broadcast drops the oldest events for a lagging
/// receiver, which is exactly the overflow policy for non-critical
/// realtime traffic; critical types are replayed from the audit log on
/// reconnect.
const ROOM_BUFFER: usize = 256;

pub fn user_room(user_id: &str) -> String {
    format!("user:{user_id}")
}

pub fn tenant_room(tenant_id: &str) -> String {
    format!("tenant:{tenant_id}")
}

/// Named fan-out rooms shared by the SSE and WebSocket surfaces. A room
/// exists while anyone holds its sender or a receiver.
pub struct RoomRegistry {
    rooms: std::sync::Mutex<HashMap<String, broadcast::Sender<DomainEvent>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        RoomRegistry {
            rooms: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn sender(&self, room: &str) -> broadcast::Sender<DomainEvent> {
        let mut rooms = self.rooms.lock().expect("room registry poisoned");
        rooms
            .entry(room.to_string())
            .or_insert_with(|| broadcast::channel(ROOM_BUFFER).0)
            .clone()
    }

    pub fn subscribe(&self, room: &str) -> broadcast::Receiver<DomainEvent> {
        self.sender(room).subscribe()
    }

    /// Deliver to everyone in the room; returns the subscriber count.
    pub fn publish(&self, room: &str, event: &DomainEvent) -> usize {
        let sender = {
            let rooms = self.rooms.lock().expect("room registry poisoned");
            rooms.get(room).cloned()
        };
        match sender {
            Some(tx) => tx.send(event.clone()).unwrap_or(0),
            None => 0,
        }
    }

    /// Drop rooms nobody listens to anymore.
    pub fn prune(&self) {
        let mut rooms = self.rooms.lock().expect("room registry poisoned");
        rooms.retain(|_, tx| tx.receiver_count() > 0);
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}
