use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Channel that receives a notice whenever a room checks out dirty.
pub const HOUSEKEEPING_CHANNEL: &str = "housekeeping";

/// Channel for human-readable task assignments to on-site staff.
pub const STAFF_CHANNEL: &str = "staff";

pub fn room_channel(room_id: Ulid) -> String {
    format!("room_{room_id}")
}

pub fn slot_channel(slot_id: Ulid) -> String {
    format!("slot_{slot_id}")
}

/// What goes out over LISTEN/NOTIFY.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    /// A committed engine mutation, relayed as-is.
    Domain { event: Event },
    /// Emitted exactly once per checkout transition of a booking.
    CleaningRequested { room_id: Ulid, booking_code: String },
    /// Human-readable counterpart of a cleaning request on the staff channel.
    TaskAssigned { message: String, link: String },
}

impl Notice {
    /// JSON payload as delivered to listening clients.
    pub fn payload(&self) -> String {
        // Serialization of these enums cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Broadcast hub for LISTEN/NOTIFY, keyed by channel name.
pub struct NotifyHub {
    channels: DashMap<String, broadcast::Sender<Notice>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a channel. Creates it if needed.
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<Notice> {
        let sender = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notice. No-op if nobody is listening.
    pub fn send(&self, channel: &str, notice: &Notice) {
        if let Some(sender) = self.channels.get(channel) {
            let _ = sender.send(notice.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RoomStatus;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let room_id = Ulid::new();
        let channel = room_channel(room_id);
        let mut rx = hub.subscribe(&channel);

        let notice = Notice::Domain {
            event: Event::RoomStatusSet {
                id: room_id,
                status: RoomStatus::Occupied,
            },
        };
        hub.send(&channel, &notice);

        assert_eq!(rx.recv().await.unwrap(), notice);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.send(
            HOUSEKEEPING_CHANNEL,
            &Notice::CleaningRequested {
                room_id: Ulid::new(),
                booking_code: "B-1".into(),
            },
        );
    }

    #[test]
    fn payload_is_json() {
        let notice = Notice::CleaningRequested {
            room_id: Ulid::new(),
            booking_code: "B-42".into(),
        };
        let payload = notice.payload();
        assert!(payload.contains("cleaning_requested"));
        assert!(payload.contains("B-42"));
    }
}
