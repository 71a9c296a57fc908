//! Event feed — decoded Zoom webhook events fanned out in-process.
//!
//! The webhook receiver (out of this crate) decodes a push into a
//! `ZoomEvent` and fires it on the bus. Every authenticated-user sensor
//! listens and keeps only the events addressed to it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

/// Event tag Zoom sends when a user's presence changes.
pub const CONNECTIVITY_EVENT: &str = "user.presence_status_updated";

/// Path (under `payload`) to the user id of a presence event.
pub const CONNECTIVITY_ID: &[&str] = &["object", "id"];

/// Path (under `payload`) to the new presence status.
pub const CONNECTIVITY_STATUS: &[&str] = &["object", "presence_status"];

const BUS_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoomEvent {
    /// Config entry whose webhook received the push.
    pub ha_config_entry_id: String,
    /// Zoom event type, e.g. `user.presence_status_updated`.
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

impl ZoomEvent {
    /// A presence event for `user_id`, as the webhook decoder produces it.
    pub fn presence(entry_id: &str, user_id: &str, status: &str) -> Self {
        Self {
            ha_config_entry_id: entry_id.to_string(),
            event: CONNECTIVITY_EVENT.to_string(),
            payload: serde_json::json!({
                "object": { "id": user_id, "presence_status": status }
            }),
        }
    }

    /// String value at `path` under `payload`, if every step exists and
    /// the leaf is a string.
    pub fn payload_str(&self, path: &[&str]) -> Option<&str> {
        data_at_path(&self.payload, path)
    }
}

pub fn data_at_path<'a>(data: &'a Value, path: &[&str]) -> Option<&'a str> {
    path.iter()
        .try_fold(data, |node, key| node.get(*key))
        .and_then(Value::as_str)
}

/// Platform-wide broadcast of decoded webhook events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ZoomEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Deliver an event to every current listener. Returns how many
    /// listeners saw it; zero is not an error.
    pub fn fire(&self, event: ZoomEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn listen(&self) -> broadcast::Receiver<ZoomEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_data_at_path_reads_nested_string() {
        let data = json!({"object": {"id": "U1", "presence_status": "Away"}});
        assert_eq!(data_at_path(&data, CONNECTIVITY_ID), Some("U1"));
        assert_eq!(data_at_path(&data, CONNECTIVITY_STATUS), Some("Away"));
    }

    #[test]
    fn test_data_at_path_missing_or_non_string() {
        let data = json!({"object": {"id": 42}});
        assert_eq!(data_at_path(&data, CONNECTIVITY_ID), None);
        assert_eq!(data_at_path(&data, CONNECTIVITY_STATUS), None);
        assert_eq!(data_at_path(&json!(null), CONNECTIVITY_ID), None);
    }

    #[test]
    fn test_event_decodes_from_webhook_json() {
        let raw = r#"{
            "ha_config_entry_id": "entry-1",
            "event": "user.presence_status_updated",
            "payload": {"account_id": "a", "object": {"id": "u1", "presence_status": "Do_Not_Disturb"}}
        }"#;
        let event: ZoomEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.event, CONNECTIVITY_EVENT);
        assert_eq!(event.payload_str(CONNECTIVITY_STATUS), Some("Do_Not_Disturb"));
    }

    #[tokio::test]
    async fn test_bus_fans_out_to_every_listener() {
        let bus = EventBus::new();
        let mut a = bus.listen();
        let mut b = bus.listen();

        assert_eq!(bus.fire(ZoomEvent::presence("e", "u", "Away")), 2);
        assert_eq!(a.recv().await.unwrap().payload_str(CONNECTIVITY_ID), Some("u"));
        assert_eq!(b.recv().await.unwrap().payload_str(CONNECTIVITY_ID), Some("u"));
    }

    #[test]
    fn test_fire_without_listeners_is_zero() {
        let bus = EventBus::new();
        assert_eq!(bus.fire(ZoomEvent::presence("e", "u", "Away")), 0);
    }
}
