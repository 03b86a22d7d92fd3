//! Wire data model for realtime restaurant events.
//!
//! This crate provides the event type shared by the realtime client and any
//! consumer reacting to delivered events (kitchen board, waiter panel,
//! notification center).
//!
//! # Architecture
//!
//! - **Event**: An immutable record received from the server, routed by its `type`
//! - **Channels**: Reserved channel names understood by the event bus
//!
//! This crate has no dependencies on internal crates, so it can be shared by
//! the client core and by UI glue without circular dependencies. Payloads are
//! carried as JSON objects; interpreting them is left to the listeners.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Wildcard channel: listeners registered here receive every published event.
pub const ALL_CHANNEL: &str = "all";

/// Channel carrying the pseudo-event published when the server rejects the
/// client's credentials (HTTP 401/403).
pub const AUTH_ERROR_CHANNEL: &str = "auth_error";

/// A single event delivered by the server.
///
/// `event_type` selects bus channels, `server_id` is the server-assigned
/// position used for cursor advancement and `timestamp` combined with
/// `event_type` forms the dedup key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,

    #[serde(default)]
    pub payload: Map<String, Value>,

    #[serde(default, rename = "serverId", alias = "server_id", alias = "id")]
    pub server_id: String,

    #[serde(default)]
    pub timestamp: String,
}

impl Event {
    pub fn new(event_type: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            payload: Map::new(),
            server_id: String::new(),
            timestamp: timestamp.into(),
        }
    }

    pub fn with_server_id(mut self, server_id: impl Into<String>) -> Self {
        self.server_id = server_id.into();
        self
    }

    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }

    /// Builds the `auth_error` pseudo-event for a rejected request.
    pub fn auth_error(status: u16, timestamp: impl Into<String>) -> Self {
        let mut payload = Map::new();
        payload.insert("status".to_string(), Value::from(status));
        Self::new(AUTH_ERROR_CHANNEL, timestamp).with_payload(payload)
    }

    /// Key used to suppress re-handling of an event within one session.
    ///
    /// Events without a timestamp fall back to their server id so that
    /// unrelated events of the same type do not collapse into one key.
    pub fn dedup_key(&self) -> String {
        let discriminator = if self.timestamp.is_empty() {
            &self.server_id
        } else {
            &self.timestamp
        };
        format!("{}-{}", self.event_type, discriminator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_poll_event_with_defaults() {
        let event: Event = serde_json::from_value(json!({
            "type": "orders.new",
            "payload": { "order_id": 42, "table": "T4" },
            "timestamp": "2024-05-01T12:00:00Z",
            "id": "5-0"
        }))
        .unwrap();

        assert_eq!(event.event_type, "orders.new");
        assert_eq!(event.server_id, "5-0");
        assert_eq!(event.payload["order_id"], json!(42));
    }

    #[test]
    fn missing_optional_fields_default_to_empty() {
        let event: Event = serde_json::from_value(json!({ "type": "staff.call" })).unwrap();

        assert!(event.payload.is_empty());
        assert!(event.server_id.is_empty());
        assert!(event.timestamp.is_empty());
    }

    #[test]
    fn missing_type_is_rejected() {
        let result = serde_json::from_value::<Event>(json!({ "payload": {} }));
        assert!(result.is_err());
    }

    #[test]
    fn dedup_key_joins_type_and_timestamp() {
        let event = Event::new("orders.status", "1714564800123").with_server_id("9-1");
        assert_eq!(event.dedup_key(), "orders.status-1714564800123");
    }

    #[test]
    fn dedup_key_falls_back_to_server_id_without_timestamp() {
        let event = Event::new("orders.status", "").with_server_id("9-1");
        assert_eq!(event.dedup_key(), "orders.status-9-1");
    }

    #[test]
    fn auth_error_carries_status() {
        let event = Event::auth_error(403, "now");
        assert_eq!(event.event_type, AUTH_ERROR_CHANNEL);
        assert_eq!(event.payload["status"], json!(403));
    }
}
