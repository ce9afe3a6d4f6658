//! Outbound events and their text/event-stream encoding

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Sent to a client right after admission
pub const EVENT_CONNECTED: &str = "connected";
/// Periodic keep-alive broadcast
pub const EVENT_HEARTBEAT: &str = "heartbeat";
/// Sent to every client before a bulk disconnect
pub const EVENT_DISCONNECTED: &str = "disconnected";

/// Event to be encoded and pushed to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEvent {
    /// Event type (e.g., "message", "notification", "update")
    #[serde(rename = "event")]
    pub event_type: String,

    /// Event payload, JSON-encoded on the wire
    pub data: Value,

    /// Optional event id (SSE `id` field)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Optional reconnection hint in milliseconds (SSE `retry` field)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<u64>,
}

impl OutboundEvent {
    /// Create a new event with JSON data
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            id: None,
            retry: None,
        }
    }

    /// Set the event ID
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the retry interval
    pub fn with_retry(mut self, retry_ms: u64) -> Self {
        self.retry = Some(retry_ms);
        self
    }

    /// The `connected` event a client receives on admission
    pub fn connected(client_id: &str, user_id: Option<&str>) -> Self {
        Self::new(
            EVENT_CONNECTED,
            json!({ "clientId": client_id, "userId": user_id }),
        )
    }

    /// The periodic `heartbeat` event
    pub fn heartbeat() -> Self {
        Self::new(EVENT_HEARTBEAT, json!({ "timestamp": timestamp() }))
    }

    /// The `disconnected` event sent before a bulk disconnect
    pub fn disconnected() -> Self {
        Self::new(
            EVENT_DISCONNECTED,
            json!({
                "reason": "server_disconnect",
                "message": "All clients have been disconnected by the server",
                "timestamp": timestamp(),
            }),
        )
    }

    /// Encode into one text/event-stream block.
    ///
    /// Layout is `id:` when present and `retry:` when non-zero, then
    /// `event:` and a single `data:` line, terminated by a blank line. Line
    /// breaks are dropped from the id and event type, and JSON serialization
    /// escapes them in the payload, so one call always yields one event.
    pub fn encode(&self) -> String {
        let mut frame = String::new();

        if let Some(id) = &self.id {
            frame.push_str("id: ");
            push_single_line(&mut frame, id);
            frame.push('\n');
        }
        if let Some(retry) = self.retry.filter(|&ms| ms > 0) {
            frame.push_str(&format!("retry: {}\n", retry));
        }

        frame.push_str("event: ");
        push_single_line(&mut frame, &self.event_type);
        frame.push('\n');

        let data = serde_json::to_string(&self.data).unwrap_or_else(|_| "null".to_string());
        frame.push_str("data: ");
        frame.push_str(&data);
        frame.push_str("\n\n");

        frame
    }
}

fn push_single_line(frame: &mut String, value: &str) {
    frame.extend(value.chars().filter(|c| !matches!(c, '\r' | '\n')));
}

/// Current wall-clock time as an RFC 3339 string with millisecond precision
pub fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
