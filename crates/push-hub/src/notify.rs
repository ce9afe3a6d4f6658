//! Convenience senders built on top of delivery

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::delivery::{DeliveryRequest, Target};
use crate::event::timestamp;
use crate::registry::ClientRegistry;

/// Event type used by [`ClientRegistry::send_notification`]
pub const EVENT_NOTIFICATION: &str = "notification";
/// Event type used by [`ClientRegistry::send_system_update`]
pub const EVENT_SYSTEM_UPDATE: &str = "system-update";

/// Severity shown with a user notification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

/// Category of a system-wide update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemUpdateKind {
    #[default]
    Info,
    Maintenance,
    Update,
}

impl ClientRegistry {
    /// Send an event to all connected clients
    pub fn broadcast_event(&self, event_type: &str, data: Value) -> usize {
        self.send_message(&DeliveryRequest::broadcast(event_type, data))
    }

    /// Send an event to every connection of the given users
    pub fn send_to_users<I, S>(&self, event_type: &str, data: Value, user_ids: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.send_message(&DeliveryRequest::targeted(event_type, data, Target::users(user_ids)))
    }

    /// Send an event to specific connections
    pub fn send_to_clients<I, S>(&self, event_type: &str, data: Value, client_ids: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.send_message(&DeliveryRequest::targeted(
            event_type,
            data,
            Target::clients(client_ids),
        ))
    }

    /// Send a `notification` event to one user
    pub fn send_notification(
        &self,
        user_id: &str,
        title: &str,
        message: &str,
        kind: NotificationKind,
    ) -> usize {
        let data = json!({
            "title": title,
            "message": message,
            "type": kind,
            "timestamp": timestamp(),
        });
        self.send_to_users(EVENT_NOTIFICATION, data, [user_id])
    }

    /// Broadcast a `system-update` event
    pub fn send_system_update(&self, message: &str, kind: SystemUpdateKind) -> usize {
        let data = json!({
            "message": message,
            "type": kind,
            "timestamp": timestamp(),
        });
        self.broadcast_event(EVENT_SYSTEM_UPDATE, data)
    }
}
