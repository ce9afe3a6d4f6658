//! Broadcast and targeted delivery

use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::connection::{Client, ClientId, Frame};
use crate::event::OutboundEvent;
use crate::registry::ClientRegistry;

/// Clients selected by id and/or by user id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Target {
    pub user_ids: HashSet<String>,
    pub client_ids: HashSet<ClientId>,
}

impl Target {
    /// Every connection of the given users
    pub fn users<I, S>(user_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            user_ids: user_ids.into_iter().map(Into::into).collect(),
            client_ids: HashSet::new(),
        }
    }

    /// Exactly the given connections
    pub fn clients<I, S>(client_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            user_ids: HashSet::new(),
            client_ids: client_ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.user_ids.is_empty() && self.client_ids.is_empty()
    }
}

/// An event together with who should receive it.
///
/// `broadcast` wins over `target`. With neither set the request is
/// delivered to nobody.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryRequest {
    pub event_type: String,
    pub data: Value,
    pub broadcast: bool,
    pub target: Option<Target>,
}

impl DeliveryRequest {
    /// Deliver to every registered client
    pub fn broadcast(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            broadcast: true,
            target: None,
        }
    }

    /// Deliver to the clients matched by `target`
    pub fn targeted(event_type: impl Into<String>, data: Value, target: Target) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            broadcast: false,
            target: Some(target),
        }
    }

    /// The event this request encodes to
    pub fn event(&self) -> OutboundEvent {
        OutboundEvent::new(self.event_type.clone(), self.data.clone())
    }
}

impl ClientRegistry {
    /// Write a frame to one client.
    ///
    /// Returns false if the client is unknown or the write failed; a failed
    /// write removes the client.
    pub fn send_to_client(&self, client_id: &str, frame: Frame) -> bool {
        let client = self.clients.get(client_id).map(|e| e.value().clone());
        match client {
            Some(client) => self.deliver(&client, frame),
            None => false,
        }
    }

    /// Encode once and route according to the request
    pub fn send_message(&self, request: &DeliveryRequest) -> usize {
        let recipients = if request.broadcast {
            self.snapshot()
        } else if let Some(target) = &request.target {
            self.resolve_target(target)
        } else {
            debug!(event_type = %request.event_type, "Message has no recipients, dropped");
            return 0;
        };

        let frame = Frame::from(request.event().encode());
        let sent = self.deliver_all(&recipients, &frame);

        debug!(
            event_type = %request.event_type,
            broadcast = request.broadcast,
            recipients = recipients.len(),
            sent_count = sent,
            "Message dispatched"
        );
        sent
    }

    /// Broadcast an event to all clients
    pub fn broadcast(&self, event: &OutboundEvent) -> usize {
        let recipients = self.snapshot();
        let frame = Frame::from(event.encode());
        self.deliver_all(&recipients, &frame)
    }

    /// Send an event to the clients matched by `target`
    pub fn send_to_target(&self, target: &Target, event: &OutboundEvent) -> usize {
        let recipients = self.resolve_target(target);
        let frame = Frame::from(event.encode());
        self.deliver_all(&recipients, &frame)
    }

    /// Notify every client with a `disconnected` event, then remove it
    pub fn disconnect_all(&self) -> usize {
        let frame = Frame::from(OutboundEvent::disconnected().encode());
        let disconnected = self
            .snapshot()
            .iter()
            .filter(|client| self.retire(client, &frame))
            .count();

        if disconnected > 0 {
            info!(disconnected, "All clients disconnected");
        }
        disconnected
    }

    /// Clients whose id is listed, plus clients of the listed users, each once
    pub(crate) fn resolve_target(&self, target: &Target) -> Vec<Arc<Client>> {
        let mut ids: HashSet<ClientId> = target.client_ids.clone();
        for user in &target.user_ids {
            if let Some(user_clients) = self.user_index.get(user) {
                ids.extend(user_clients.iter().cloned());
            }
        }

        ids.iter()
            .filter_map(|id| self.clients.get(id).map(|e| e.value().clone()))
            .collect()
    }

    fn deliver_all(&self, clients: &[Arc<Client>], frame: &Frame) -> usize {
        clients
            .iter()
            .filter(|client| self.deliver(client, frame.clone()))
            .count()
    }

    fn deliver(&self, client: &Client, frame: Frame) -> bool {
        if !client.is_alive() {
            return false;
        }
        match client.write(frame) {
            Ok(()) => true,
            Err(e) => {
                warn!(client_id = %client.id, error = %e, "Failed to write to client, removing");
                self.remove_client(&client.id);
                false
            }
        }
    }
}
