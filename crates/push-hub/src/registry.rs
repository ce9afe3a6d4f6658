//! Client registry: admission, removal and introspection

use dashmap::DashMap;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::{Client, ClientId, ClientSink, Frame};
use crate::error::{Error, Result};
use crate::event::OutboundEvent;

/// Default interval between heartbeat broadcasts
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// Default silence after which a client is evicted
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(120);

/// Liveness settings for a registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// How often every client receives a heartbeat
    pub heartbeat_interval: Duration,
    /// How long a client may go without a successful write
    pub client_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            client_timeout: DEFAULT_CLIENT_TIMEOUT,
        }
    }
}

impl RegistryConfig {
    /// Check that the timeout leaves room for missed heartbeats
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval.is_zero() {
            return Err(Error::Config("heartbeat interval must be non-zero".into()));
        }
        if self.client_timeout <= self.heartbeat_interval {
            return Err(Error::Config(format!(
                "client timeout ({:?}) must exceed heartbeat interval ({:?})",
                self.client_timeout, self.heartbeat_interval
            )));
        }
        Ok(())
    }
}

/// Aggregate connection counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    /// Number of registered clients
    pub total_connections: usize,
    /// Number of distinct user ids among registered clients
    pub active_users: usize,
}

/// Point-in-time view of one client
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub id: ClientId,
    pub user_id: Option<String>,
    pub connected_at: String,
    pub idle_ms: u64,
    pub is_alive: bool,
}

/// Registry of all connected push clients.
///
/// Cloning is cheap and every clone refers to the same set of clients.
#[derive(Clone)]
pub struct ClientRegistry {
    /// All registered clients: client_id -> client
    pub(crate) clients: Arc<DashMap<ClientId, Arc<Client>>>,
    /// Index: user_id -> [client_ids]
    pub(crate) user_index: Arc<DashMap<String, HashSet<ClientId>>>,
    pub(crate) config: RegistryConfig,
    pub(crate) liveness_cancel: CancellationToken,
    pub(crate) liveness_task: Arc<Mutex<Option<JoinHandle<()>>>>,
    /// Set once by `destroy`; no client stays registered after it
    pub(crate) destroyed: Arc<AtomicBool>,
}

impl ClientRegistry {
    /// Create an empty registry. The liveness timer is started separately.
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            clients: Arc::new(DashMap::new()),
            user_index: Arc::new(DashMap::new()),
            config,
            liveness_cancel: CancellationToken::new(),
            liveness_task: Arc::new(Mutex::new(None)),
            destroyed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Liveness settings this registry runs with
    pub fn config(&self) -> RegistryConfig {
        self.config
    }

    /// Register a new client and greet it with a `connected` event.
    ///
    /// After `destroy` the client is sent `disconnected` instead, its sink is
    /// dropped and the returned handle is not registered.
    pub fn add_client(&self, sink: impl ClientSink, user_id: Option<String>) -> ClientHandle {
        let id = uuid::Uuid::new_v4().to_string();
        let user_id = user_id.filter(|u| !u.is_empty());

        // Index before the primary map so a concurrent removal always finds it.
        if let Some(user) = &user_id {
            self.user_index
                .entry(user.clone())
                .or_default()
                .insert(id.clone());
        }

        let client = Arc::new(Client::new(id.clone(), user_id.clone(), Box::new(sink)));
        self.clients.insert(id.clone(), client.clone());

        // Checked after the insert: either teardown's snapshot sees this
        // client or this check sees the flag.
        if self.is_destroyed() {
            warn!(client_id = %id, user_id = ?user_id, "Client admitted after shutdown, disconnecting");
            self.retire(&client, &Frame::from(OutboundEvent::disconnected().encode()));
            return ClientHandle {
                id,
                user_id,
                registry: self.clone(),
            };
        }

        info!(
            client_id = %id,
            user_id = ?user_id,
            total_connections = self.clients.len(),
            "Client connected"
        );

        let greeting = OutboundEvent::connected(&id, user_id.as_deref());
        self.send_to_client(&id, Frame::from(greeting.encode()));

        ClientHandle {
            id,
            user_id,
            registry: self.clone(),
        }
    }

    /// Remove a client. Unknown or already-removed ids are ignored.
    ///
    /// Returns whether this call performed the removal.
    pub fn remove_client(&self, client_id: &str) -> bool {
        let Some((_, client)) = self.clients.remove_if(client_id, |_, c| c.mark_dead()) else {
            return false;
        };

        if let Some(user) = &client.user_id {
            if let Some(mut ids) = self.user_index.get_mut(user) {
                ids.remove(client_id);
            }
            self.user_index.remove_if(user, |_, ids| ids.is_empty());
        }

        info!(
            client_id = %client_id,
            user_id = ?client.user_id,
            total_connections = self.clients.len(),
            "Client disconnected"
        );
        true
    }

    /// Remove a client and, if this call removed it, write one last frame.
    ///
    /// Writing after the removal keeps the final frame exactly-once when
    /// several teardown paths race for the same client.
    pub(crate) fn retire(&self, client: &Arc<Client>, frame: &Frame) -> bool {
        if !self.remove_client(&client.id) {
            return false;
        }
        let _ = client.write(frame.clone());
        true
    }

    /// Whether `destroy` has run
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Whether a client with this id is registered
    pub fn contains(&self, client_id: &str) -> bool {
        self.clients.contains_key(client_id)
    }

    /// Get total connection count
    pub fn connection_count(&self) -> usize {
        self.clients.len()
    }

    /// Connection totals and distinct authenticated users
    pub fn stats(&self) -> RegistryStats {
        let mut per_user: HashMap<String, usize> = HashMap::new();
        let mut total_connections = 0;

        for entry in self.clients.iter() {
            total_connections += 1;
            if let Some(user) = &entry.value().user_id {
                *per_user.entry(user.clone()).or_default() += 1;
            }
        }

        debug!(
            total_connections,
            active_users = per_user.len(),
            user_connections = ?per_user,
            "Registry stats"
        );

        RegistryStats {
            total_connections,
            active_users: per_user.len(),
        }
    }

    /// List all registered clients
    pub fn list_clients(&self) -> Vec<ClientInfo> {
        let now = Instant::now();
        self.snapshot()
            .into_iter()
            .map(|c| ClientInfo {
                id: c.id.clone(),
                user_id: c.user_id.clone(),
                connected_at: c.connected_at.to_rfc3339(),
                idle_ms: c.idle_for(now).as_millis() as u64,
                is_alive: c.is_alive(),
            })
            .collect()
    }

    /// Copy out the current entries so no map lock is held while writing
    pub(crate) fn snapshot(&self) -> Vec<Arc<Client>> {
        self.clients.iter().map(|e| e.value().clone()).collect()
    }
}

/// Handle returned on admission, held by the transport for the life of the stream
#[derive(Clone)]
pub struct ClientHandle {
    id: ClientId,
    user_id: Option<String>,
    registry: ClientRegistry,
}

impl ClientHandle {
    /// The client's id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The user id the client was admitted with
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Push an already-encoded frame to this client
    pub fn send(&self, frame: impl Into<Frame>) -> bool {
        self.registry.send_to_client(&self.id, frame.into())
    }

    /// Encode and push an event to this client
    pub fn send_event(&self, event: &OutboundEvent) -> bool {
        self.send(event.encode())
    }

    /// Whether the client is still registered
    pub fn is_registered(&self) -> bool {
        self.registry.contains(&self.id)
    }

    /// Remove the client from the registry
    pub fn close(&self) {
        self.registry.remove_client(&self.id);
    }
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .finish()
    }
}
