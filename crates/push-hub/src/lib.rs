//! # Push Hub
//!
//! An in-memory registry of Server-Sent Events clients with broadcast,
//! targeted delivery and heartbeat-based liveness.
//!
//! ## Features
//!
//! - **Targeted Delivery**: Send to every client, to all connections of a set of users, or to specific connections
//! - **Liveness**: Periodic heartbeats keep intermediaries from closing idle streams; silent clients are evicted
//! - **Non-blocking Writes**: A slow or broken client is dropped instead of stalling delivery to others
//! - **Built-in Server**: Optional Axum-based HTTP server exposing the stream and control endpoints
//! - **Pluggable Identity**: Optional auth callback decides which user a stream belongs to
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use push_hub::Hub;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     Hub::builder()
//!         .port(8080)
//!         .build()?
//!         .run()
//!         .await
//! }
//! ```
//!
//! ## Delivering From Application Code
//!
//! ```rust,ignore
//! use push_hub::{Hub, NotificationKind};
//! use serde_json::json;
//!
//! let hub = Hub::builder().build()?;
//! let registry = hub.registry();
//!
//! registry.broadcast_event("deploy", json!({ "version": "1.4.2" }));
//! registry.send_notification("user-42", "Build finished", "All green", NotificationKind::Success);
//! ```

mod connection;
mod delivery;
mod error;
mod event;
mod liveness;
mod notify;
mod registry;

#[cfg(feature = "server")]
pub mod auth;
#[cfg(feature = "server")]
mod gateway;
#[cfg(feature = "server")]
pub mod handler;

// Re-exports
pub use connection::{ChannelSink, Client, ClientId, ClientSink, Frame, SinkError};
pub use delivery::{DeliveryRequest, Target};
pub use error::{Error, Result};
pub use event::{timestamp, OutboundEvent, EVENT_CONNECTED, EVENT_DISCONNECTED, EVENT_HEARTBEAT};
pub use notify::{NotificationKind, SystemUpdateKind, EVENT_NOTIFICATION, EVENT_SYSTEM_UPDATE};
pub use registry::{
    ClientHandle, ClientInfo, ClientRegistry, RegistryConfig, RegistryStats,
    DEFAULT_CLIENT_TIMEOUT, DEFAULT_HEARTBEAT_INTERVAL,
};

#[cfg(feature = "server")]
pub use gateway::{Hub, HubBuilder, DEFAULT_CHANNEL_CAPACITY};
