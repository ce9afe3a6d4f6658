//! Client entries and the sinks they write to

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Opaque, process-unique client identifier
pub type ClientId = String;

/// One encoded event block, shared between every recipient of a delivery
pub type Frame = Arc<str>;

/// Why a write to a client sink failed
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkError {
    /// The transport side of the stream is gone
    #[error("client stream closed")]
    Closed,
    /// The client is not draining its buffer
    #[error("client buffer full")]
    Full,
}

/// Write side of a client's stream.
///
/// Writes must not block. The registry owns the sink for as long as the
/// client is registered; dropping it is how the transport learns that the
/// client was removed.
pub trait ClientSink: Send + Sync + 'static {
    /// Push one encoded frame to the client
    fn write(&self, frame: Frame) -> Result<(), SinkError>;
}

/// Sink backed by a bounded channel drained by the HTTP response body
#[derive(Debug)]
pub struct ChannelSink {
    sender: mpsc::Sender<Frame>,
}

impl ChannelSink {
    /// Create a sink and the receiver that feeds the response stream
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }
}

impl ClientSink for ChannelSink {
    fn write(&self, frame: Frame) -> Result<(), SinkError> {
        self.sender.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
            mpsc::error::TrySendError::Full(_) => SinkError::Full,
        })
    }
}

/// A registered push connection
pub struct Client {
    /// Unique client ID
    pub id: ClientId,
    /// Validated user identity, if any
    pub user_id: Option<String>,
    /// When the client was admitted
    pub connected_at: chrono::DateTime<chrono::Utc>,
    sink: Box<dyn ClientSink>,
    epoch: Instant,
    /// Milliseconds between `epoch` and the last successful write
    last_activity: AtomicU64,
    alive: AtomicBool,
}

impl Client {
    pub(crate) fn new(id: ClientId, user_id: Option<String>, sink: Box<dyn ClientSink>) -> Self {
        Self {
            id,
            user_id,
            connected_at: chrono::Utc::now(),
            sink,
            epoch: Instant::now(),
            last_activity: AtomicU64::new(0),
            alive: AtomicBool::new(true),
        }
    }

    /// Whether the client is still registered
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Flip `is_alive` to false. Returns true only for the first caller.
    pub(crate) fn mark_dead(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }

    /// Write a frame and refresh the activity clock on success
    pub(crate) fn write(&self, frame: Frame) -> Result<(), SinkError> {
        self.sink.write(frame)?;
        self.touch();
        Ok(())
    }

    fn touch(&self) {
        let elapsed = Instant::now().saturating_duration_since(self.epoch);
        self.last_activity
            .fetch_max(elapsed.as_millis() as u64, Ordering::AcqRel);
    }

    /// Time since the last successful write, as seen at `now`
    pub fn idle_for(&self, now: Instant) -> Duration {
        let last = self.epoch + Duration::from_millis(self.last_activity.load(Ordering::Acquire));
        now.saturating_duration_since(last)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("connected_at", &self.connected_at)
            .field("alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}
