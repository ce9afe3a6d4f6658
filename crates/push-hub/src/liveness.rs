//! Heartbeats, idle eviction and shutdown

use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::event::OutboundEvent;
use crate::registry::ClientRegistry;

impl ClientRegistry {
    /// Broadcast a `heartbeat` event to every client
    pub fn send_heartbeat(&self) -> usize {
        self.broadcast(&OutboundEvent::heartbeat())
    }

    /// Remove clients that have gone longer than the client timeout without a successful write
    pub fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let timeout = self.config.client_timeout;

        let evicted = self
            .snapshot()
            .into_iter()
            .filter(|client| client.idle_for(now) > timeout)
            .filter(|client| self.remove_client(&client.id))
            .count();

        if evicted > 0 {
            info!(evicted, timeout_secs = timeout.as_secs(), "Evicted idle clients");
        }
        evicted
    }

    /// One liveness pass: heartbeat first, then eviction
    pub fn liveness_tick(&self) {
        let reached = self.send_heartbeat();
        let evicted = self.evict_idle();
        debug!(
            heartbeats = reached,
            evicted,
            connections = self.connection_count(),
            "Liveness tick"
        );
    }

    /// Spawn the liveness timer. Does nothing if it is already running or
    /// the registry has been destroyed.
    pub async fn start_liveness(&self) {
        let mut task = self.liveness_task.lock().await;
        if task.is_some() || self.liveness_cancel.is_cancelled() || self.is_destroyed() {
            return;
        }

        let registry = self.clone();
        let cancel = self.liveness_cancel.clone();
        let period = self.config.heartbeat_interval;

        *task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => registry.liveness_tick(),
                }
            }
            debug!("Liveness timer stopped");
        }));

        info!(
            heartbeat_secs = period.as_secs(),
            timeout_secs = self.config.client_timeout.as_secs(),
            "Liveness timer started"
        );
    }

    /// Stop the liveness timer and wait for any in-flight tick to finish
    pub async fn stop_liveness(&self) {
        self.liveness_cancel.cancel();
        let task = self.liveness_task.lock().await.take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// Shutdown path: stop the timer, then disconnect every client.
    ///
    /// Clients admitted afterwards are disconnected on arrival.
    pub async fn destroy(&self) {
        self.destroyed.store(true, std::sync::atomic::Ordering::SeqCst);
        self.stop_liveness().await;
        let disconnected = self.disconnect_all();
        info!(disconnected, "Client registry destroyed");
    }
}
