//! Hub builder and runner

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::auth::AuthFn;
use crate::error::{Error, Result};
use crate::handler::{self, HubState};
use crate::registry::{ClientRegistry, RegistryConfig};

/// Default per-client buffer, in frames
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// Push hub server
pub struct Hub {
    port: u16,
    registry: ClientRegistry,
    channel_capacity: usize,
    control_api: bool,
    auth: Option<AuthFn>,
}

impl Hub {
    /// Create a new hub builder
    pub fn builder() -> HubBuilder {
        HubBuilder::default()
    }

    /// The registry this hub delivers through
    pub fn registry(&self) -> ClientRegistry {
        self.registry.clone()
    }

    /// Build the router with all routes and layers
    pub fn router(&self) -> Router {
        let state = HubState {
            registry: self.registry.clone(),
            auth: self.auth.clone(),
            channel_capacity: self.channel_capacity,
        };

        let mut app = Router::new()
            .route("/health", get(|| async { "OK" }))
            .route("/ready", get(|| async { "READY" }))
            .route("/api/sse", get(handler::open_stream));

        if self.control_api {
            app = app
                .route("/api/sse", post(handler::send_message))
                .route("/api/sse/stats", get(handler::get_stats))
                .route("/api/sse/clients", get(handler::list_clients))
                .route("/api/sse/disconnect-all", post(handler::disconnect_all))
                .route("/api/webhooks/sse-example", post(handler::webhook));
        }

        app.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
    }

    /// Bind to the configured port and serve until Ctrl+C or SIGTERM
    pub async fn run(self) -> anyhow::Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Listening on {}", addr);

        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on an existing listener until `shutdown` resolves.
    ///
    /// Streams never finish on their own, so the registry is destroyed as
    /// soon as shutdown begins; that ends every open response and lets the
    /// graceful shutdown complete.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::info!(
            port = self.port,
            control_api = self.control_api,
            auth = self.auth.is_some(),
            "Starting push hub"
        );

        let app = self.router();
        let registry = self.registry.clone();
        registry.start_liveness().await;

        let teardown = registry.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.await;
                teardown.destroy().await;
            })
            .await?;

        // Covers a server that stopped without going through the shutdown future.
        registry.destroy().await;
        tracing::info!("Push hub shutdown complete");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}

/// Builder for Hub
pub struct HubBuilder {
    port: u16,
    heartbeat_interval: Duration,
    client_timeout: Duration,
    channel_capacity: usize,
    control_api: bool,
    auth: Option<AuthFn>,
}

impl Default for HubBuilder {
    fn default() -> Self {
        let liveness = RegistryConfig::default();
        Self {
            port: 8080,
            heartbeat_interval: liveness.heartbeat_interval,
            client_timeout: liveness.client_timeout,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            control_api: true,
            auth: None,
        }
    }
}

impl HubBuilder {
    /// Set the server port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the heartbeat interval
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set how long a client may stay silent before eviction
    pub fn client_timeout(mut self, timeout: Duration) -> Self {
        self.client_timeout = timeout;
        self
    }

    /// Set the per-client buffer size
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Enable or disable the send/stats/disconnect/webhook routes
    pub fn control_api(mut self, enable: bool) -> Self {
        self.control_api = enable;
        self
    }

    /// Set the authentication callback
    ///
    /// The callback receives an `AuthRequest` and returns the session user,
    /// `None` when there is no session, or an error response to deny.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// use push_hub::Hub;
    /// use push_hub::auth::{AuthRequest, deny};
    /// use axum::http::StatusCode;
    ///
    /// Hub::builder()
    ///     .auth(|req: AuthRequest| async move {
    ///         match req.bearer_token() {
    ///             Some(token) => Ok(lookup_session(token)),
    ///             None => Err(deny(StatusCode::UNAUTHORIZED, "Token required")),
    ///         }
    ///     })
    ///     .build()?
    ///     .run()
    ///     .await
    /// ```
    pub fn auth<F, Fut>(mut self, auth_fn: F) -> Self
    where
        F: Fn(crate::auth::AuthRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = crate::auth::AuthResponse> + Send + 'static,
    {
        self.auth = Some(crate::auth::auth_fn(auth_fn));
        self
    }

    /// Build the hub
    pub fn build(self) -> Result<Hub> {
        let config = RegistryConfig {
            heartbeat_interval: self.heartbeat_interval,
            client_timeout: self.client_timeout,
        };
        config.validate()?;

        if self.channel_capacity == 0 {
            return Err(Error::Config("channel capacity must be non-zero".into()));
        }
        if self.auth.is_some() {
            tracing::info!("Authentication enabled for stream connections");
        }

        Ok(Hub {
            port: self.port,
            registry: ClientRegistry::new(config),
            channel_capacity: self.channel_capacity,
            control_api: self.control_api,
            auth: self.auth,
        })
    }
}
