mod config;

use push_hub::Hub;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load()?;

    tracing::info!(
        port = config.server.port,
        control_api = config.server.control_api,
        heartbeat_interval_secs = config.liveness.heartbeat_interval_secs,
        client_timeout_secs = config.liveness.client_timeout_secs,
        "Hub starting"
    );

    Hub::builder()
        .port(config.server.port)
        .control_api(config.server.control_api)
        .channel_capacity(config.server.channel_capacity)
        .heartbeat_interval(config.liveness.heartbeat_interval())
        .client_timeout(config.liveness.client_timeout())
        .build()?
        .run()
        .await
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hub=info,push_hub=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}
