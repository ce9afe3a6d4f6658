use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub liveness: LivenessConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Mount the send/stats/disconnect/webhook routes
    #[serde(default = "default_true")]
    pub control_api: bool,
    /// Frames buffered per client before it counts as stalled
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessConfig {
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_client_timeout_secs")]
    pub client_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            control_api: true,
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            client_timeout_secs: default_client_timeout_secs(),
        }
    }
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_channel_capacity() -> usize {
    push_hub::DEFAULT_CHANNEL_CAPACITY
}

fn default_heartbeat_interval_secs() -> u64 {
    push_hub::DEFAULT_HEARTBEAT_INTERVAL.as_secs()
}

fn default_client_timeout_secs() -> u64 {
    push_hub::DEFAULT_CLIENT_TIMEOUT.as_secs()
}

impl LivenessConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());

        let mut config: AppConfig = if Path::new(&config_path).exists() {
            let content = std::fs::read_to_string(&config_path)?;
            serde_yaml::from_str(&content)?
        } else {
            AppConfig::default()
        };

        // Environment overrides the file
        if let Some(port) = env_parse("PORT") {
            config.server.port = port;
        }
        if let Some(enabled) = env_flag("ENABLE_CONTROL_API") {
            config.server.control_api = enabled;
        }
        if let Some(capacity) = env_parse("CHANNEL_CAPACITY") {
            config.server.channel_capacity = capacity;
        }
        if let Some(secs) = env_parse("HEARTBEAT_INTERVAL_SECS") {
            config.liveness.heartbeat_interval_secs = secs;
        }
        if let Some(secs) = env_parse("CLIENT_TIMEOUT_SECS") {
            config.liveness.client_timeout_secs = secs;
        }

        if config.liveness.client_timeout_secs <= config.liveness.heartbeat_interval_secs {
            anyhow::bail!(
                "client timeout ({}s) must be longer than the heartbeat interval ({}s)",
                config.liveness.client_timeout_secs,
                config.liveness.heartbeat_interval_secs
            );
        }

        Ok(config)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key).ok().map(|v| v != "0" && v != "false")
}
