//! Client configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// `host:port` of the gateway
    pub server_addr: String,
    /// Identity presented in the key exchange and stamped on every request
    pub client_id: String,
    pub connect_timeout_secs: u64,
    pub handshake_timeout_secs: u64,
    pub max_frame_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:8888".to_string(),
            client_id: uuid::Uuid::new_v4().to_string(),
            connect_timeout_secs: 10,
            handshake_timeout_secs: 10,
            max_frame_size: rsv_transport::MAX_FRAME_SIZE,
        }
    }
}

impl ClientConfig {
    pub fn new(server_addr: impl Into<String>) -> Self {
        Self {
            server_addr: server_addr.into(),
            ..Self::default()
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("RSV_SERVER_ADDR") {
            config.server_addr = addr;
        }

        if let Ok(id) = std::env::var("RSV_CLIENT_ID") {
            config.client_id = id;
        }

        if let Ok(secs) = std::env::var("RSV_CONNECT_TIMEOUT_SECS") {
            config.connect_timeout_secs = secs.parse()?;
        }

        if let Ok(secs) = std::env::var("RSV_HANDSHAKE_TIMEOUT_SECS") {
            config.handshake_timeout_secs = secs.parse()?;
        }

        if let Ok(size) = std::env::var("RSV_MAX_FRAME_SIZE") {
            config.max_frame_size = size.parse()?;
        }

        Ok(config)
    }

    pub fn from_toml(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server_addr.trim().is_empty() {
            anyhow::bail!("server_addr must not be empty");
        }
        if self.client_id.trim().is_empty() {
            anyhow::bail!("client_id must not be empty");
        }
        if self.connect_timeout_secs == 0 || self.handshake_timeout_secs == 0 {
            anyhow::bail!("timeouts must be > 0");
        }
        if self.max_frame_size < 1024 {
            anyhow::bail!("max_frame_size must be >= 1024");
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}
