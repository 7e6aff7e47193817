//! Configuration management

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Where authenticated operations are forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayMode {
    /// REST resource API at `api_base_url`
    Http,
    /// Reservation store at `data_path`, in process
    Local,
}

impl std::str::FromStr for RelayMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(RelayMode::Http),
            "local" => Ok(RelayMode::Local),
            other => Err(ConfigError::Invalid(format!("unknown relay_mode: {}", other))),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub server_id: String,
    pub relay_mode: RelayMode,
    pub api_base_url: String,
    pub data_path: PathBuf,
    pub audit_log_path: PathBuf,
    pub handshake_timeout_secs: u64,
    pub relay_timeout_secs: u64,
    /// 0 waits for the next frame forever
    pub idle_timeout_secs: u64,
    pub max_frame_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8888)),
            server_id: format!("rsv-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]),
            relay_mode: RelayMode::Http,
            api_base_url: "http://127.0.0.1:5000".to_string(),
            data_path: PathBuf::from("reservations.json"),
            audit_log_path: PathBuf::from("audit.log"),
            handshake_timeout_secs: 10,
            relay_timeout_secs: 30,
            idle_timeout_secs: 0,
            max_frame_size: rsv_transport::MAX_FRAME_SIZE,
        }
    }
}

impl ServerConfig {
    /// Load defaults, then environment variables, then the TOML file named by
    /// `RSV_CONFIG` (if any), and validate the result.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("RSV_CONFIG") {
            Ok(path) => Self::from_toml(path)?,
            Err(_) => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Override fields from `RSV_*` environment variables.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(addr) = std::env::var("RSV_LISTEN_ADDR") {
            self.listen_addr = addr
                .parse()
                .map_err(|e| ConfigError::Invalid(format!("Invalid listen_addr: {}", e)))?;
        }

        if let Ok(id) = std::env::var("RSV_SERVER_ID") {
            self.server_id = id;
        }

        if let Ok(mode) = std::env::var("RSV_RELAY_MODE") {
            self.relay_mode = mode.parse()?;
        }

        if let Ok(url) = std::env::var("RSV_API_BASE_URL") {
            self.api_base_url = url;
        }

        if let Ok(path) = std::env::var("RSV_DATA_PATH") {
            self.data_path = PathBuf::from(path);
        }

        if let Ok(path) = std::env::var("RSV_AUDIT_LOG_PATH") {
            self.audit_log_path = PathBuf::from(path);
        }

        self.handshake_timeout_secs = env_number("RSV_HANDSHAKE_TIMEOUT_SECS", self.handshake_timeout_secs)?;
        self.relay_timeout_secs = env_number("RSV_RELAY_TIMEOUT_SECS", self.relay_timeout_secs)?;
        self.idle_timeout_secs = env_number("RSV_IDLE_TIMEOUT_SECS", self.idle_timeout_secs)?;
        self.max_frame_size = env_number("RSV_MAX_FRAME_SIZE", self.max_frame_size)?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_id.trim().is_empty() {
            return Err(ConfigError::Invalid("server_id must not be empty".to_string()));
        }

        if self.handshake_timeout_secs == 0 {
            return Err(ConfigError::Invalid("handshake_timeout_secs must be > 0".to_string()));
        }

        if self.relay_timeout_secs == 0 {
            return Err(ConfigError::Invalid("relay_timeout_secs must be > 0".to_string()));
        }

        // A hybrid frame for a 2048-bit key needs at least this much.
        if self.max_frame_size < 1024 {
            return Err(ConfigError::Invalid("max_frame_size must be >= 1024".to_string()));
        }

        if self.relay_mode == RelayMode::Http
            && !(self.api_base_url.starts_with("http://") || self.api_base_url.starts_with("https://"))
        {
            return Err(ConfigError::Invalid(format!(
                "api_base_url must be an http(s) URL: {}",
                self.api_base_url
            )));
        }

        Ok(())
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn relay_timeout(&self) -> Duration {
        Duration::from_secs(self.relay_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }
}

fn env_number<T: std::str::FromStr>(name: &str, current: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("Invalid {}: {}", name, e))),
        Err(_) => Ok(current),
    }
}
