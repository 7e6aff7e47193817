use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
    pub data_path: PathBuf,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 5000)),
            data_path: PathBuf::from("reservations.json"),
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("RSV_API_BIND_ADDR") {
            config.bind_addr = addr.parse()?;
        }

        if let Ok(path) = std::env::var("RSV_DATA_PATH") {
            config.data_path = PathBuf::from(path);
        }

        Ok(config)
    }

    pub fn from_toml(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ApiConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.data_path.as_os_str().is_empty() {
            anyhow::bail!("data_path must not be empty");
        }
        if self.data_path.is_dir() {
            anyhow::bail!("data_path {} is a directory", self.data_path.display());
        }
        Ok(())
    }
}
