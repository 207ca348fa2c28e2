//! Node configuration.
//!
//! Built-in defaults, then an optional YAML file, then `MARKET_*` environment
//! variables (`MARKET_LEDGER__RPC_URL=http://...`).

use crate::storage::{FileKeyStore, KeyStore, MemoryKeyStore};
use ::config::{ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const ENV_PREFIX: &str = "MARKET";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub api: ApiConfig,
    pub storage: StorageConfig,
    pub ledger: LedgerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub listen_addr: String,
    /// Upper bound on request bodies, uploads included
    pub max_upload_bytes: usize,
    pub admin_token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8000".to_string(),
            max_upload_bytes: 100 * 1024 * 1024,
            admin_token: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    File,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub key_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::File,
            key_dir: PathBuf::from("encryption_keys"),
        }
    }
}

impl StorageConfig {
    pub fn open_store(&self) -> crate::storage::Result<Arc<dyn KeyStore>> {
        Ok(match self.backend {
            StorageBackend::File => Arc::new(FileKeyStore::open(&self.key_dir)?),
            StorageBackend::Memory => Arc::new(MemoryKeyStore::new()),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub rpc_url: String,
    pub market_address: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        // Local hardhat node with the marketplace as its first deployment
        Self {
            rpc_url: "http://127.0.0.1:8545".to_string(),
            market_address: "0x5FbDB2315678afecb367f032d93F642f64180aa3".to_string(),
        }
    }
}

impl NodeConfig {
    /// Layer defaults, the file at `path` if it exists, and the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ::config::Config::builder().add_source(::config::Config::try_from(&NodeConfig::default())?);
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }
        let config: NodeConfig = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen_addr()?;
        if self.api.max_upload_bytes == 0 {
            return Err(ConfigError::Message("api.max_upload_bytes must be positive".to_string()));
        }
        if self.storage.backend == StorageBackend::File && self.storage.key_dir.as_os_str().is_empty() {
            return Err(ConfigError::Message("storage.key_dir must be set for the file backend".to_string()));
        }
        if matches!(self.api.admin_token.as_deref(), Some(token) if token.trim().is_empty()) {
            return Err(ConfigError::Message("api.admin_token must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.api
            .listen_addr
            .parse()
            .map_err(|e| ConfigError::Message(format!("invalid api.listen_addr {}: {}", self.api.listen_addr, e)))
    }
}
