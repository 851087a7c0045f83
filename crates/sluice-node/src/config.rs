//! Node configuration for the Sluice economy node.
//!
//! [`NodeConfig`] is layered: built-in defaults, then an optional
//! `sluice.toml` in the data directory, then `SLUICE_*` environment
//! variables. Command-line flags are applied on top by the binary.

use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use sluice_core::constants::DEFAULT_RPC_PORT;
use sluice_core::error::SluiceError;
use sluice_core::governance::StaticGovernance;
use sluice_core::types::{Epoch, Principal};

/// Name of the optional config file inside the data directory.
pub const CONFIG_FILE_NAME: &str = "sluice.toml";

/// Configuration for an economy node instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Root directory for all persistent data.
    pub data_dir: PathBuf,
    /// IP address for the JSON-RPC server to bind to.
    pub rpc_bind: String,
    /// Port for the JSON-RPC server.
    pub rpc_port: u16,
    /// Log level filter string (e.g. "info", "sluice_node_lib=debug").
    pub log_level: String,
    /// Log output format: "text" or "json".
    pub log_format: String,
    /// Hex-encoded principals allowed to perform governance actions.
    pub governors: Vec<String>,
    /// Clock value for a fresh data directory. Ignored once an epoch is stored.
    pub genesis_epoch: Epoch,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            rpc_bind: "127.0.0.1".to_string(),
            rpc_port: DEFAULT_RPC_PORT,
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            governors: Vec::new(),
            genesis_epoch: 0,
        }
    }
}

/// `<platform data dir>/sluice`, or `./sluice` when there is none.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sluice")
}

impl NodeConfig {
    /// Load layered configuration.
    ///
    /// `data_dir` selects where `sluice.toml` is looked up and always wins
    /// over a `data_dir` set inside that file.
    pub fn load(data_dir: Option<PathBuf>) -> Result<Self, SluiceError> {
        let base = data_dir.clone().unwrap_or_else(default_data_dir);
        let mut cfg = Self::load_from(&base.join(CONFIG_FILE_NAME))?;
        if let Some(dir) = data_dir {
            cfg.data_dir = dir;
        }
        Ok(cfg)
    }

    /// Load defaults, then `path` if it exists, then the environment.
    pub fn load_from(path: &Path) -> Result<Self, SluiceError> {
        Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix("SLUICE")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("governors"),
            )
            .build()
            .and_then(|c| c.try_deserialize::<Self>())
            .map_err(|e| SluiceError::Config(e.to_string()))
    }

    /// Path to the RocksDB data directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("economy")
    }

    /// Socket address string for the RPC server.
    pub fn rpc_addr(&self) -> String {
        format!("{}:{}", self.rpc_bind, self.rpc_port)
    }

    /// Parse `governors` into an allow-list gate.
    pub fn governance(&self) -> Result<StaticGovernance, SluiceError> {
        let principals = self
            .governors
            .iter()
            .map(|hex| {
                Principal::from_hex(hex.trim())
                    .ok_or_else(|| SluiceError::Config(format!("invalid governor principal: {hex}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(StaticGovernance::new(principals))
    }
}
