//! Sluice economy node binary.
//!
//! Opens the RocksDB-backed economy and serves it over JSON-RPC until
//! interrupted.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use sluice_core::types::Epoch;
use sluice_node_lib::{start_rpc_server, Economy, NodeConfig};
use tracing::{error, info};

/// Sluice economy node.
#[derive(Parser, Debug)]
#[command(
    name = "sluice-node",
    version,
    about = "Emission ledger and claim throttle node with RocksDB storage and JSON-RPC"
)]
struct Args {
    /// Data directory for economy storage and sluice.toml
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// RPC server bind address
    #[arg(long)]
    rpc_bind: Option<String>,

    /// RPC server port
    #[arg(long)]
    rpc_port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format ("text" or "json")
    #[arg(long)]
    log_format: Option<String>,

    /// Governor principals, hex-encoded (comma-separated)
    #[arg(long, value_delimiter = ',')]
    governors: Vec<String>,

    /// Starting epoch for a fresh data directory
    #[arg(long)]
    genesis_epoch: Option<Epoch>,
}

impl Args {
    /// Apply command-line overrides on top of the layered file/env config.
    fn apply(self, mut config: NodeConfig) -> NodeConfig {
        if let Some(bind) = self.rpc_bind {
            config.rpc_bind = bind;
        }
        if let Some(port) = self.rpc_port {
            config.rpc_port = port;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
        if !self.governors.is_empty() {
            config.governors = self.governors;
        }
        if let Some(epoch) = self.genesis_epoch {
            config.genesis_epoch = epoch;
        }
        config
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config = match NodeConfig::load(args.data_dir.clone()) {
        Ok(cfg) => args.apply(cfg),
        Err(e) => {
            eprintln!("failed to load config: {e}");
            process::exit(1);
        }
    };

    init_logging(&config.log_level, &config.log_format);

    info!("Sluice Node v{}", env!("CARGO_PKG_VERSION"));
    info!("data_dir: {:?}", config.data_dir);
    info!("rpc_addr: {}", config.rpc_addr());
    info!("governors: {}", config.governors.len());

    if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
        error!("failed to create data_dir: {}", e);
        process::exit(1);
    }

    let economy = match Economy::open(&config) {
        Ok(eco) => Arc::new(eco),
        Err(e) => {
            error!("failed to open economy: {}", e);
            process::exit(1);
        }
    };
    info!(epoch = economy.current_epoch(), "economy opened");

    let rpc_handle = match start_rpc_server(&config.rpc_addr(), Arc::clone(&economy)).await {
        Ok(handle) => handle,
        Err(e) => {
            error!("failed to start RPC server: {}", e);
            process::exit(1);
        }
    };

    info!("Sluice node running (Ctrl+C to stop)");

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                error!("failed to listen for Ctrl+C: {}", e);
            }
            info!("shutdown signal received");
        }
        _ = rpc_handle.clone().stopped() => {
            info!("RPC server exited");
        }
    }

    rpc_handle.stop().ok();
    info!("RPC server stopped");

    if let Err(e) = economy.flush() {
        error!("failed to flush storage: {}", e);
        process::exit(1);
    }
    info!("Sluice node shutdown complete");
}

/// Initialize tracing subscriber with the given log level and output format.
///
/// `format = "json"` selects structured JSON lines. Any other value gives
/// human-readable text.
fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let args = Args::parse_from([
            "sluice-node",
            "--rpc-port",
            "19999",
            "--governors",
            "aa,bb",
            "--genesis-epoch",
            "12",
        ]);
        let cfg = args.apply(NodeConfig::default());
        assert_eq!(cfg.rpc_port, 19999);
        assert_eq!(cfg.governors, vec!["aa".to_string(), "bb".to_string()]);
        assert_eq!(cfg.genesis_epoch, 12);
        assert_eq!(cfg.rpc_bind, "127.0.0.1");
    }

    #[test]
    fn absent_flags_keep_config() {
        let base = NodeConfig {
            rpc_port: 20001,
            log_format: "json".into(),
            ..NodeConfig::default()
        };
        let cfg = Args::parse_from(["sluice-node"]).apply(base.clone());
        assert_eq!(cfg, base);
    }
}
