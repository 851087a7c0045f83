//! # sluice-node
//! Economy node: RocksDB storage, JSON-RPC, and engine composition.
//!
//! Wires the emission ledger and luck controller into a running service:
//! - [`storage::RocksStore`]: persistent economy state backed by RocksDB
//! - [`economy::Economy`]: staged, atomically persisted engine calls
//! - [`rpc`]: JSON-RPC server for external access
//! - [`config::NodeConfig`]: layered node configuration

pub mod config;
pub mod economy;
pub mod rpc;
pub mod storage;

pub use config::NodeConfig;
pub use economy::Economy;
pub use rpc::start_rpc_server;
pub use storage::RocksStore;
