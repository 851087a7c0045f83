//! Shared fixtures for property and end-to-end tests.

use std::sync::Arc;

use sluice_core::claims::ClaimLog;
use sluice_core::governance::StaticGovernance;
use sluice_core::types::{Epoch, Principal, Role};
use sluice_emission::EmissionLedger;
use sluice_node_lib::economy::Economy;
use sluice_node_lib::storage::RocksStore;
use sluice_node_lib::NodeConfig;
use tempfile::TempDir;

/// Principal holding every governance right in tests.
pub const GOVERNOR: Principal = Principal([0x11; 32]);

/// Principal with no rights.
pub const OUTSIDER: Principal = Principal([0x22; 32]);

pub fn governance() -> StaticGovernance {
    StaticGovernance::new([GOVERNOR])
}

/// Node config rooted at `dir` with [`GOVERNOR`] as the only governor.
pub fn test_config(dir: &TempDir) -> NodeConfig {
    NodeConfig {
        data_dir: dir.path().to_path_buf(),
        governors: vec![GOVERNOR.to_string()],
        rpc_port: 0,
        ..NodeConfig::default()
    }
}

/// A persisted economy in a fresh temp directory.
pub fn test_economy() -> (Economy, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let economy = Economy::open(&test_config(&dir)).unwrap();
    (economy, dir)
}

/// Reopen the economy stored under `dir`.
pub fn reopen(dir: &TempDir) -> Economy {
    let store = RocksStore::open(test_config(dir).db_path()).unwrap();
    Economy::with_store(store, Arc::new(governance()), 0).unwrap()
}

/// Panics unless the ledger's books balance and every reservation matches
/// what its allocation still owes.
pub fn assert_conserved(ledger: &EmissionLedger) {
    assert_eq!(
        ledger.accounted_total(),
        ledger.pool().deposited() as u128,
        "available + reserved + pot balances must equal deposits"
    );
    for allocation in ledger.allocations() {
        assert_eq!(
            allocation.reserved,
            allocation.outstanding().unwrap(),
            "{} reservation drifted",
            allocation.id
        );
    }
}

/// Claim log holding `counts[i]` claims for `role` at `start + i`.
pub fn claim_series(role: &Role, start: Epoch, counts: &[u64]) -> ClaimLog {
    ClaimLog::from_entries(
        counts
            .iter()
            .enumerate()
            .map(|(i, &c)| (role.clone(), start + i as Epoch, c)),
    )
}
