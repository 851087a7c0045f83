//! RocksDB round trips for the economy store.

use std::sync::Arc;

use sluice_core::claims::ClaimLog;
use sluice_core::governance::{Capability, StaticGovernance};
use sluice_core::traits::ClaimHistory;
use sluice_core::types::{AllocationId, PotId, Principal, Role};
use sluice_luck::RoleThrottleConfig;
use sluice_node_lib::economy::{diff, Economy, EconomyState};
use sluice_node_lib::storage::{ChangeSet, RocksStore};

const GOVERNOR: Principal = Principal([0xAA; 32]);

fn governance() -> Arc<StaticGovernance> {
    Arc::new(StaticGovernance::new([GOVERNOR]))
}

#[test]
fn fresh_store_loads_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = RocksStore::open(dir.path().join("economy")).unwrap();
    let snapshot = store.load().unwrap();
    assert_eq!(snapshot.epoch, None);
    assert_eq!(snapshot.ledger.allocations().count(), 0);
    assert_eq!(snapshot.ledger.next_allocation_id(), 1);
    assert_eq!(snapshot.throttle.roles().count(), 0);
}

#[test]
fn committed_diff_reloads_identically() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("economy");
    let gov = StaticGovernance::new([GOVERNOR]);
    let cap = Capability::new(&gov, GOVERNOR);
    let role = Role::from("relayer");

    let mut state = EconomyState::default();
    state.ledger.deposit(&cap, 10_000).unwrap();
    let pot = state.ledger.open_pot(&cap, 0).unwrap();
    let other = state.ledger.open_pot(&cap, 0).unwrap();
    let id = state.ledger.create_fund(&cap, 0, pot, 10, 100).unwrap();
    state.ledger.update_inflation(&cap, 0, id, 25, 5).unwrap();
    state.ledger.draw(id, 8, 8).unwrap();
    state.ledger.update_fund_pot(&cap, 9, id, other).unwrap();
    state
        .throttle
        .init_role(&cap, role.clone(), RoleThrottleConfig::new(0, 3, 5, 100))
        .unwrap();
    state.claims.record(&role, 0, 7).unwrap();
    state.claims.record(&role, 1, 2).unwrap();
    let claims = state.claims.clone();
    state.throttle.get_luck(&claims, &role, 6, 9).unwrap();

    {
        let store = RocksStore::open(&path).unwrap();
        let mut changes = diff(&EconomyState::default(), &state);
        changes.epoch = Some(9);
        store.commit(&changes).unwrap();
    }

    let store = RocksStore::open(&path).unwrap();
    let snapshot = store.load().unwrap();
    assert_eq!(snapshot.epoch, Some(9));
    assert_eq!(snapshot.ledger, state.ledger);
    assert_eq!(snapshot.throttle, state.throttle);
    assert_eq!(snapshot.claims, state.claims);
}

#[test]
fn luck_gap_on_disk_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = RocksStore::open(dir.path()).unwrap();
    let role = Role::from("relayer");
    store
        .commit(&ChangeSet {
            roles: vec![(role.clone(), RoleThrottleConfig::new(0, 1, 1, 10))],
            luck: vec![(role.clone(), 0, 10), (role, 2, 9)],
            ..ChangeSet::default()
        })
        .unwrap();
    assert!(store.load().is_err());
}

#[test]
fn economy_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("economy");
    let role = Role::from("relayer");

    let (fund, luck) = {
        let eco = Economy::with_store(RocksStore::open(&path).unwrap(), governance(), 0).unwrap();
        eco.deposit(GOVERNOR, 5_000).unwrap();
        let pot = eco.create_pot(GOVERNOR).unwrap();
        let fund = eco.create_fund(GOVERNOR, pot, 10, 100).unwrap();
        eco.init_role(GOVERNOR, role.clone(), RoleThrottleConfig::new(0, 1, 10, 100))
            .unwrap();
        eco.record_claims(&role, 0, 4).unwrap();
        eco.advance_epoch(GOVERNOR, 6).unwrap();
        eco.draw(fund, None).unwrap();
        let luck = eco.get_luck(&role, None).unwrap();
        eco.flush().unwrap();
        (fund, luck)
    };

    let eco = Economy::with_store(RocksStore::open(&path).unwrap(), governance(), 0).unwrap();
    assert_eq!(eco.current_epoch(), 6);
    let allocation = eco.allocation(fund).unwrap();
    assert_eq!(allocation.last_drawn_epoch, 6);
    assert_eq!(eco.pot(PotId(1)).unwrap().balance(), 60);
    assert_eq!(eco.claims(&role, 0), 4);
    assert_eq!(eco.role(&role).unwrap().cache.len(), 7);
    assert_eq!(eco.get_luck(&role, Some(6)).unwrap(), luck);

    // Counters resume where they left off.
    let next = eco.create_fund(GOVERNOR, PotId(1), 1, 50).unwrap();
    assert_eq!(next, AllocationId(2));
}

#[test]
fn genesis_epoch_only_seeds_fresh_store() {
    let dir = tempfile::tempdir().unwrap();
    {
        let eco = Economy::with_store(RocksStore::open(dir.path()).unwrap(), governance(), 40).unwrap();
        eco.advance_epoch(GOVERNOR, 41).unwrap();
    }
    let eco = Economy::with_store(RocksStore::open(dir.path()).unwrap(), governance(), 0).unwrap();
    assert_eq!(eco.current_epoch(), 41);
}

#[test]
fn claim_log_rows_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let store = RocksStore::open(dir.path()).unwrap();
    let mut log = ClaimLog::new();
    log.record(&Role::from("a"), 3, 11).unwrap();
    log.record(&Role::from("bb"), 3, 12).unwrap();
    store
        .commit(&ChangeSet {
            claims: log.entries().map(|(r, e, c)| (r.clone(), e, c)).collect(),
            ..ChangeSet::default()
        })
        .unwrap();
    let loaded = store.load().unwrap().claims;
    assert_eq!(loaded.claims(&Role::from("a"), 3), 11);
    assert_eq!(loaded.claims(&Role::from("bb"), 3), 12);
}
