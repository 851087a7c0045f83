//! Economy composition: engines, clock, governance, and storage.
//!
//! [`Economy`] holds the whole in-memory state behind one mutex. Governance
//! and draw calls run on a staged copy of the engine they touch, write the
//! rows that changed in a single batch, and only then install the copy.
//! Luck queries and claim reports touch one role, so they write just the
//! new rows and skip staging. A failed engine call or a failed write leaves
//! both memory and disk untouched. Cached luck is served without a write.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use sluice_core::claims::ClaimLog;
use sluice_core::clock::ManualClock;
use sluice_core::error::{ClockError, SluiceError, ThrottleError};
use sluice_core::governance::{Action, Capability};
use sluice_core::pot::ClaimPot;
use sluice_core::traits::{ClaimHistory, ClockSource, GovernanceGate};
use sluice_core::types::{AllocationId, Amount, Epoch, PotId, Principal, Role};
use sluice_emission::{Allocation, EmissionLedger};
use sluice_luck::{RoleParameter, RoleState, RoleThrottleConfig, ThrottleController};

use crate::config::NodeConfig;
use crate::storage::{ChangeSet, RocksStore};

/// Mutable economy state guarded by [`Economy`].
#[derive(Debug, Clone, Default)]
pub struct EconomyState {
    pub ledger: EmissionLedger,
    pub throttle: ThrottleController,
    pub claims: ClaimLog,
}

/// Aggregate counters reported by `getstatus`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EconomyStatus {
    pub epoch: Epoch,
    pub available: Amount,
    pub deposited: Amount,
    pub reserved: u128,
    pub pot_balance: u128,
    pub allocations: usize,
    pub pots: usize,
    pub roles: usize,
}

/// The running economy.
pub struct Economy {
    state: Mutex<EconomyState>,
    clock: ManualClock,
    gate: Arc<dyn GovernanceGate>,
    store: RocksStore,
}

impl Economy {
    /// Open the store under `config.db_path()` and restore its state.
    pub fn open(config: &NodeConfig) -> Result<Self, SluiceError> {
        let store = RocksStore::open(config.db_path())?;
        let gate = Arc::new(config.governance()?);
        Self::with_store(store, gate, config.genesis_epoch)
    }

    /// Restore from an already-open store.
    ///
    /// `genesis_epoch` seeds the clock only when the store has none.
    pub fn with_store(
        store: RocksStore,
        gate: Arc<dyn GovernanceGate>,
        genesis_epoch: Epoch,
    ) -> Result<Self, SluiceError> {
        let snapshot = store.load()?;
        let epoch = match snapshot.epoch {
            Some(epoch) => epoch,
            None => {
                store.commit(&ChangeSet {
                    epoch: Some(genesis_epoch),
                    ..ChangeSet::default()
                })?;
                genesis_epoch
            }
        };
        info!(
            epoch,
            allocations = snapshot.ledger.allocations().count(),
            pots = snapshot.ledger.pots().count(),
            roles = snapshot.throttle.roles().count(),
            "economy state loaded"
        );
        Ok(Self {
            state: Mutex::new(EconomyState {
                ledger: snapshot.ledger,
                throttle: snapshot.throttle,
                claims: snapshot.claims,
            }),
            clock: ManualClock::new(epoch),
            gate,
            store,
        })
    }

    pub fn current_epoch(&self) -> Epoch {
        self.clock.current_epoch()
    }

    // --- Queries ---

    pub fn status(&self) -> EconomyStatus {
        let state = self.state.lock();
        EconomyStatus {
            epoch: self.current_epoch(),
            available: state.ledger.pool().available(),
            deposited: state.ledger.pool().deposited(),
            reserved: state.ledger.total_reserved(),
            pot_balance: state.ledger.total_pot_balance(),
            allocations: state.ledger.allocations().count(),
            pots: state.ledger.pots().count(),
            roles: state.throttle.roles().count(),
        }
    }

    pub fn allocation(&self, id: AllocationId) -> Option<Allocation> {
        self.state.lock().ledger.allocation(id).cloned()
    }

    pub fn pot(&self, id: PotId) -> Option<ClaimPot> {
        self.state.lock().ledger.pot(id).cloned()
    }

    pub fn role(&self, role: &Role) -> Option<RoleState> {
        self.state.lock().throttle.role(role).cloned()
    }

    /// Accrual a draw through `now` would credit.
    pub fn accrued(&self, id: AllocationId) -> Result<Amount, SluiceError> {
        let now = self.current_epoch();
        Ok(self.state.lock().ledger.accrued(id, now)?)
    }

    pub fn claims(&self, role: &Role, epoch: Epoch) -> u64 {
        self.state.lock().claims.claims(role, epoch)
    }

    // --- Emission ---

    pub fn deposit(&self, caller: Principal, amount: Amount) -> Result<Amount, SluiceError> {
        self.mutate_ledger(|ledger, _, gate| {
            let cap = Capability::new(gate, caller);
            Ok(ledger.deposit(&cap, amount)?)
        })
    }

    pub fn create_pot(&self, caller: Principal) -> Result<PotId, SluiceError> {
        self.mutate_ledger(|ledger, now, gate| {
            let cap = Capability::new(gate, caller);
            Ok(ledger.open_pot(&cap, now)?)
        })
    }

    pub fn create_fund(
        &self,
        caller: Principal,
        pot: PotId,
        inflation_rate: Amount,
        end_epoch: Epoch,
    ) -> Result<AllocationId, SluiceError> {
        self.mutate_ledger(|ledger, now, gate| {
            let cap = Capability::new(gate, caller);
            Ok(ledger.create_fund(&cap, now, pot, inflation_rate, end_epoch)?)
        })
    }

    /// Draw `id` through `through`, or through the current epoch.
    pub fn draw(&self, id: AllocationId, through: Option<Epoch>) -> Result<Amount, SluiceError> {
        self.mutate_ledger(|ledger, now, _| Ok(ledger.draw(id, through.unwrap_or(now), now)?))
    }

    /// Draw every allocation feeding `pot`.
    pub fn draw_pot(&self, pot: PotId, through: Option<Epoch>) -> Result<Amount, SluiceError> {
        self.mutate_ledger(|ledger, now, _| Ok(ledger.draw_pot(pot, through.unwrap_or(now), now)?))
    }

    pub fn update_inflation(
        &self,
        caller: Principal,
        id: AllocationId,
        new_rate: Amount,
        effective_epoch: Epoch,
    ) -> Result<(), SluiceError> {
        self.mutate_ledger(|ledger, now, gate| {
            let cap = Capability::new(gate, caller);
            Ok(ledger.update_inflation(&cap, now, id, new_rate, effective_epoch)?)
        })
    }

    pub fn update_end_epoch(
        &self,
        caller: Principal,
        id: AllocationId,
        new_end_epoch: Epoch,
    ) -> Result<(), SluiceError> {
        self.mutate_ledger(|ledger, now, gate| {
            let cap = Capability::new(gate, caller);
            Ok(ledger.update_end_epoch(&cap, now, id, new_end_epoch)?)
        })
    }

    pub fn update_fund_pot(
        &self,
        caller: Principal,
        id: AllocationId,
        new_pot: PotId,
    ) -> Result<(), SluiceError> {
        self.mutate_ledger(|ledger, now, gate| {
            let cap = Capability::new(gate, caller);
            Ok(ledger.update_fund_pot(&cap, now, id, new_pot)?)
        })
    }

    // --- Throttling ---

    pub fn init_role(
        &self,
        caller: Principal,
        role: Role,
        config: RoleThrottleConfig,
    ) -> Result<(), SluiceError> {
        self.mutate_throttle(|throttle, gate| {
            let cap = Capability::new(gate, caller);
            Ok(throttle.init_role(&cap, role, config)?)
        })
    }

    pub fn configure_role(
        &self,
        caller: Principal,
        role: &Role,
        parameter: RoleParameter,
    ) -> Result<(), SluiceError> {
        self.mutate_throttle(|throttle, gate| {
            let cap = Capability::new(gate, caller);
            Ok(throttle.configure(&cap, role, parameter)?)
        })
    }

    /// Luck for `role` at `epoch` (default: now), persisting any values the
    /// query computed.
    pub fn get_luck(&self, role: &Role, epoch: Option<Epoch>) -> Result<u64, SluiceError> {
        let mut state = self.state.lock();
        let now = self.current_epoch();
        let epoch = epoch.unwrap_or(now);
        if let Some(luck) = state.throttle.cached_luck(role, epoch) {
            return Ok(luck);
        }

        let EconomyState { throttle, claims, .. } = &mut *state;
        let filled = throttle.role(role).map_or(0, |r| r.cache.len());
        let luck = throttle.get_luck(&*claims, role, epoch, now)?;
        let changes = ChangeSet {
            luck: new_luck(throttle, role, filled),
            ..ChangeSet::default()
        };
        if let Err(e) = self.persist(&changes, now) {
            throttle.truncate_luck(role, filled);
            return Err(e);
        }
        Ok(luck)
    }

    /// Add `count` successful claims for `role` in the current epoch.
    ///
    /// Returns the epoch's new total.
    pub fn record_claims(&self, role: &Role, epoch: Epoch, count: u64) -> Result<u64, SluiceError> {
        let mut state = self.state.lock();
        let now = self.current_epoch();
        if state.throttle.role(role).is_none() {
            return Err(ThrottleError::RoleNotFound(role.clone()).into());
        }
        if epoch != now {
            return Err(ThrottleError::InvalidEpoch {
                epoch,
                current: now,
            }
            .into());
        }
        let total = state
            .claims
            .claims(role, epoch)
            .checked_add(count)
            .ok_or(ThrottleError::ArithmeticOverflow)?;
        self.persist(
            &ChangeSet {
                claims: vec![(role.clone(), epoch, total)],
                ..ChangeSet::default()
            },
            now,
        )?;
        Ok(state.claims.record(role, epoch, count)?)
    }

    // --- Clock ---

    /// Move the clock forward to `epoch`.
    pub fn advance_epoch(&self, caller: Principal, epoch: Epoch) -> Result<Epoch, SluiceError> {
        let _state = self.state.lock();
        Capability::new(self.gate.as_ref(), caller).require(Action::AdvanceEpoch)?;
        let current = self.current_epoch();
        if epoch <= current {
            return Err(ClockError::NotAdvancing {
                requested: epoch,
                current,
            }
            .into());
        }
        self.store.commit(&ChangeSet {
            epoch: Some(epoch),
            ..ChangeSet::default()
        })?;
        self.clock.advance_to(epoch)?;
        info!(from = current, to = epoch, "advanced epoch");
        Ok(epoch)
    }

    pub fn flush(&self) -> Result<(), SluiceError> {
        self.store.flush()
    }

    // --- Internal helpers ---

    /// Run `op` on a staged ledger, persist the difference, then install it.
    fn mutate_ledger<T>(
        &self,
        op: impl FnOnce(&mut EmissionLedger, Epoch, &dyn GovernanceGate) -> Result<T, SluiceError>,
    ) -> Result<T, SluiceError> {
        let mut state = self.state.lock();
        let now = self.current_epoch();

        let mut staged = state.ledger.clone();
        let out = op(&mut staged, now, self.gate.as_ref())?;

        let mut changes = ChangeSet::default();
        diff_ledger(&state.ledger, &staged, &mut changes);
        self.persist(&changes, now)?;
        state.ledger = staged;
        Ok(out)
    }

    /// Same as [`Self::mutate_ledger`] for role configuration.
    fn mutate_throttle<T>(
        &self,
        op: impl FnOnce(&mut ThrottleController, &dyn GovernanceGate) -> Result<T, SluiceError>,
    ) -> Result<T, SluiceError> {
        let mut state = self.state.lock();
        let now = self.current_epoch();

        let mut staged = state.throttle.clone();
        let out = op(&mut staged, self.gate.as_ref())?;

        let mut changes = ChangeSet::default();
        diff_throttle(&state.throttle, &staged, &mut changes);
        self.persist(&changes, now)?;
        state.throttle = staged;
        Ok(out)
    }

    fn persist(&self, changes: &ChangeSet, now: Epoch) -> Result<(), SluiceError> {
        if changes.is_empty() {
            return Ok(());
        }
        self.store.commit(changes)?;
        debug!(rows = changes.len(), epoch = now, "committed economy changes");
        Ok(())
    }
}

/// Rows that differ between `before` and `after`.
pub fn diff(before: &EconomyState, after: &EconomyState) -> ChangeSet {
    let mut changes = ChangeSet::default();
    diff_ledger(&before.ledger, &after.ledger, &mut changes);
    diff_throttle(&before.throttle, &after.throttle, &mut changes);
    changes.claims = after
        .claims
        .entries()
        .filter(|(role, epoch, count)| before.claims.claims(role, *epoch) != *count)
        .map(|(role, epoch, count)| (role.clone(), epoch, count))
        .collect();
    changes
}

fn diff_ledger(old: &EmissionLedger, new: &EmissionLedger, changes: &mut ChangeSet) {
    if old.pool() != new.pool() {
        changes.pool = Some(new.pool().clone());
    }
    if old.next_allocation_id() != new.next_allocation_id() {
        changes.next_allocation_id = Some(new.next_allocation_id());
    }
    if old.next_pot_id() != new.next_pot_id() {
        changes.next_pot_id = Some(new.next_pot_id());
    }
    changes.allocations = new
        .allocations()
        .filter(|a| old.allocation(a.id) != Some(a))
        .cloned()
        .collect();
    changes.pots = new
        .pots()
        .filter(|p| old.pot(p.id) != Some(p))
        .cloned()
        .collect();
}

fn diff_throttle(old: &ThrottleController, new: &ThrottleController, changes: &mut ChangeSet) {
    for (role, state) in new.roles() {
        let previous = old.role(role);
        if previous.map(|p| &p.config) != Some(&state.config) {
            changes.roles.push((role.clone(), state.config.clone()));
        }
        let cached = previous.map_or(0, |p| p.cache.len());
        changes.luck.extend(new_luck(new, role, cached));
    }
}

/// Cache rows of `role` past its first `filled` values.
fn new_luck(throttle: &ThrottleController, role: &Role, filled: usize) -> Vec<(Role, Epoch, u64)> {
    throttle
        .role(role)
        .map(|state| {
            state
                .cache
                .iter_after(filled)
                .map(|(epoch, luck)| (role.clone(), epoch, luck))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::governance::StaticGovernance;

    const GOVERNOR: Principal = Principal([0xAA; 32]);
    const STRANGER: Principal = Principal([0x55; 32]);

    fn economy(dir: &tempfile::TempDir) -> Economy {
        let store = RocksStore::open(dir.path()).unwrap();
        Economy::with_store(store, Arc::new(StaticGovernance::new([GOVERNOR])), 0).unwrap()
    }

    #[test]
    fn fresh_economy_starts_at_genesis() {
        let dir = tempfile::tempdir().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        let eco = Economy::with_store(store, Arc::new(StaticGovernance::default()), 12).unwrap();
        assert_eq!(eco.current_epoch(), 12);
        assert_eq!(eco.status().allocations, 0);
    }

    #[test]
    fn fund_lifecycle_updates_status() {
        let dir = tempfile::tempdir().unwrap();
        let eco = economy(&dir);
        eco.deposit(GOVERNOR, 1_000).unwrap();
        let pot = eco.create_pot(GOVERNOR).unwrap();
        let id = eco.create_fund(GOVERNOR, pot, 10, 50).unwrap();
        eco.advance_epoch(GOVERNOR, 4).unwrap();

        assert_eq!(eco.accrued(id).unwrap(), 40);
        assert_eq!(eco.draw(id, None).unwrap(), 40);

        let status = eco.status();
        assert_eq!(status.epoch, 4);
        assert_eq!(status.available, 500);
        assert_eq!(status.reserved, 460);
        assert_eq!(status.pot_balance, 40);
    }

    #[test]
    fn rejected_call_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let eco = economy(&dir);
        eco.deposit(GOVERNOR, 100).unwrap();
        let pot = eco.create_pot(GOVERNOR).unwrap();
        let before = eco.status();

        let err = eco.create_fund(GOVERNOR, pot, 10, 50).unwrap_err();
        assert!(matches!(err, SluiceError::Ledger(_)));
        assert_eq!(eco.status(), before);
    }

    #[test]
    fn stranger_cannot_advance_clock() {
        let dir = tempfile::tempdir().unwrap();
        let eco = economy(&dir);
        assert!(matches!(
            eco.advance_epoch(STRANGER, 5),
            Err(SluiceError::Unauthorized(_))
        ));
        assert_eq!(eco.current_epoch(), 0);
    }

    #[test]
    fn clock_must_move_forward() {
        let dir = tempfile::tempdir().unwrap();
        let eco = economy(&dir);
        eco.advance_epoch(GOVERNOR, 3).unwrap();
        assert!(matches!(
            eco.advance_epoch(GOVERNOR, 3),
            Err(SluiceError::Clock(ClockError::NotAdvancing { requested: 3, current: 3 }))
        ));
    }

    #[test]
    fn claims_only_for_current_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let eco = economy(&dir);
        let role = Role::from("relayer");
        eco.init_role(GOVERNOR, role.clone(), RoleThrottleConfig::new(0, 10, 1, 100))
            .unwrap();
        eco.advance_epoch(GOVERNOR, 2).unwrap();

        assert_eq!(eco.record_claims(&role, 2, 3).unwrap(), 3);
        assert_eq!(eco.record_claims(&role, 2, 4).unwrap(), 7);
        assert!(matches!(
            eco.record_claims(&role, 1, 1),
            Err(SluiceError::Throttle(ThrottleError::InvalidEpoch { .. }))
        ));
        assert!(matches!(
            eco.record_claims(&Role::from("ghost"), 2, 1),
            Err(SluiceError::Throttle(ThrottleError::RoleNotFound(_)))
        ));
        assert_eq!(eco.claims(&role, 2), 7);
    }

    #[test]
    fn cached_luck_is_served_without_a_write() {
        let dir = tempfile::tempdir().unwrap();
        let eco = economy(&dir);
        let role = Role::from("relayer");
        eco.init_role(GOVERNOR, role.clone(), RoleThrottleConfig::new(0, 10, 1, 100))
            .unwrap();
        eco.advance_epoch(GOVERNOR, 3).unwrap();

        let before_fill = eco.store.sequence();
        assert_eq!(eco.get_luck(&role, None).unwrap(), 100);
        let after_fill = eco.store.sequence();
        assert!(after_fill > before_fill);
        assert_eq!(eco.role(&role).unwrap().cache.len(), 4);

        assert_eq!(eco.get_luck(&role, Some(1)).unwrap(), 100);
        assert_eq!(eco.get_luck(&role, Some(3)).unwrap(), 100);
        assert_eq!(eco.store.sequence(), after_fill);
    }

    #[test]
    fn rejected_luck_query_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let eco = economy(&dir);
        let role = Role::from("relayer");
        eco.init_role(GOVERNOR, role.clone(), RoleThrottleConfig::new(2, 10, 1, 100))
            .unwrap();
        let before = eco.store.sequence();
        assert!(eco.get_luck(&role, Some(1)).is_err());
        assert!(eco.get_luck(&Role::from("ghost"), None).is_err());
        assert_eq!(eco.store.sequence(), before);
        assert!(eco.role(&role).unwrap().cache.is_empty());
    }

    #[test]
    fn claim_report_persists_one_row() {
        let dir = tempfile::tempdir().unwrap();
        let role = Role::from("relayer");
        {
            let eco = economy(&dir);
            eco.init_role(GOVERNOR, role.clone(), RoleThrottleConfig::new(0, 10, 1, 100))
                .unwrap();
            eco.record_claims(&role, 0, 4).unwrap();
            eco.record_claims(&role, 0, 5).unwrap();
            assert!(matches!(
                eco.record_claims(&role, 0, u64::MAX),
                Err(SluiceError::Throttle(ThrottleError::ArithmeticOverflow))
            ));
        }
        let eco = economy(&dir);
        assert_eq!(eco.claims(&role, 0), 9);
    }

    #[test]
    fn diff_reports_only_touched_rows() {
        let gov = StaticGovernance::new([GOVERNOR]);
        let cap = Capability::new(&gov, GOVERNOR);
        let mut before = EconomyState::default();
        before.ledger.deposit(&cap, 1_000).unwrap();
        let pot = before.ledger.open_pot(&cap, 0).unwrap();
        before.ledger.create_fund(&cap, 0, pot, 1, 10).unwrap();
        before.ledger.create_fund(&cap, 0, pot, 2, 10).unwrap();

        let mut after = before.clone();
        after.ledger.draw(AllocationId(2), 3, 3).unwrap();

        let changes = diff(&before, &after);
        assert_eq!(changes.allocations.len(), 1);
        assert_eq!(changes.allocations[0].id, AllocationId(2));
        assert_eq!(changes.pots.len(), 1);
        assert!(changes.pool.is_none());
        assert!(changes.next_allocation_id.is_none());
    }

    #[test]
    fn diff_reports_new_luck_values() {
        let gov = StaticGovernance::new([GOVERNOR]);
        let cap = Capability::new(&gov, GOVERNOR);
        let role = Role::from("relayer");
        let mut before = EconomyState::default();
        before
            .throttle
            .init_role(&cap, role.clone(), RoleThrottleConfig::new(0, 10, 1, 100))
            .unwrap();
        before.throttle.get_luck(&before.claims.clone(), &role, 1, 5).unwrap();

        let mut after = before.clone();
        let claims = after.claims.clone();
        after.throttle.get_luck(&claims, &role, 4, 5).unwrap();

        let changes = diff(&before, &after);
        let epochs: Vec<Epoch> = changes.luck.iter().map(|(_, e, _)| *e).collect();
        assert_eq!(epochs, vec![2, 3, 4]);
        assert!(changes.roles.is_empty());
    }
}
