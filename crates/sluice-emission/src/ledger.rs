//! The emission ledger: allocations, pots, and the unallocated pool.
//!
//! Every operation validates first and commits last. Intermediate results
//! are computed on copies of the touched records, so a rejected call leaves
//! the ledger exactly as it was.
//!
//! The current epoch is passed in by the caller (read from its
//! [`ClockSource`](sluice_core::traits::ClockSource)), which keeps every
//! operation a pure function of its inputs.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use sluice_core::constants::{FIRST_ALLOCATION_ID, FIRST_POT_ID};
use sluice_core::error::LedgerError;
use sluice_core::governance::{Action, Capability};
use sluice_core::pool::UnallocatedPool;
use sluice_core::pot::ClaimPot;
use sluice_core::types::{AllocationId, Amount, Epoch, PotId};

use crate::allocation::{Allocation, ScheduledRate};

/// Owner of every allocation and pot, and of the unallocated pool.
///
/// # Conservation
///
/// `pool.available + Σ allocation.reserved + Σ pot.balance == pool.deposited`
/// after every operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmissionLedger {
    pool: UnallocatedPool,
    allocations: BTreeMap<AllocationId, Allocation>,
    pots: BTreeMap<PotId, ClaimPot>,
    next_allocation_id: u64,
    next_pot_id: u64,
}

impl Default for EmissionLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl EmissionLedger {
    pub fn new() -> Self {
        Self {
            pool: UnallocatedPool::new(),
            allocations: BTreeMap::new(),
            pots: BTreeMap::new(),
            next_allocation_id: FIRST_ALLOCATION_ID,
            next_pot_id: FIRST_POT_ID,
        }
    }

    /// Rebuild a ledger from persisted records.
    ///
    /// Id counters resume after the highest persisted id, or at the stored
    /// counter if that is larger.
    pub fn from_parts(
        pool: UnallocatedPool,
        allocations: impl IntoIterator<Item = Allocation>,
        pots: impl IntoIterator<Item = ClaimPot>,
        next_allocation_id: u64,
        next_pot_id: u64,
    ) -> Self {
        let allocations: BTreeMap<_, _> = allocations.into_iter().map(|a| (a.id, a)).collect();
        let pots: BTreeMap<_, _> = pots.into_iter().map(|p| (p.id, p)).collect();
        let after_allocations = allocations
            .keys()
            .next_back()
            .map_or(FIRST_ALLOCATION_ID, |id| id.0 + 1);
        let after_pots = pots.keys().next_back().map_or(FIRST_POT_ID, |id| id.0 + 1);
        Self {
            pool,
            allocations,
            pots,
            next_allocation_id: next_allocation_id.max(after_allocations),
            next_pot_id: next_pot_id.max(after_pots),
        }
    }

    // --- Queries ---

    pub fn pool(&self) -> &UnallocatedPool {
        &self.pool
    }

    pub fn allocation(&self, id: AllocationId) -> Option<&Allocation> {
        self.allocations.get(&id)
    }

    pub fn allocations(&self) -> impl Iterator<Item = &Allocation> + '_ {
        self.allocations.values()
    }

    pub fn pot(&self, id: PotId) -> Option<&ClaimPot> {
        self.pots.get(&id)
    }

    pub fn pots(&self) -> impl Iterator<Item = &ClaimPot> + '_ {
        self.pots.values()
    }

    pub fn next_allocation_id(&self) -> u64 {
        self.next_allocation_id
    }

    pub fn next_pot_id(&self) -> u64 {
        self.next_pot_id
    }

    /// Sum of all allocation reservations.
    pub fn total_reserved(&self) -> u128 {
        self.allocations.values().map(|a| a.reserved as u128).sum()
    }

    /// Sum of all pot balances.
    pub fn total_pot_balance(&self) -> u128 {
        self.pots.values().map(|p| p.balance() as u128).sum()
    }

    /// `available + reserved + pot balances`; equals `pool.deposited()` when
    /// value is conserved.
    pub fn accounted_total(&self) -> u128 {
        self.pool.available() as u128 + self.total_reserved() + self.total_pot_balance()
    }

    /// What a draw through `through` would credit right now, without
    /// mutating anything.
    pub fn accrued(&self, id: AllocationId, through: Epoch) -> Result<Amount, LedgerError> {
        self.get(id)?.accrued_through(through)
    }

    // --- Governance mutations ---

    /// Credit externally-injected value to the unallocated pool.
    pub fn deposit(&mut self, cap: &Capability<'_>, amount: Amount) -> Result<Amount, LedgerError> {
        authorize(cap, Action::Deposit)?;
        let available = self.pool.deposit(amount)?;
        info!(amount, available, "deposited into unallocated pool");
        Ok(available)
    }

    /// Open an empty pot at `now`.
    pub fn open_pot(&mut self, cap: &Capability<'_>, now: Epoch) -> Result<PotId, LedgerError> {
        authorize(cap, Action::CreatePot)?;
        let id = PotId(self.next_pot_id);
        let next = self
            .next_pot_id
            .checked_add(1)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        self.pots.insert(id, ClaimPot::new(id, now));
        self.next_pot_id = next;
        info!(%id, epoch = now, "opened pot");
        Ok(id)
    }

    /// Create an allocation emitting `inflation_rate` per epoch into `pot`
    /// from `now` until `end_epoch`.
    ///
    /// Reserves `inflation_rate * (end_epoch - now)` out of the pool.
    pub fn create_fund(
        &mut self,
        cap: &Capability<'_>,
        now: Epoch,
        pot: PotId,
        inflation_rate: Amount,
        end_epoch: Epoch,
    ) -> Result<AllocationId, LedgerError> {
        authorize(cap, Action::CreateFund)?;
        let mut target = self.get_pot(pot)?.clone();
        if end_epoch <= now {
            return Err(LedgerError::InvalidEpoch {
                epoch: end_epoch,
                current: now,
            });
        }

        let id = AllocationId(self.next_allocation_id);
        let next_id = self
            .next_allocation_id
            .checked_add(1)
            .ok_or(LedgerError::ArithmeticOverflow)?;

        let mut allocation = Allocation {
            id,
            pot,
            inflation_rate,
            end_epoch,
            last_drawn_epoch: now,
            pending: None,
            reserved: 0,
        };
        allocation.reserved = allocation.outstanding()?;

        let mut pool = self.pool.clone();
        pool.reserve(allocation.reserved)?;
        target.attach(id);

        info!(
            %id, %pot, inflation_rate, end_epoch, reserved = allocation.reserved,
            "created fund"
        );
        self.pool = pool;
        self.pots.insert(pot, target);
        self.allocations.insert(id, allocation);
        self.next_allocation_id = next_id;
        Ok(id)
    }

    /// Schedule `new_rate` to take effect at `effective_epoch`, replacing any
    /// pending change.
    ///
    /// The reservation is re-derived under the new profile and netted against
    /// the old one; if the pool cannot cover the growth the call is rejected.
    /// A pending change that has already taken effect is settled into the pot
    /// first, so it becomes the active rate before being superseded.
    pub fn update_inflation(
        &mut self,
        cap: &Capability<'_>,
        now: Epoch,
        id: AllocationId,
        new_rate: Amount,
        effective_epoch: Epoch,
    ) -> Result<(), LedgerError> {
        authorize(cap, Action::UpdateInflation)?;
        let current = self.get(id)?;
        let mut pot = self.get_pot(current.pot)?.clone();
        if effective_epoch <= now {
            return Err(LedgerError::InvalidEpoch {
                epoch: effective_epoch,
                current: now,
            });
        }
        if effective_epoch >= current.end_epoch {
            return Err(LedgerError::AllocationEnded {
                id,
                end_epoch: current.end_epoch,
            });
        }

        let (base, settled) = match current.pending {
            Some(change) if change.effective_epoch <= now => current.drawn_through(now)?,
            _ => (current.clone(), 0),
        };

        let mut next = base.clone();
        next.pending = Some(ScheduledRate {
            rate: new_rate,
            effective_epoch,
        });
        next.reserved = next.outstanding()?;

        let mut pool = self.pool.clone();
        pool.rebalance(base.reserved, next.reserved)?;
        if settled > 0 {
            pot.credit(settled, base.last_drawn_epoch)?;
        }

        info!(
            %id, new_rate, effective_epoch, settled,
            reserved_before = current.reserved, reserved_after = next.reserved,
            "scheduled inflation change"
        );
        self.pool = pool;
        self.pots.insert(pot.id, pot);
        self.allocations.insert(id, next);
        Ok(())
    }

    /// Move the allocation's end epoch.
    ///
    /// Shortening refunds the dropped tail; lengthening reserves the added
    /// tail. A pending change at or after the new end would never take effect
    /// and is discarded along with its reservation.
    pub fn update_end_epoch(
        &mut self,
        cap: &Capability<'_>,
        now: Epoch,
        id: AllocationId,
        new_end_epoch: Epoch,
    ) -> Result<(), LedgerError> {
        authorize(cap, Action::UpdateEndEpoch)?;
        let current = self.get(id)?;
        if new_end_epoch <= now {
            return Err(LedgerError::InvalidEpoch {
                epoch: new_end_epoch,
                current: now,
            });
        }
        if now >= current.end_epoch {
            return Err(LedgerError::AllocationEnded {
                id,
                end_epoch: current.end_epoch,
            });
        }

        let mut next = current.clone();
        if let Some(change) = next.pending {
            if change.effective_epoch >= new_end_epoch {
                debug!(%id, effective_epoch = change.effective_epoch, "discarding unreachable rate change");
                next.pending = None;
            }
        }
        next.end_epoch = new_end_epoch;
        next.reserved = next.outstanding()?;

        let mut pool = self.pool.clone();
        pool.rebalance(current.reserved, next.reserved)?;

        info!(
            %id, old_end = current.end_epoch, new_end = new_end_epoch,
            reserved_before = current.reserved, reserved_after = next.reserved,
            "updated fund end epoch"
        );
        self.pool = pool;
        self.allocations.insert(id, next);
        Ok(())
    }

    /// Rebind the allocation to `new_pot`.
    ///
    /// Accrual earned while bound to the old pot is credited there first.
    /// Balances already in either pot are never moved.
    pub fn update_fund_pot(
        &mut self,
        cap: &Capability<'_>,
        now: Epoch,
        id: AllocationId,
        new_pot: PotId,
    ) -> Result<(), LedgerError> {
        authorize(cap, Action::UpdateFundPot)?;
        let current = self.get(id)?;
        let mut target = self.get_pot(new_pot)?.clone();
        if current.pot == new_pot {
            return Ok(());
        }
        let mut previous = self.get_pot(current.pot)?.clone();

        let (mut next, settled) = if now > current.last_drawn_epoch && !current.is_settled() {
            current.drawn_through(now)?
        } else {
            (current.clone(), 0)
        };
        if settled > 0 {
            previous.credit(settled, next.last_drawn_epoch)?;
        }
        previous.detach(id);
        target.attach(id);
        next.pot = new_pot;

        info!(%id, from = %previous.id, to = %new_pot, settled, "reassigned fund pot");
        self.pots.insert(previous.id, previous);
        self.pots.insert(new_pot, target);
        self.allocations.insert(id, next);
        Ok(())
    }

    // --- Draws ---

    /// Credit accrual through `through` into the allocation's pot.
    ///
    /// Returns the amount credited. A fully-settled allocation is a no-op
    /// returning 0. Drawing through an epoch already covered is rejected, as
    /// is drawing past `now`.
    pub fn draw(&mut self, id: AllocationId, through: Epoch, now: Epoch) -> Result<Amount, LedgerError> {
        let current = self.get(id)?;
        if current.is_settled() {
            debug!(%id, "fund fully drawn, nothing to do");
            return Ok(0);
        }
        if through <= current.last_drawn_epoch {
            return Err(LedgerError::AlreadyDrawn {
                requested: through,
                last_drawn: current.last_drawn_epoch,
            });
        }
        if through > now {
            return Err(LedgerError::InvalidEpoch {
                epoch: through,
                current: now,
            });
        }

        let (next, amount) = current.drawn_through(through)?;
        let mut pot = self.get_pot(current.pot)?.clone();
        pot.credit(amount, next.last_drawn_epoch)?;

        info!(%id, pot = %pot.id, amount, through = next.last_drawn_epoch, "drew fund");
        self.pots.insert(pot.id, pot);
        self.allocations.insert(id, next);
        Ok(amount)
    }

    /// Draw every allocation feeding `pot` through `through`.
    ///
    /// Allocations already drawn that far are skipped. Returns the total
    /// credited. Either every draw commits or none does.
    pub fn draw_pot(&mut self, pot: PotId, through: Epoch, now: Epoch) -> Result<Amount, LedgerError> {
        let contributors: Vec<AllocationId> = self.get_pot(pot)?.contributors().collect();
        if contributors.is_empty() {
            return Err(LedgerError::NothingToDraw(pot));
        }
        if through > now {
            return Err(LedgerError::InvalidEpoch {
                epoch: through,
                current: now,
            });
        }

        let mut staged = self.clone();
        let mut total: Amount = 0;
        for id in contributors {
            let allocation = staged.get(id)?;
            if allocation.is_settled() || allocation.last_drawn_epoch >= through {
                continue;
            }
            let amount = staged.draw(id, through, now)?;
            total = total
                .checked_add(amount)
                .ok_or(LedgerError::ArithmeticOverflow)?;
        }

        *self = staged;
        Ok(total)
    }

    // --- Internal helpers ---

    fn get(&self, id: AllocationId) -> Result<&Allocation, LedgerError> {
        self.allocations.get(&id).ok_or(LedgerError::FundNotFound(id))
    }

    fn get_pot(&self, id: PotId) -> Result<&ClaimPot, LedgerError> {
        self.pots.get(&id).ok_or(LedgerError::PotNotFound(id))
    }
}

fn authorize(cap: &Capability<'_>, action: Action) -> Result<(), LedgerError> {
    cap.require(action).map_err(|e| {
        warn!(caller = %e.caller, %action, "rejected unauthorized ledger call");
        LedgerError::from(e)
    })
}
