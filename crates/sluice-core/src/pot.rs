//! Claim pots: balances that accumulate emitted value.
//!
//! A pot knows nothing about emission rates. Allocations credit it through
//! [`ClaimPot::credit`] and it remembers the latest epoch it was drawn
//! against plus which allocations currently feed it.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::types::{AllocationId, Amount, Epoch, PotId};

#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct ClaimPot {
    pub id: PotId,
    balance: Amount,
    last_drawn_epoch: Epoch,
    contributors: BTreeSet<AllocationId>,
}

impl ClaimPot {
    /// An empty pot opened at `epoch`.
    pub fn new(id: PotId, epoch: Epoch) -> Self {
        Self {
            id,
            balance: 0,
            last_drawn_epoch: epoch,
            contributors: BTreeSet::new(),
        }
    }

    pub fn balance(&self) -> Amount {
        self.balance
    }

    pub fn last_drawn_epoch(&self) -> Epoch {
        self.last_drawn_epoch
    }

    /// Allocations currently bound to this pot, in id order.
    pub fn contributors(&self) -> impl Iterator<Item = AllocationId> + '_ {
        self.contributors.iter().copied()
    }

    pub fn is_fed_by(&self, id: AllocationId) -> bool {
        self.contributors.contains(&id)
    }

    /// Add `amount` drawn through `through_epoch`.
    ///
    /// `last_drawn_epoch` only moves forward; a credit from an allocation
    /// that lags behind another feeder leaves it in place.
    pub fn credit(&mut self, amount: Amount, through_epoch: Epoch) -> Result<(), LedgerError> {
        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        self.last_drawn_epoch = self.last_drawn_epoch.max(through_epoch);
        Ok(())
    }

    pub fn attach(&mut self, id: AllocationId) {
        self.contributors.insert(id);
    }

    /// Returns whether `id` was attached.
    pub fn detach(&mut self, id: AllocationId) -> bool {
        self.contributors.remove(&id)
    }
}
