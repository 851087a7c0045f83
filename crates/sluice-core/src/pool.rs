//! The unallocated pool: value not yet committed to any allocation.
//!
//! Every reservation is check-then-commit: [`reserve`](UnallocatedPool::reserve)
//! either debits the full amount or leaves the pool untouched.

use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::types::Amount;

/// Single transactional counter of uncommitted value.
///
/// # Invariants
///
/// * `available <= deposited`
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct UnallocatedPool {
    available: Amount,
    deposited: Amount,
}

impl UnallocatedPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value free to back new reservations.
    pub fn available(&self) -> Amount {
        self.available
    }

    /// Total value ever injected into the pool.
    pub fn deposited(&self) -> Amount {
        self.deposited
    }

    /// Credit externally-injected value. Returns the new available balance.
    pub fn deposit(&mut self, amount: Amount) -> Result<Amount, LedgerError> {
        let deposited = self
            .deposited
            .checked_add(amount)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        let available = self
            .available
            .checked_add(amount)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        self.deposited = deposited;
        self.available = available;
        Ok(available)
    }

    /// Debit `amount` if it is available; otherwise leave the pool untouched.
    pub fn reserve(&mut self, amount: Amount) -> Result<(), LedgerError> {
        self.available = self.available.checked_sub(amount).ok_or(
            LedgerError::InsufficientUnallocatedBalance {
                available: self.available,
                required: amount,
            },
        )?;
        Ok(())
    }

    /// Credit back a reservation that will no longer be drawn.
    pub fn release(&mut self, amount: Amount) -> Result<(), LedgerError> {
        let available = self
            .available
            .checked_add(amount)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        if available > self.deposited {
            return Err(LedgerError::ArithmeticOverflow);
        }
        self.available = available;
        Ok(())
    }

    /// Replace a reservation of `old` with one of `new`, netting the two.
    ///
    /// Only the difference touches the pool, so a shrinking reservation can
    /// never fail the balance check.
    pub fn rebalance(&mut self, old: Amount, new: Amount) -> Result<(), LedgerError> {
        if new > old {
            self.reserve(new - old)
        } else {
            self.release(old - new)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(amount: Amount) -> UnallocatedPool {
        let mut p = UnallocatedPool::new();
        p.deposit(amount).unwrap();
        p
    }

    #[test]
    fn deposit_tracks_both_counters() {
        let p = pool(500);
        assert_eq!(p.available(), 500);
        assert_eq!(p.deposited(), 500);
    }

    #[test]
    fn reserve_debits() {
        let mut p = pool(500);
        p.reserve(200).unwrap();
        assert_eq!(p.available(), 300);
        assert_eq!(p.deposited(), 500);
    }

    #[test]
    fn reserve_too_much_leaves_pool_untouched() {
        let mut p = pool(100);
        let err = p.reserve(101).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientUnallocatedBalance { available: 100, required: 101 }
        );
        assert_eq!(p.available(), 100);
    }

    #[test]
    fn reserve_exact_balance() {
        let mut p = pool(100);
        p.reserve(100).unwrap();
        assert_eq!(p.available(), 0);
    }

    #[test]
    fn release_cannot_exceed_deposits() {
        let mut p = pool(100);
        p.reserve(40).unwrap();
        p.release(40).unwrap();
        assert_eq!(p.available(), 100);
        assert_eq!(p.release(1), Err(LedgerError::ArithmeticOverflow));
    }

    #[test]
    fn rebalance_nets_difference() {
        let mut p = pool(100);
        p.reserve(60).unwrap();
        p.rebalance(60, 90).unwrap();
        assert_eq!(p.available(), 10);
        p.rebalance(90, 30).unwrap();
        assert_eq!(p.available(), 70);
    }

    #[test]
    fn rebalance_growth_checked() {
        let mut p = pool(100);
        p.reserve(60).unwrap();
        assert!(p.rebalance(60, 161).is_err());
        assert_eq!(p.available(), 40);
    }

    #[test]
    fn deposit_overflow_rejected() {
        let mut p = pool(u64::MAX);
        assert_eq!(p.deposit(1), Err(LedgerError::ArithmeticOverflow));
        assert_eq!(p.available(), u64::MAX);
    }
}
