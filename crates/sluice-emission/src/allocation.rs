//! Allocation records and piecewise-constant accrual.
//!
//! An allocation emits `inflation_rate` units per epoch from its
//! `last_drawn_epoch` up to its `end_epoch`. A single pending
//! [`ScheduledRate`] splits that interval in two:
//!
//! ```text
//! last_drawn ──── rate ────► effective ──── pending.rate ────► end
//! ```
//!
//! Accrual over `[from, to)` is the area under that step function.

use serde::{Deserialize, Serialize};

use sluice_core::error::LedgerError;
use sluice_core::types::{AllocationId, Amount, Epoch, PotId};

/// A future rate change. At most one exists per allocation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct ScheduledRate {
    /// Rate that applies from `effective_epoch` onward.
    pub rate: Amount,
    /// First epoch accruing at `rate`.
    pub effective_epoch: Epoch,
}

/// A governance-created emission stream feeding one pot.
///
/// # Invariants
///
/// * `last_drawn_epoch <= end_epoch`
/// * `pending.effective_epoch > last_drawn_epoch` while a change is pending
/// * `reserved == accrual_between(last_drawn_epoch, end_epoch, ..)`
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct Allocation {
    pub id: AllocationId,
    /// Pot receiving draws.
    pub pot: PotId,
    /// Units emitted per epoch under the active profile.
    pub inflation_rate: Amount,
    /// No accrual happens at or after this epoch.
    pub end_epoch: Epoch,
    /// Accrual has been credited through this epoch.
    pub last_drawn_epoch: Epoch,
    pub pending: Option<ScheduledRate>,
    /// Value still held back from the unallocated pool for undrawn accrual.
    pub reserved: Amount,
}

impl Allocation {
    /// Whether accrual has been credited all the way to `end_epoch`.
    pub fn is_settled(&self) -> bool {
        self.last_drawn_epoch >= self.end_epoch
    }

    /// Value accrued since the last draw, up to `min(through, end_epoch)`.
    pub fn accrued_through(&self, through: Epoch) -> Result<Amount, LedgerError> {
        accrual_between(
            self.last_drawn_epoch,
            through.min(self.end_epoch),
            self.inflation_rate,
            self.pending,
        )
    }

    /// Value the current profile will still emit before `end_epoch`.
    pub fn outstanding(&self) -> Result<Amount, LedgerError> {
        self.accrued_through(self.end_epoch)
    }

    /// The allocation as it would be after drawing through `through`, and the
    /// amount that draw credits.
    ///
    /// Promotes the pending change once its effective epoch has been reached.
    /// Does not check `through` against the clock; callers do.
    pub fn drawn_through(&self, through: Epoch) -> Result<(Allocation, Amount), LedgerError> {
        let segment_end = through.min(self.end_epoch);
        let accrued = self.accrued_through(segment_end)?;

        let mut next = self.clone();
        next.last_drawn_epoch = segment_end.max(self.last_drawn_epoch);
        next.reserved = self
            .reserved
            .checked_sub(accrued)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        if let Some(change) = self.pending {
            if change.effective_epoch <= next.last_drawn_epoch {
                next.inflation_rate = change.rate;
                next.pending = None;
            }
        }
        Ok((next, accrued))
    }
}

/// Integrate a piecewise-constant rate over `[from, to)`.
///
/// `rate` applies until `pending.effective_epoch` (if it falls at or before
/// `to`), `pending.rate` after it. Returns 0 for an empty interval.
pub fn accrual_between(
    from: Epoch,
    to: Epoch,
    rate: Amount,
    pending: Option<ScheduledRate>,
) -> Result<Amount, LedgerError> {
    if to <= from {
        return Ok(0);
    }

    match pending {
        Some(change) if change.effective_epoch <= to => {
            let pivot = change.effective_epoch.max(from);
            let before = emitted(rate, pivot - from)?;
            let after = emitted(change.rate, to - pivot)?;
            before
                .checked_add(after)
                .ok_or(LedgerError::ArithmeticOverflow)
        }
        _ => emitted(rate, to - from),
    }
}

/// `rate * epochs`, computed in `u128` and narrowed with a check.
fn emitted(rate: Amount, epochs: u64) -> Result<Amount, LedgerError> {
    let total = (rate as u128) * (epochs as u128);
    Amount::try_from(total).map_err(|_| LedgerError::ArithmeticOverflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn allocation(rate: Amount, last: Epoch, end: Epoch, pending: Option<ScheduledRate>) -> Allocation {
        let mut a = Allocation {
            id: AllocationId(1),
            pot: PotId(1),
            inflation_rate: rate,
            end_epoch: end,
            last_drawn_epoch: last,
            pending,
            reserved: 0,
        };
        a.reserved = a.outstanding().unwrap();
        a
    }

    // ------------------------------------------------------------------
    // accrual_between
    // ------------------------------------------------------------------

    #[test]
    fn flat_rate_accrual() {
        assert_eq!(accrual_between(0, 10, 7, None).unwrap(), 70);
    }

    #[test]
    fn empty_interval_accrues_nothing() {
        assert_eq!(accrual_between(5, 5, 100, None).unwrap(), 0);
        assert_eq!(accrual_between(6, 5, 100, None).unwrap(), 0);
    }

    #[test]
    fn piecewise_accrual_splits_at_effective_epoch() {
        let change = ScheduledRate { rate: 25, effective_epoch: 5 };
        assert_eq!(accrual_between(0, 8, 10, Some(change)).unwrap(), 10 * 5 + 25 * 3);
    }

    #[test]
    fn change_after_interval_is_ignored() {
        let change = ScheduledRate { rate: 25, effective_epoch: 9 };
        assert_eq!(accrual_between(0, 8, 10, Some(change)).unwrap(), 80);
    }

    #[test]
    fn change_at_interval_end_contributes_nothing_yet() {
        let change = ScheduledRate { rate: 25, effective_epoch: 8 };
        assert_eq!(accrual_between(0, 8, 10, Some(change)).unwrap(), 80);
    }

    #[test]
    fn change_before_interval_applies_throughout() {
        let change = ScheduledRate { rate: 3, effective_epoch: 2 };
        assert_eq!(accrual_between(4, 10, 100, Some(change)).unwrap(), 18);
    }

    #[test]
    fn zero_rate_accrues_nothing() {
        assert_eq!(accrual_between(0, 1_000_000, 0, None).unwrap(), 0);
    }

    #[test]
    fn overflow_is_reported() {
        assert_eq!(
            accrual_between(0, 3, u64::MAX, None),
            Err(LedgerError::ArithmeticOverflow)
        );
    }

    // ------------------------------------------------------------------
    // drawn_through
    // ------------------------------------------------------------------

    #[test]
    fn draw_promotes_passed_change() {
        let a = allocation(10, 0, 100, Some(ScheduledRate { rate: 25, effective_epoch: 5 }));
        let (next, amount) = a.drawn_through(8).unwrap();
        assert_eq!(amount, 125);
        assert_eq!(next.last_drawn_epoch, 8);
        assert_eq!(next.inflation_rate, 25);
        assert_eq!(next.pending, None);
    }

    #[test]
    fn draw_exactly_at_effective_epoch_promotes() {
        let a = allocation(10, 0, 100, Some(ScheduledRate { rate: 25, effective_epoch: 5 }));
        let (next, amount) = a.drawn_through(5).unwrap();
        assert_eq!(amount, 50);
        assert_eq!(next.inflation_rate, 25);
        assert!(next.pending.is_none());
    }

    #[test]
    fn draw_before_effective_epoch_keeps_change() {
        let a = allocation(10, 0, 100, Some(ScheduledRate { rate: 25, effective_epoch: 5 }));
        let (next, amount) = a.drawn_through(3).unwrap();
        assert_eq!(amount, 30);
        assert_eq!(next.inflation_rate, 10);
        assert!(next.pending.is_some());
    }

    #[test]
    fn draw_caps_at_end_epoch() {
        let a = allocation(10, 0, 6, None);
        let (next, amount) = a.drawn_through(50).unwrap();
        assert_eq!(amount, 60);
        assert_eq!(next.last_drawn_epoch, 6);
        assert!(next.is_settled());
        assert_eq!(next.reserved, 0);
    }

    #[test]
    fn draw_reduces_reservation_by_accrued() {
        let a = allocation(4, 10, 20, None);
        assert_eq!(a.reserved, 40);
        let (next, amount) = a.drawn_through(15).unwrap();
        assert_eq!(amount, 20);
        assert_eq!(next.reserved, 20);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        /// Splitting a draw at any intermediate epoch credits the same total
        /// as a single draw.
        #[test]
        fn split_draw_equals_single_draw(
            rate in 0u64..1_000_000,
            new_rate in 0u64..1_000_000,
            effective in 1u64..200,
            split in 1u64..300,
            through in 1u64..300,
            end in 1u64..300,
        ) {
            let a = allocation(rate, 0, end, Some(ScheduledRate { rate: new_rate, effective_epoch: effective }));
            let (_, whole) = a.drawn_through(through).unwrap();

            let first_stop = split.min(through);
            let (mid, first) = a.drawn_through(first_stop).unwrap();
            let (fin, second) = mid.drawn_through(through).unwrap();

            prop_assert_eq!(first + second, whole);
            prop_assert_eq!(fin.reserved + whole, a.reserved);
        }
    }
}
