//! Claim log: successful claim counts reported by the claim consumer.
//!
//! The luck controller only reads these counts through [`ClaimHistory`];
//! recording happens here, one epoch at a time.

use std::collections::{BTreeMap, HashMap};

use crate::error::ThrottleError;
use crate::traits::ClaimHistory;
use crate::types::{Epoch, Role};

/// In-memory per-role, per-epoch claim counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimLog {
    counts: HashMap<Role, BTreeMap<Epoch, u64>>,
}

impl ClaimLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted `(role, epoch, count)` rows.
    pub fn from_entries(entries: impl IntoIterator<Item = (Role, Epoch, u64)>) -> Self {
        let mut log = Self::new();
        for (role, epoch, count) in entries {
            log.counts.entry(role).or_default().insert(epoch, count);
        }
        log
    }

    /// Add `count` successful claims for `role` in `epoch`.
    ///
    /// Returns the new total for that epoch.
    pub fn record(&mut self, role: &Role, epoch: Epoch, count: u64) -> Result<u64, ThrottleError> {
        let current = self.claims(role, epoch);
        let total = current
            .checked_add(count)
            .ok_or(ThrottleError::ArithmeticOverflow)?;
        self.counts
            .entry(role.clone())
            .or_default()
            .insert(epoch, total);
        Ok(total)
    }

    /// Every recorded row, ordered by epoch within each role.
    pub fn entries(&self) -> impl Iterator<Item = (&Role, Epoch, u64)> + '_ {
        self.counts
            .iter()
            .flat_map(|(role, epochs)| epochs.iter().map(move |(e, c)| (role, *e, *c)))
    }
}

impl ClaimHistory for ClaimLog {
    fn claims(&self, role: &Role, epoch: Epoch) -> u64 {
        self.counts
            .get(role)
            .and_then(|epochs| epochs.get(&epoch))
            .copied()
            .unwrap_or(0)
    }

    fn claims_between(&self, role: &Role, from: Epoch, to: Epoch) -> u128 {
        if from > to {
            return 0;
        }
        self.counts
            .get(role)
            .map(|epochs| epochs.range(from..=to).map(|(_, c)| *c as u128).sum())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrecorded_epochs_are_zero() {
        let log = ClaimLog::new();
        assert_eq!(log.claims(&Role::from("relayer"), 9), 0);
    }

    #[test]
    fn record_accumulates() {
        let mut log = ClaimLog::new();
        let role = Role::from("relayer");
        assert_eq!(log.record(&role, 3, 2).unwrap(), 2);
        assert_eq!(log.record(&role, 3, 5).unwrap(), 7);
        assert_eq!(log.claims(&role, 3), 7);
    }

    #[test]
    fn roles_are_independent() {
        let mut log = ClaimLog::new();
        log.record(&Role::from("a"), 1, 4).unwrap();
        assert_eq!(log.claims(&Role::from("b"), 1), 0);
    }

    #[test]
    fn range_sum_skips_gaps() {
        let mut log = ClaimLog::new();
        let role = Role::from("relayer");
        log.record(&role, 1, 1).unwrap();
        log.record(&role, 4, 10).unwrap();
        log.record(&role, 9, 100).unwrap();
        assert_eq!(log.claims_between(&role, 1, 4), 11);
        assert_eq!(log.claims_between(&role, 2, 8), 10);
        assert_eq!(log.claims_between(&role, 10, 20), 0);
    }

    #[test]
    fn record_overflow_rejected() {
        let mut log = ClaimLog::new();
        let role = Role::from("relayer");
        log.record(&role, 1, u64::MAX).unwrap();
        assert_eq!(log.record(&role, 1, 1), Err(ThrottleError::ArithmeticOverflow));
        assert_eq!(log.claims(&role, 1), u64::MAX);
    }

    #[test]
    fn entries_roundtrip_through_from_entries() {
        let mut log = ClaimLog::new();
        log.record(&Role::from("a"), 1, 3).unwrap();
        log.record(&Role::from("b"), 2, 4).unwrap();
        let rows: Vec<_> = log.entries().map(|(r, e, c)| (r.clone(), e, c)).collect();
        assert_eq!(ClaimLog::from_entries(rows), log);
    }
}
