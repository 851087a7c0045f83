//! Trait interfaces for the collaborators this core consumes but does not own.
//!
//! - [`GovernanceGate`]: authority check consulted before every mutation
//! - [`ClockSource`]: the single source of truth for "now"
//! - [`ClaimHistory`]: observed claim counts feeding the luck control loop

use crate::governance::Action;
use crate::types::{Epoch, Principal, Role};

/// Authorizes mutating calls.
///
/// How `caller` was authenticated is outside this crate; the gate only
/// answers whether the already-authenticated principal may perform `action`.
pub trait GovernanceGate: Send + Sync {
    fn is_authorized(&self, caller: &Principal, action: Action) -> bool;
}

/// Read-only view of the current epoch.
pub trait ClockSource: Send + Sync {
    fn current_epoch(&self) -> Epoch;
}

/// Read-only per-epoch claim counts, supplied by the claim consumer.
///
/// Epochs with no recorded claims report zero.
pub trait ClaimHistory {
    /// Number of successful claims for `role` during `epoch`.
    fn claims(&self, role: &Role, epoch: Epoch) -> u64;

    /// Total claims for `role` over the inclusive range `[from, to]`.
    ///
    /// Default implementation sums [`claims`](Self::claims) epoch by epoch.
    fn claims_between(&self, role: &Role, from: Epoch, to: Epoch) -> u128 {
        if from > to {
            return 0;
        }
        (from..=to).map(|e| self.claims(role, e) as u128).sum()
    }
}
