//! Governance capability passed into every mutating call.
//!
//! Callers hand a [`Capability`] (gate + caller) to each mutation. The
//! engine asks it to [`require`](Capability::require) the specific
//! [`Action`] before touching any state.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Unauthorized;
use crate::traits::GovernanceGate;
use crate::types::Principal;

/// Every mutation that needs governance authority.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    Deposit,
    CreatePot,
    CreateFund,
    UpdateInflation,
    UpdateEndEpoch,
    UpdateFundPot,
    InitRole,
    ConfigureRole,
    AdvanceEpoch,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Deposit => "deposit",
            Self::CreatePot => "create pot",
            Self::CreateFund => "create fund",
            Self::UpdateInflation => "update inflation",
            Self::UpdateEndEpoch => "update end epoch",
            Self::UpdateFundPot => "update fund pot",
            Self::InitRole => "init role",
            Self::ConfigureRole => "configure role",
            Self::AdvanceEpoch => "advance epoch",
        };
        f.write_str(s)
    }
}

/// A caller bound to the gate that judges it.
#[derive(Clone, Copy)]
pub struct Capability<'a> {
    gate: &'a dyn GovernanceGate,
    caller: Principal,
}

impl<'a> Capability<'a> {
    pub fn new(gate: &'a dyn GovernanceGate, caller: Principal) -> Self {
        Self { gate, caller }
    }

    pub fn caller(&self) -> &Principal {
        &self.caller
    }

    /// Fail with [`Unauthorized`] unless the gate allows `action`.
    pub fn require(&self, action: Action) -> Result<(), Unauthorized> {
        if self.gate.is_authorized(&self.caller, action) {
            Ok(())
        } else {
            Err(Unauthorized {
                caller: self.caller,
                action,
            })
        }
    }
}

impl fmt::Debug for Capability<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capability")
            .field("caller", &self.caller)
            .finish_non_exhaustive()
    }
}

/// Allow-list gate: listed principals may perform every action.
#[derive(Debug, Clone, Default)]
pub struct StaticGovernance {
    governors: HashSet<Principal>,
}

impl StaticGovernance {
    pub fn new(governors: impl IntoIterator<Item = Principal>) -> Self {
        Self {
            governors: governors.into_iter().collect(),
        }
    }

    pub fn is_governor(&self, principal: &Principal) -> bool {
        self.governors.contains(principal)
    }

    pub fn len(&self) -> usize {
        self.governors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.governors.is_empty()
    }
}

impl GovernanceGate for StaticGovernance {
    fn is_authorized(&self, caller: &Principal, _action: Action) -> bool {
        self.is_governor(caller)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DepositOnly;

    impl GovernanceGate for DepositOnly {
        fn is_authorized(&self, _caller: &Principal, action: Action) -> bool {
            action == Action::Deposit
        }
    }

    #[test]
    fn static_governance_allows_listed() {
        let gov = StaticGovernance::new([Principal([1; 32])]);
        let cap = Capability::new(&gov, Principal([1; 32]));
        assert!(cap.require(Action::CreateFund).is_ok());
    }

    #[test]
    fn static_governance_rejects_unlisted() {
        let gov = StaticGovernance::new([Principal([1; 32])]);
        let cap = Capability::new(&gov, Principal([2; 32]));
        let err = cap.require(Action::CreateFund).unwrap_err();
        assert_eq!(err.caller, Principal([2; 32]));
        assert_eq!(err.action, Action::CreateFund);
    }

    #[test]
    fn gate_sees_the_action() {
        let cap = Capability::new(&DepositOnly, Principal::default());
        assert!(cap.require(Action::Deposit).is_ok());
        assert!(cap.require(Action::AdvanceEpoch).is_err());
    }

    #[test]
    fn empty_governance_rejects_everyone() {
        let gov = StaticGovernance::default();
        assert!(gov.is_empty());
        let cap = Capability::new(&gov, Principal::default());
        assert!(cap.require(Action::InitRole).is_err());
    }
}
