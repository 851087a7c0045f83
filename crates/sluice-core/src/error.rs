//! Error types for the Sluice engines.
use thiserror::Error;

use crate::governance::Action;
use crate::types::{AllocationId, Amount, Epoch, PotId, Principal, Role};

/// The governance gate refused `caller` for `action`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unauthorized: {caller} may not {action}")]
pub struct Unauthorized {
    pub caller: Principal,
    pub action: Action,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error(transparent)] Unauthorized(#[from] Unauthorized),
    #[error("allocation not found: {0}")] FundNotFound(AllocationId),
    #[error("pot not found: {0}")] PotNotFound(PotId),
    #[error("invalid epoch {epoch}: current epoch is {current}")] InvalidEpoch { epoch: Epoch, current: Epoch },
    #[error("insufficient unallocated balance: have {available}, need {required}")] InsufficientUnallocatedBalance { available: Amount, required: Amount },
    #[error("already drawn: requested {requested}, drawn through {last_drawn}")] AlreadyDrawn { requested: Epoch, last_drawn: Epoch },
    #[error("nothing to draw for {0}")] NothingToDraw(PotId),
    #[error("{id} ended at epoch {end_epoch}")] AllocationEnded { id: AllocationId, end_epoch: Epoch },
    #[error("arithmetic overflow")] ArithmeticOverflow,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ThrottleError {
    #[error(transparent)] Unauthorized(#[from] Unauthorized),
    #[error("role not found: {0}")] RoleNotFound(Role),
    #[error("role already configured: {0}")] RoleExists(Role),
    #[error("epoch {epoch} precedes starting epoch {starting_epoch}")] BeforeStartingEpoch { epoch: Epoch, starting_epoch: Epoch },
    #[error("invalid epoch {epoch}: current epoch is {current}")] InvalidEpoch { epoch: Epoch, current: Epoch },
    #[error("invalid throttle config: {0}")] InvalidConfig(String),
    #[error("arithmetic overflow")] ArithmeticOverflow,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClockError {
    #[error("epoch must advance: requested {requested}, current {current}")] NotAdvancing { requested: Epoch, current: Epoch },
}

#[derive(Error, Debug)]
pub enum SluiceError {
    #[error(transparent)] Unauthorized(#[from] Unauthorized),
    #[error(transparent)] Ledger(#[from] LedgerError),
    #[error(transparent)] Throttle(#[from] ThrottleError),
    #[error(transparent)] Clock(#[from] ClockError),
    #[error("storage: {0}")] Storage(String),
    #[error("config: {0}")] Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_converts_into_ledger_error() {
        let err: LedgerError = Unauthorized {
            caller: Principal([1; 32]),
            action: Action::CreateFund,
        }
        .into();
        assert!(matches!(err, LedgerError::Unauthorized(_)));
        assert!(err.to_string().contains("create fund"));
    }

    #[test]
    fn ledger_error_wraps_transparently() {
        let err: SluiceError = LedgerError::FundNotFound(AllocationId(4)).into();
        assert_eq!(err.to_string(), "allocation not found: fund#4");
    }

    #[test]
    fn insufficient_balance_message() {
        let err = LedgerError::InsufficientUnallocatedBalance { available: 10, required: 25 };
        assert_eq!(err.to_string(), "insufficient unallocated balance: have 10, need 25");
    }
}
