//! Per-role tunables for the luck control loop.

use std::fmt;

use serde::{Deserialize, Serialize};

use sluice_core::constants::{
    DEFAULT_AVERAGING_EPOCHS, DEFAULT_LUCK_TRAILING_EPOCHS, DEFAULT_VARIANCE_TOLERANCE_BPS,
};
use sluice_core::error::ThrottleError;
use sluice_core::types::Epoch;

/// Control-loop parameters for one role.
///
/// `starting_epoch` and `initial_luck_limit` are fixed once the role is
/// registered; the other five may be changed through [`RoleParameter`].
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct RoleThrottleConfig {
    /// Window, in epochs, over which one epoch's claim count is smoothed.
    pub luck_trailing_epochs: u64,
    /// Desired successful claims per epoch.
    pub target_claims: u64,
    /// How many prior epochs of smoothed claims feed each adjustment.
    pub averaging_epochs: u64,
    /// First epoch with a luck value.
    pub starting_epoch: Epoch,
    /// Dead band around `target_claims`, in basis points of the target.
    pub variance_tolerance_bps: u64,
    /// Fixed step applied when the average leaves the dead band.
    pub change_steps: u64,
    /// Luck at `starting_epoch`, and the ceiling for every later epoch.
    pub initial_luck_limit: u64,
}

impl RoleThrottleConfig {
    /// Config with default smoothing windows and tolerance.
    pub fn new(
        starting_epoch: Epoch,
        target_claims: u64,
        change_steps: u64,
        initial_luck_limit: u64,
    ) -> Self {
        Self {
            luck_trailing_epochs: DEFAULT_LUCK_TRAILING_EPOCHS,
            target_claims,
            averaging_epochs: DEFAULT_AVERAGING_EPOCHS,
            starting_epoch,
            variance_tolerance_bps: DEFAULT_VARIANCE_TOLERANCE_BPS,
            change_steps,
            initial_luck_limit,
        }
    }

    pub fn validate(&self) -> Result<(), ThrottleError> {
        if self.luck_trailing_epochs == 0 {
            return Err(ThrottleError::InvalidConfig(
                "luck_trailing_epochs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// One mutable tunable together with its new value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "parameter", content = "value", rename_all = "snake_case")]
pub enum RoleParameter {
    LuckTrailingEpochs(u64),
    TargetClaims(u64),
    AveragingEpochs(u64),
    VarianceToleranceBps(u64),
    ChangeSteps(u64),
}

impl RoleParameter {
    /// Parse a parameter from its snake_case name.
    pub fn from_name(name: &str, value: u64) -> Option<Self> {
        match name {
            "luck_trailing_epochs" => Some(Self::LuckTrailingEpochs(value)),
            "target_claims" => Some(Self::TargetClaims(value)),
            "averaging_epochs" => Some(Self::AveragingEpochs(value)),
            "variance_tolerance_bps" => Some(Self::VarianceToleranceBps(value)),
            "change_steps" => Some(Self::ChangeSteps(value)),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::LuckTrailingEpochs(_) => "luck_trailing_epochs",
            Self::TargetClaims(_) => "target_claims",
            Self::AveragingEpochs(_) => "averaging_epochs",
            Self::VarianceToleranceBps(_) => "variance_tolerance_bps",
            Self::ChangeSteps(_) => "change_steps",
        }
    }

    pub fn value(&self) -> u64 {
        match *self {
            Self::LuckTrailingEpochs(v)
            | Self::TargetClaims(v)
            | Self::AveragingEpochs(v)
            | Self::VarianceToleranceBps(v)
            | Self::ChangeSteps(v) => v,
        }
    }

    /// `config` with this parameter applied, validated.
    pub fn apply_to(&self, config: &RoleThrottleConfig) -> Result<RoleThrottleConfig, ThrottleError> {
        let mut next = config.clone();
        match *self {
            Self::LuckTrailingEpochs(v) => next.luck_trailing_epochs = v,
            Self::TargetClaims(v) => next.target_claims = v,
            Self::AveragingEpochs(v) => next.averaging_epochs = v,
            Self::VarianceToleranceBps(v) => next.variance_tolerance_bps = v,
            Self::ChangeSteps(v) => next.change_steps = v,
        }
        next.validate()?;
        Ok(next)
    }
}

impl fmt::Display for RoleParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name(), self.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let c = RoleThrottleConfig::new(0, 10, 1_000, 1_000_000);
        assert!(c.validate().is_ok());
        assert_eq!(c.luck_trailing_epochs, DEFAULT_LUCK_TRAILING_EPOCHS);
    }

    #[test]
    fn zero_trailing_window_rejected() {
        let mut c = RoleThrottleConfig::new(0, 10, 1, 1);
        c.luck_trailing_epochs = 0;
        assert!(matches!(c.validate(), Err(ThrottleError::InvalidConfig(_))));
    }

    #[test]
    fn apply_changes_only_named_field() {
        let c = RoleThrottleConfig::new(3, 10, 1, 100);
        let next = RoleParameter::TargetClaims(40).apply_to(&c).unwrap();
        assert_eq!(next.target_claims, 40);
        assert_eq!(next.starting_epoch, 3);
        assert_eq!(next.change_steps, 1);
    }

    #[test]
    fn apply_rejects_zero_trailing() {
        let c = RoleThrottleConfig::new(0, 10, 1, 100);
        assert!(RoleParameter::LuckTrailingEpochs(0).apply_to(&c).is_err());
    }

    #[test]
    fn names_roundtrip() {
        for p in [
            RoleParameter::LuckTrailingEpochs(1),
            RoleParameter::TargetClaims(2),
            RoleParameter::AveragingEpochs(3),
            RoleParameter::VarianceToleranceBps(4),
            RoleParameter::ChangeSteps(5),
        ] {
            assert_eq!(RoleParameter::from_name(p.name(), p.value()), Some(p));
        }
        assert_eq!(RoleParameter::from_name("starting_epoch", 1), None);
    }

    #[test]
    fn display_shows_name_and_value() {
        assert_eq!(RoleParameter::ChangeSteps(7).to_string(), "change_steps=7");
    }
}
