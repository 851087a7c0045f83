//! Luck controller: per-role cached throttle thresholds.
//!
//! Pure computation over a [`ClaimHistory`]. No storage, no IO, all
//! integer math.
//!
//! # Control step
//!
//! For epoch `E > starting_epoch`:
//!
//! ```text
//! n           = min(E - starting_epoch, averaging_epochs)
//! smoothed(e) = mean claims over [max(starting_epoch, e - trailing + 1), e]
//! avg         = mean of smoothed(e) over [E - n, E - 1]
//! ```
//!
//! `avg` above the tolerance band steps luck down by `change_steps`, below
//! the band steps it up, inside the band carries it over. Means are carried
//! in fixed point scaled by [`LUCK_PRECISION`] so the band test is exact.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use sluice_core::constants::{BPS_PRECISION, LUCK_PRECISION};
use sluice_core::error::ThrottleError;
use sluice_core::governance::{Action, Capability};
use sluice_core::traits::ClaimHistory;
use sluice_core::types::{Epoch, Role};

use crate::config::{RoleParameter, RoleThrottleConfig};

// ---------------------------------------------------------------------------
// LuckCache
// ---------------------------------------------------------------------------

/// Append-only luck values for consecutive epochs from `starting_epoch`.
///
/// An entry for epoch `E` implies entries for every epoch in
/// `[starting_epoch, E]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LuckCache {
    starting_epoch: Epoch,
    values: Vec<u64>,
}

impl LuckCache {
    pub fn new(starting_epoch: Epoch) -> Self {
        Self {
            starting_epoch,
            values: Vec::new(),
        }
    }

    /// Rebuild from persisted consecutive values.
    pub fn from_values(starting_epoch: Epoch, values: Vec<u64>) -> Self {
        Self {
            starting_epoch,
            values,
        }
    }

    pub fn starting_epoch(&self) -> Epoch {
        self.starting_epoch
    }

    pub fn get(&self, epoch: Epoch) -> Option<u64> {
        let offset = epoch.checked_sub(self.starting_epoch)?;
        let index = usize::try_from(offset).ok()?;
        self.values.get(index).copied()
    }

    /// Last cached epoch, if any.
    pub fn last_epoch(&self) -> Option<Epoch> {
        let filled = self.values.len().checked_sub(1)?;
        Some(self.starting_epoch + filled as u64)
    }

    /// First epoch without a value.
    ///
    /// Fails once the cache already ends at `Epoch::MAX`.
    pub fn next_epoch(&self) -> Result<Epoch, ThrottleError> {
        self.starting_epoch
            .checked_add(self.values.len() as u64)
            .ok_or(ThrottleError::ArithmeticOverflow)
    }

    /// Keep only the first `len` values.
    pub fn truncate(&mut self, len: usize) {
        self.values.truncate(len);
    }

    /// `(epoch, luck)` pairs after the first `skip` values.
    pub fn iter_after(&self, skip: usize) -> impl Iterator<Item = (Epoch, u64)> + '_ {
        let skip = skip.min(self.values.len());
        let start = self.starting_epoch;
        self.values[skip..]
            .iter()
            .enumerate()
            .map(move |(i, v)| (start + (skip + i) as u64, *v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[u64] {
        &self.values
    }

    /// `(epoch, luck)` pairs in epoch order.
    pub fn iter(&self) -> impl Iterator<Item = (Epoch, u64)> + '_ {
        let start = self.starting_epoch;
        self.values
            .iter()
            .enumerate()
            .map(move |(i, v)| (start + i as u64, *v))
    }
}

/// A registered role: its tunables and its computed luck so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleState {
    pub config: RoleThrottleConfig,
    pub cache: LuckCache,
}

impl RoleState {
    pub fn new(config: RoleThrottleConfig) -> Self {
        let cache = LuckCache::new(config.starting_epoch);
        Self { config, cache }
    }
}

// ---------------------------------------------------------------------------
// Control step
// ---------------------------------------------------------------------------

/// Luck for the next epoch given the previous value and the fixed-point
/// average (`claims * LUCK_PRECISION`) of smoothed claims.
///
/// `None` means no prior epochs were averaged; the value carries over.
pub fn next_luck(
    config: &RoleThrottleConfig,
    previous: u64,
    average: Option<u128>,
) -> Result<u64, ThrottleError> {
    let Some(average) = average else {
        return Ok(previous);
    };
    let bps = BPS_PRECISION as u128;
    let tolerance = config.variance_tolerance_bps as u128;
    let target = config.target_claims as u128 * LUCK_PRECISION as u128;

    let scaled = average
        .checked_mul(bps)
        .ok_or(ThrottleError::ArithmeticOverflow)?;
    let upper = target
        .checked_mul(bps + tolerance)
        .ok_or(ThrottleError::ArithmeticOverflow)?;
    let lower = target * bps.saturating_sub(tolerance);

    let limit = config.initial_luck_limit;
    let next = if scaled > upper {
        previous.saturating_sub(config.change_steps)
    } else if scaled < lower {
        previous.saturating_add(config.change_steps)
    } else {
        previous
    };
    Ok(next.min(limit))
}

/// Prefix sums over claims and smoothed claims for one fill pass.
///
/// Covers smoothed values for `[first_smoothed, end)`, loading raw claims
/// back far enough to smooth the first of them.
struct SmoothedClaims {
    first_smoothed: Epoch,
    /// `prefix[i]` = Σ smoothed over `[first_smoothed, first_smoothed + i)`.
    prefix: Vec<u128>,
}

impl SmoothedClaims {
    fn load<H: ClaimHistory + ?Sized>(
        history: &H,
        role: &Role,
        config: &RoleThrottleConfig,
        first_smoothed: Epoch,
        end: Epoch,
    ) -> Result<Self, ThrottleError> {
        let start = config.starting_epoch;
        let trailing = config.luck_trailing_epochs;
        let window_lo = |e: Epoch| e.saturating_sub(trailing - 1).max(start);

        let first_claim = window_lo(first_smoothed);
        let mut claims_prefix: Vec<u128> = vec![0];
        for e in first_claim..end {
            let last = claims_prefix[claims_prefix.len() - 1];
            claims_prefix.push(last + history.claims(role, e) as u128);
        }

        let mut prefix: Vec<u128> = vec![0];
        for e in first_smoothed..end {
            let lo = window_lo(e);
            let sum = claims_prefix[(e + 1 - first_claim) as usize]
                - claims_prefix[(lo - first_claim) as usize];
            let smoothed = sum
                .checked_mul(LUCK_PRECISION as u128)
                .ok_or(ThrottleError::ArithmeticOverflow)?
                / (e - lo + 1) as u128;
            let last = prefix[prefix.len() - 1];
            prefix.push(
                last.checked_add(smoothed)
                    .ok_or(ThrottleError::ArithmeticOverflow)?,
            );
        }
        Ok(Self {
            first_smoothed,
            prefix,
        })
    }

    /// Mean of smoothed values over `[from, to)`; `None` when empty.
    fn average(&self, from: Epoch, to: Epoch) -> Option<u128> {
        if to <= from {
            return None;
        }
        let hi = self.prefix[(to - self.first_smoothed) as usize];
        let lo = self.prefix[(from - self.first_smoothed) as usize];
        Some((hi - lo) / (to - from) as u128)
    }
}

// ---------------------------------------------------------------------------
// ThrottleController
// ---------------------------------------------------------------------------

/// All registered roles and their luck caches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThrottleController {
    roles: BTreeMap<Role, RoleState>,
}

impl ThrottleController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted role state.
    pub fn from_roles(roles: impl IntoIterator<Item = (Role, RoleState)>) -> Self {
        Self {
            roles: roles.into_iter().collect(),
        }
    }

    pub fn role(&self, role: &Role) -> Option<&RoleState> {
        self.roles.get(role)
    }

    pub fn roles(&self) -> impl Iterator<Item = (&Role, &RoleState)> + '_ {
        self.roles.iter()
    }

    /// Cached luck without computing anything.
    pub fn cached_luck(&self, role: &Role, epoch: Epoch) -> Option<u64> {
        self.roles.get(role)?.cache.get(epoch)
    }

    /// Shrink the luck cache of `role` back to `len` values.
    ///
    /// Used to undo a fill whose values could not be persisted.
    pub fn truncate_luck(&mut self, role: &Role, len: usize) {
        if let Some(state) = self.roles.get_mut(role) {
            state.cache.truncate(len);
        }
    }

    // --- Governance mutations ---

    /// Register `role` with `config`.
    pub fn init_role(
        &mut self,
        cap: &Capability<'_>,
        role: Role,
        config: RoleThrottleConfig,
    ) -> Result<(), ThrottleError> {
        authorize(cap, Action::InitRole)?;
        if self.roles.contains_key(&role) {
            return Err(ThrottleError::RoleExists(role));
        }
        config.validate()?;
        info!(
            %role, starting_epoch = config.starting_epoch,
            initial_luck_limit = config.initial_luck_limit, "initialized role"
        );
        self.roles.insert(role, RoleState::new(config));
        Ok(())
    }

    /// Change one tunable of `role`. Cached epochs are unaffected.
    pub fn configure(
        &mut self,
        cap: &Capability<'_>,
        role: &Role,
        parameter: RoleParameter,
    ) -> Result<(), ThrottleError> {
        authorize(cap, Action::ConfigureRole)?;
        let state = self
            .roles
            .get_mut(role)
            .ok_or_else(|| ThrottleError::RoleNotFound(role.clone()))?;
        state.config = parameter.apply_to(&state.config)?;
        info!(%role, %parameter, "reconfigured role");
        Ok(())
    }

    pub fn change_luck_trailing_epochs(
        &mut self,
        cap: &Capability<'_>,
        role: &Role,
        epochs: u64,
    ) -> Result<(), ThrottleError> {
        self.configure(cap, role, RoleParameter::LuckTrailingEpochs(epochs))
    }

    pub fn change_target_claims(
        &mut self,
        cap: &Capability<'_>,
        role: &Role,
        target: u64,
    ) -> Result<(), ThrottleError> {
        self.configure(cap, role, RoleParameter::TargetClaims(target))
    }

    pub fn change_averaging_epochs(
        &mut self,
        cap: &Capability<'_>,
        role: &Role,
        epochs: u64,
    ) -> Result<(), ThrottleError> {
        self.configure(cap, role, RoleParameter::AveragingEpochs(epochs))
    }

    pub fn change_variance_tolerance(
        &mut self,
        cap: &Capability<'_>,
        role: &Role,
        tolerance_bps: u64,
    ) -> Result<(), ThrottleError> {
        self.configure(cap, role, RoleParameter::VarianceToleranceBps(tolerance_bps))
    }

    pub fn change_change_steps(
        &mut self,
        cap: &Capability<'_>,
        role: &Role,
        steps: u64,
    ) -> Result<(), ThrottleError> {
        self.configure(cap, role, RoleParameter::ChangeSteps(steps))
    }

    // --- Queries that fill ---

    /// Luck for `role` at `epoch`, computing and caching any missing epochs
    /// up to it.
    ///
    /// Epochs after `now` are rejected because their claims are not final.
    pub fn get_luck<H: ClaimHistory + ?Sized>(
        &mut self,
        history: &H,
        role: &Role,
        epoch: Epoch,
        now: Epoch,
    ) -> Result<u64, ThrottleError> {
        let state = self
            .roles
            .get_mut(role)
            .ok_or_else(|| ThrottleError::RoleNotFound(role.clone()))?;
        if let Some(luck) = state.cache.get(epoch) {
            return Ok(luck);
        }

        let starting_epoch = state.config.starting_epoch;
        if epoch < starting_epoch {
            return Err(ThrottleError::BeforeStartingEpoch {
                epoch,
                starting_epoch,
            });
        }
        if epoch > now {
            return Err(ThrottleError::InvalidEpoch {
                epoch,
                current: now,
            });
        }
        fill(state, history, role, epoch)
    }

    /// `(epoch, luck)` for every epoch in `[from, to]`, filling as needed.
    pub fn luck_range<H: ClaimHistory + ?Sized>(
        &mut self,
        history: &H,
        role: &Role,
        from: Epoch,
        to: Epoch,
        now: Epoch,
    ) -> Result<Vec<(Epoch, u64)>, ThrottleError> {
        if from > to {
            return Ok(Vec::new());
        }
        self.get_luck(history, role, to, now)?;
        let state = self
            .roles
            .get(role)
            .ok_or_else(|| ThrottleError::RoleNotFound(role.clone()))?;
        if from < state.config.starting_epoch {
            return Err(ThrottleError::BeforeStartingEpoch {
                epoch: from,
                starting_epoch: state.config.starting_epoch,
            });
        }
        Ok(state
            .cache
            .iter()
            .filter(|(e, _)| (from..=to).contains(e))
            .collect())
    }

    /// Whether a claim holding `ticket` succeeds at `epoch`.
    ///
    /// Drawing the ticket is the caller's business.
    pub fn claim_succeeds<H: ClaimHistory + ?Sized>(
        &mut self,
        history: &H,
        role: &Role,
        epoch: Epoch,
        now: Epoch,
        ticket: u64,
    ) -> Result<bool, ThrottleError> {
        Ok(ticket < self.get_luck(history, role, epoch, now)?)
    }
}

/// Compute every missing epoch up to `epoch` in one forward pass.
///
/// The cache is only extended once every value has been computed.
fn fill<H: ClaimHistory + ?Sized>(
    state: &mut RoleState,
    history: &H,
    role: &Role,
    epoch: Epoch,
) -> Result<u64, ThrottleError> {
    let config = &state.config;
    let start = config.starting_epoch;
    let first = state.cache.next_epoch()?;
    let first_smoothed = first.saturating_sub(config.averaging_epochs).max(start);
    let smoothed = SmoothedClaims::load(history, role, config, first_smoothed, epoch)?;

    let mut previous = state
        .cache
        .values()
        .last()
        .copied()
        .unwrap_or(config.initial_luck_limit);
    let mut computed = Vec::with_capacity((epoch - first).saturating_add(1) as usize);
    for e in first..=epoch {
        let luck = if e == start {
            config.initial_luck_limit
        } else {
            let n = (e - start).min(config.averaging_epochs);
            next_luck(config, previous, smoothed.average(e - n, e))?
        };
        computed.push(luck);
        previous = luck;
    }

    debug!(%role, from = first, to = epoch, luck = previous, "filled luck cache");
    state.cache.values.extend(computed);
    Ok(previous)
}

fn authorize(cap: &Capability<'_>, action: Action) -> Result<(), ThrottleError> {
    cap.require(action).map_err(|e| {
        warn!(caller = %e.caller, %action, "rejected unauthorized throttle call");
        ThrottleError::from(e)
    })
}
