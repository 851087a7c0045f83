//! Externally-advanced epoch clock.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::ClockError;
use crate::traits::ClockSource;
use crate::types::Epoch;

/// A clock whose epoch only moves when told to.
///
/// The node persists the value and advances it on governance request; tests
/// drive it directly.
#[derive(Debug, Default)]
pub struct ManualClock {
    epoch: AtomicU64,
}

impl ManualClock {
    pub fn new(epoch: Epoch) -> Self {
        Self {
            epoch: AtomicU64::new(epoch),
        }
    }

    /// Move the clock forward to `epoch`. Rejects non-increasing targets.
    pub fn advance_to(&self, epoch: Epoch) -> Result<(), ClockError> {
        let current = self.epoch.load(Ordering::Acquire);
        if epoch <= current {
            return Err(ClockError::NotAdvancing {
                requested: epoch,
                current,
            });
        }
        self.epoch.store(epoch, Ordering::Release);
        Ok(())
    }

    /// Advance by exactly one epoch and return the new value.
    pub fn tick(&self) -> Epoch {
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }
}

impl ClockSource for ManualClock {
    fn current_epoch(&self) -> Epoch {
        self.epoch.load(Ordering::Acquire)
    }
}
