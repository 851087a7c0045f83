//! # sluice-core
//! Foundation types, errors, and collaborator traits for the Sluice
//! emission and throttling engines.
//!
//! The leaf accounting components live here as well:
//! - [`pool::UnallocatedPool`]: value not yet committed to any allocation
//! - [`pot::ClaimPot`]: claimable balance fed by allocations
//! - [`claims::ClaimLog`]: per-role, per-epoch successful claim counts

pub mod claims;
pub mod clock;
pub mod constants;
pub mod error;
pub mod governance;
pub mod pool;
pub mod pot;
pub mod traits;
pub mod types;
