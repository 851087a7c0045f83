//! # sluice-emission
//! Epoch emission accounting engine.
//!
//! All calculations use integer arithmetic only, with `u128` intermediates
//! and checked conversions back to `u64`.
//!
//! - **Allocations** ("funds") emit a per-epoch rate into a claim pot until
//!   their end epoch, with at most one scheduled future rate change.
//! - **Piecewise accrual**: a draw integrates the active rate up to the
//!   scheduled change and the new rate after it, then promotes the change.
//! - **Reservations**: every allocation keeps exactly the value its remaining
//!   profile will emit reserved out of the unallocated pool, so value is
//!   conserved across creation, updates, and draws.

pub mod allocation;
pub mod ledger;

pub use allocation::{accrual_between, Allocation, ScheduledRate};
pub use ledger::EmissionLedger;
