//! Cross-crate test suite for Sluice.
//!
//! Property tests drive the emission ledger and luck controller with random
//! operation sequences; end-to-end tests run the persisted economy and its
//! RPC surface against a temporary data directory.

pub mod helpers;
