//! # sluice-luck
//! Per-role luck control loop.
//!
//! Each role gets a [`RoleThrottleConfig`] and an append-only
//! [`LuckCache`]. Querying an epoch that has not been computed fills every
//! missing epoch up to it in one forward pass, so a value is derived exactly
//! once and never changes afterwards.

pub mod config;
pub mod controller;

pub use config::{RoleParameter, RoleThrottleConfig};
pub use controller::{next_luck, LuckCache, RoleState, ThrottleController};
