//! Protocol constants.

/// Basis-point precision: 10 000 BPS = 100%.
pub const BPS_PRECISION: u64 = 10_000;

/// Fixed-point scale for averaged claim counts in the luck control loop.
///
/// Averages are carried as `claims * LUCK_PRECISION` so that the tolerance
/// comparison is exact integer math.
pub const LUCK_PRECISION: u64 = 1_000_000_000;

/// Default TCP port for the JSON-RPC server.
pub const DEFAULT_RPC_PORT: u16 = 18_640;

/// First allocation id handed out by a fresh ledger.
pub const FIRST_ALLOCATION_ID: u64 = 1;

/// First pot id handed out by a fresh ledger.
pub const FIRST_POT_ID: u64 = 1;

/// Default window, in epochs, over which a single epoch's claim count is
/// smoothed.
pub const DEFAULT_LUCK_TRAILING_EPOCHS: u64 = 4;

/// Default number of epochs the control loop looks back over.
pub const DEFAULT_AVERAGING_EPOCHS: u64 = 8;

/// Default tolerance band around the target claim rate (10%).
pub const DEFAULT_VARIANCE_TOLERANCE_BPS: u64 = 1_000;
