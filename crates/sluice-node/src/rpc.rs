//! JSON-RPC server for the Sluice economy node.
//!
//! Uses jsonrpsee 0.24. Mutating methods take the caller's principal as a
//! 64-character hex string in first position.

use std::sync::Arc;

use jsonrpsee::core::async_trait;
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObjectOwned;
use serde::{Deserialize, Serialize};
use tracing::info;

use sluice_core::error::{ClockError, LedgerError, SluiceError, ThrottleError};
use sluice_core::pot::ClaimPot;
use sluice_core::types::{AllocationId, Amount, Epoch, PotId, Principal, Role};
use sluice_emission::Allocation;
use sluice_luck::{RoleParameter, RoleState, RoleThrottleConfig};

use crate::economy::{Economy, EconomyStatus};

// --- Error codes ---

pub const UNAUTHORIZED: i32 = -32001;
pub const NOT_FOUND: i32 = -32002;
pub const INVALID_EPOCH: i32 = -32003;
pub const INSUFFICIENT_BALANCE: i32 = -32004;
pub const ALREADY_DRAWN: i32 = -32005;
pub const NOTHING_TO_DRAW: i32 = -32006;
pub const ALLOCATION_ENDED: i32 = -32007;
pub const ARITHMETIC_OVERFLOW: i32 = -32008;
pub const CONFLICT: i32 = -32009;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL: i32 = -32603;

/// JSON representation of an allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundJson {
    pub id: u64,
    pub pot: u64,
    pub inflation_rate: Amount,
    pub end_epoch: Epoch,
    pub last_drawn_epoch: Epoch,
    /// Scheduled rate, if a change is pending.
    pub pending_rate: Option<Amount>,
    pub pending_effective_epoch: Option<Epoch>,
    /// Value still reserved for undrawn accrual.
    pub reserved: Amount,
    /// What a draw through the current epoch would credit.
    pub accrued: Amount,
}

impl FundJson {
    pub fn new(allocation: &Allocation, accrued: Amount) -> Self {
        Self {
            id: allocation.id.0,
            pot: allocation.pot.0,
            inflation_rate: allocation.inflation_rate,
            end_epoch: allocation.end_epoch,
            last_drawn_epoch: allocation.last_drawn_epoch,
            pending_rate: allocation.pending.map(|p| p.rate),
            pending_effective_epoch: allocation.pending.map(|p| p.effective_epoch),
            reserved: allocation.reserved,
            accrued,
        }
    }
}

/// JSON representation of a pot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PotJson {
    pub id: u64,
    pub balance: Amount,
    pub last_drawn_epoch: Epoch,
    /// Ids of allocations currently feeding the pot.
    pub contributors: Vec<u64>,
}

impl From<&ClaimPot> for PotJson {
    fn from(pot: &ClaimPot) -> Self {
        Self {
            id: pot.id.0,
            balance: pot.balance(),
            last_drawn_epoch: pot.last_drawn_epoch(),
            contributors: pot.contributors().map(|id| id.0).collect(),
        }
    }
}

/// JSON representation of a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleJson {
    pub role: String,
    pub config: RoleThrottleConfig,
    /// Number of epochs with a computed luck value.
    pub cached_epochs: usize,
    pub last_cached_epoch: Option<Epoch>,
}

impl RoleJson {
    pub fn new(role: &Role, state: &RoleState) -> Self {
        Self {
            role: role.to_string(),
            config: state.config.clone(),
            cached_epochs: state.cache.len(),
            last_cached_epoch: state.cache.last_epoch(),
        }
    }
}

/// JSON representation of a luck query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LuckJson {
    pub role: String,
    pub epoch: Epoch,
    pub luck: u64,
}

/// Stable JSON-RPC code for an economy error.
pub fn error_code(err: &SluiceError) -> i32 {
    match err {
        SluiceError::Unauthorized(_) => UNAUTHORIZED,
        SluiceError::Ledger(e) => match e {
            LedgerError::Unauthorized(_) => UNAUTHORIZED,
            LedgerError::FundNotFound(_) | LedgerError::PotNotFound(_) => NOT_FOUND,
            LedgerError::InvalidEpoch { .. } => INVALID_EPOCH,
            LedgerError::InsufficientUnallocatedBalance { .. } => INSUFFICIENT_BALANCE,
            LedgerError::AlreadyDrawn { .. } => ALREADY_DRAWN,
            LedgerError::NothingToDraw(_) => NOTHING_TO_DRAW,
            LedgerError::AllocationEnded { .. } => ALLOCATION_ENDED,
            LedgerError::ArithmeticOverflow => ARITHMETIC_OVERFLOW,
        },
        SluiceError::Throttle(e) => match e {
            ThrottleError::Unauthorized(_) => UNAUTHORIZED,
            ThrottleError::RoleNotFound(_) => NOT_FOUND,
            ThrottleError::RoleExists(_) => CONFLICT,
            ThrottleError::BeforeStartingEpoch { .. } | ThrottleError::InvalidEpoch { .. } => {
                INVALID_EPOCH
            }
            ThrottleError::InvalidConfig(_) => INVALID_PARAMS,
            ThrottleError::ArithmeticOverflow => ARITHMETIC_OVERFLOW,
        },
        SluiceError::Clock(ClockError::NotAdvancing { .. }) => INVALID_EPOCH,
        SluiceError::Config(_) => INVALID_PARAMS,
        SluiceError::Storage(_) => INTERNAL,
    }
}

/// Convert an economy error into a JSON-RPC error object.
pub fn to_rpc_error(err: SluiceError) -> ErrorObjectOwned {
    rpc_error(error_code(&err), &err.to_string())
}

/// Parse a 64-character hex string into a Principal.
pub fn parse_principal(hex_str: &str) -> Result<Principal, ErrorObjectOwned> {
    Principal::from_hex(hex_str)
        .ok_or_else(|| rpc_error(INVALID_PARAMS, "principal must be 64 hex characters"))
}

/// Create a JSON-RPC error.
fn rpc_error(code: i32, msg: &str) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(code, msg.to_string(), None::<()>)
}

fn not_found(what: &str) -> ErrorObjectOwned {
    rpc_error(NOT_FOUND, &format!("{what} not found"))
}

/// The Sluice JSON-RPC interface.
#[rpc(server)]
pub trait SluiceRpc {
    /// Returns the current epoch and aggregate balances.
    #[method(name = "getstatus")]
    async fn get_status(&self) -> Result<EconomyStatus, ErrorObjectOwned>;

    /// Returns an allocation by id.
    #[method(name = "getfund")]
    async fn get_fund(&self, id: u64) -> Result<FundJson, ErrorObjectOwned>;

    /// Returns a pot by id.
    #[method(name = "getpot")]
    async fn get_pot(&self, id: u64) -> Result<PotJson, ErrorObjectOwned>;

    /// Returns the luck for a role at an epoch (default: current).
    #[method(name = "getluck")]
    async fn get_luck(&self, role: String, epoch: Option<Epoch>) -> Result<LuckJson, ErrorObjectOwned>;

    /// Returns a role's configuration and cache extent.
    #[method(name = "getrole")]
    async fn get_role(&self, role: String) -> Result<RoleJson, ErrorObjectOwned>;

    /// Opens an empty pot and returns its id.
    #[method(name = "createpot")]
    async fn create_pot(&self, caller: String) -> Result<u64, ErrorObjectOwned>;

    /// Creates an allocation and returns its id.
    #[method(name = "createfund")]
    async fn create_fund(
        &self,
        caller: String,
        pot: u64,
        inflation_rate: Amount,
        end_epoch: Epoch,
    ) -> Result<u64, ErrorObjectOwned>;

    /// Credits an allocation's accrual into its pot. Returns the amount.
    #[method(name = "draw")]
    async fn draw(&self, id: u64, through: Option<Epoch>) -> Result<Amount, ErrorObjectOwned>;

    /// Draws every allocation feeding a pot. Returns the total.
    #[method(name = "drawpot")]
    async fn draw_pot(&self, pot: u64, through: Option<Epoch>) -> Result<Amount, ErrorObjectOwned>;

    /// Schedules a rate change.
    #[method(name = "updateinflation")]
    async fn update_inflation(
        &self,
        caller: String,
        id: u64,
        new_rate: Amount,
        effective_epoch: Epoch,
    ) -> Result<FundJson, ErrorObjectOwned>;

    /// Moves an allocation's end epoch.
    #[method(name = "updateendepoch")]
    async fn update_end_epoch(
        &self,
        caller: String,
        id: u64,
        new_end_epoch: Epoch,
    ) -> Result<FundJson, ErrorObjectOwned>;

    /// Rebinds an allocation to another pot.
    #[method(name = "updatefundpot")]
    async fn update_fund_pot(
        &self,
        caller: String,
        id: u64,
        new_pot: u64,
    ) -> Result<FundJson, ErrorObjectOwned>;

    /// Registers a role.
    #[method(name = "initrole")]
    async fn init_role(
        &self,
        caller: String,
        role: String,
        config: RoleThrottleConfig,
    ) -> Result<RoleJson, ErrorObjectOwned>;

    /// Changes one tunable of a role.
    #[method(name = "configurerole")]
    async fn configure_role(
        &self,
        caller: String,
        role: String,
        parameter: String,
        value: u64,
    ) -> Result<RoleJson, ErrorObjectOwned>;

    /// Adds successful claims for the current epoch. Returns the new total.
    #[method(name = "recordclaims")]
    async fn record_claims(&self, role: String, epoch: Epoch, count: u64) -> Result<u64, ErrorObjectOwned>;

    /// Credits value to the unallocated pool. Returns the new available balance.
    #[method(name = "deposit")]
    async fn deposit(&self, caller: String, amount: Amount) -> Result<Amount, ErrorObjectOwned>;

    /// Moves the clock forward. Returns the new epoch.
    #[method(name = "advanceepoch")]
    async fn advance_epoch(&self, caller: String, epoch: Epoch) -> Result<Epoch, ErrorObjectOwned>;
}

/// Implementation of the Sluice JSON-RPC server.
pub struct RpcServerImpl {
    economy: Arc<Economy>,
}

impl RpcServerImpl {
    /// Create a new RPC server implementation wrapping the given economy.
    pub fn new(economy: Arc<Economy>) -> Self {
        Self { economy }
    }

    fn fund_json(&self, id: AllocationId) -> Result<FundJson, ErrorObjectOwned> {
        let allocation = self.economy.allocation(id).ok_or_else(|| not_found("fund"))?;
        let accrued = self.economy.accrued(id).map_err(to_rpc_error)?;
        Ok(FundJson::new(&allocation, accrued))
    }

    fn role_json(&self, role: &Role) -> Result<RoleJson, ErrorObjectOwned> {
        let state = self.economy.role(role).ok_or_else(|| not_found("role"))?;
        Ok(RoleJson::new(role, &state))
    }
}

#[async_trait]
impl SluiceRpcServer for RpcServerImpl {
    async fn get_status(&self) -> Result<EconomyStatus, ErrorObjectOwned> {
        Ok(self.economy.status())
    }

    async fn get_fund(&self, id: u64) -> Result<FundJson, ErrorObjectOwned> {
        self.fund_json(AllocationId(id))
    }

    async fn get_pot(&self, id: u64) -> Result<PotJson, ErrorObjectOwned> {
        let pot = self.economy.pot(PotId(id)).ok_or_else(|| not_found("pot"))?;
        Ok(PotJson::from(&pot))
    }

    async fn get_luck(&self, role: String, epoch: Option<Epoch>) -> Result<LuckJson, ErrorObjectOwned> {
        let epoch = epoch.unwrap_or_else(|| self.economy.current_epoch());
        let luck = self
            .economy
            .get_luck(&Role::new(role.clone()), Some(epoch))
            .map_err(to_rpc_error)?;
        Ok(LuckJson { role, epoch, luck })
    }

    async fn get_role(&self, role: String) -> Result<RoleJson, ErrorObjectOwned> {
        self.role_json(&Role::new(role))
    }

    async fn create_pot(&self, caller: String) -> Result<u64, ErrorObjectOwned> {
        let caller = parse_principal(&caller)?;
        let id = self.economy.create_pot(caller).map_err(to_rpc_error)?;
        Ok(id.0)
    }

    async fn create_fund(
        &self,
        caller: String,
        pot: u64,
        inflation_rate: Amount,
        end_epoch: Epoch,
    ) -> Result<u64, ErrorObjectOwned> {
        let caller = parse_principal(&caller)?;
        let id = self
            .economy
            .create_fund(caller, PotId(pot), inflation_rate, end_epoch)
            .map_err(to_rpc_error)?;
        Ok(id.0)
    }

    async fn draw(&self, id: u64, through: Option<Epoch>) -> Result<Amount, ErrorObjectOwned> {
        self.economy
            .draw(AllocationId(id), through)
            .map_err(to_rpc_error)
    }

    async fn draw_pot(&self, pot: u64, through: Option<Epoch>) -> Result<Amount, ErrorObjectOwned> {
        self.economy
            .draw_pot(PotId(pot), through)
            .map_err(to_rpc_error)
    }

    async fn update_inflation(
        &self,
        caller: String,
        id: u64,
        new_rate: Amount,
        effective_epoch: Epoch,
    ) -> Result<FundJson, ErrorObjectOwned> {
        let caller = parse_principal(&caller)?;
        self.economy
            .update_inflation(caller, AllocationId(id), new_rate, effective_epoch)
            .map_err(to_rpc_error)?;
        self.fund_json(AllocationId(id))
    }

    async fn update_end_epoch(
        &self,
        caller: String,
        id: u64,
        new_end_epoch: Epoch,
    ) -> Result<FundJson, ErrorObjectOwned> {
        let caller = parse_principal(&caller)?;
        self.economy
            .update_end_epoch(caller, AllocationId(id), new_end_epoch)
            .map_err(to_rpc_error)?;
        self.fund_json(AllocationId(id))
    }

    async fn update_fund_pot(
        &self,
        caller: String,
        id: u64,
        new_pot: u64,
    ) -> Result<FundJson, ErrorObjectOwned> {
        let caller = parse_principal(&caller)?;
        self.economy
            .update_fund_pot(caller, AllocationId(id), PotId(new_pot))
            .map_err(to_rpc_error)?;
        self.fund_json(AllocationId(id))
    }

    async fn init_role(
        &self,
        caller: String,
        role: String,
        config: RoleThrottleConfig,
    ) -> Result<RoleJson, ErrorObjectOwned> {
        let caller = parse_principal(&caller)?;
        let role = Role::new(role);
        self.economy
            .init_role(caller, role.clone(), config)
            .map_err(to_rpc_error)?;
        self.role_json(&role)
    }

    async fn configure_role(
        &self,
        caller: String,
        role: String,
        parameter: String,
        value: u64,
    ) -> Result<RoleJson, ErrorObjectOwned> {
        let caller = parse_principal(&caller)?;
        let parameter = RoleParameter::from_name(&parameter, value)
            .ok_or_else(|| rpc_error(INVALID_PARAMS, &format!("unknown role parameter: {parameter}")))?;
        let role = Role::new(role);
        self.economy
            .configure_role(caller, &role, parameter)
            .map_err(to_rpc_error)?;
        self.role_json(&role)
    }

    async fn record_claims(&self, role: String, epoch: Epoch, count: u64) -> Result<u64, ErrorObjectOwned> {
        self.economy
            .record_claims(&Role::new(role), epoch, count)
            .map_err(to_rpc_error)
    }

    async fn deposit(&self, caller: String, amount: Amount) -> Result<Amount, ErrorObjectOwned> {
        let caller = parse_principal(&caller)?;
        self.economy.deposit(caller, amount).map_err(to_rpc_error)
    }

    async fn advance_epoch(&self, caller: String, epoch: Epoch) -> Result<Epoch, ErrorObjectOwned> {
        let caller = parse_principal(&caller)?;
        self.economy.advance_epoch(caller, epoch).map_err(to_rpc_error)
    }
}

/// Start the JSON-RPC server on the given address.
///
/// Returns a [`ServerHandle`] that can be used to stop the server.
pub async fn start_rpc_server(
    addr: &str,
    economy: Arc<Economy>,
) -> Result<ServerHandle, SluiceError> {
    let server = Server::builder()
        .build(addr)
        .await
        .map_err(|e| SluiceError::Config(format!("RPC server error: {e}")))?;
    let local = server
        .local_addr()
        .map_err(|e| SluiceError::Config(format!("RPC server error: {e}")))?;

    let handle = server.start(RpcServerImpl::new(economy).into_rpc());
    info!(%local, "RPC server listening");
    Ok(handle)
}
