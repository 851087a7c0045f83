//! sluice-cli: command-line client for a running Sluice node.
//!
//! Every subcommand maps to one JSON-RPC method. Results are printed as
//! pretty JSON.

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use jsonrpsee::core::client::ClientT;
use jsonrpsee::core::params::ArrayParams;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use serde::Serialize;
use sluice_core::constants::DEFAULT_RPC_PORT;
use sluice_core::types::{Amount, Epoch, Principal};
use sluice_luck::{RoleParameter, RoleThrottleConfig};

/// Sluice command-line client.
#[derive(Parser)]
#[command(name = "sluice-cli")]
#[command(version, about = "Query and govern a Sluice economy node")]
struct Cli {
    /// RPC endpoint URL (default: http://127.0.0.1:<default port>).
    #[arg(short, long, global = true)]
    rpc_endpoint: Option<String>,

    /// Hex-encoded principal to act as for governed commands.
    #[arg(short, long, global = true)]
    caller: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show epoch, pool totals, and record counts.
    Status,
    /// Advance the node clock to an epoch.
    Advance {
        epoch: Epoch,
    },
    /// Add tokens to the unallocated pool.
    Deposit {
        amount: Amount,
    },
    /// Emission allocations and pots.
    Fund {
        #[command(subcommand)]
        action: FundAction,
    },
    /// Pot queries and draws.
    Pot {
        #[command(subcommand)]
        action: PotAction,
    },
    /// Role throttling.
    Role {
        #[command(subcommand)]
        action: RoleAction,
    },
}

#[derive(Subcommand)]
enum FundAction {
    /// Show an allocation with its pending accrual.
    Show { id: u64 },
    /// Create an allocation feeding a pot.
    Create {
        /// Destination pot id.
        #[arg(long)]
        pot: u64,
        /// Tokens per epoch.
        #[arg(long)]
        rate: Amount,
        /// First epoch that no longer accrues.
        #[arg(long)]
        end_epoch: Epoch,
    },
    /// Credit accrued emission into the allocation's pot.
    Draw {
        id: u64,
        /// Draw through this epoch instead of now.
        #[arg(long)]
        through: Option<Epoch>,
    },
    /// Schedule a new rate.
    SetRate {
        id: u64,
        #[arg(long)]
        rate: Amount,
        #[arg(long)]
        effective_epoch: Epoch,
    },
    /// Move the end epoch.
    SetEnd {
        id: u64,
        #[arg(long)]
        end_epoch: Epoch,
    },
    /// Redirect future accrual to another pot.
    SetPot {
        id: u64,
        #[arg(long)]
        pot: u64,
    },
}

#[derive(Subcommand)]
enum PotAction {
    /// Show a pot.
    Show { id: u64 },
    /// Open an empty pot.
    Create,
    /// Draw every allocation feeding the pot.
    Draw {
        id: u64,
        #[arg(long)]
        through: Option<Epoch>,
    },
}

#[derive(Subcommand)]
enum RoleAction {
    /// Show a role's configuration and cache extent.
    Show { role: String },
    /// Register a role.
    Init(RoleInitArgs),
    /// Change one tunable, e.g. `target_claims 12`.
    Set {
        role: String,
        parameter: String,
        value: u64,
    },
    /// Luck for a role at an epoch (default: now).
    Luck {
        role: String,
        #[arg(long)]
        epoch: Option<Epoch>,
    },
    /// Record successful claims for the current epoch.
    Claims {
        role: String,
        #[arg(long)]
        epoch: Epoch,
        #[arg(long, default_value_t = 1)]
        count: u64,
    },
}

#[derive(Args)]
struct RoleInitArgs {
    role: String,
    #[arg(long)]
    starting_epoch: Epoch,
    #[arg(long)]
    target_claims: u64,
    #[arg(long)]
    change_steps: u64,
    #[arg(long)]
    initial_luck_limit: u64,
    #[arg(long)]
    trailing_epochs: Option<u64>,
    #[arg(long)]
    averaging_epochs: Option<u64>,
    #[arg(long)]
    tolerance_bps: Option<u64>,
}

impl RoleInitArgs {
    fn config(&self) -> RoleThrottleConfig {
        let mut config = RoleThrottleConfig::new(
            self.starting_epoch,
            self.target_claims,
            self.change_steps,
            self.initial_luck_limit,
        );
        if let Some(n) = self.trailing_epochs {
            config.luck_trailing_epochs = n;
        }
        if let Some(n) = self.averaging_epochs {
            config.averaging_epochs = n;
        }
        if let Some(bps) = self.tolerance_bps {
            config.variance_tolerance_bps = bps;
        }
        config
    }
}

/// Thin wrapper that carries the resolved caller.
struct Session {
    client: HttpClient,
    caller: Option<String>,
}

impl Session {
    fn caller(&self) -> Result<String> {
        match &self.caller {
            Some(c) => Ok(c.clone()),
            None => bail!("this command needs --caller <hex principal>"),
        }
    }

    async fn call(&self, method: &str, params: ArrayParams) -> Result<serde_json::Value> {
        self.client
            .request(method, params)
            .await
            .with_context(|| format!("RPC {method} failed"))
    }
}

/// Build positional params from heterogeneous values.
macro_rules! params {
    ($($value:expr),* $(,)?) => {{
        let mut p = ArrayParams::new();
        $( push(&mut p, $value)?; )*
        p
    }};
}

fn push<T: Serialize>(params: &mut ArrayParams, value: T) -> Result<()> {
    params.insert(value).context("failed to encode RPC parameter")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    if let Some(caller) = &cli.caller {
        if Principal::from_hex(caller).is_none() {
            bail!("--caller must be 64 hex characters");
        }
    }
    let endpoint = cli
        .rpc_endpoint
        .clone()
        .unwrap_or_else(|| format!("http://127.0.0.1:{DEFAULT_RPC_PORT}"));
    let client = HttpClientBuilder::default()
        .build(&endpoint)
        .context("Failed to connect to RPC")?;
    let session = Session {
        client,
        caller: cli.caller,
    };

    let result = run(&session, cli.command).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn run(s: &Session, command: Commands) -> Result<serde_json::Value> {
    match command {
        Commands::Status => s.call("getstatus", ArrayParams::new()).await,
        Commands::Advance { epoch } => s.call("advanceepoch", params![s.caller()?, epoch]).await,
        Commands::Deposit { amount } => s.call("deposit", params![s.caller()?, amount]).await,
        Commands::Fund { action } => match action {
            FundAction::Show { id } => s.call("getfund", params![id]).await,
            FundAction::Create {
                pot,
                rate,
                end_epoch,
            } => {
                s.call("createfund", params![s.caller()?, pot, rate, end_epoch])
                    .await
            }
            FundAction::Draw { id, through } => s.call("draw", params![id, through]).await,
            FundAction::SetRate {
                id,
                rate,
                effective_epoch,
            } => {
                s.call(
                    "updateinflation",
                    params![s.caller()?, id, rate, effective_epoch],
                )
                .await
            }
            FundAction::SetEnd { id, end_epoch } => {
                s.call("updateendepoch", params![s.caller()?, id, end_epoch])
                    .await
            }
            FundAction::SetPot { id, pot } => {
                s.call("updatefundpot", params![s.caller()?, id, pot]).await
            }
        },
        Commands::Pot { action } => match action {
            PotAction::Show { id } => s.call("getpot", params![id]).await,
            PotAction::Create => s.call("createpot", params![s.caller()?]).await,
            PotAction::Draw { id, through } => s.call("drawpot", params![id, through]).await,
        },
        Commands::Role { action } => match action {
            RoleAction::Show { role } => s.call("getrole", params![role]).await,
            RoleAction::Init(args) => {
                let config = args.config();
                config
                    .validate()
                    .map_err(|e| anyhow::anyhow!("invalid role config: {e}"))?;
                s.call("initrole", params![s.caller()?, &args.role, config])
                    .await
            }
            RoleAction::Set {
                role,
                parameter,
                value,
            } => {
                if RoleParameter::from_name(&parameter, value).is_none() {
                    bail!("unknown role parameter: {parameter}");
                }
                s.call("configurerole", params![s.caller()?, role, parameter, value])
                    .await
            }
            RoleAction::Luck { role, epoch } => s.call("getluck", params![role, epoch]).await,
            RoleAction::Claims { role, epoch, count } => {
                s.call("recordclaims", params![role, epoch, count]).await
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_init_applies_overrides() {
        let cli = Cli::parse_from([
            "sluice-cli",
            "role",
            "init",
            "relayer",
            "--starting-epoch",
            "5",
            "--target-claims",
            "10",
            "--change-steps",
            "20",
            "--initial-luck-limit",
            "1000",
            "--averaging-epochs",
            "3",
        ]);
        let Commands::Role {
            action: RoleAction::Init(args),
        } = cli.command
        else {
            panic!("expected role init");
        };
        let config = args.config();
        assert_eq!(config.starting_epoch, 5);
        assert_eq!(config.averaging_epochs, 3);
        assert_eq!(
            config.luck_trailing_epochs,
            RoleThrottleConfig::new(0, 1, 1, 1).luck_trailing_epochs
        );
    }

    #[test]
    fn caller_flag_is_global() {
        let cli = Cli::parse_from(["sluice-cli", "pot", "create", "--caller", "ab"]);
        assert_eq!(cli.caller.as_deref(), Some("ab"));
    }
}
