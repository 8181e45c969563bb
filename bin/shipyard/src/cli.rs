use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use shipyard_deploy::{Address, CONFIG_FILENAME};
use tracing::level_filters::LevelFilter;

/// The default directory deployment records are written to.
const DEFAULT_OUT_DIR: &str = "deployments";

#[derive(Parser)]
#[command(name = "shipyard")]
#[command(
    author,
    version,
    about = "Deploy contracts to EVM networks and verify them on block explorers"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(
        short,
        long,
        global = true,
        env = "SHIPYARD_VERBOSITY",
        default_value_t = LevelFilter::INFO
    )]
    pub verbosity: LevelFilter,

    /// Path to the configuration file holding the network table.
    #[arg(
        short,
        long,
        global = true,
        alias = "conf",
        env = "SHIPYARD_CONFIG",
        default_value = CONFIG_FILENAME
    )]
    pub config: PathBuf,

    /// The Hardhat artifacts directory. Overrides `artifacts_dir` from the configuration.
    #[arg(long, global = true, env = "SHIPYARD_ARTIFACTS")]
    pub artifacts: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Deploy a contract to one or more networks.
    Deploy(DeployArgs),

    /// Verify an already deployed contract on a network's explorer.
    Verify(VerifyArgs),

    /// Check the status of a verification previously submitted to an explorer.
    Status(StatusArgs),

    /// List the configured networks.
    Networks,
}

#[derive(Debug, Clone, Args)]
pub struct ConstructorArgsInput {
    /// Constructor arguments, in declaration order.
    #[arg(long, num_args = 1.., allow_hyphen_values = true, conflicts_with = "args_file")]
    pub args: Vec<String>,

    /// A JSON file holding the constructor arguments as an array.
    #[arg(long)]
    pub args_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct DeployArgs {
    /// The network to deploy to. Repeat to deploy to several networks concurrently.
    #[arg(
        short,
        long = "network",
        required = true,
        env = "SHIPYARD_NETWORK",
        value_delimiter = ','
    )]
    pub networks: Vec<String>,

    /// The contract to deploy, as `path/File.sol:Name` or a bare contract name.
    #[arg(long, alias = "contract-id")]
    pub contract: String,

    #[clap(flatten)]
    pub constructor_args: ConstructorArgsInput,

    /// Verify the contract on the network's explorer once deployed.
    #[arg(long, env = "SHIPYARD_VERIFY", default_value_t = false)]
    pub verify: bool,

    /// Ceiling, in seconds, on the wait for confirmations.
    ///
    /// If not provided, the configured ceiling is used (unbounded when none is configured).
    #[arg(long, env = "SHIPYARD_TIMEOUT")]
    pub timeout: Option<u64>,

    /// Block confirmations to wait for, for networks that do not set their own.
    #[arg(long, env = "SHIPYARD_CONFIRMATIONS")]
    pub confirmations: Option<u64>,

    /// The directory deployment records are written to, one sub-directory per network.
    #[arg(long, env = "SHIPYARD_OUT", default_value = DEFAULT_OUT_DIR)]
    pub out: PathBuf,
}

#[derive(Debug, Clone, Args)]
pub struct VerifyArgs {
    /// The network the contract is deployed on.
    #[arg(short, long, env = "SHIPYARD_NETWORK")]
    pub network: String,

    /// The address of the deployed contract.
    #[arg(long)]
    pub address: Address,

    /// The deployed contract, as `path/File.sol:Name` or a bare contract name.
    #[arg(long, alias = "contract-id")]
    pub contract: String,

    #[clap(flatten)]
    pub constructor_args: ConstructorArgsInput,
}

#[derive(Debug, Clone, Args)]
pub struct StatusArgs {
    /// The network whose explorer received the verification.
    #[arg(short, long, env = "SHIPYARD_NETWORK")]
    pub network: String,

    /// The GUID returned by the explorer on submission.
    pub guid: String,
}
