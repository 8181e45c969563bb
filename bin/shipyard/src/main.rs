//! shipyard deploys contracts to EVM networks and verifies them on block explorers.

mod cli;

use std::{error::Error, path::Path, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::{Table, presets::UTF8_FULL};

use cli::{Cli, Command, ConstructorArgsInput, DeployArgs, StatusArgs, VerifyArgs};
use shipyard_deploy::{
    ConstructorArgs, DeploymentOrchestrator, EtherscanApi, HardhatArtifacts, NetworkRegistry,
    ProcessEnv, RpcConnector, RunRequest, Settings, VERIFICATION_EXIT_CODE,
    VerificationOutcome, VerificationResult,
};

/// Exit code for configuration errors.
const CONFIG_EXIT_CODE: i32 = 2;
/// Exit code for unreadable constructor arguments.
const ARGS_EXIT_CODE: i32 = 4;

type Orchestrator = DeploymentOrchestrator<HardhatArtifacts, RpcConnector, EtherscanApi>;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before parsing, so that it feeds the env fallbacks of the CLI as well.
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let mut settings = match Settings::load(&cli.config) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!(config_path = %cli.config.display(), error = %error_chain(&e), "Failed to load configuration");
            std::process::exit(CONFIG_EXIT_CODE);
        }
    };

    if let Some(artifacts) = &cli.artifacts {
        settings.artifacts_dir = artifacts.clone();
    }

    if let Command::Deploy(args) = &cli.command {
        if let Some(timeout) = args.timeout {
            settings.confirmation_timeout_secs = Some(timeout);
        }
        if let Some(confirmations) = args.confirmations {
            settings.confirmations = confirmations;
        }
    }

    let registry = match settings.registry(&ProcessEnv) {
        Ok(registry) => Arc::new(registry),
        Err(e) => {
            tracing::error!(config_path = %cli.config.display(), error = %error_chain(&e), "Invalid network table");
            std::process::exit(CONFIG_EXIT_CODE);
        }
    };

    tracing::debug!(
        config_path = %cli.config.display(),
        networks = registry.len(),
        artifacts_dir = %settings.artifacts_dir.display(),
        "Configuration loaded"
    );

    let exit_code = match cli.command {
        Command::Networks => {
            println!("{}", networks_table(&registry));
            0
        }
        Command::Deploy(args) => {
            let orchestrator = Orchestrator::from_settings(&settings, registry)?;
            deploy(&orchestrator, args).await?
        }
        Command::Verify(args) => {
            let orchestrator = Orchestrator::from_settings(&settings, registry)?;
            verify(&orchestrator, args).await
        }
        Command::Status(args) => {
            let orchestrator = Orchestrator::from_settings(&settings, registry)?;
            status(&orchestrator, args).await
        }
    };

    if exit_code != 0 {
        std::process::exit(exit_code);
    }

    Ok(())
}

/// Deploy to every requested network and return the exit code of the worst run.
async fn deploy(orchestrator: &Orchestrator, args: DeployArgs) -> Result<i32> {
    let constructor_args = match read_constructor_args(&args.constructor_args) {
        Ok(constructor_args) => constructor_args,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Invalid constructor arguments");
            return Ok(ARGS_EXIT_CODE);
        }
    };

    let requests = args
        .networks
        .iter()
        .map(|network| RunRequest {
            network: network.clone(),
            contract_id: args.contract.clone(),
            constructor_args: constructor_args.clone(),
            verify: args.verify,
        })
        .collect::<Vec<_>>();

    let mut exit_code = 0;
    for result in orchestrator.run_many(&requests).await {
        let report = match result {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(
                    network = %e.network,
                    contract = %e.contract_id,
                    stage = %e.stage,
                    tx_hash = ?e.transaction_hash(),
                    error = %error_chain(&e),
                    "Deployment run failed"
                );
                exit_code = exit_code.max(e.exit_code());
                continue;
            }
        };

        println!("{}", report.record.to_table());
        report
            .record
            .save_to_dir(&args.out)
            .with_context(|| {
                format!("Failed to save deployment record to {}", args.out.display())
            })?;

        match &report.verification {
            VerificationOutcome::NotRequested | VerificationOutcome::Verified => {}
            VerificationOutcome::Pending { guid } => {
                let network = &report.record.network.name;
                println!(
                    "Verification of {} on {network} is still pending, check it with: \
                     shipyard status --network {network} {guid}",
                    report.record.contract_address
                );
            }
            VerificationOutcome::Failed(e) => {
                tracing::error!(
                    network = %report.record.network.name,
                    address = %report.record.contract_address,
                    error = %error_chain(e),
                    "Contract deployed but not verified"
                );
            }
        }

        exit_code = exit_code.max(report.exit_code());
    }

    Ok(exit_code)
}

async fn verify(orchestrator: &Orchestrator, args: VerifyArgs) -> i32 {
    let constructor_args = match read_constructor_args(&args.constructor_args) {
        Ok(constructor_args) => constructor_args,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Invalid constructor arguments");
            return ARGS_EXIT_CODE;
        }
    };

    let result = orchestrator
        .verify_deployed(&args.network, args.address, &args.contract, &constructor_args)
        .await;

    match result {
        Ok(result) => report_verification(&args.network, &result),
        Err(e) => {
            tracing::error!(network = %args.network, address = %args.address, error = %error_chain(&e), "Verification failed");
            e.exit_code()
        }
    }
}

async fn status(orchestrator: &Orchestrator, args: StatusArgs) -> i32 {
    match orchestrator.verification_status(&args.network, &args.guid).await {
        Ok(result) => report_verification(&args.network, &result),
        Err(e) => {
            tracing::error!(network = %args.network, guid = %args.guid, error = %error_chain(&e), "Status check failed");
            e.exit_code()
        }
    }
}

fn report_verification(network: &str, result: &VerificationResult) -> i32 {
    match result {
        VerificationResult::Verified => {
            println!("Verified on {network}");
            0
        }
        VerificationResult::Pending { guid } => {
            println!("Pending on {network} (guid {guid})");
            VERIFICATION_EXIT_CODE
        }
        VerificationResult::Failed(reason) => {
            println!("Verification failed on {network}: {reason}");
            VERIFICATION_EXIT_CODE
        }
    }
}

fn read_constructor_args(input: &ConstructorArgsInput) -> Result<ConstructorArgs> {
    let Some(path) = &input.args_file else {
        return Ok(ConstructorArgs::new(input.args.iter().cloned()));
    };

    read_args_file(path)
}

fn read_args_file(path: &Path) -> Result<ConstructorArgs> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read arguments file {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse arguments file {}", path.display()))?;
    ConstructorArgs::from_json(&value)
        .with_context(|| format!("Invalid arguments in {}", path.display()))
}

fn networks_table(registry: &NetworkRegistry) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Network", "Chain ID", "RPC URL", "Mainnet", "Credential", "Explorer"]);

    for profile in registry.iter() {
        let credential = match &profile.credential.env_var {
            Some(var) if profile.credential.has_fallback() => format!("{var} (with fallback)"),
            Some(var) => var.clone(),
            None => profile.credential.source.to_string(),
        };

        table.add_row(vec![
            profile.name.clone(),
            profile.chain_id.to_string(),
            profile.rpc_url.clone(),
            profile.mainnet.to_string(),
            credential,
            profile
                .explorer
                .as_ref()
                .map(|e| e.browser_base_url.clone())
                .unwrap_or_else(|| "-".to_string()),
        ]);
    }

    table
}

/// `error: cause: cause` rendering of an error and its sources.
fn error_chain(err: &dyn Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
