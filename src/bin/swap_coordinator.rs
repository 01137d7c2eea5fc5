//! Swap Coordinator
//!
//! Runs one cross-chain atomic swap, or checks connectivity to both chains.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin swap-coordinator -- --config config/swap-coordinator.toml run
//! cargo run --bin swap-coordinator -- run --amount 5000000 --beneficiary T...
//! cargo run --bin swap-coordinator -- balance
//! ```
//!
//! Or set the config path via environment variable:
//!
//! ```bash
//! SWAP_COORDINATOR_CONFIG_PATH=swap.toml cargo run --bin swap-coordinator -- run
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use swap_coordinator::{
    chains::{connect, ChainConnector},
    config::{CoordinatorConfig, CONFIG_PATH_ENV},
    intent::TokenId,
    service::SwapOrchestrator,
};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "swap-coordinator")]
#[command(about = "Coordinates hash-time-locked swaps between an EVM chain and a Tron chain")]
struct Args {
    /// Path to configuration file (default: config/swap-coordinator.toml or SWAP_COORDINATOR_CONFIG_PATH env var)
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute one swap and print the outcome as JSON
    Run {
        /// Override the configured amount (smallest units)
        #[arg(long)]
        amount: Option<String>,
        /// Override the configured destination beneficiary
        #[arg(long)]
        beneficiary: Option<String>,
    },
    /// Print both signers' addresses and balances
    Balance,
}

async fn print_balance(label: &str, connector: &dyn ChainConnector, token: &TokenId) -> Result<()> {
    let address = connector.address();
    let native = connector
        .get_balance(None)
        .await
        .with_context(|| format!("Failed to read native balance on {}", connector.name()))?;
    println!("{} chain: {} (chain ID: {})", label, connector.name(), connector.chain_id());
    println!("  signer:  {}", address);
    println!("  native:  {}", native);
    if let Some(contract) = token.contract() {
        let balance = connector
            .get_token_balance(contract, &address)
            .await
            .with_context(|| format!("Failed to read {} balance on {}", contract, connector.name()))?;
        println!("  token:   {} ({})", balance, contract);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments first (before initializing logging)
    let args = Args::parse();

    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Swap Coordinator");

    // Priority: CLI arg > env var > default
    let config = if let Some(path) = args.config.as_deref() {
        info!("Loading configuration from: {}", path);
        CoordinatorConfig::load_from_path(Some(path))?
    } else {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            info!("Loading configuration from {}: {}", CONFIG_PATH_ENV, path);
        } else {
            info!("Loading configuration from default location");
        }
        CoordinatorConfig::load()?
    };

    info!(
        "Source chain: {} (chain ID: {}, {})",
        config.source_chain.name(),
        config.source_chain.chain_id(),
        config.source_chain.chain_type()
    );
    info!(
        "Destination chain: {} (chain ID: {}, {})",
        config.destination_chain.name(),
        config.destination_chain.chain_id(),
        config.destination_chain.chain_type()
    );

    let source = connect(&config.source_chain, &config.service).context("Failed to connect source chain")?;
    let destination =
        connect(&config.destination_chain, &config.service).context("Failed to connect destination chain")?;

    match args.command {
        Command::Balance => {
            print_balance(
                "Source",
                source.as_ref(),
                &TokenId::parse(&config.swap.source_token),
            )
            .await?;
            print_balance(
                "Destination",
                destination.as_ref(),
                &TokenId::parse(&config.swap.destination_token),
            )
            .await?;
            Ok(())
        }
        Command::Run { amount, beneficiary } => {
            let intent = config.swap_intent(amount.as_deref(), beneficiary.as_deref())?;
            info!(
                "Swapping {} {} -> {} for {} ({:?} variant, timelock {}s)",
                intent.amount(),
                intent.source_token(),
                intent.destination_token(),
                intent.beneficiary(),
                config.swap.variant,
                intent.timelock_secs()
            );

            let orchestrator = SwapOrchestrator::from_config(&config, source, destination)?;

            let (cancel_tx, cancel_rx) = watch::channel(false);
            tokio::spawn(async move {
                if signal::ctrl_c().await.is_ok() {
                    warn!("Ctrl-C received; cancelling swap polling");
                    let _ = cancel_tx.send(true);
                }
            });

            let outcome = orchestrator.execute(&intent, cancel_rx).await;
            println!(
                "{}",
                serde_json::to_string_pretty(&outcome).context("Failed to serialize swap outcome")?
            );

            if outcome.success {
                info!("Swap completed: {}", outcome.message);
                Ok(())
            } else {
                error!("Swap failed ({:?}): {}", outcome.error_kind, outcome.message);
                std::process::exit(1);
            }
        }
    }
}
