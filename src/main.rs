//! EtherVault client - builds, prices and submits multisig vault transactions
//!
//! Every action reads the vault's contract version, execution nonce and fee
//! market fresh from the node, so concurrent signers never see stale state.

use anyhow::Result;
use clap::Parser;
use ethers::types::{Address, U256};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

mod abi;
mod chain;
mod cli;
mod config;
mod error;
mod tx;
mod vault;

use abi::ContractCallEncoder;
use chain::{ChainProvider, VaultRpc};
use cli::{Cli, Command};
use config::Settings;
use error::VaultError;
use tx::{
    Broadcaster, FeeEstimator, NonceCoordinator, NoncePolicy, PriorityTier, TransactionBuilder,
    VaultContext,
};
use vault::{views, VersionDispatcher};

/// Everything an action needs once the network is connected
struct Session {
    settings: Settings,
    rpc: Arc<dyn VaultRpc>,
    vault: Address,
    chain_id: u64,
    tier: PriorityTier,
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.json_logs);

    info!("Starting EtherVault client v{}", env!("CARGO_PKG_VERSION"));

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };

    let network_name = cli
        .network
        .clone()
        .unwrap_or_else(|| settings.client.default_network.clone());
    let network = settings.network(&network_name)?.clone();
    let vault = network.vault()?;

    let tier = PriorityTier::from_str(
        cli.priority
            .as_deref()
            .unwrap_or(&settings.client.default_priority),
    )?;

    let provider = ChainProvider::new(
        network,
        Duration::from_millis(settings.client.rpc_timeout_ms),
    )?;
    let chain_id = provider.verify_chain_id().await?;

    let session = Session {
        settings,
        rpc: Arc::new(provider),
        vault,
        chain_id,
        tier,
        dry_run: cli.dry_run,
    };

    let op_id = Uuid::new_v4();
    let span = info_span!(
        "action",
        op_id = %op_id,
        network = %network_name,
        command = cli.command.name()
    );

    tokio::select! {
        result = run(&session, cli.command).instrument(span) => {
            if let Err(e) = &result {
                if e.downcast_ref::<VaultError>().is_some_and(VaultError::is_retryable) {
                    warn!("{} hit a transient failure and can be rerun as is", op_id);
                }
            }
            result?;
        }
        _ = shutdown_signal() => {
            warn!("Shutdown signal received, abandoning {}", op_id);
            return Err(VaultError::Cancelled.into());
        }
    }

    Ok(())
}

async fn run(session: &Session, command: Command) -> Result<()> {
    let rpc = session.rpc.as_ref();

    if let Some(intent) = command.intent()? {
        let wallet = Broadcaster::load_wallet(&session.settings.wallet)?;
        let broadcaster = Broadcaster::new(session.rpc.clone(), wallet);
        let builder = TransactionBuilder::new(
            session.rpc.clone(),
            FeeEstimator::new(&session.settings.fees),
            NonceCoordinator::new(NoncePolicy::new(&session.settings.nonce_offsets)?),
        );
        let ctx = VaultContext {
            vault: session.vault,
            sender: broadcaster.address(),
            chain_id: session.chain_id,
        };

        let built = builder.build(&ctx, &intent, session.tier).await?;

        if session.dry_run {
            info!("Dry run, not broadcasting {}", built.intent);
            let arguments: Vec<(String, String)> = match built.function {
                Some(function) => ContractCallEncoder::new(built.version.interface())
                    .decode_input(function, &built.envelope.data)?
                    .into_iter()
                    .map(|(name, token)| (name, token.to_string()))
                    .collect(),
                None => Vec::new(),
            };
            let report = serde_json::json!({
                "transaction": &built,
                "arguments": arguments,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }

        let tx_hash = broadcaster.broadcast(built).await?;
        println!("{:?}", tx_hash);
        return Ok(());
    }

    match command {
        Command::Status => {
            let protocol = VersionDispatcher::resolve(rpc, session.vault).await?;
            let status = views::vault_status(rpc, protocol.as_ref(), session.vault).await?;
            let report = serde_json::json!({
                "vault": session.vault,
                "chain_id": session.chain_id,
                "read_at": chrono::Utc::now(),
                "status": status,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Proposal { id } => {
            let protocol = VersionDispatcher::resolve(rpc, session.vault).await?;
            let proposal =
                views::pending_proposal(rpc, protocol.as_ref(), session.vault, id).await?;
            println!("{}", serde_json::to_string_pretty(&proposal)?);
        }
        Command::PendingTx { txid } => {
            let protocol = VersionDispatcher::resolve(rpc, session.vault).await?;
            let pending =
                views::pending_transaction(rpc, protocol.as_ref(), session.vault, txid).await?;
            println!("{}", serde_json::to_string_pretty(&pending)?);
        }
        Command::Fees { gas } => {
            let fees = &session.settings.fees;
            let history = rpc
                .fee_history(fees.block_count, fees.reward_percentiles)
                .await?;
            let table = FeeEstimator::fee_table(&history, U256::from(gas))?;
            println!("{}", serde_json::to_string_pretty(&table)?);
        }
        other => {
            // Every remaining command maps to an intent above
            anyhow::bail!("{} has no read-only handler", other.name());
        }
    }

    Ok(())
}

fn init_logging(json: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,ethervault_client=debug,hyper=warn,reqwest=warn")
    });

    // Logs go to stderr; stdout carries command output
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
