// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Strata Node
//!
//! Entry point for the `strata-node` binary. Parses CLI arguments,
//! initializes logging, opens the journal over a sled database, and runs
//! the journal service until interrupted.
//!
//! - `run`     : start the journal
//! - `init`    : create the data directory and a node key
//! - `version` : print build version information
//!
//! There is no peer transport in this binary. Outgoing gossip is drained
//! and logged at debug level so the journal never blocks on it.

mod cli;
mod logging;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio::signal;
use tokio::sync::watch;

use strata_protocol::config::JournalConfig;
use strata_protocol::consensus::{Consensus, DevModeConsensus, WaitConfig, WaitConsensus};
use strata_protocol::crypto::keys::StrataKeypair;
use strata_protocol::journal::{Journal, JournalService};
use strata_protocol::network::{ChannelNetwork, GossipConfig};
use strata_protocol::storage::JournalDb;
use strata_protocol::transaction::IntegerKeyFamily;

use cli::{Commands, ConsensusKind, StrataNodeCli};
use logging::LogFormat;

/// File name of the node key inside the data directory.
const KEY_FILE: &str = "node.key";

/// Everything the JSON config file may set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct NodeConfig {
    journal: JournalConfig,
    wait: WaitConfig,
    gossip: GossipConfig,
}

impl NodeConfig {
    fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("invalid config file {}", path.display()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = StrataNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Init(args) => init_node(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Open the journal and serve it until a shutdown signal arrives.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(&args.log_level, LogFormat::from_str_lossy(&args.log_format));

    let mut config = NodeConfig::load(args.config.as_deref())?;
    config.journal.genesis_ledger |= args.genesis;
    config.journal.restore |= args.restore;

    tracing::info!(
        data_dir = %args.data_dir.display(),
        consensus = ?args.consensus,
        genesis = config.journal.genesis_ledger,
        restore = config.journal.restore,
        "starting strata-node"
    );

    // --- Persistent storage ---
    let db_path = args.data_dir.join("db");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;
    let db = JournalDb::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;

    // --- Identity ---
    let keypair = load_keypair(args.key.as_deref(), &args.data_dir)?;

    // --- Network ---
    let (network, mut outbound) = ChannelNetwork::new(config.gossip.clone());
    let drain = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            tracing::debug!(kind = message.kind(), "outbound gossip (no transport)");
        }
    });

    // --- Journal ---
    let consensus: Box<dyn Consensus> = match args.consensus {
        ConsensusKind::DevMode => Box::new(DevModeConsensus),
        ConsensusKind::Wait => Box::new(WaitConsensus::new(config.wait.clone())),
    };
    let mut journal = Journal::new(config.journal.clone(), db, consensus, Arc::new(network), keypair)
        .context("failed to open journal")?;
    journal
        .register_family(Arc::new(IntegerKeyFamily))
        .context("failed to register transaction family")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (handle, task) = JournalService::spawn(journal, shutdown_rx);
    handle
        .initialization_complete()
        .await
        .context("journal initialization failed")?;
    tracing::info!(head = %handle.chain_head_id().await?.short(), "journal ready");

    shutdown_signal().await;
    tracing::info!("shutdown signal received");

    let stats = handle.stats().await?;
    let _ = shutdown_tx.send(true);
    let journal = task.await.context("journal service panicked")?;
    drop(journal);
    drain.abort();

    tracing::info!(
        head = %stats.head.short(),
        committed_blocks = stats.committed_block_count,
        committed_txns = stats.committed_txn_count,
        blocks_claimed = stats.blocks_claimed,
        "strata-node stopped"
    );
    Ok(())
}

/// Key from the command line, else from the data directory.
fn load_keypair(key: Option<&str>, data_dir: &Path) -> Result<StrataKeypair> {
    if let Some(hex_key) = key {
        return StrataKeypair::from_hex(hex_key.trim()).context("invalid --key");
    }
    let key_path = data_dir.join(KEY_FILE);
    let raw = std::fs::read_to_string(&key_path).with_context(|| {
        format!(
            "no key given and {} is unreadable (run `strata-node init` first)",
            key_path.display()
        )
    })?;
    StrataKeypair::from_hex(raw.trim()).with_context(|| format!("invalid key in {}", key_path.display()))
}

/// Create the data directory and write a fresh node key.
fn init_node(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("strata_node=info", LogFormat::Pretty);

    let data_dir = &args.data_dir;
    tracing::info!(data_dir = %data_dir.display(), "initializing node");

    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let key_path = data_dir.join(KEY_FILE);
    if key_path.exists() {
        anyhow::bail!("{} already exists, refusing to overwrite", key_path.display());
    }

    let keypair = StrataKeypair::generate();
    let public_key = keypair.public_key().to_hex();
    std::fs::write(&key_path, hex::encode(keypair.secret_key_bytes()))
        .with_context(|| format!("failed to write node key to {}", key_path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))?;
    }

    tracing::info!(public_key = %public_key, key_path = %key_path.display(), "node key generated");

    println!("Node initialized.");
    println!("  Data directory : {}", data_dir.display());
    println!("  Node key       : {}", key_path.display());
    println!("  Public key     : {}", public_key);
    Ok(())
}

fn print_version() {
    println!("strata-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol    {}", strata_protocol::config::PROTOCOL_VERSION);
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_file_uses_defaults() {
        let config = NodeConfig::load(None).unwrap();
        assert_eq!(config.journal, JournalConfig::default());
    }

    #[test]
    fn partial_config_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.json");
        std::fs::write(&path, r#"{"journal":{"max_txn_age":7},"wait":{"target_wait_ms":500}}"#).unwrap();

        let config = NodeConfig::load(Some(&path)).unwrap();
        assert_eq!(config.journal.max_txn_age, 7);
        assert_eq!(config.journal.maximum_blocks_to_keep, JournalConfig::default().maximum_blocks_to_keep);
        assert_eq!(config.wait.target_wait_ms, 500);
    }

    #[test]
    fn key_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let keypair = StrataKeypair::generate();
        std::fs::write(dir.path().join(KEY_FILE), hex::encode(keypair.secret_key_bytes())).unwrap();

        let loaded = load_keypair(None, dir.path()).unwrap();
        assert_eq!(loaded.public_key(), keypair.public_key());
    }

    #[test]
    fn missing_key_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_keypair(None, dir.path()).is_err());
    }
}
