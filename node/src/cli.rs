//! # CLI Interface
//!
//! Command-line structure for `strata-node`, using `clap` derive. Three
//! subcommands: `run`, `init` and `version`.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Strata journal node.
///
/// Runs a journal over a local sled database, admits transactions for the
/// `/IntegerKey` family, and produces blocks with the selected consensus
/// strategy.
#[derive(Parser, Debug)]
#[command(
    name = "strata-node",
    about = "Strata journal node",
    version,
    propagate_version = true
)]
pub struct StrataNodeCli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the journal.
    Run(RunArgs),
    /// Create the data directory and generate a node key.
    Init(InitArgs),
    /// Print version information and exit.
    Version,
}

/// Block production strategy.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsensusKind {
    /// Claim as soon as `block_wait_time` has passed.
    DevMode,
    /// Randomized wait timers.
    Wait,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// JSON configuration file. Missing fields take their defaults.
    #[arg(long, short = 'c', env = "STRATA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Data directory holding the database and the node key.
    #[arg(long, short = 'd', env = "STRATA_DATA_DIR", default_value = ".strata")]
    pub data_dir: PathBuf,

    /// Hex-encoded Ed25519 secret key. Defaults to `node.key` in the data
    /// directory.
    #[arg(long, env = "STRATA_NODE_KEY")]
    pub key: Option<String>,

    /// Create the genesis block if no chain exists.
    #[arg(long, env = "STRATA_GENESIS")]
    pub genesis: bool,

    /// Resume from the persisted chain instead of starting empty.
    #[arg(long, env = "STRATA_RESTORE")]
    pub restore: bool,

    #[arg(long, value_enum, env = "STRATA_CONSENSUS", default_value_t = ConsensusKind::DevMode)]
    pub consensus: ConsensusKind,

    /// Default log filter when `RUST_LOG` is unset.
    #[arg(long, env = "STRATA_LOG_LEVEL", default_value = "strata_node=info,strata_protocol=info")]
    pub log_level: String,

    /// `pretty` or `json`.
    #[arg(long, env = "STRATA_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

#[derive(Parser, Debug)]
pub struct InitArgs {
    #[arg(long, short = 'd', env = "STRATA_DATA_DIR", default_value = ".strata")]
    pub data_dir: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        StrataNodeCli::command().debug_assert();
    }

    #[test]
    fn run_flags_parse() {
        let cli = StrataNodeCli::parse_from([
            "strata-node",
            "run",
            "--genesis",
            "--consensus",
            "wait",
            "-d",
            "/tmp/strata",
        ]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(args.genesis);
        assert!(!args.restore);
        assert_eq!(args.consensus, ConsensusKind::Wait);
        assert_eq!(args.data_dir, PathBuf::from("/tmp/strata"));
    }
}
