//! dsync command-line interface
//!
//! Argument definitions and command handlers for the `dsync` binary. The
//! binary itself only parses arguments, installs logging and dispatches.

#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use dsync_core::{Environment, SyncTarget};

pub mod commands;

/// Default configuration file
pub const DEFAULT_CONFIG: &str = "dsync.toml";

/// Default whitelist artifact
pub const DEFAULT_WHITELIST: &str = "config/whitelist.json";

/// Command line of the `dsync` binary
#[derive(Debug, Parser)]
#[command(name = "dsync")]
#[command(about = "Synchronize diamond whitelist registries across networks", long_about = None)]
pub struct Cli {
    /// Command to run
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file path
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG)]
    pub config: PathBuf,
}

/// Subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Synchronize the granular (contract, selector) whitelist
    ContractSelectors(SyncArgs),

    /// Synchronize address-level approvals
    Addresses(SyncArgs),

    /// Synchronize the legacy swap venue list
    Dexs(SyncArgs),

    /// List persisted multisig proposals
    Proposals {
        /// Only show proposals of this network
        #[arg(short, long)]
        network: Option<String>,
    },
}

impl Command {
    /// Registry a sync command targets; `None` for non-sync commands
    pub fn target(&self) -> Option<(SyncTarget, &SyncArgs)> {
        match self {
            Self::ContractSelectors(args) => Some((SyncTarget::ContractSelectors, args)),
            Self::Addresses(args) => Some((SyncTarget::Addresses, args)),
            Self::Dexs(args) => Some((SyncTarget::Dexs, args)),
            Self::Proposals { .. } => None,
        }
    }
}

/// Flags shared by the sync commands
#[derive(Debug, Clone, Args)]
pub struct SyncArgs {
    /// Network name, or `all`
    #[arg(short, long, default_value = "all")]
    pub network: String,

    /// Deployment environment: staging or production
    #[arg(short, long, default_value = "staging")]
    pub environment: Environment,

    /// Keep token-like contracts instead of failing the network
    #[arg(long)]
    pub allow_token_contracts: bool,

    /// Write directly in production, bypassing the multisig (bootstrap)
    #[arg(long)]
    pub no_authority: bool,

    /// Print the plan without writing or proposing
    #[arg(long)]
    pub dry_run: bool,

    /// Whitelist artifact path
    #[arg(short, long, default_value = DEFAULT_WHITELIST)]
    pub whitelist: PathBuf,
}

/// Install the global subscriber; `RUST_LOG` wins over `-v`
pub fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Dispatch a parsed command line
pub async fn run(cli: Cli) -> Result<ExitCode> {
    match &cli.command {
        Command::Proposals { network } => {
            commands::proposals::run(&cli.config, network.as_deref()).await?;
            Ok(ExitCode::SUCCESS)
        }
        command => match command.target() {
            Some((target, args)) => commands::sync::run(&cli.config, target, args).await,
            None => Ok(ExitCode::SUCCESS),
        },
    }
}
