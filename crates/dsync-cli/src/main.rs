//! `dsync`: synchronize diamond whitelist registries across networks

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use dsync_cli::Cli;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    dsync_cli::init_tracing(cli.verbose);
    dsync_cli::run(cli).await
}
