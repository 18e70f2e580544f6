//! `contract-selectors`, `addresses` and `dexs`

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use dsync_core::{ChainEffects, KeyRef, NetworkId, SyncConfig, SyncError, SyncResult, SyncTarget};
use dsync_effects::{CastChain, CastSigner, FileProposalStore};
use dsync_engine::{
    NetworkPipeline, PipelineOptions, ProposalSequencer, RetryingChain, RouteOptions, Runner,
    WhitelistDocument,
};

use crate::SyncArgs;

/// Pipeline options for `target` from the command line
pub fn pipeline_options(target: SyncTarget, args: &SyncArgs) -> PipelineOptions {
    PipelineOptions {
        bypass_authority: args.no_authority,
        allow_token_contracts: args.allow_token_contracts,
        dry_run: args.dry_run,
        ..PipelineOptions::new(target, args.environment)
    }
}

/// Every selected network needs an RPC endpoint before anything runs
pub fn check_endpoints(config: &SyncConfig, networks: &[NetworkId]) -> SyncResult<()> {
    let missing: Vec<&str> = networks
        .iter()
        .filter(|n| {
            config
                .network(n)
                .map_or(true, |network| network.rpc_url.as_deref().map_or(true, str::is_empty))
        })
        .map(NetworkId::as_str)
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(SyncError::config(format!(
        "no RPC endpoint for {}; set rpc_url or DSYNC_RPC_URL_<NAME>",
        missing.join(", ")
    )))
}

/// Whether the run can hand batches to a multisig
pub fn needs_sequencer(config: &SyncConfig, networks: &[NetworkId], options: &PipelineOptions) -> bool {
    let route = RouteOptions {
        environment: options.environment,
        bypass_authority: options.bypass_authority,
    };
    !options.dry_run
        && route.wants_proposals()
        && networks
            .iter()
            .any(|n| config.network(n).is_ok_and(|network| network.authority.is_some()))
}

/// Run one sync command; exit status 1 when any network failed
pub async fn run(config_path: &Path, target: SyncTarget, args: &SyncArgs) -> Result<ExitCode> {
    let config = Arc::new(SyncConfig::load(config_path)?);
    let document = WhitelistDocument::load(&args.whitelist)?;
    let networks = config.select_networks(&args.network)?;
    check_endpoints(&config, &networks)?;

    let options = pipeline_options(target, args);
    let chain: Arc<dyn ChainEffects> = Arc::new(CastChain::from_config(&config));
    let mut pipeline = NetworkPipeline::new(
        Arc::clone(&config),
        Arc::new(document),
        Arc::clone(&chain),
        options,
    );

    if needs_sequencer(&config, &networks, &options) {
        let signer = CastSigner::connect(KeyRef::new(config.signer.key_env.as_str()))
            .await
            .context("failed to resolve the proposer key")?;
        let store = FileProposalStore::new(&config.store.path);
        tracing::info!(store = %store.root().display(), "proposals persisted to shared store");
        let sequencer = ProposalSequencer::new(
            RetryingChain::new(chain, config.retry.policy()),
            Arc::new(signer),
            Arc::new(store),
            config.runner.max_nonce_attempts,
        );
        pipeline = pipeline.with_sequencer(Arc::new(sequencer));
    }

    let runner = Runner::new(Arc::new(pipeline), config.runner.max_concurrency);
    let summary = runner.run_checked(networks).await?;
    println!("{summary}");

    Ok(if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
