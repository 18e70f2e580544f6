//! Per-network synchronization pipeline
//!
//! `route -> load desired -> fetch actual -> diff -> filter -> plan ->
//! execute (direct writes or proposals) -> verify`
//!
//! A pipeline never panics on bad input and never aborts its siblings: every
//! failure ends up in the network's [`NetworkOutcome`].

use std::sync::Arc;

use dsync_core::{
    BatchKind, ChainEffects, Diff, Environment, KeyRef, NetworkConfig, NetworkId, NetworkState, SyncConfig,
    SyncError, SyncResult, SyncTarget,
};

use crate::client::RetryingChain;
use crate::diff::diff;
use crate::fetcher::StateFetcher;
use crate::filter::{FilterOptions, SafetyFilter};
use crate::loader::WhitelistDocument;
use crate::planner::{plan, Plan};
use crate::registry::encode_batch;
use crate::router::{route, ExecutionMode, Route, RouteOptions};
use crate::sequencer::{ProposalRequest, ProposalSequencer};
use crate::summary::NetworkOutcome;
use crate::verifier::{verify, Convergence};

/// Run-wide switches, usually straight from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Registry being synchronized
    pub target: SyncTarget,
    /// Deployment environment
    pub environment: Environment,
    /// Write directly in production (bootstrap)
    pub bypass_authority: bool,
    /// Keep token-like contracts instead of failing the network
    pub allow_token_contracts: bool,
    /// Compute and report the plan without writing or proposing
    pub dry_run: bool,
}

impl PipelineOptions {
    /// Options for `target` in `environment` with every switch off
    pub fn new(target: SyncTarget, environment: Environment) -> Self {
        Self {
            target,
            environment,
            bypass_authority: false,
            allow_token_contracts: false,
            dry_run: false,
        }
    }
}

/// Shared, immutable pipeline; one [`NetworkPipeline::run`] per network
pub struct NetworkPipeline {
    config: Arc<SyncConfig>,
    document: Arc<WhitelistDocument>,
    chain: RetryingChain,
    fetcher: StateFetcher,
    filter: SafetyFilter,
    sequencer: Option<Arc<ProposalSequencer>>,
    key: KeyRef,
    options: PipelineOptions,
}

impl NetworkPipeline {
    /// Build a pipeline reading and writing through `chain`
    pub fn new(
        config: Arc<SyncConfig>,
        document: Arc<WhitelistDocument>,
        chain: Arc<dyn ChainEffects>,
        options: PipelineOptions,
    ) -> Self {
        let chain = RetryingChain::new(chain, config.retry.policy());
        let filter = SafetyFilter::new(
            chain.clone(),
            FilterOptions {
                probe_tokens: config.runner.probe_tokens,
                allow_token_contracts: options.allow_token_contracts,
            },
        );
        let key = KeyRef::new(config.signer.key_env.as_str());
        Self {
            fetcher: StateFetcher::new(chain.clone()),
            filter,
            chain,
            config,
            document,
            sequencer: None,
            key,
            options,
        }
    }

    /// Enable proposal mode through `sequencer`
    pub fn with_sequencer(mut self, sequencer: Arc<ProposalSequencer>) -> Self {
        self.sequencer = Some(sequencer);
        self
    }

    /// Chain client shared by every stage
    pub fn chain(&self) -> &RetryingChain {
        &self.chain
    }

    /// Run options
    pub fn options(&self) -> PipelineOptions {
        self.options
    }

    /// Check the configuration of every network before any of them runs.
    ///
    /// Covers the network lookup, routing, every whitelist entry and, in
    /// proposal mode, the proposal signer. The first problem is returned.
    pub fn preflight(&self, networks: &[NetworkId]) -> SyncResult<()> {
        for network in networks {
            let config = self.config.network(network)?;
            let route = route(network, config, self.options.target, self.route_options())?;
            self.document.desired_state(network, self.options.target)?;
            if matches!(route.mode, ExecutionMode::Proposal(_)) && !self.options.dry_run && self.sequencer.is_none() {
                return Err(no_signer(network));
            }
        }
        tracing::debug!(networks = networks.len(), "configuration checked");
        Ok(())
    }

    fn route_options(&self) -> RouteOptions {
        RouteOptions {
            environment: self.options.environment,
            bypass_authority: self.options.bypass_authority,
        }
    }

    /// Synchronize one network; failures are recorded, never returned
    pub async fn run(&self, network: NetworkId) -> NetworkOutcome {
        let mut outcome = NetworkOutcome::new(network.clone());
        outcome.dry_run = self.options.dry_run;
        if let Err(err) = self.execute(&network, &mut outcome).await {
            tracing::error!(network = %network, kind = err.kind(), error = %err, "network failed");
            outcome.failures.push(err);
        }
        outcome
    }

    async fn execute(&self, network: &NetworkId, outcome: &mut NetworkOutcome) -> SyncResult<()> {
        let config = self.config.network(network)?;
        let route = route(network, config, self.options.target, self.route_options())?;

        let desired = self.document.desired_state(network, self.options.target)?;
        let actual = self
            .fetcher
            .fetch(network, route.registry, route.interface, self.options.target)
            .await?;

        let initial = diff(&desired, &actual);
        if initial.is_empty() {
            tracing::info!(network = %network, entries = desired.len(), "already in sync");
            outcome.convergence = Some(Convergence::FullyConverged);
            return Ok(());
        }
        tracing::info!(
            network = %network,
            to_add = initial.to_add.len(),
            to_remove = initial.to_remove.len(),
            "registry out of sync"
        );

        let filtered = self.filter.apply(network, initial.clone()).await?;
        outcome.dropped = filtered.dropped_entries(&initial);
        let plan = plan(&filtered.diff, self.config.runner.batch_size)?;

        if self.options.dry_run {
            for batch in &plan.batches {
                tracing::info!(
                    network = %network,
                    batch = batch.index,
                    kind = %batch.kind,
                    entries = batch.entries.len(),
                    "planned batch"
                );
            }
            outcome.added = plan.additions();
            outcome.removed = plan.removals();
            return Ok(());
        }

        match &route.mode {
            ExecutionMode::Direct => {
                self.write_direct(network, &route, &plan, outcome).await?;
                outcome.convergence = Some(self.verify(network, &route, &desired, &initial).await?);
            }
            ExecutionMode::Proposal(_) => {
                self.propose(network, config, &route, &plan, outcome).await?;
                outcome.convergence = Some(Convergence::Skipped);
            }
        }
        Ok(())
    }

    /// Execute batches in plan order, stopping at the first failure
    async fn write_direct(
        &self,
        network: &NetworkId,
        route: &Route,
        plan: &Plan,
        outcome: &mut NetworkOutcome,
    ) -> SyncResult<()> {
        for batch in &plan.batches {
            let call = encode_batch(route.interface, batch)?;
            let receipt = self
                .chain
                .write(network, route.registry, &call, &self.key)
                .await
                .map_err(|source| SyncError::Write {
                    network: network.clone(),
                    call: call.signature.to_string(),
                    source,
                })?;
            tracing::info!(
                network = %network,
                batch = batch.index,
                kind = %batch.kind,
                entries = batch.entries.len(),
                tx = %receipt.tx_hash,
                "batch written"
            );
            record(outcome, batch.kind, batch.entries.len());
        }
        Ok(())
    }

    async fn propose(
        &self,
        network: &NetworkId,
        config: &NetworkConfig,
        route: &Route,
        plan: &Plan,
        outcome: &mut NetworkOutcome,
    ) -> SyncResult<()> {
        let ExecutionMode::Proposal(authority) = &route.mode else {
            return Ok(());
        };
        let sequencer = self.sequencer.as_ref().ok_or_else(|| no_signer(network))?;

        for batch in &plan.batches {
            let call = encode_batch(route.interface, batch)?;
            let proposal = sequencer
                .propose(ProposalRequest {
                    network,
                    chain_id: config.chain_id,
                    registry: route.registry,
                    authority,
                    call,
                })
                .await?;
            tracing::info!(
                network = %network,
                batch = batch.index,
                kind = %batch.kind,
                entries = batch.entries.len(),
                %proposal,
                "batch proposed"
            );
            record(outcome, batch.kind, batch.entries.len());
            outcome.proposals.push(proposal);
        }
        Ok(())
    }

    async fn verify(
        &self,
        network: &NetworkId,
        route: &Route,
        desired: &NetworkState,
        before: &Diff,
    ) -> SyncResult<Convergence> {
        let after = self
            .fetcher
            .fetch(network, route.registry, route.interface, self.options.target)
            .await?;
        let convergence = verify(desired, &after, before);
        if convergence.is_converged() {
            tracing::info!(network = %network, "converged");
        } else {
            tracing::warn!(network = %network, %convergence, "registry did not fully converge");
        }
        Ok(convergence)
    }
}

fn no_signer(network: &NetworkId) -> SyncError {
    SyncError::config(format!("`{network}` routes to proposals but no proposal signer is configured"))
}

fn record(outcome: &mut NetworkOutcome, kind: BatchKind, entries: usize) {
    match kind {
        BatchKind::Add => outcome.added += entries,
        BatchKind::Remove => outcome.removed += entries,
    }
}
