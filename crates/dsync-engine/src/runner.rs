//! Concurrency runner
//!
//! Runs one pipeline per network with at most `max_concurrency` in flight.
//! Networks never wait on each other beyond the semaphore, and a panicking
//! pipeline only fails its own network.

use std::collections::HashMap;
use std::sync::Arc;

use dsync_core::{NetworkId, SyncError, SyncResult};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::pipeline::NetworkPipeline;
use crate::summary::{NetworkOutcome, RunSummary};

/// Fans a pipeline out over networks
pub struct Runner {
    pipeline: Arc<NetworkPipeline>,
    max_concurrency: usize,
}

impl Runner {
    /// Create a runner with at most `max_concurrency` pipelines in flight
    pub fn new(pipeline: Arc<NetworkPipeline>, max_concurrency: usize) -> Self {
        Self {
            pipeline,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Check the configuration of every network, then run them.
    ///
    /// A configuration error aborts the run before any network is read or
    /// written.
    pub async fn run_checked(&self, networks: Vec<NetworkId>) -> SyncResult<RunSummary> {
        self.pipeline.preflight(&networks)?;
        Ok(self.run(networks).await)
    }

    /// Run every network to completion and fold the outcomes
    pub async fn run(&self, networks: Vec<NetworkId>) -> RunSummary {
        let options = self.pipeline.options();
        tracing::info!(
            target = %options.target,
            environment = %options.environment,
            networks = networks.len(),
            max_concurrency = self.max_concurrency,
            dry_run = options.dry_run,
            "starting run"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = JoinSet::new();
        let mut spawned = HashMap::with_capacity(networks.len());

        for network in networks {
            let pipeline = Arc::clone(&self.pipeline);
            let semaphore = Arc::clone(&semaphore);
            let span = tracing::info_span!("network", network = %network);
            let task_network = network.clone();
            let handle = tasks.spawn(
                async move {
                    // the semaphore is never closed, so acquiring cannot fail
                    let _permit = semaphore.acquire_owned().await.ok();
                    pipeline.run(task_network).await
                }
                .instrument(span),
            );
            spawned.insert(handle.id(), network);
        }

        let mut outcomes = Vec::with_capacity(spawned.len());
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((_, outcome)) => outcomes.push(outcome),
                Err(err) => {
                    let Some(network) = spawned.remove(&err.id()) else {
                        continue;
                    };
                    tracing::error!(network = %network, error = %err, "pipeline aborted");
                    let error = SyncError::Aborted {
                        network: network.clone(),
                        message: err.to_string(),
                    };
                    outcomes.push(NetworkOutcome::failed(network, error));
                }
            }
        }

        RunSummary::new(options.environment, options.target, outcomes)
    }
}
