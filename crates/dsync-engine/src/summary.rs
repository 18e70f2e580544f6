//! Per-network outcomes and the run summary
//!
//! Each pipeline produces one [`NetworkOutcome`]. The runner folds them into
//! a [`RunSummary`] once every pipeline has finished; the summary alone
//! decides whether the run succeeded.

use std::fmt;

use dsync_core::{Environment, NetworkId, SyncError, SyncTarget};

use crate::sequencer::ProposalOutcome;
use crate::verifier::Convergence;

/// Result of one network pipeline
#[derive(Debug, Clone)]
pub struct NetworkOutcome {
    /// Network the pipeline ran for
    pub network: NetworkId,
    /// Entries granted (or, for proposals and dry runs, planned to be)
    pub added: usize,
    /// Entries revoked (or planned to be)
    pub removed: usize,
    /// Addition entries dropped because their contract has no bytecode
    pub dropped: usize,
    /// Proposals created or found pending
    pub proposals: Vec<ProposalOutcome>,
    /// Verification result; `None` when the pipeline stopped early or only
    /// planned
    pub convergence: Option<Convergence>,
    /// Errors that stopped the pipeline
    pub failures: Vec<SyncError>,
    /// Whether the pipeline only computed its plan
    pub dry_run: bool,
}

impl NetworkOutcome {
    /// Empty outcome for `network`
    pub fn new(network: NetworkId) -> Self {
        Self {
            network,
            added: 0,
            removed: 0,
            dropped: 0,
            proposals: Vec::new(),
            convergence: None,
            failures: Vec::new(),
            dry_run: false,
        }
    }

    /// Outcome of a pipeline that failed with `error`
    pub fn failed(network: NetworkId, error: SyncError) -> Self {
        let mut outcome = Self::new(network);
        outcome.failures.push(error);
        outcome
    }

    /// Whether the network reached its desired state, had every change
    /// persisted as a proposal, or was only planned.
    ///
    /// Dropped additions fail the network in every execution mode: the
    /// document names a contract that does not exist.
    pub fn succeeded(&self) -> bool {
        if !self.failures.is_empty() {
            return false;
        }
        if self.dropped > 0 && !self.dry_run {
            return false;
        }
        match self.convergence {
            Some(Convergence::FullyConverged | Convergence::Skipped) => true,
            Some(Convergence::PartiallyConverged { .. } | Convergence::NotConverged { .. }) => false,
            None => self.dry_run,
        }
    }

    /// Short description of why the network did not succeed
    pub fn reason(&self) -> Option<String> {
        if let Some(error) = self.failures.first() {
            return Some(format!("{}: {error}", error.kind()));
        }
        if self.dropped > 0 && !self.dry_run {
            return Some(format!("{} entries dropped, contract has no bytecode", self.dropped));
        }
        match self.convergence {
            Some(convergence @ (Convergence::PartiallyConverged { .. } | Convergence::NotConverged { .. })) => {
                Some(convergence.to_string())
            }
            _ => None,
        }
    }
}

impl fmt::Display for NetworkOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: +{} -{} dropped {}",
            self.network, self.added, self.removed, self.dropped
        )?;
        if !self.proposals.is_empty() {
            let nonces = self
                .proposals
                .iter()
                .map(|p| p.nonce().to_string())
                .collect::<Vec<_>>()
                .join(",");
            write!(f, ", proposals {} (nonces {nonces})", self.proposals.len())?;
        }
        if self.dry_run {
            write!(f, ", dry run")?;
        }
        if let Some(convergence) = self.convergence {
            write!(f, ", {convergence}")?;
        }
        for failure in &self.failures {
            write!(f, "\n    {}: {failure}", failure.kind())?;
        }
        Ok(())
    }
}

/// Outcomes of every network of a run
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Environment the run targeted
    pub environment: Environment,
    /// Registry that was synchronized
    pub target: SyncTarget,
    /// One outcome per network, ordered by network name
    pub outcomes: Vec<NetworkOutcome>,
}

impl RunSummary {
    /// Fold pipeline outcomes into a summary
    pub fn new(environment: Environment, target: SyncTarget, mut outcomes: Vec<NetworkOutcome>) -> Self {
        outcomes.sort_by(|a, b| a.network.cmp(&b.network));
        Self {
            environment,
            target,
            outcomes,
        }
    }

    /// Whether every network succeeded
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(NetworkOutcome::succeeded)
    }

    /// Networks that did not succeed
    pub fn failed(&self) -> impl Iterator<Item = &NetworkOutcome> {
        self.outcomes.iter().filter(|outcome| !outcome.succeeded())
    }

    /// Outcome of `network`, if it ran
    pub fn outcome(&self, network: &NetworkId) -> Option<&NetworkOutcome> {
        self.outcomes.iter().find(|outcome| &outcome.network == network)
    }

    /// Entries granted across all networks
    pub fn total_added(&self) -> usize {
        self.outcomes.iter().map(|o| o.added).sum()
    }

    /// Entries revoked across all networks
    pub fn total_removed(&self) -> usize {
        self.outcomes.iter().map(|o| o.removed).sum()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} sync ({}):", self.target, self.environment)?;
        for outcome in &self.outcomes {
            writeln!(f, "  {outcome}")?;
        }
        if self.is_success() {
            write!(f, "success: {} fully synced", self.environment)
        } else {
            write!(f, "failed networks:")?;
            for outcome in self.failed() {
                let reason = outcome.reason().unwrap_or_else(|| "unknown".to_string());
                write!(f, "\n  {}: {reason}", outcome.network)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn converged(name: &str) -> NetworkOutcome {
        let mut outcome = NetworkOutcome::new(NetworkId::new(name));
        outcome.added = 2;
        outcome.convergence = Some(Convergence::FullyConverged);
        outcome
    }

    #[test]
    fn test_all_converged_is_success() {
        let summary = RunSummary::new(
            Environment::Staging,
            SyncTarget::ContractSelectors,
            vec![converged("optimism"), converged("arbitrum")],
        );
        assert!(summary.is_success());
        assert_eq!(summary.outcomes[0].network.as_str(), "arbitrum");
        assert_eq!(summary.total_added(), 4);
        assert!(summary.to_string().ends_with("success: staging fully synced"));
    }

    #[test]
    fn test_one_failure_fails_the_run_but_keeps_the_others() {
        let failed = NetworkOutcome::failed(
            NetworkId::new("bsc"),
            SyncError::safety(&NetworkId::new("bsc"), "token-like contract"),
        );
        let summary = RunSummary::new(
            Environment::Production,
            SyncTarget::Addresses,
            vec![converged("mainnet"), failed],
        );
        assert!(!summary.is_success());
        let failed: Vec<_> = summary.failed().map(|o| o.network.as_str()).collect();
        assert_eq!(failed, vec!["bsc"]);
        assert!(summary.outcome(&NetworkId::new("mainnet")).unwrap().succeeded());
        let rendered = summary.to_string();
        assert!(rendered.contains("bsc: safety-violation"));
    }

    #[test]
    fn test_partial_convergence_is_not_success() {
        let mut outcome = converged("mainnet");
        outcome.convergence = Some(Convergence::PartiallyConverged { remaining: 1 });
        assert!(!outcome.succeeded());
        assert_eq!(outcome.reason().unwrap(), "partially converged (1 remaining)");
    }

    #[test]
    fn test_persisted_proposals_and_dry_runs_succeed() {
        let mut proposed = NetworkOutcome::new(NetworkId::new("mainnet"));
        proposed.convergence = Some(Convergence::Skipped);
        assert!(proposed.succeeded());

        let mut planned = NetworkOutcome::new(NetworkId::new("base"));
        planned.dry_run = true;
        assert!(planned.succeeded());
        assert!(!NetworkOutcome::new(NetworkId::new("gnosis")).succeeded());
    }

    #[test]
    fn test_dropped_entries_fail_proposal_runs() {
        let mut proposed = NetworkOutcome::new(NetworkId::new("mainnet"));
        proposed.convergence = Some(Convergence::Skipped);
        proposed.dropped = 1;
        assert!(!proposed.succeeded());
        assert_eq!(proposed.reason().unwrap(), "1 entries dropped, contract has no bytecode");

        proposed.dry_run = true;
        assert!(proposed.succeeded());
    }
}
