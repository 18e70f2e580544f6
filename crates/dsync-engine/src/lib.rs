//! dsync-engine: the registry synchronization pipeline
//!
//! For every selected network the engine:
//! 1. routes the network once ([`router`]): direct writes or multisig
//!    proposals, granular or legacy registry encoding
//! 2. loads the desired state from the whitelist artifact ([`loader`])
//! 3. reads the actual state from the diamond ([`fetcher`])
//! 4. diffs the two ([`diff`]) and filters unsafe additions ([`filter`])
//! 5. splits the diff into bounded batches ([`planner`])
//! 6. writes each batch or hands it to the [`sequencer`]
//! 7. re-reads the registry to check convergence ([`verifier`])
//!
//! The [`runner`] fans pipelines out over networks with bounded concurrency
//! and folds their outcomes into a [`summary::RunSummary`].
//!
//! All chain access goes through [`client::RetryingChain`], so the configured
//! retry policy applies at every call site.

#![forbid(unsafe_code)]

pub mod client;
pub mod diff;
pub mod fetcher;
pub mod filter;
pub mod loader;
pub mod pipeline;
pub mod planner;
pub mod registry;
pub mod router;
pub mod runner;
pub mod sequencer;
pub mod summary;
pub mod verifier;

pub use client::{RawReturn, RetryingChain};
pub use diff::diff;
pub use fetcher::StateFetcher;
pub use filter::{FilterOptions, Filtered, SafetyFilter};
pub use loader::WhitelistDocument;
pub use pipeline::{NetworkPipeline, PipelineOptions};
pub use planner::{plan, Plan};
pub use router::{route, ExecutionMode, Route, RouteOptions};
pub use runner::Runner;
pub use sequencer::{ProposalOutcome, ProposalRequest, ProposalSequencer};
pub use summary::{NetworkOutcome, RunSummary};
pub use verifier::{verify, Convergence};
