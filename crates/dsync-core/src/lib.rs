//! dsync-core: foundation types for diamond registry synchronization
//!
//! Provides the pieces every other crate in the workspace builds on:
//! - **Data model** ([`types`]): trust entries, network snapshots, diffs, batches
//! - **Errors** ([`errors`]): chain, store and pipeline error taxonomy
//! - **Effects** ([`effects`]): traits for the chain reader/writer, the signer
//!   and the shared proposal store
//! - **Retry** ([`retry`]): the single retry/backoff utility used at every
//!   external-call boundary
//! - **Configuration** ([`config`]): the `dsync.toml` schema
//! - **Proposals** ([`proposal`]): persisted multisig proposal records
//! - **ABI** ([`abi`]): `sol!` interfaces of the diamond, Safe, timelock and token probe

#![forbid(unsafe_code)]

pub mod abi;
pub mod config;
pub mod effects;
pub mod errors;
pub mod proposal;
pub mod retry;
pub mod types;

pub use config::{AuthorityConfig, NetworkConfig, RunnerConfig, SyncConfig};
pub use effects::{CallSpec, ChainEffects, InsertOutcome, KeyRef, ProposalStore, SignerEffects, TxReceipt};
pub use errors::{ChainError, StoreError, SyncError, SyncResult};
pub use proposal::{ProposalRecord, ProposalStatus, SafeOperation};
pub use retry::{BackoffStrategy, Classify, ErrorClass, RetryPolicy, TimeoutError};
pub use types::{
    Batch, BatchKind, Diff, Environment, NetworkId, NetworkState, RegistryInterface, SyncTarget,
    TrustEntry, TrustedFunction, APPROVE_ONLY_SELECTOR,
};

// Primitive types used throughout the public API
pub use alloy_primitives::{Address, Bytes, Selector, B256};
