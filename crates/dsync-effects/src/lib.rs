//! dsync-effects: production handlers for the dsync effect traits
//!
//! - [`cast::CastChain`] reads, writes and inspects contracts through Foundry's
//!   `cast` binary, with one RPC endpoint per network
//! - [`cast::CastSigner`] signs Safe transaction hashes with an operator key
//! - [`file_store::FileProposalStore`] persists multisig proposals under a
//!   directory shared by every proposer
//! - [`memory_store::MemoryProposalStore`] keeps proposals in process, for
//!   tests and single-process runs
//!
//! Handlers are stateless apart from their configuration and never retry on
//! their own; callers wrap them in the shared retry policy.

#![forbid(unsafe_code)]

pub mod cast;
pub mod file_store;
pub mod memory_store;

pub use cast::{classify_failure, CastChain, CastSigner};
pub use file_store::FileProposalStore;
pub use memory_store::MemoryProposalStore;
