//! Effect traits for the collaborators the engine consumes
//!
//! The engine never talks to an RPC endpoint, a key, or a database directly.
//! It is parameterized by these traits; `dsync-effects` provides production
//! handlers and `dsync-testkit` a deterministic simulator.

use std::fmt;

use alloy_primitives::{Address, Bytes, B256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{ChainError, StoreError};
use crate::proposal::ProposalRecord;
use crate::types::NetworkId;

/// ABI-encoded contract call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSpec {
    /// Solidity signature, for logs
    pub signature: &'static str,
    /// Selector followed by the encoded arguments
    pub calldata: Bytes,
}

impl CallSpec {
    /// Encode a `sol!` generated call
    pub fn encode<C: SolCall>(call: &C) -> Self {
        Self {
            signature: C::SIGNATURE,
            calldata: Bytes::from(call.abi_encode()),
        }
    }
}

/// Name of the key material a writer signs with.
///
/// Only the reference travels through the engine; the handler resolves it
/// (for example an environment variable name).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyRef(String);

impl KeyRef {
    /// Reference a key by name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Name of the key
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for KeyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyRef({})", self.0)
    }
}

/// Mined transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    /// Transaction hash
    pub tx_hash: B256,
    /// Block the transaction was included in, when known
    pub block_number: Option<u64>,
}

/// Chain reader/writer, one implementation per chain family
#[async_trait]
pub trait ChainEffects: Send + Sync {
    /// Execute a view call and return the raw return data
    async fn read(
        &self,
        network: &NetworkId,
        contract: Address,
        call: &CallSpec,
    ) -> Result<Bytes, ChainError>;

    /// Sign and submit a state-changing call, waiting for inclusion.
    ///
    /// A mined but reverted transaction is reported as [`ChainError::Reverted`].
    async fn write(
        &self,
        network: &NetworkId,
        contract: Address,
        call: &CallSpec,
        key: &KeyRef,
    ) -> Result<TxReceipt, ChainError>;

    /// Deployed bytecode at `address`; empty when no contract lives there
    async fn code_at(&self, network: &NetworkId, address: Address) -> Result<Bytes, ChainError>;
}

/// Signing identity used for authority proposals
#[async_trait]
pub trait SignerEffects: Send + Sync {
    /// Address of the signing key
    fn address(&self) -> Address;

    /// Sign a 32-byte digest without further hashing
    async fn sign_hash(&self, hash: B256) -> Result<Bytes, ChainError>;
}

/// Result of a unique insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The record was persisted
    Inserted,
    /// Another record already holds `(authority, network, nonce)`
    NonceTaken {
        /// Content hash of the record holding the nonce
        holder: B256,
    },
}

/// Shared coordination store for proposals.
///
/// `insert_if_absent` must be atomic with respect to every other writer,
/// including other processes: it is the compare-and-swap that keeps two
/// proposers from persisting the same nonce.
#[async_trait]
pub trait ProposalStore: Send + Sync {
    /// Insert `record` unless its `(authority, network, nonce)` is taken
    async fn insert_if_absent(&self, record: &ProposalRecord) -> Result<InsertOutcome, StoreError>;

    /// Highest nonce among pending records of the authority
    async fn highest_pending_nonce(
        &self,
        authority: Address,
        network: &NetworkId,
    ) -> Result<Option<u64>, StoreError>;

    /// Pending record with the given content hash; the highest nonce wins
    /// when several match
    async fn find_pending_by_hash(
        &self,
        authority: Address,
        network: &NetworkId,
        hash: B256,
    ) -> Result<Option<ProposalRecord>, StoreError>;

    /// All records, optionally restricted to one network, ordered by nonce
    async fn list(&self, network: Option<&NetworkId>) -> Result<Vec<ProposalRecord>, StoreError>;
}
