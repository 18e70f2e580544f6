//! Persisted multisig proposals

use alloy_primitives::{Address, Bytes, B256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::NetworkId;

/// Lifecycle of a proposal.
///
/// This crate only ever writes `Pending`; an out-of-band approval process
/// flips records to `Executed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    /// Awaiting further approvals
    Pending,
    /// Executed by the authority
    Executed,
}

/// Safe transaction operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafeOperation {
    /// Regular call
    Call,
    /// Delegate call
    DelegateCall,
}

impl SafeOperation {
    /// Numeric value used in the Safe transaction hash
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Call => 0,
            Self::DelegateCall => 1,
        }
    }
}

/// A signed, not yet executed authority transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalRecord {
    /// Multisig that must approve the transaction
    pub authority: Address,
    /// Network of the multisig
    pub network: NetworkId,
    /// Multisig nonce reserved for this transaction
    pub nonce: u64,
    /// Call target (the diamond, or the timelock when one is interposed)
    pub to: Address,
    /// Safe operation
    pub operation: SafeOperation,
    /// Calldata executed against `to`
    pub payload: Bytes,
    /// EIP-712 Safe transaction hash that was signed
    pub safe_tx_hash: B256,
    /// Proposer signature over `safe_tx_hash`
    pub signature: Bytes,
    /// Content hash; independent of the nonce so identical batches collide
    pub hash: B256,
    /// Signing address
    pub proposer: Address,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Lifecycle status
    pub status: ProposalStatus,
}

impl ProposalRecord {
    /// Whether the record still awaits execution
    pub fn is_pending(&self) -> bool {
        self.status == ProposalStatus::Pending
    }
}
