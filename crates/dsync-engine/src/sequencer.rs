//! Proposal sequencer
//!
//! Turns a registry write into a signed Safe transaction persisted in the
//! [`ProposalStore`]. The sequencer is the only writer of proposal records:
//!
//! 1. wrap the write in a timelock `schedule(...)` when one is configured,
//!    with the first salt whose operation id the timelock has not seen
//! 2. hash the content (target, operation, payload), independent of nonce
//! 3. allocate `max(onchain_nonce, highest_pending + 1)`
//! 4. stop if an identical proposal is already pending
//! 5. sign the EIP-712 Safe transaction hash and insert it unless the nonce
//!    was taken in the meantime
//!
//! Steps 3 to 5 hold a per-(authority, network) lock, so proposers sharing
//! one sequencer never race each other. Proposers in other processes are
//! caught by the store's unique insert and retried from step 3.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_sol_types::{eip712_domain, SolCall, SolStruct};
use chrono::Utc;
use dsync_core::abi::{ISafe, ITimelockController, SafeTx};
use dsync_core::{
    AuthorityConfig, CallSpec, ChainError, InsertOutcome, NetworkId, ProposalRecord, ProposalStatus,
    ProposalStore, RetryPolicy, SafeOperation, SignerEffects, SyncError, SyncResult,
};
use parking_lot::Mutex;

use crate::client::RetryingChain;
use crate::registry::u256_to_u64;

/// One write to propose
#[derive(Debug, Clone)]
pub struct ProposalRequest<'a> {
    /// Network of the authority
    pub network: &'a NetworkId,
    /// EIP-155 chain id, part of the Safe signing domain
    pub chain_id: u64,
    /// Diamond receiving the registry write
    pub registry: Address,
    /// Authority approving the write
    pub authority: &'a AuthorityConfig,
    /// Registry write
    pub call: CallSpec,
}

/// What the sequencer did with a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalOutcome {
    /// A new record was persisted
    Proposed {
        /// Nonce reserved for the proposal
        nonce: u64,
        /// Content hash of the proposal
        hash: B256,
    },
    /// An identical proposal is already pending
    AlreadyProposed {
        /// Nonce of the pending proposal
        nonce: u64,
        /// Content hash of the proposal
        hash: B256,
    },
}

impl ProposalOutcome {
    /// Nonce the proposal occupies
    pub fn nonce(&self) -> u64 {
        match self {
            Self::Proposed { nonce, .. } | Self::AlreadyProposed { nonce, .. } => *nonce,
        }
    }
}

impl fmt::Display for ProposalOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Proposed { nonce, .. } => write!(f, "proposed at nonce {nonce}"),
            Self::AlreadyProposed { nonce, .. } => write!(f, "already pending at nonce {nonce}"),
        }
    }
}

/// Safe transaction before a nonce is attached
#[derive(Debug, Clone, PartialEq, Eq)]
struct Transaction {
    to: Address,
    operation: SafeOperation,
    payload: Bytes,
}

/// Content hash of a Safe transaction: keccak256(to ‖ operation ‖ payload)
pub fn content_hash(to: Address, operation: SafeOperation, payload: &[u8]) -> B256 {
    let mut preimage = Vec::with_capacity(20 + 1 + payload.len());
    preimage.extend_from_slice(to.as_slice());
    preimage.push(operation.as_u8());
    preimage.extend_from_slice(payload);
    keccak256(preimage)
}

/// EIP-712 hash a Safe owner signs to approve a transaction
pub fn safe_tx_hash(
    chain_id: u64,
    safe: Address,
    to: Address,
    operation: SafeOperation,
    payload: &Bytes,
    nonce: u64,
) -> B256 {
    let tx = SafeTx {
        to,
        value: U256::ZERO,
        data: payload.clone(),
        operation: operation.as_u8(),
        safeTxGas: U256::ZERO,
        baseGas: U256::ZERO,
        gasPrice: U256::ZERO,
        gasToken: Address::ZERO,
        refundReceiver: Address::ZERO,
        nonce: U256::from(nonce),
    };
    let domain = eip712_domain! {
        chain_id: chain_id,
        verifying_contract: safe,
    };
    tx.eip712_signing_hash(&domain)
}

/// Salt candidates tried before giving up on a timelock operation
const MAX_SALT_GENERATIONS: u64 = 32;

/// Timelock salt for `inner`.
///
/// Generation 0 is the hash of the inner calldata, so identical writes
/// produce identical proposals. Later generations exist because a timelock
/// never accepts an operation id twice: re-adding an entry with the same
/// content needs a fresh id.
pub fn timelock_salt(inner: &Bytes, generation: u64) -> B256 {
    if generation == 0 {
        return keccak256(inner);
    }
    let mut preimage = inner.to_vec();
    preimage.extend_from_slice(&generation.to_be_bytes());
    keccak256(preimage)
}

/// Operation id the timelock derives for a call to `target`
pub fn operation_id(target: Address, inner: &Bytes, salt: B256) -> B256 {
    let call = ITimelockController::hashOperationCall {
        target,
        value: U256::ZERO,
        data: inner.clone(),
        predecessor: B256::ZERO,
        salt,
    };
    // abi.encode(target, value, data, predecessor, salt) is the call
    // encoding without its selector
    keccak256(&call.abi_encode()[4..])
}

/// Timelock `schedule` call wrapping `inner`
pub fn schedule_call(target: Address, inner: &Bytes, salt: B256, delay: U256) -> CallSpec {
    CallSpec::encode(&ITimelockController::scheduleCall {
        target,
        value: U256::ZERO,
        data: inner.clone(),
        predecessor: B256::ZERO,
        salt,
        delay,
    })
}

type LockKey = (Address, NetworkId);

/// Serializes proposal creation per (authority, network)
pub struct ProposalSequencer {
    chain: RetryingChain,
    signer: Arc<dyn SignerEffects>,
    store: Arc<dyn ProposalStore>,
    retry: RetryPolicy,
    max_nonce_attempts: u32,
    locks: Mutex<HashMap<LockKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl ProposalSequencer {
    /// Create a sequencer; `max_nonce_attempts` bounds retries after a
    /// concurrent proposer took the allocated nonce
    pub fn new(
        chain: RetryingChain,
        signer: Arc<dyn SignerEffects>,
        store: Arc<dyn ProposalStore>,
        max_nonce_attempts: u32,
    ) -> Self {
        let retry = chain.policy().clone();
        Self {
            chain,
            signer,
            store,
            retry,
            max_nonce_attempts: max_nonce_attempts.max(1),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Address proposals are signed with
    pub fn proposer(&self) -> Address {
        self.signer.address()
    }

    fn lock_for(&self, authority: Address, network: &NetworkId) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry((authority, network.clone()))
            .or_default()
            .clone()
    }

    /// Fail unless the signer is an owner of `authority`
    pub async fn ensure_owner(&self, network: &NetworkId, authority: Address) -> SyncResult<()> {
        let signer = self.signer.address();
        let is_owner = self
            .chain
            .call(network, authority, &ISafe::isOwnerCall { owner: signer })
            .await
            .map_err(|e| SyncError::chain(network, e))?
            ._0;
        if is_owner {
            Ok(())
        } else {
            Err(SyncError::SignerNotAuthorized { signer, authority })
        }
    }

    /// Propose `request.call` to the authority
    pub async fn propose(&self, request: ProposalRequest<'_>) -> SyncResult<ProposalOutcome> {
        let network = request.network;
        let safe = request.authority.safe;
        let tx = self.prepare(&request).await?;
        let hash = content_hash(tx.to, tx.operation, &tx.payload);

        self.ensure_owner(network, safe).await?;

        let lock = self.lock_for(safe, network);
        let _guard = lock.lock().await;

        let mut nonce = 0;
        for attempt in 1..=self.max_nonce_attempts {
            let onchain = self.onchain_nonce(network, safe).await?;
            nonce = self.next_nonce(network, safe, onchain).await?;

            if let Some(existing) = self.pending_with_hash(network, safe, hash).await? {
                if existing.nonce >= onchain {
                    tracing::info!(
                        network = %network,
                        authority = %safe,
                        nonce = existing.nonce,
                        %hash,
                        "identical proposal already pending"
                    );
                    return Ok(ProposalOutcome::AlreadyProposed {
                        nonce: existing.nonce,
                        hash,
                    });
                }
                tracing::warn!(
                    network = %network,
                    authority = %safe,
                    nonce = existing.nonce,
                    onchain,
                    "pending proposal's nonce was consumed on-chain, proposing again"
                );
            }

            let record = self.sign(&request, &tx, hash, nonce).await?;
            let outcome = self
                .retry
                .run("store.insert_if_absent", || self.store.insert_if_absent(&record))
                .await?;
            match outcome {
                InsertOutcome::Inserted => {
                    tracing::info!(
                        network = %network,
                        authority = %safe,
                        nonce,
                        %hash,
                        safe_tx_hash = %record.safe_tx_hash,
                        "proposal persisted"
                    );
                    return Ok(ProposalOutcome::Proposed { nonce, hash });
                }
                InsertOutcome::NonceTaken { holder } if holder == hash => {
                    return Ok(ProposalOutcome::AlreadyProposed { nonce, hash });
                }
                InsertOutcome::NonceTaken { holder } => {
                    tracing::warn!(
                        network = %network,
                        authority = %safe,
                        nonce,
                        %holder,
                        attempt,
                        "nonce taken by a concurrent proposer, reallocating"
                    );
                }
            }
        }

        Err(SyncError::NonceRaceLost {
            authority: safe,
            network: network.clone(),
            nonce,
        })
    }

    async fn prepare(&self, request: &ProposalRequest<'_>) -> SyncResult<Transaction> {
        let Some(timelock) = request.authority.timelock else {
            return Ok(Transaction {
                to: request.registry,
                operation: SafeOperation::Call,
                payload: request.call.calldata.clone(),
            });
        };
        let delay = self
            .chain
            .call(request.network, timelock, &ITimelockController::getMinDelayCall {})
            .await
            .map_err(|e| SyncError::chain(request.network, e))?
            ._0;
        let salt = self
            .unused_salt(request.network, timelock, request.registry, &request.call.calldata)
            .await?;
        let schedule = schedule_call(request.registry, &request.call.calldata, salt, delay);
        tracing::debug!(
            network = %request.network,
            %timelock,
            %delay,
            %salt,
            inner = request.call.signature,
            "wrapping write in timelock schedule"
        );
        Ok(Transaction {
            to: timelock,
            operation: SafeOperation::Call,
            payload: schedule.calldata,
        })
    }

    /// First salt generation whose operation id was never scheduled
    async fn unused_salt(
        &self,
        network: &NetworkId,
        timelock: Address,
        target: Address,
        inner: &Bytes,
    ) -> SyncResult<B256> {
        for generation in 0..MAX_SALT_GENERATIONS {
            let salt = timelock_salt(inner, generation);
            let id = operation_id(target, inner, salt);
            let timestamp = self
                .chain
                .call(network, timelock, &ITimelockController::getTimestampCall { id })
                .await
                .map_err(|e| SyncError::chain(network, e))?
                ._0;
            if timestamp.is_zero() {
                return Ok(salt);
            }
            tracing::debug!(network = %network, %timelock, %id, generation, "timelock operation already known");
        }
        Err(SyncError::chain(
            network,
            ChainError::reverted(format!(
                "timelock {timelock} already knows {MAX_SALT_GENERATIONS} operations for this call"
            )),
        ))
    }

    async fn onchain_nonce(&self, network: &NetworkId, safe: Address) -> SyncResult<u64> {
        let nonce = self
            .chain
            .call(network, safe, &ISafe::nonceCall {})
            .await
            .map_err(|e| SyncError::chain(network, e))?
            ._0;
        u256_to_u64(nonce, "safe nonce").map_err(|e| SyncError::chain(network, e))
    }

    async fn next_nonce(&self, network: &NetworkId, safe: Address, onchain: u64) -> SyncResult<u64> {
        let pending = self
            .retry
            .run("store.highest_pending_nonce", || {
                self.store.highest_pending_nonce(safe, network)
            })
            .await?;
        Ok(match pending {
            Some(highest) => onchain.max(highest.saturating_add(1)),
            None => onchain,
        })
    }

    async fn pending_with_hash(
        &self,
        network: &NetworkId,
        safe: Address,
        hash: B256,
    ) -> SyncResult<Option<ProposalRecord>> {
        Ok(self
            .retry
            .run("store.find_pending_by_hash", || {
                self.store.find_pending_by_hash(safe, network, hash)
            })
            .await?)
    }

    async fn sign(
        &self,
        request: &ProposalRequest<'_>,
        tx: &Transaction,
        hash: B256,
        nonce: u64,
    ) -> SyncResult<ProposalRecord> {
        let safe = request.authority.safe;
        let safe_tx_hash = safe_tx_hash(request.chain_id, safe, tx.to, tx.operation, &tx.payload, nonce);
        let signature = self
            .retry
            .run("sign_hash", || self.signer.sign_hash(safe_tx_hash))
            .await
            .map_err(|e| SyncError::chain(request.network, e))?;
        Ok(ProposalRecord {
            authority: safe,
            network: request.network.clone(),
            nonce,
            to: tx.to,
            operation: tx.operation,
            payload: tx.payload.clone(),
            safe_tx_hash,
            signature,
            hash,
            proposer: self.signer.address(),
            created_at: Utc::now(),
            status: ProposalStatus::Pending,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_covers_target_operation_and_payload() {
        let to = Address::repeat_byte(0xd1);
        let payload = [0x11u8, 0x22, 0x33];
        let base = content_hash(to, SafeOperation::Call, &payload);
        assert_eq!(base, content_hash(to, SafeOperation::Call, &payload));
        assert_ne!(base, content_hash(Address::repeat_byte(0xd2), SafeOperation::Call, &payload));
        assert_ne!(base, content_hash(to, SafeOperation::DelegateCall, &payload));
        assert_ne!(base, content_hash(to, SafeOperation::Call, &payload[..2]));
    }

    #[test]
    fn test_safe_tx_hash_binds_nonce_and_chain() {
        let safe = Address::repeat_byte(0x5a);
        let to = Address::repeat_byte(0xd1);
        let payload = Bytes::from_static(&[1, 2, 3]);
        let base = safe_tx_hash(1, safe, to, SafeOperation::Call, &payload, 7);
        assert_ne!(base, safe_tx_hash(1, safe, to, SafeOperation::Call, &payload, 8));
        assert_ne!(base, safe_tx_hash(10, safe, to, SafeOperation::Call, &payload, 7));
        assert_ne!(base, safe_tx_hash(1, Address::repeat_byte(0x5b), to, SafeOperation::Call, &payload, 7));
    }

    #[test]
    fn test_schedule_call_carries_salt_and_delay() {
        let inner = Bytes::from_static(&[0xaa, 0xbb]);
        let target = Address::repeat_byte(0xd1);
        let salt = timelock_salt(&inner, 0);
        let spec = schedule_call(target, &inner, salt, U256::from(3600));
        let decoded = ITimelockController::scheduleCall::abi_decode(&spec.calldata, true).unwrap();
        assert_eq!(decoded.target, target);
        assert_eq!(decoded.data, inner);
        assert_eq!(decoded.salt, keccak256(&inner));
        assert_eq!(decoded.predecessor, B256::ZERO);
        assert_eq!(decoded.delay, U256::from(3600));
    }

    #[test]
    fn test_salt_generations_give_distinct_operation_ids() {
        let inner = Bytes::from_static(&[0xaa, 0xbb]);
        let target = Address::repeat_byte(0xd1);
        let first = timelock_salt(&inner, 0);
        let second = timelock_salt(&inner, 1);
        assert_eq!(first, keccak256(&inner));
        assert_ne!(first, second);
        assert_eq!(second, timelock_salt(&inner, 1));
        assert_ne!(operation_id(target, &inner, first), operation_id(target, &inner, second));
        assert_ne!(
            operation_id(target, &inner, first),
            operation_id(Address::repeat_byte(0xd2), &inner, first)
        );
    }

    #[test]
    fn test_operation_id_matches_abi_encoded_tuple() {
        use alloy_sol_types::SolValue;

        let inner = Bytes::from_static(&[0x01, 0x02, 0x03]);
        let target = Address::repeat_byte(0xd1);
        let salt = B256::repeat_byte(0x42);
        let encoded = (target, U256::ZERO, inner.clone(), B256::ZERO, salt).abi_encode_params();
        assert_eq!(operation_id(target, &inner, salt), keccak256(encoded));
    }
}
