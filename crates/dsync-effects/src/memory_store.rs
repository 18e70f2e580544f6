//! In-process proposal store

use std::collections::BTreeMap;

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use dsync_core::{InsertOutcome, NetworkId, ProposalRecord, ProposalStatus, ProposalStore, StoreError};
use parking_lot::Mutex;

type Key = (NetworkId, Address, u64);

/// Proposal store held in memory; unique inserts are atomic within the
/// process
#[derive(Debug, Default)]
pub struct MemoryProposalStore {
    records: Mutex<BTreeMap<Key, ProposalRecord>>,
    unavailable: Mutex<usize>,
}

impl MemoryProposalStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` operations with [`StoreError::Unavailable`]
    pub fn fail_next(&self, count: usize) {
        *self.unavailable.lock() += count;
    }

    /// Change the status of a stored record
    pub fn set_status(&self, authority: Address, network: &NetworkId, nonce: u64, status: ProposalStatus) {
        if let Some(record) = self.records.lock().get_mut(&(network.clone(), authority, nonce)) {
            record.status = status;
        }
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        let mut remaining = self.unavailable.lock();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(StoreError::unavailable("store temporarily unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl ProposalStore for MemoryProposalStore {
    async fn insert_if_absent(&self, record: &ProposalRecord) -> Result<InsertOutcome, StoreError> {
        self.check_available()?;
        let mut records = self.records.lock();
        let key = (record.network.clone(), record.authority, record.nonce);
        if let Some(holder) = records.get(&key) {
            return Ok(InsertOutcome::NonceTaken { holder: holder.hash });
        }
        records.insert(key, record.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn highest_pending_nonce(
        &self,
        authority: Address,
        network: &NetworkId,
    ) -> Result<Option<u64>, StoreError> {
        self.check_available()?;
        Ok(self
            .records
            .lock()
            .values()
            .filter(|r| r.authority == authority && &r.network == network && r.is_pending())
            .map(|r| r.nonce)
            .max())
    }

    async fn find_pending_by_hash(
        &self,
        authority: Address,
        network: &NetworkId,
        hash: B256,
    ) -> Result<Option<ProposalRecord>, StoreError> {
        self.check_available()?;
        Ok(self
            .records
            .lock()
            .values()
            .filter(|r| r.authority == authority && &r.network == network && r.hash == hash && r.is_pending())
            .max_by_key(|r| r.nonce)
            .cloned())
    }

    async fn list(&self, network: Option<&NetworkId>) -> Result<Vec<ProposalRecord>, StoreError> {
        self.check_available()?;
        Ok(self
            .records
            .lock()
            .values()
            .filter(|r| network.map_or(true, |n| &r.network == n))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Bytes;
    use assert_matches::assert_matches;
    use chrono::Utc;
    use dsync_core::SafeOperation;

    fn record(nonce: u64, hash: u8) -> ProposalRecord {
        ProposalRecord {
            authority: Address::repeat_byte(0x5a),
            network: NetworkId::new("base"),
            nonce,
            to: Address::repeat_byte(0xd1),
            operation: SafeOperation::Call,
            payload: Bytes::new(),
            safe_tx_hash: B256::ZERO,
            signature: Bytes::from_static(&[1; 65]),
            hash: B256::repeat_byte(hash),
            proposer: Address::repeat_byte(0x01),
            created_at: Utc::now(),
            status: ProposalStatus::Pending,
        }
    }

    #[tokio::test]
    async fn test_unique_insert_and_queries() {
        let store = MemoryProposalStore::new();
        let authority = Address::repeat_byte(0x5a);
        let network = NetworkId::new("base");

        assert_eq!(store.insert_if_absent(&record(0, 0xaa)).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(
            store.insert_if_absent(&record(0, 0xbb)).await.unwrap(),
            InsertOutcome::NonceTaken {
                holder: B256::repeat_byte(0xaa)
            }
        );
        store.insert_if_absent(&record(3, 0xaa)).await.unwrap();
        assert_eq!(store.len(), 2);

        let found = store
            .find_pending_by_hash(authority, &network, B256::repeat_byte(0xaa))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.nonce, 3);

        store.set_status(authority, &network, 3, ProposalStatus::Executed);
        assert_eq!(store.highest_pending_nonce(authority, &network).await.unwrap(), Some(0));
        assert!(store.list(Some(&NetworkId::new("mainnet"))).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_injected_unavailability_is_consumed() {
        let store = MemoryProposalStore::new();
        store.fail_next(2);
        assert_matches!(store.list(None).await, Err(StoreError::Unavailable { .. }));
        assert_matches!(store.insert_if_absent(&record(0, 1)).await, Err(StoreError::Unavailable { .. }));
        assert!(store.list(None).await.unwrap().is_empty());
        assert!(store.is_empty());
    }
}
