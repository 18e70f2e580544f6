//! Registry write encoding
//!
//! Turns a [`Batch`] into calldata for the registry interface chosen for the
//! network.

use alloy_primitives::{Address, Selector, U256};
use dsync_core::abi::{IDexManager, IWhitelistManager};
use dsync_core::{
    Batch, BatchKind, CallSpec, ChainError, RegistryInterface, SyncError, SyncResult, TrustedFunction,
};

/// Encode the write that applies `batch` through `interface`.
///
/// The legacy interface only knows addresses, so a batch holding a
/// selector-level entry cannot be expressed and is a configuration error.
pub fn encode_batch(interface: RegistryInterface, batch: &Batch) -> SyncResult<CallSpec> {
    match interface {
        RegistryInterface::Granular => {
            let (contracts, selectors): (Vec<Address>, Vec<Selector>) = batch
                .entries
                .iter()
                .map(|entry| (entry.contract, entry.function.to_wire()))
                .unzip();
            Ok(CallSpec::encode(
                &IWhitelistManager::batchSetContractSelectorWhitelistCall {
                    _contracts: contracts,
                    _selectors: selectors,
                    _whitelisted: batch.kind.whitelisted(),
                },
            ))
        }
        RegistryInterface::Legacy => {
            if let Some(entry) = batch
                .entries
                .iter()
                .find(|entry| entry.function != TrustedFunction::ApproveOnly)
            {
                return Err(SyncError::config(format!(
                    "legacy registry cannot trust individual selectors ({entry})"
                )));
            }
            let dexs = batch.contracts();
            Ok(match batch.kind {
                BatchKind::Add => CallSpec::encode(&IDexManager::batchAddDexCall { _dexs: dexs }),
                BatchKind::Remove => {
                    CallSpec::encode(&IDexManager::batchRemoveDexCall { _dexs: dexs })
                }
            })
        }
    }
}

/// Convert an on-chain `uint256` that must fit a `u64`
pub fn u256_to_u64(value: U256, what: &str) -> Result<u64, ChainError> {
    u64::try_from(value).map_err(|_| ChainError::decode(format!("{what} {value} does not fit in u64")))
}
