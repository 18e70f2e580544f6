//! Actual-state fetcher
//!
//! Reads a diamond's registry into a [`NetworkState`]. Granular registries
//! are read through `getAllContractSelectorPairs()`; when that call is
//! unavailable or returns something unusable the fetcher walks
//! `getWhitelistedAddresses()` and asks for each address's selectors.
//! Legacy registries only expose `approvedDexs()`.
//!
//! A failed read is always an error. An empty state is never substituted,
//! since diffing against it would re-add every configured entry.

use alloy_primitives::{Address, Selector};
use dsync_core::abi::{IDexManager, IWhitelistManager};
use dsync_core::{
    CallSpec, ChainError, NetworkId, NetworkState, RegistryInterface, SyncError, SyncResult,
    SyncTarget, TrustEntry, TrustedFunction,
};
use futures::stream::{self, StreamExt, TryStreamExt};

use crate::client::{decode_return, RetryingChain};

/// Per-address selector reads in flight during the fallback walk
const FALLBACK_CONCURRENCY: usize = 4;

/// Reads registry contents of one diamond
#[derive(Clone)]
pub struct StateFetcher {
    chain: RetryingChain,
}

impl StateFetcher {
    /// Create a fetcher reading through `chain`
    pub fn new(chain: RetryingChain) -> Self {
        Self { chain }
    }

    /// Actual state of `registry` on `network`, as seen by `target`.
    ///
    /// The `addresses` target on a granular registry only sees approve-only
    /// pairs, leaving selector-level trust to `contract-selectors`.
    pub async fn fetch(
        &self,
        network: &NetworkId,
        registry: Address,
        interface: RegistryInterface,
        target: SyncTarget,
    ) -> SyncResult<NetworkState> {
        let entries = match interface {
            RegistryInterface::Granular => {
                let mut entries = self.fetch_granular(network, registry).await?;
                if target != SyncTarget::ContractSelectors {
                    entries.retain(|entry| entry.function == TrustedFunction::ApproveOnly);
                }
                entries
            }
            RegistryInterface::Legacy => self.fetch_legacy(network, registry).await?,
        };

        let state = NetworkState::new(network.clone(), entries);
        tracing::debug!(
            network = %network,
            %registry,
            %target,
            entries = state.len(),
            "fetched actual state"
        );
        Ok(state)
    }

    async fn fetch_granular(
        &self,
        network: &NetworkId,
        registry: Address,
    ) -> SyncResult<Vec<TrustEntry>> {
        let bulk = CallSpec::encode(&IWhitelistManager::getAllContractSelectorPairsCall {});
        match self.chain.read_raw(network, registry, &bulk).await {
            Ok(bytes) => match decode_pairs(&bytes) {
                Ok(entries) => return Ok(entries),
                Err(err) => {
                    tracing::warn!(network = %network, error = %err, "bulk pair read unusable, falling back");
                }
            },
            Err(err) => {
                tracing::warn!(network = %network, error = %err, "bulk pair read unavailable, falling back");
            }
        }
        self.fetch_per_address(network, registry)
            .await
            .map_err(|source| SyncError::Fetch {
                network: network.clone(),
                source,
            })
    }

    async fn fetch_per_address(
        &self,
        network: &NetworkId,
        registry: Address,
    ) -> Result<Vec<TrustEntry>, ChainError> {
        let addresses = self
            .chain
            .call(network, registry, &IWhitelistManager::getWhitelistedAddressesCall {})
            .await?
            ._0;

        let per_contract: Vec<Vec<TrustEntry>> = stream::iter(addresses)
            .map(|contract| async move {
                let call = IWhitelistManager::getWhitelistedSelectorsForContractCall { _contract: contract };
                let selectors = self.chain.call(network, registry, &call).await?._0;
                Ok::<_, ChainError>(entries_for(contract, selectors))
            })
            .buffered(FALLBACK_CONCURRENCY)
            .try_collect()
            .await?;

        Ok(per_contract.into_iter().flatten().collect())
    }

    async fn fetch_legacy(&self, network: &NetworkId, registry: Address) -> SyncResult<Vec<TrustEntry>> {
        let dexs = self
            .chain
            .call(network, registry, &IDexManager::approvedDexsCall {})
            .await
            .map_err(|source| SyncError::Fetch {
                network: network.clone(),
                source,
            })?
            ._0;
        Ok(dexs.into_iter().map(TrustEntry::approve_only).collect())
    }
}

fn entries_for(contract: Address, selectors: Vec<Selector>) -> Vec<TrustEntry> {
    selectors
        .into_iter()
        .map(|selector| TrustEntry::selector(contract, selector))
        .collect()
}

/// Decode the bulk pair read; an empty buffer or any other failure sends
/// the fetcher to the fallback
fn decode_pairs(bytes: &[u8]) -> Result<Vec<TrustEntry>, ChainError> {
    let pairs = decode_return::<IWhitelistManager::getAllContractSelectorPairsCall>(bytes)?;
    if pairs.contracts.len() != pairs.selectors.len() {
        return Err(ChainError::decode(format!(
            "{} contracts but {} selector lists",
            pairs.contracts.len(),
            pairs.selectors.len()
        )));
    }
    Ok(pairs
        .contracts
        .into_iter()
        .zip(pairs.selectors)
        .flat_map(|(contract, selectors)| entries_for(contract, selectors))
        .collect())
}
