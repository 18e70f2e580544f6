//! Token/sanity filter
//!
//! Runs on the additions of a diff before anything is planned:
//! - contracts without bytecode are dropped and counted
//! - contracts answering both `decimals()` and `totalSupply()` look like
//!   tokens; trusting one lets the diamond move user funds, so the whole
//!   network is rejected unless token contracts were explicitly allowed
//!
//! Removals are never filtered.

use std::collections::{BTreeMap, BTreeSet};

use alloy_primitives::{Address, Bytes, U256};
use dsync_core::abi::IERC20Probe;
use dsync_core::{CallSpec, ChainError, Classify, Diff, NetworkId, SyncError, SyncResult};

use crate::client::RetryingChain;

/// Filter switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterOptions {
    /// Probe additions for token-like contracts
    pub probe_tokens: bool,
    /// Keep token-like contracts instead of failing the network
    pub allow_token_contracts: bool,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            probe_tokens: true,
            allow_token_contracts: false,
        }
    }
}

/// Filtered diff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filtered {
    /// Diff left to plan
    pub diff: Diff,
    /// Contracts whose additions were dropped for lacking bytecode
    pub dropped: Vec<Address>,
    /// Token-like contracts that were kept because tokens are allowed
    pub allowed_tokens: Vec<Address>,
}

impl Filtered {
    /// Number of addition entries removed from the diff
    pub fn dropped_entries(&self, original: &Diff) -> usize {
        original.to_add.len() - self.diff.to_add.len()
    }
}

/// Checks planned additions against on-chain bytecode
#[derive(Clone)]
pub struct SafetyFilter {
    chain: RetryingChain,
    options: FilterOptions,
}

impl SafetyFilter {
    /// Create a filter probing through `chain`
    pub fn new(chain: RetryingChain, options: FilterOptions) -> Self {
        Self { chain, options }
    }

    /// Filter the additions of `diff`.
    ///
    /// Each distinct contract is checked once regardless of how many of its
    /// selectors are being added.
    pub async fn apply(&self, network: &NetworkId, diff: Diff) -> SyncResult<Filtered> {
        let contracts: BTreeSet<Address> = diff.to_add.iter().map(|entry| entry.contract).collect();

        let mut verdicts = BTreeMap::new();
        for contract in contracts {
            verdicts.insert(contract, self.check(network, contract).await?);
        }

        let dropped: Vec<Address> = verdicts
            .iter()
            .filter(|(_, verdict)| **verdict == Verdict::NoCode)
            .map(|(contract, _)| *contract)
            .collect();
        for contract in &dropped {
            tracing::warn!(network = %network, %contract, "no bytecode at address, dropping its additions");
        }

        let tokens: Vec<Address> = verdicts
            .iter()
            .filter(|(_, verdict)| **verdict == Verdict::TokenLike)
            .map(|(contract, _)| *contract)
            .collect();
        if !tokens.is_empty() {
            if !self.options.allow_token_contracts {
                let listed = tokens
                    .iter()
                    .map(|contract| contract.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(SyncError::safety(
                    network,
                    format!("refusing to whitelist token-like contracts: {listed}"),
                ));
            }
            for contract in &tokens {
                tracing::warn!(network = %network, %contract, "whitelisting token-like contract");
            }
        }

        let Diff { to_add, to_remove } = diff;
        let to_add = to_add
            .into_iter()
            .filter(|entry| verdicts.get(&entry.contract) != Some(&Verdict::NoCode))
            .collect();

        Ok(Filtered {
            diff: Diff { to_add, to_remove },
            dropped,
            allowed_tokens: tokens,
        })
    }

    async fn check(&self, network: &NetworkId, contract: Address) -> SyncResult<Verdict> {
        let code = self
            .chain
            .code_at(network, contract)
            .await
            .map_err(|e| SyncError::chain(network, e))?;
        if code.is_empty() {
            return Ok(Verdict::NoCode);
        }
        if self.options.probe_tokens && self.looks_like_token(network, contract).await? {
            return Ok(Verdict::TokenLike);
        }
        Ok(Verdict::Contract)
    }

    async fn looks_like_token(&self, network: &NetworkId, contract: Address) -> SyncResult<bool> {
        let decimals = CallSpec::encode(&IERC20Probe::decimalsCall {});
        let supply = CallSpec::encode(&IERC20Probe::totalSupplyCall {});
        let (decimals, supply) = futures::join!(
            self.chain.read_raw(network, contract, &decimals),
            self.chain.read_raw(network, contract, &supply),
        );
        let decimals = probe_answer(network, decimals)?;
        let supply = probe_answer(network, supply)?;
        Ok(match (decimals, supply) {
            (Some(decimals), Some(supply)) => is_small_word(&decimals) && supply.len() == 32,
            _ => false,
        })
    }
}

/// A reverting probe means "not a token"; plenty of contracts revert on
/// unknown selectors. An unreachable node is an error, not an answer.
fn probe_answer(network: &NetworkId, result: Result<Bytes, ChainError>) -> SyncResult<Option<Bytes>> {
    match result {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.is_retryable() => Err(SyncError::chain(network, err)),
        Err(_) => Ok(None),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    NoCode,
    TokenLike,
    Contract,
}

/// Exactly one ABI word holding a value that fits `uint8`
fn is_small_word(bytes: &[u8]) -> bool {
    bytes.len() == 32 && U256::from_be_slice(bytes) <= U256::from(u8::MAX)
}
