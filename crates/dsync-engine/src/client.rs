//! Chain access through the retry layer
//!
//! Every read, write and bytecode query the engine issues goes through
//! [`RetryingChain`], so the policy configured under `[retry]` applies
//! uniformly at the chain boundary.

use std::sync::Arc;

use alloy_primitives::{Address, Bytes};
use alloy_sol_types::SolCall;
use dsync_core::{CallSpec, ChainEffects, ChainError, KeyRef, NetworkId, RetryPolicy, TxReceipt};

/// Raw return data of a view call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawReturn<'a> {
    /// Zero bytes came back: the function does not exist or the node dropped
    /// the result. Never the same thing as an encoded empty array.
    Empty,
    /// ABI-encoded return data
    Data(&'a [u8]),
}

impl<'a> RawReturn<'a> {
    /// Classify a return buffer
    pub fn of(bytes: &'a [u8]) -> Self {
        if bytes.is_empty() {
            Self::Empty
        } else {
            Self::Data(bytes)
        }
    }
}

/// Decode the return data of `C`, treating an empty buffer as an error
pub fn decode_return<C: SolCall>(bytes: &[u8]) -> Result<C::Return, ChainError> {
    match RawReturn::of(bytes) {
        RawReturn::Empty => Err(ChainError::decode(format!(
            "`{}` returned no data",
            C::SIGNATURE
        ))),
        RawReturn::Data(data) => C::abi_decode_returns(data, true)
            .map_err(|e| ChainError::decode(format!("`{}`: {e}", C::SIGNATURE))),
    }
}

/// [`ChainEffects`] wrapped in a [`RetryPolicy`]
#[derive(Clone)]
pub struct RetryingChain {
    chain: Arc<dyn ChainEffects>,
    retry: RetryPolicy,
}

impl RetryingChain {
    /// Wrap `chain` with `retry`
    pub fn new(chain: Arc<dyn ChainEffects>, retry: RetryPolicy) -> Self {
        Self { chain, retry }
    }

    /// Policy applied to every call
    pub fn policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// View call returning raw bytes
    pub async fn read_raw(
        &self,
        network: &NetworkId,
        contract: Address,
        call: &CallSpec,
    ) -> Result<Bytes, ChainError> {
        self.retry
            .run(call.signature, || self.chain.read(network, contract, call))
            .await
    }

    /// Typed view call
    pub async fn call<C: SolCall>(
        &self,
        network: &NetworkId,
        contract: Address,
        call: &C,
    ) -> Result<C::Return, ChainError> {
        let bytes = self.read_raw(network, contract, &CallSpec::encode(call)).await?;
        decode_return::<C>(&bytes)
    }

    /// State-changing call
    pub async fn write(
        &self,
        network: &NetworkId,
        contract: Address,
        call: &CallSpec,
        key: &KeyRef,
    ) -> Result<TxReceipt, ChainError> {
        self.retry
            .run(call.signature, || self.chain.write(network, contract, call, key))
            .await
    }

    /// Deployed bytecode at `address`
    pub async fn code_at(&self, network: &NetworkId, address: Address) -> Result<Bytes, ChainError> {
        self.retry
            .run("code_at", || self.chain.code_at(network, address))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use dsync_core::abi::ISafe;

    #[test]
    fn test_empty_buffer_is_distinct_from_data() {
        assert_eq!(RawReturn::of(&[]), RawReturn::Empty);
        assert_eq!(RawReturn::of(&[0u8; 32]), RawReturn::Data(&[0u8; 32]));
    }

    #[test]
    fn test_empty_return_fails_to_decode() {
        assert_matches!(
            decode_return::<ISafe::nonceCall>(&[]),
            Err(ChainError::Decode { .. })
        );
    }

    #[test]
    fn test_word_decodes() {
        let mut word = [0u8; 32];
        word[31] = 7;
        let decoded = decode_return::<ISafe::nonceCall>(&word).unwrap();
        assert_eq!(decoded._0, alloy_primitives::U256::from(7));
    }
}
