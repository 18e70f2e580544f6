//! Shared fixtures for the engine integration tests

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use alloy_primitives::{Address, Selector};
use dsync_core::config::RetryConfig;
use dsync_core::{
    AuthorityConfig, ChainEffects, Environment, NetworkConfig, ProposalStore, RegistryInterface,
    SyncConfig, SyncTarget,
};
use dsync_engine::{
    NetworkPipeline, PipelineOptions, ProposalSequencer, RetryingChain, WhitelistDocument,
};
use dsync_testkit::{SimulatedChain, TestSigner};
use serde_json::Value;

pub const MAINNET: &str = "mainnet";
pub const BASE: &str = "base";

pub fn diamond() -> Address {
    Address::repeat_byte(0xd1)
}

pub fn safe() -> Address {
    Address::repeat_byte(0x5a)
}

pub fn timelock() -> Address {
    Address::repeat_byte(0x71)
}

pub fn proposer() -> Address {
    Address::repeat_byte(0xee)
}

pub fn contract(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

pub fn selector(byte: u8) -> Selector {
    Selector::repeat_byte(byte)
}

pub fn selector_hex(byte: u8) -> String {
    format!("{}", selector(byte))
}

pub fn network(chain_id: u64, interface: RegistryInterface) -> NetworkConfig {
    NetworkConfig {
        chain_id,
        rpc_url: Some(format!("http://127.0.0.1:8545/{chain_id}")),
        diamond: diamond(),
        registry_interface: interface,
        authority: None,
    }
}

pub fn gated(chain_id: u64, timelock: Option<Address>) -> NetworkConfig {
    NetworkConfig {
        authority: Some(AuthorityConfig {
            safe: safe(),
            timelock,
        }),
        ..network(chain_id, RegistryInterface::Granular)
    }
}

/// Config with instant retries so fault injection stays fast
pub fn config(networks: impl IntoIterator<Item = (&'static str, NetworkConfig)>) -> SyncConfig {
    let mut config = SyncConfig {
        retry: RetryConfig {
            max_attempts: 3,
            delay_ms: 0,
            call_timeout_ms: 0,
            ..RetryConfig::default()
        },
        ..SyncConfig::default()
    };
    for (name, network) in networks {
        config.networks.insert(name.to_string(), network);
    }
    config.validate().expect("test config is valid");
    config
}

pub fn document(value: Value) -> WhitelistDocument {
    WhitelistDocument::from_json_str(&value.to_string()).expect("test document parses")
}

/// Simulated chain with a granular diamond on every named network
pub fn granular_chain(networks: &[&str]) -> SimulatedChain {
    networks.iter().fold(SimulatedChain::new(), |chain, name| {
        chain.with_network(name, diamond(), RegistryInterface::Granular)
    })
}

pub fn staging(target: SyncTarget) -> PipelineOptions {
    PipelineOptions::new(target, Environment::Staging)
}

pub fn production(target: SyncTarget) -> PipelineOptions {
    PipelineOptions::new(target, Environment::Production)
}

pub fn pipeline(
    config: SyncConfig,
    document: WhitelistDocument,
    chain: &SimulatedChain,
    options: PipelineOptions,
) -> NetworkPipeline {
    let chain: Arc<dyn ChainEffects> = Arc::new(chain.clone());
    NetworkPipeline::new(Arc::new(config), Arc::new(document), chain, options)
}

pub fn sequencer(
    config: &SyncConfig,
    chain: &SimulatedChain,
    signer: &TestSigner,
    store: Arc<dyn ProposalStore>,
) -> ProposalSequencer {
    let chain: Arc<dyn ChainEffects> = Arc::new(chain.clone());
    ProposalSequencer::new(
        RetryingChain::new(chain, config.retry.policy()),
        Arc::new(signer.clone()),
        store,
        config.runner.max_nonce_attempts,
    )
}
