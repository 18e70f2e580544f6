//! Fan-out over many networks

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use common::*;
use dsync_core::{Environment, NetworkId, RegistryInterface, SyncError, SyncTarget, TrustEntry};
use dsync_engine::Runner;
use dsync_testkit::SimulatedChain;
use serde_json::{json, Map, Value};

const NETWORKS: [&str; 6] = ["arbitrum", "base", "gnosis", "mainnet", "optimism", "polygon"];

/// Every network already holds its desired registry
fn in_sync_fleet(latency: Duration) -> (SimulatedChain, Map<String, Value>) {
    let chain = granular_chain(&NETWORKS).with_latency(latency);
    let mut doc = Map::new();
    for name in NETWORKS {
        chain.set_registry(name, [TrustEntry::approve_only(contract(0xa1))]);
        doc.insert(
            name.to_string(),
            json!({ "ancillary": [ { "address": contract(0xa1).to_string() } ] }),
        );
    }
    (chain, doc)
}

fn fleet_config() -> dsync_core::SyncConfig {
    config(
        NETWORKS
            .iter()
            .enumerate()
            .map(|(i, name)| (*name, network(i as u64 + 1, RegistryInterface::Granular))),
    )
}

#[tokio::test]
async fn in_flight_pipelines_never_exceed_the_bound() {
    let (chain, doc) = in_sync_fleet(Duration::from_millis(20));
    let pipeline = pipeline(fleet_config(), document(Value::Object(doc)), &chain, staging(SyncTarget::ContractSelectors));
    let runner = Runner::new(Arc::new(pipeline), 2);

    let networks = NETWORKS.iter().map(|n| NetworkId::new(*n)).collect();
    let summary = runner.run(networks).await;

    assert!(summary.is_success(), "{summary}");
    assert_eq!(summary.outcomes.len(), NETWORKS.len());
    assert!(chain.max_in_flight() <= 2, "max in flight {}", chain.max_in_flight());
    assert!(chain.max_in_flight() >= 1);
    assert!(summary.to_string().ends_with("success: staging fully synced"));
}

#[tokio::test]
async fn outcomes_are_reported_in_network_order() {
    let (chain, doc) = in_sync_fleet(Duration::ZERO);
    let pipeline = pipeline(fleet_config(), document(Value::Object(doc)), &chain, staging(SyncTarget::ContractSelectors));
    let runner = Runner::new(Arc::new(pipeline), 4);

    let mut networks: Vec<_> = NETWORKS.iter().map(|n| NetworkId::new(*n)).collect();
    networks.reverse();
    let summary = runner.run(networks).await;

    let order: Vec<_> = summary.outcomes.iter().map(|o| o.network.as_str().to_string()).collect();
    assert_eq!(order, NETWORKS.to_vec());
    assert_eq!(summary.environment, Environment::Staging);
}

#[tokio::test]
async fn unknown_network_fails_alone() {
    let (chain, doc) = in_sync_fleet(Duration::ZERO);
    let pipeline = pipeline(fleet_config(), document(Value::Object(doc)), &chain, staging(SyncTarget::ContractSelectors));
    let runner = Runner::new(Arc::new(pipeline), 3);

    let summary = runner
        .run(vec![NetworkId::new("mainnet"), NetworkId::new("zksync"), NetworkId::new("base")])
        .await;

    assert!(!summary.is_success());
    let failed: Vec<_> = summary.failed().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].network, NetworkId::new("zksync"));
    assert_matches!(failed[0].failures.as_slice(), [SyncError::Config { .. }]);
    assert!(summary.outcome(&NetworkId::new("mainnet")).unwrap().succeeded());
}
