//! Desired-state loader
//!
//! Parses the whitelist artifact into the desired [`NetworkState`] of one
//! network. The artifact is keyed by network, then by category:
//!
//! ```json
//! {
//!   "mainnet": {
//!     "swapVenues": [
//!       { "name": "UniswapV2Router", "address": "0x7a25...",
//!         "functions": { "swapExactTokensForTokens(uint256,uint256,address[],address,uint256)": "0x38ed1739" } }
//!     ],
//!     "ancillary": [
//!       { "name": "FeeCollector", "address": "0xbd6c...",
//!         "selectors": [ { "selector": "0xeedd56e1", "signature": "collectTokenFees(address,uint256,uint256,address)" } ] },
//!       { "name": "Permit2Proxy", "address": "0x89c6..." }
//!     ]
//!   }
//! }
//! ```
//!
//! A contract without functions (or with an empty list) is trusted as a whole
//! through the approve-only marker.

use std::collections::BTreeMap;
use std::path::Path;

use alloy_primitives::{keccak256, Address};
use dsync_core::types::parse_contract_address;
use dsync_core::{NetworkId, NetworkState, SyncError, SyncResult, SyncTarget, TrustEntry, TrustedFunction};
use serde::Deserialize;

/// Category feeding the `dexs` target
pub const SWAP_VENUES_CATEGORY: &str = "swapVenues";

/// Parsed whitelist artifact, keyed by network then category
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct WhitelistDocument {
    networks: BTreeMap<String, BTreeMap<String, Vec<ContractSpec>>>,
}

/// One configured contract
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ContractSpec {
    /// Human readable name, for logs
    #[serde(default)]
    pub name: Option<String>,
    /// Contract address in any letter case
    pub address: String,
    /// Function signature -> selector
    #[serde(default)]
    pub functions: Option<BTreeMap<String, String>>,
    /// Explicit selector list
    #[serde(default)]
    pub selectors: Option<Vec<SelectorSpec>>,
}

/// Explicit selector object
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SelectorSpec {
    /// `0x`-prefixed 4-byte selector
    pub selector: String,
    /// Solidity signature, informational
    #[serde(default)]
    pub signature: Option<String>,
}

impl ContractSpec {
    fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }

    /// Functions this contract is trusted for; empty means approve-only
    fn functions(&self) -> SyncResult<Vec<TrustedFunction>> {
        let mut functions = Vec::new();
        for (signature, selector) in self.functions.iter().flatten() {
            let function = TrustedFunction::parse(selector)?;
            warn_on_signature_mismatch(self.label(), signature, function);
            functions.push(function);
        }
        for spec in self.selectors.iter().flatten() {
            let function = TrustedFunction::parse(&spec.selector)?;
            if let Some(signature) = &spec.signature {
                warn_on_signature_mismatch(self.label(), signature, function);
            }
            functions.push(function);
        }
        Ok(functions)
    }
}

fn warn_on_signature_mismatch(contract: &str, signature: &str, function: TrustedFunction) {
    let TrustedFunction::Selector(selector) = function else {
        return;
    };
    let computed = &keccak256(signature.as_bytes())[..4];
    if computed != selector.as_slice() {
        tracing::warn!(
            contract,
            signature,
            %selector,
            "configured selector does not match its signature"
        );
    }
}

impl WhitelistDocument {
    /// Parse the JSON artifact
    pub fn from_json_str(raw: &str) -> SyncResult<Self> {
        serde_json::from_str(raw)
            .map_err(|e| SyncError::config(format!("invalid whitelist document: {e}")))
    }

    /// Read and parse the JSON artifact
    pub fn load(path: &Path) -> SyncResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SyncError::config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }

    /// Networks present in the document
    pub fn networks(&self) -> impl Iterator<Item = NetworkId> + '_ {
        self.networks.keys().map(|name| NetworkId::new(name.as_str()))
    }

    /// Desired state of `network` for `target`.
    ///
    /// Fails when the network is missing from the document, or when any
    /// address or selector is malformed or the zero address.
    pub fn desired_state(&self, network: &NetworkId, target: SyncTarget) -> SyncResult<NetworkState> {
        let categories = self.networks.get(network.as_str()).ok_or_else(|| {
            SyncError::config(format!("network `{network}` is missing from the whitelist"))
        })?;

        let mut entries = Vec::new();
        for (category, contracts) in categories {
            if target == SyncTarget::Dexs && category != SWAP_VENUES_CATEGORY {
                continue;
            }
            for spec in contracts {
                let located = |err| at_entry(format!("{network}.{category}.{}", spec.label()), err);
                let contract = parse_contract_address(&spec.address).map_err(located)?;
                expand(contract, spec, target, &mut entries).map_err(located)?;
            }
        }

        let state = NetworkState::new(network.clone(), entries);
        tracing::debug!(
            network = %network,
            %target,
            entries = state.len(),
            contracts = state.contracts().len(),
            "loaded desired state"
        );
        Ok(state)
    }
}

/// Prefix a configuration error with the entry it came from
fn at_entry(location: String, err: SyncError) -> SyncError {
    match err {
        SyncError::Config { message } => SyncError::config(format!("{location}: {message}")),
        other => other,
    }
}

fn expand(
    contract: Address,
    spec: &ContractSpec,
    target: SyncTarget,
    entries: &mut Vec<TrustEntry>,
) -> SyncResult<()> {
    let functions = spec.functions()?;
    match target {
        SyncTarget::ContractSelectors if !functions.is_empty() => {
            entries.extend(functions.into_iter().map(|function| TrustEntry { contract, function }));
        }
        SyncTarget::ContractSelectors | SyncTarget::Addresses | SyncTarget::Dexs => {
            entries.push(TrustEntry::approve_only(contract));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Selector;
    use assert_matches::assert_matches;

    const DOC: &str = r#"{
        "mainnet": {
            "swapVenues": [
                {
                    "name": "Router",
                    "address": "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
                    "functions": {
                        "transfer(address,uint256)": "0xa9059cbb",
                        "approve(address,uint256)": "0x095ea7b3"
                    }
                }
            ],
            "ancillary": [
                {
                    "name": "FeeCollector",
                    "address": "0xBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB",
                    "selectors": [ { "selector": "0x11223344" } ]
                },
                { "name": "Receiver", "address": "0xcccccccccccccccccccccccccccccccccccccccc" },
                { "name": "Executor", "address": "0xdddddddddddddddddddddddddddddddddddddddd", "functions": {} }
            ]
        },
        "emptychain": {}
    }"#;

    fn doc() -> WhitelistDocument {
        WhitelistDocument::from_json_str(DOC).unwrap()
    }

    fn mainnet() -> NetworkId {
        NetworkId::new("mainnet")
    }

    #[test]
    fn test_function_lists_expand_per_selector() {
        let state = doc().desired_state(&mainnet(), SyncTarget::ContractSelectors).unwrap();
        let router = Address::repeat_byte(0xaa);
        assert!(state.contains(&TrustEntry::selector(router, Selector::from([0xa9, 0x05, 0x9c, 0xbb]))));
        assert!(state.contains(&TrustEntry::selector(router, Selector::from([0x09, 0x5e, 0xa7, 0xb3]))));
        assert!(state.contains(&TrustEntry::selector(
            Address::repeat_byte(0xbb),
            Selector::from([0x11, 0x22, 0x33, 0x44])
        )));
        // two router selectors, one fee collector selector, two approve-only contracts
        assert_eq!(state.len(), 5);
    }

    #[test]
    fn test_missing_function_list_is_approve_only() {
        let state = doc().desired_state(&mainnet(), SyncTarget::ContractSelectors).unwrap();
        assert!(state.contains(&TrustEntry::approve_only(Address::repeat_byte(0xcc))));
        assert!(state.contains(&TrustEntry::approve_only(Address::repeat_byte(0xdd))));
    }

    #[test]
    fn test_address_target_projects_to_approve_only() {
        let state = doc().desired_state(&mainnet(), SyncTarget::Addresses).unwrap();
        assert_eq!(state.len(), 4);
        assert!(state
            .entries
            .iter()
            .all(|entry| entry.function == TrustedFunction::ApproveOnly));
    }

    #[test]
    fn test_dex_target_only_reads_swap_venues() {
        let state = doc().desired_state(&mainnet(), SyncTarget::Dexs).unwrap();
        assert_eq!(
            state.entries.into_iter().collect::<Vec<_>>(),
            vec![TrustEntry::approve_only(Address::repeat_byte(0xaa))]
        );
    }

    #[test]
    fn test_network_without_categories_is_empty() {
        let state = doc()
            .desired_state(&NetworkId::new("emptychain"), SyncTarget::ContractSelectors)
            .unwrap();
        assert!(state.is_empty());
    }

    #[test]
    fn test_unknown_network_is_a_config_error() {
        let result = doc().desired_state(&NetworkId::new("polygon"), SyncTarget::Addresses);
        assert_matches!(result, Err(SyncError::Config { .. }));
    }

    #[test]
    fn test_zero_address_is_rejected() {
        let raw = r#"{ "mainnet": { "ancillary": [ { "address": "0x0000000000000000000000000000000000000000" } ] } }"#;
        let err = WhitelistDocument::from_json_str(raw)
            .unwrap()
            .desired_state(&mainnet(), SyncTarget::Addresses)
            .unwrap_err();
        assert_matches!(err, SyncError::Config { .. });
        let message = err.to_string();
        assert!(message.starts_with("configuration error: mainnet.ancillary.0x"), "{message}");
        assert!(message.contains("zero address"));
        assert_eq!(message.matches("configuration error").count(), 1, "{message}");
    }

    #[test]
    fn test_malformed_entries_are_rejected() {
        let bad_address = r#"{ "mainnet": { "a": [ { "address": "0x1234" } ] } }"#;
        let bad_selector = r#"{ "mainnet": { "a": [ { "address": "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", "selectors": [ { "selector": "0x1122" } ] } ] } }"#;
        for raw in [bad_address, bad_selector] {
            let result = WhitelistDocument::from_json_str(raw)
                .unwrap()
                .desired_state(&mainnet(), SyncTarget::ContractSelectors);
            assert_matches!(result, Err(SyncError::Config { .. }));
        }
    }

    #[test]
    fn test_unknown_fields_fail_parsing() {
        let raw = r#"{ "mainnet": { "a": [ { "address": "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", "selector": "0x11223344" } ] } }"#;
        assert_matches!(WhitelistDocument::from_json_str(raw), Err(SyncError::Config { .. }));
    }
}
