//! Registry data model
//!
//! Every state the engine reasons about is a set of [`TrustEntry`] values:
//! the desired state parsed from configuration, the actual state read from a
//! diamond, and the post-execution state read back for verification.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use alloy_primitives::{Address, FixedBytes, Selector};
use serde::{Deserialize, Serialize};

use crate::errors::SyncError;

/// Wire value of the approve-only marker: trust the whole contract.
pub const APPROVE_ONLY_SELECTOR: Selector = FixedBytes([0xff, 0xff, 0xff, 0xff]);

/// Network name as used in configuration (`mainnet`, `arbitrum`, ...)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkId(String);

impl NetworkId {
    /// Create a network id from its configured name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Configured name of the network
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NetworkId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// The unit of granular trust for a contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustedFunction {
    /// Every function of the contract is trusted (legacy address-only model)
    ApproveOnly,
    /// A single function selector is trusted
    Selector(Selector),
}

impl TrustedFunction {
    /// Map a selector read from or written to the registry.
    ///
    /// `0xffffffff` always decodes to [`TrustedFunction::ApproveOnly`].
    pub fn from_wire(selector: Selector) -> Self {
        if selector == APPROVE_ONLY_SELECTOR {
            Self::ApproveOnly
        } else {
            Self::Selector(selector)
        }
    }

    /// Selector value used on the wire
    pub fn to_wire(self) -> Selector {
        match self {
            Self::ApproveOnly => APPROVE_ONLY_SELECTOR,
            Self::Selector(selector) => selector,
        }
    }

    /// Parse a `0x`-prefixed 4-byte hex selector
    pub fn parse(raw: &str) -> Result<Self, SyncError> {
        let trimmed = raw.trim();
        let hex = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| SyncError::config(format!("selector `{raw}` must be 0x-prefixed")))?;
        if hex.len() != 8 {
            return Err(SyncError::config(format!(
                "selector `{raw}` must be exactly 4 bytes"
            )));
        }
        let selector = Selector::from_str(hex)
            .map_err(|e| SyncError::config(format!("selector `{raw}` is not valid hex: {e}")))?;
        Ok(Self::from_wire(selector))
    }
}

impl fmt::Display for TrustedFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApproveOnly => f.write_str("approve-only"),
            Self::Selector(selector) => write!(f, "{selector}"),
        }
    }
}

/// A single trusted (contract, function) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TrustEntry {
    /// Trusted contract
    pub contract: Address,
    /// Trusted function of `contract`
    pub function: TrustedFunction,
}

impl TrustEntry {
    /// Entry trusting one selector of `contract`
    pub fn selector(contract: Address, selector: Selector) -> Self {
        Self {
            contract,
            function: TrustedFunction::from_wire(selector),
        }
    }

    /// Entry trusting the whole of `contract`
    pub fn approve_only(contract: Address) -> Self {
        Self {
            contract,
            function: TrustedFunction::ApproveOnly,
        }
    }
}

impl fmt::Display for TrustEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.contract, self.function)
    }
}

/// Parse a 20-byte hex address regardless of its letter case.
///
/// The zero address is rejected: it can never be a trusted contract.
pub fn parse_contract_address(raw: &str) -> Result<Address, SyncError> {
    let trimmed = raw.trim();
    let hex = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| SyncError::config(format!("address `{raw}` must be 0x-prefixed")))?;
    if hex.len() != 40 {
        return Err(SyncError::config(format!(
            "address `{raw}` must be exactly 20 bytes"
        )));
    }
    let address = Address::from_str(&hex.to_ascii_lowercase())
        .map_err(|e| SyncError::config(format!("address `{raw}` is not valid hex: {e}")))?;
    if address.is_zero() {
        return Err(SyncError::config(format!(
            "the zero address cannot be trusted (`{raw}`)"
        )));
    }
    Ok(address)
}

/// Snapshot of one network's registry contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkState {
    /// Network the snapshot belongs to
    pub network: NetworkId,
    /// Trusted entries at snapshot time
    pub entries: BTreeSet<TrustEntry>,
}

impl NetworkState {
    /// Build a snapshot from any collection of entries
    pub fn new(network: NetworkId, entries: impl IntoIterator<Item = TrustEntry>) -> Self {
        Self {
            network,
            entries: entries.into_iter().collect(),
        }
    }

    /// An empty snapshot
    pub fn empty(network: NetworkId) -> Self {
        Self {
            network,
            entries: BTreeSet::new(),
        }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the snapshot has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `entry` is part of the snapshot
    pub fn contains(&self, entry: &TrustEntry) -> bool {
        self.entries.contains(entry)
    }

    /// Distinct contracts present in the snapshot
    pub fn contracts(&self) -> BTreeSet<Address> {
        self.entries.iter().map(|entry| entry.contract).collect()
    }
}

/// Changes required to move an actual state onto a desired state.
///
/// Both lists are sorted, free of duplicates and disjoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    /// Entries in desired but not in actual
    pub to_add: Vec<TrustEntry>,
    /// Entries in actual but not in desired
    pub to_remove: Vec<TrustEntry>,
}

impl Diff {
    /// Whether nothing needs to change
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    /// Total number of pending changes
    pub fn len(&self) -> usize {
        self.to_add.len() + self.to_remove.len()
    }
}

/// Direction of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchKind {
    /// Grant trust
    Add,
    /// Revoke trust
    Remove,
}

impl BatchKind {
    /// Value of the `whitelisted` flag sent to the registry
    pub fn whitelisted(self) -> bool {
        matches!(self, Self::Add)
    }
}

impl fmt::Display for BatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => f.write_str("add"),
            Self::Remove => f.write_str("remove"),
        }
    }
}

/// Size-bounded slice of one side of a [`Diff`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Whether the entries are granted or revoked
    pub kind: BatchKind,
    /// Position of the batch in the plan
    pub index: usize,
    /// Entries in diff order
    pub entries: Vec<TrustEntry>,
}

impl Batch {
    /// Distinct contracts in batch order
    pub fn contracts(&self) -> Vec<Address> {
        let mut seen = BTreeSet::new();
        self.entries
            .iter()
            .filter(|entry| seen.insert(entry.contract))
            .map(|entry| entry.contract)
            .collect()
    }
}

/// Which registry a run synchronizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncTarget {
    /// Granular (contract, selector) whitelist
    ContractSelectors,
    /// Address-level whitelist: every configured contract, approve-only
    Addresses,
    /// Legacy swap venue allow list: the `swapVenues` category only
    Dexs,
}

impl SyncTarget {
    /// Whether a registry exposing `interface` can hold this target.
    ///
    /// Granular selectors need the whitelist manager; the dex list only
    /// exists on the legacy dex manager; address approvals live on both.
    pub fn supports(self, interface: RegistryInterface) -> bool {
        match self {
            Self::ContractSelectors => interface == RegistryInterface::Granular,
            Self::Addresses => true,
            Self::Dexs => interface == RegistryInterface::Legacy,
        }
    }
}

impl fmt::Display for SyncTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ContractSelectors => f.write_str("contract-selectors"),
            Self::Addresses => f.write_str("addresses"),
            Self::Dexs => f.write_str("dexs"),
        }
    }
}

/// Deployment environment of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Writes go straight to the diamond
    Staging,
    /// Writes may be gated behind an authority
    Production,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Staging => f.write_str("staging"),
            Self::Production => f.write_str("production"),
        }
    }
}

impl FromStr for Environment {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "staging" => Ok(Self::Staging),
            "production" => Ok(Self::Production),
            other => Err(SyncError::config(format!("unknown environment `{other}`"))),
        }
    }
}

/// Call surface exposed by a network's diamond
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryInterface {
    /// Whitelist manager with (contract, selector) pairs
    #[default]
    Granular,
    /// Older dex manager with address-only approvals
    Legacy,
}
