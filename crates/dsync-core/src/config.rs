//! Run configuration (`dsync.toml`)
//!
//! ```toml
//! [runner]
//! max_concurrency = 4
//! batch_size = 50
//!
//! [retry]
//! max_attempts = 5
//! delay_ms = 3000
//! call_timeout_ms = 60000
//!
//! [networks.mainnet]
//! chain_id = 1
//! rpc_url = "https://eth.example"
//! diamond = "0x1231DEB6f5749EF6cE6943a275A1D3E7486F4EaE"
//!
//! [networks.mainnet.authority]
//! safe = "0x37347dD595C49212C5FC2D95EA10d1085896f51E"
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use crate::errors::{SyncError, SyncResult};
use crate::retry::{BackoffStrategy, RetryPolicy};
use crate::types::{NetworkId, RegistryInterface};

/// Prefix of the per-network RPC override variables (`DSYNC_RPC_URL_MAINNET`)
pub const RPC_URL_ENV_PREFIX: &str = "DSYNC_RPC_URL_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Concurrency and batching
    pub runner: RunnerConfig,
    /// Retry policy for external calls
    pub retry: RetryConfig,
    /// Proposal persistence
    pub store: StoreConfig,
    /// Signing key reference
    pub signer: SignerConfig,
    /// Per-network settings keyed by network name
    pub networks: BTreeMap<String, NetworkConfig>,
}

/// Concurrency and batching settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunnerConfig {
    /// Maximum number of network pipelines in flight
    pub max_concurrency: usize,
    /// Maximum entries per write
    pub batch_size: usize,
    /// Probe additions for token-like contracts
    pub probe_tokens: bool,
    /// Attempts at allocating a nonce before giving up on a lost race
    pub max_nonce_attempts: u32,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            batch_size: 50,
            probe_tokens: true,
            max_nonce_attempts: 5,
        }
    }
}

/// Retry settings, converted into a [`RetryPolicy`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Total attempts per call
    pub max_attempts: u32,
    /// Delay between attempts in milliseconds
    pub delay_ms: u64,
    /// Backoff strategy
    pub strategy: BackoffStrategy,
    /// Upper bound on the delay in milliseconds
    pub max_delay_ms: u64,
    /// Timeout of a single call in milliseconds
    pub call_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay_ms: 3_000,
            strategy: BackoffStrategy::Fixed,
            max_delay_ms: 30_000,
            call_timeout_ms: 60_000,
        }
    }
}

impl RetryConfig {
    /// Policy applied to every external call
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms.max(self.delay_ms)),
            strategy: self.strategy,
            timeout: (self.call_timeout_ms > 0).then(|| Duration::from_millis(self.call_timeout_ms)),
        }
    }
}

/// Proposal store settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Directory holding persisted proposals
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: ".dsync/proposals".to_string(),
        }
    }
}

/// Signing key settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SignerConfig {
    /// Environment variable holding the private key
    pub key_env: String,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            key_env: "PRIVATE_KEY".to_string(),
        }
    }
}

/// One network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkConfig {
    /// EIP-155 chain id
    pub chain_id: u64,
    /// RPC endpoint; may be supplied through `DSYNC_RPC_URL_<NAME>`
    #[serde(default)]
    pub rpc_url: Option<String>,
    /// Diamond whose registry is synchronized
    pub diamond: Address,
    /// Registry call surface of the diamond
    #[serde(default)]
    pub registry_interface: RegistryInterface,
    /// Authority gating production writes
    #[serde(default)]
    pub authority: Option<AuthorityConfig>,
}

/// Multisig, optionally behind a timelock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthorityConfig {
    /// Safe multisig proposing transactions
    pub safe: Address,
    /// Timelock controller the Safe schedules through
    #[serde(default)]
    pub timelock: Option<Address>,
}

impl SyncConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(raw: &str) -> SyncResult<Self> {
        let config: SyncConfig = toml::from_str(raw)
            .map_err(|e| SyncError::config(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load, apply environment overrides, and validate
    pub fn load(path: &Path) -> SyncResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SyncError::config(format!("failed to read {}: {e}", path.display()))
        })?;
        let mut config: SyncConfig = toml::from_str(&raw).map_err(|e| {
            SyncError::config(format!("failed to parse {}: {e}", path.display()))
        })?;
        config.apply_env_overrides(std::env::vars());
        config.validate()?;
        Ok(config)
    }

    /// Apply `DSYNC_RPC_URL_<NAME>` overrides
    pub fn apply_env_overrides(&mut self, vars: impl IntoIterator<Item = (String, String)>) {
        for (key, value) in vars {
            let Some(suffix) = key.strip_prefix(RPC_URL_ENV_PREFIX) else {
                continue;
            };
            let name = suffix.to_ascii_lowercase();
            if let Some(network) = self.networks.get_mut(&name) {
                network.rpc_url = Some(value);
            }
        }
    }

    /// Check invariants that serde cannot express
    pub fn validate(&self) -> SyncResult<()> {
        if self.runner.max_concurrency == 0 {
            return Err(SyncError::config("runner.max_concurrency must be at least 1"));
        }
        if self.runner.batch_size == 0 {
            return Err(SyncError::config("runner.batch_size must be at least 1"));
        }
        if self.runner.max_nonce_attempts == 0 {
            return Err(SyncError::config("runner.max_nonce_attempts must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(SyncError::config("retry.max_attempts must be at least 1"));
        }
        for (name, network) in &self.networks {
            if network.diamond.is_zero() {
                return Err(SyncError::config(format!(
                    "networks.{name}.diamond is the zero address"
                )));
            }
            if let Some(authority) = &network.authority {
                if authority.safe.is_zero() {
                    return Err(SyncError::config(format!(
                        "networks.{name}.authority.safe is the zero address"
                    )));
                }
                if authority.timelock.is_some_and(|t| t.is_zero()) {
                    return Err(SyncError::config(format!(
                        "networks.{name}.authority.timelock is the zero address"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Look up a configured network
    pub fn network(&self, id: &NetworkId) -> SyncResult<&NetworkConfig> {
        self.networks
            .get(id.as_str())
            .ok_or_else(|| SyncError::config(format!("network `{id}` is not configured")))
    }

    /// Resolve a network selector: a single name or `all`
    pub fn select_networks(&self, selector: &str) -> SyncResult<Vec<NetworkId>> {
        if selector.eq_ignore_ascii_case("all") {
            if self.networks.is_empty() {
                return Err(SyncError::config("no networks are configured"));
            }
            return Ok(self.networks.keys().map(|n| NetworkId::new(n.as_str())).collect());
        }
        let id = NetworkId::new(selector);
        self.network(&id)?;
        Ok(vec![id])
    }
}
