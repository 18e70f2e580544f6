//! Execution router
//!
//! Decides once per network how batches are executed and with which
//! registry encoding. Nothing downstream re-decides or falls back.

use std::fmt;

use alloy_primitives::Address;
use dsync_core::{
    AuthorityConfig, Environment, NetworkConfig, NetworkId, RegistryInterface, SyncError,
    SyncResult, SyncTarget,
};

/// How batches reach the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Submitted directly by the operator key
    Direct,
    /// Signed and persisted as multisig proposals
    Proposal(AuthorityConfig),
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => f.write_str("direct"),
            Self::Proposal(authority) => write!(f, "proposal via {}", authority.safe),
        }
    }
}

/// Per-network routing decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Diamond holding the registry
    pub registry: Address,
    /// Registry call surface
    pub interface: RegistryInterface,
    /// Execution mode
    pub mode: ExecutionMode,
}

/// Route inputs that are the same for every network of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteOptions {
    /// Deployment environment
    pub environment: Environment,
    /// Skip authority gating in production (bootstrap of a fresh diamond)
    pub bypass_authority: bool,
}

impl RouteOptions {
    /// Whether production writes go through the authority
    pub fn wants_proposals(self) -> bool {
        self.environment == Environment::Production && !self.bypass_authority
    }
}

/// Route `network` for `target`
pub fn route(
    network: &NetworkId,
    config: &NetworkConfig,
    target: SyncTarget,
    options: RouteOptions,
) -> SyncResult<Route> {
    if !target.supports(config.registry_interface) {
        return Err(SyncError::config(format!(
            "target `{target}` is not available on the {:?} registry of `{network}`",
            config.registry_interface
        )));
    }

    let mode = if options.wants_proposals() {
        let authority = config.authority.clone().ok_or_else(|| {
            SyncError::config(format!(
                "`{network}` has no authority configured; production writes need one (or --no-authority)"
            ))
        })?;
        ExecutionMode::Proposal(authority)
    } else {
        ExecutionMode::Direct
    };

    tracing::debug!(network = %network, %mode, interface = ?config.registry_interface, "routed network");
    Ok(Route {
        registry: config.diamond,
        interface: config.registry_interface,
        mode,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn config(authority: bool, interface: RegistryInterface) -> NetworkConfig {
        NetworkConfig {
            chain_id: 1,
            rpc_url: None,
            diamond: Address::repeat_byte(0xd1),
            registry_interface: interface,
            authority: authority.then(|| AuthorityConfig {
                safe: Address::repeat_byte(0x5a),
                timelock: None,
            }),
        }
    }

    fn options(environment: Environment, bypass_authority: bool) -> RouteOptions {
        RouteOptions {
            environment,
            bypass_authority,
        }
    }

    #[test]
    fn test_staging_is_direct() {
        let route = route(
            &"mainnet".into(),
            &config(true, RegistryInterface::Granular),
            SyncTarget::ContractSelectors,
            options(Environment::Staging, false),
        )
        .unwrap();
        assert_eq!(route.mode, ExecutionMode::Direct);
    }

    #[test]
    fn test_production_with_authority_proposes() {
        let route = route(
            &"mainnet".into(),
            &config(true, RegistryInterface::Granular),
            SyncTarget::Addresses,
            options(Environment::Production, false),
        )
        .unwrap();
        assert_matches!(route.mode, ExecutionMode::Proposal(AuthorityConfig { .. }));
    }

    #[test]
    fn test_bootstrap_bypasses_authority() {
        let route = route(
            &"mainnet".into(),
            &config(false, RegistryInterface::Granular),
            SyncTarget::Addresses,
            options(Environment::Production, true),
        )
        .unwrap();
        assert_eq!(route.mode, ExecutionMode::Direct);
    }

    #[test]
    fn test_production_without_authority_is_a_config_error() {
        let result = route(
            &"mainnet".into(),
            &config(false, RegistryInterface::Granular),
            SyncTarget::Addresses,
            options(Environment::Production, false),
        );
        assert_matches!(result, Err(SyncError::Config { .. }));
    }

    #[test]
    fn test_unsupported_target_is_a_config_error() {
        let result = route(
            &"bsc".into(),
            &config(false, RegistryInterface::Legacy),
            SyncTarget::ContractSelectors,
            options(Environment::Staging, false),
        );
        assert_matches!(result, Err(SyncError::Config { .. }));
    }
}
