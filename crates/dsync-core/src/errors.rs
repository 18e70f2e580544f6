//! Error taxonomy for registry synchronization
//!
//! Three layers of errors exist:
//! - [`ChainError`]: raised by a [`ChainEffects`](crate::effects::ChainEffects) or
//!   [`SignerEffects`](crate::effects::SignerEffects) implementation
//! - [`StoreError`]: raised by a [`ProposalStore`](crate::effects::ProposalStore)
//! - [`SyncError`]: what a network pipeline reports, carrying the layer below
//!
//! Transport-level errors classify themselves through [`Classify`] so the
//! retry layer can tell transient faults from fatal ones.

use std::time::Duration;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use crate::retry::{Classify, ErrorClass, TimeoutError};
use crate::types::NetworkId;

/// Errors reported by the chain reader/writer or the signer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum ChainError {
    /// The call did not complete within its per-call timeout
    #[error("call timed out after {after:?}")]
    Timeout {
        /// Timeout that elapsed
        after: Duration,
    },

    /// Connection refused, reset, or otherwise interrupted
    #[error("transport error: {message}")]
    Transport {
        /// Transport failure detail
        message: String,
    },

    /// The RPC endpoint throttled the caller
    #[error("rate limited: {message}")]
    RateLimited {
        /// Provider message
        message: String,
    },

    /// The RPC endpoint answered with an HTTP/JSON-RPC error code
    #[error("server error {code}: {message}")]
    Server {
        /// Status or JSON-RPC code
        code: i64,
        /// Provider message
        message: String,
    },

    /// A batched read returned fewer results than requested
    #[error("could not read all results: {message}")]
    IncompleteResults {
        /// Provider message
        message: String,
    },

    /// The contract reverted the call
    #[error("execution reverted: {reason}")]
    Reverted {
        /// Revert reason, or raw revert data
        reason: String,
    },

    /// The key or account is not allowed to perform the call
    #[error("unauthorized: {message}")]
    Unauthorized {
        /// Authorization failure detail
        message: String,
    },

    /// The response could not be decoded
    #[error("undecodable response: {message}")]
    Decode {
        /// Decoding failure detail
        message: String,
    },
}

impl ChainError {
    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a revert error
    pub fn reverted(reason: impl Into<String>) -> Self {
        Self::Reverted {
            reason: reason.into(),
        }
    }

    /// Create a decode error
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create an unauthorized error
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }
}

impl Classify for ChainError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Timeout { .. }
            | Self::Transport { .. }
            | Self::RateLimited { .. }
            | Self::IncompleteResults { .. } => ErrorClass::Retryable,
            Self::Server { code, .. } if *code == 429 || (500..600).contains(code) => {
                ErrorClass::Retryable
            }
            // JSON-RPC internal/limit-exceeded codes
            Self::Server { code, .. } if *code == -32603 || *code == -32005 => {
                ErrorClass::Retryable
            }
            Self::Server { .. }
            | Self::Reverted { .. }
            | Self::Unauthorized { .. }
            | Self::Decode { .. } => ErrorClass::Fatal,
        }
    }
}

impl TimeoutError for ChainError {
    fn timed_out(after: Duration) -> Self {
        Self::Timeout { after }
    }
}

/// Errors reported by the shared proposal store
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached; retryable
    #[error("store unavailable: {message}")]
    Unavailable {
        /// Failure detail
        message: String,
    },

    /// A persisted record could not be read back
    #[error("corrupt store record: {message}")]
    Corrupt {
        /// Failure detail
        message: String,
    },
}

impl StoreError {
    /// Create an unavailable error
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Create a corrupt record error
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt {
            message: message.into(),
        }
    }
}

impl Classify for StoreError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Unavailable { .. } => ErrorClass::Retryable,
            Self::Corrupt { .. } => ErrorClass::Fatal,
        }
    }
}

impl TimeoutError for StoreError {
    fn timed_out(after: Duration) -> Self {
        Self::unavailable(format!("store call timed out after {after:?}"))
    }
}

/// Errors reported by a synchronization pipeline
#[derive(Debug, Clone, thiserror::Error)]
pub enum SyncError {
    /// Bad configuration; never retried
    #[error("configuration error: {message}")]
    Config {
        /// What is wrong with the configuration
        message: String,
    },

    /// Actual state could not be read
    #[error("fetch failed on {network}: {source}")]
    Fetch {
        /// Network being read
        network: NetworkId,
        /// Last chain error observed
        #[source]
        source: ChainError,
    },

    /// A direct write did not go through
    #[error("write `{call}` failed on {network}: {source}")]
    Write {
        /// Network being written
        network: NetworkId,
        /// Call signature
        call: String,
        /// Last chain error observed
        #[source]
        source: ChainError,
    },

    /// A safety check rejected the planned additions
    #[error("safety violation on {network}: {message}")]
    SafetyViolation {
        /// Network whose plan was rejected
        network: NetworkId,
        /// Which check failed
        message: String,
    },

    /// The signing identity is not an approver of the authority
    #[error("signer {signer} is not an owner of authority {authority}")]
    SignerNotAuthorized {
        /// Signing address
        signer: Address,
        /// Multisig address
        authority: Address,
    },

    /// The proposal store could not be reached
    #[error("proposal store unavailable: {message}")]
    StoreUnavailable {
        /// Failure detail
        message: String,
    },

    /// The proposal store returned something unusable
    #[error("proposal store error: {message}")]
    Store {
        /// Failure detail
        message: String,
    },

    /// A concurrent proposer took the allocated nonce
    #[error("nonce {nonce} of authority {authority} on {network} was taken by a concurrent proposer")]
    NonceRaceLost {
        /// Multisig address
        authority: Address,
        /// Network of the multisig
        network: NetworkId,
        /// Nonce that was lost
        nonce: u64,
    },

    /// The pipeline task panicked or was cancelled
    #[error("pipeline for {network} aborted: {message}")]
    Aborted {
        /// Network whose pipeline died
        network: NetworkId,
        /// Panic or cancellation detail
        message: String,
    },

    /// Any other chain interaction failure
    #[error("chain error on {network}: {source}")]
    Chain {
        /// Network of the call
        network: NetworkId,
        /// Underlying error
        #[source]
        source: ChainError,
    },
}

impl SyncError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a safety violation
    pub fn safety(network: &NetworkId, message: impl Into<String>) -> Self {
        Self::SafetyViolation {
            network: network.clone(),
            message: message.into(),
        }
    }

    /// Wrap a chain error raised on `network`
    pub fn chain(network: &NetworkId, source: ChainError) -> Self {
        Self::Chain {
            network: network.clone(),
            source,
        }
    }

    /// Short machine-friendly name of the variant, used in run summaries
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Fetch { .. } => "fetch",
            Self::Write { .. } => "write",
            Self::SafetyViolation { .. } => "safety-violation",
            Self::SignerNotAuthorized { .. } => "signer-not-authorized",
            Self::StoreUnavailable { .. } => "store-unavailable",
            Self::Store { .. } => "store",
            Self::NonceRaceLost { .. } => "nonce-race-lost",
            Self::Aborted { .. } => "aborted",
            Self::Chain { .. } => "chain",
        }
    }
}

impl Classify for SyncError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::StoreUnavailable { .. } | Self::NonceRaceLost { .. } => ErrorClass::Retryable,
            Self::Fetch { source, .. } | Self::Write { source, .. } | Self::Chain { source, .. } => {
                source.class()
            }
            Self::Config { .. }
            | Self::SafetyViolation { .. }
            | Self::SignerNotAuthorized { .. }
            | Self::Store { .. }
            | Self::Aborted { .. } => ErrorClass::Fatal,
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable { message } => Self::StoreUnavailable { message },
            StoreError::Corrupt { message } => Self::Store { message },
        }
    }
}

/// Result type of pipeline operations
pub type SyncResult<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_chain_error_classification() {
        assert!(ChainError::Timeout {
            after: Duration::from_secs(1)
        }
        .is_retryable());
        assert!(ChainError::transport("connection reset by peer").is_retryable());
        assert!(ChainError::Server {
            code: 503,
            message: "unavailable".into()
        }
        .is_retryable());
        assert!(ChainError::IncompleteResults {
            message: "could not read all results".into()
        }
        .is_retryable());

        assert!(!ChainError::reverted("Unauthorized()").is_retryable());
        assert!(!ChainError::unauthorized("not owner").is_retryable());
        assert!(!ChainError::Server {
            code: 400,
            message: "bad request".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_store_error_conversion() {
        let err: SyncError = StoreError::unavailable("connection refused").into();
        assert_matches!(err, SyncError::StoreUnavailable { .. });
        assert!(err.is_retryable());

        let err: SyncError = StoreError::corrupt("truncated").into();
        assert_matches!(err, SyncError::Store { .. });
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_sync_error_display() {
        let err = SyncError::Fetch {
            network: NetworkId::new("mainnet"),
            source: ChainError::transport("reset"),
        };
        assert_eq!(err.to_string(), "fetch failed on mainnet: transport error: reset");
        assert_eq!(err.kind(), "fetch");
    }
}
