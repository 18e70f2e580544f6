//! dsync-testkit: deterministic collaborators for engine tests
//!
//! - [`SimulatedChain`]: multi-network chain answering registry, Safe,
//!   timelock and token-probe calls, with fault injection and write capture
//! - [`TestSigner`]: stable pseudo signatures
//!
//! ```rust,no_run
//! use dsync_testkit::*;
//! use dsync_core::{Address, RegistryInterface};
//!
//! let chain = SimulatedChain::new()
//!     .with_network("mainnet", Address::repeat_byte(0xd1), RegistryInterface::Granular);
//! chain.deploy("mainnet", [Address::repeat_byte(0xaa)]);
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

pub mod chain;
pub mod signer;

pub use chain::{is_approve_only, BulkRead, SimulatedChain, WriteRecord};
pub use signer::TestSigner;
