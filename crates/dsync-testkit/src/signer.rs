//! Deterministic signer

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use alloy_primitives::{keccak256, Address, Bytes, B256};
use async_trait::async_trait;
use dsync_core::{ChainError, SignerEffects};

/// Signer producing stable 65-byte pseudo signatures.
///
/// The signature is `keccak(address ‖ hash) ‖ hash ‖ 0x1b`: not a valid
/// ECDSA signature, but unique per (signer, digest) and easy to check.
#[derive(Debug, Clone)]
pub struct TestSigner {
    address: Address,
    signed: Arc<AtomicUsize>,
}

impl TestSigner {
    /// Signer with the given address
    pub fn new(address: Address) -> Self {
        Self {
            address,
            signed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Expected signature over `hash`
    pub fn signature_for(&self, hash: B256) -> Bytes {
        let mut preimage = Vec::with_capacity(52);
        preimage.extend_from_slice(self.address.as_slice());
        preimage.extend_from_slice(hash.as_slice());
        let mut signature = keccak256(preimage).to_vec();
        signature.extend_from_slice(hash.as_slice());
        signature.push(0x1b);
        Bytes::from(signature)
    }

    /// Number of digests signed so far
    pub fn signed(&self) -> usize {
        self.signed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignerEffects for TestSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign_hash(&self, hash: B256) -> Result<Bytes, ChainError> {
        self.signed.fetch_add(1, Ordering::SeqCst);
        Ok(self.signature_for(hash))
    }
}
