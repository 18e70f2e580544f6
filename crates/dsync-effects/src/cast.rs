//! Chain access and signing through Foundry's `cast`
//!
//! Each call spawns one `cast` process. Failures are classified from the
//! process output so that the retry layer can tell a flaky RPC from a
//! reverting contract.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::PathBuf;

use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use dsync_core::{
    CallSpec, ChainEffects, ChainError, KeyRef, NetworkId, SignerEffects, SyncConfig, TxReceipt,
};
use serde::Deserialize;
use tokio::process::Command;

/// Default executable name
pub const CAST_BIN: &str = "cast";

/// Runs `cast` with a key resolved from the environment
#[derive(Debug, Clone)]
struct CastRunner {
    bin: PathBuf,
}

impl CastRunner {
    async fn run<I, S>(&self, args: I) -> Result<String, ChainError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = Command::new(&self.bin)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ChainError::transport(format!("failed to spawn {}: {e}", self.bin.display())))?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(classify_failure(stderr.trim()))
        }
    }
}

/// Map `cast` error output onto the chain error taxonomy
pub fn classify_failure(stderr: &str) -> ChainError {
    let lower = stderr.to_ascii_lowercase();
    let message = stderr.to_string();
    if lower.contains("execution reverted") || lower.contains("revert") {
        ChainError::Reverted { reason: message }
    } else if lower.contains("429") || lower.contains("rate limit") || lower.contains("too many requests") {
        ChainError::RateLimited { message }
    } else if lower.contains("could not read all results") || lower.contains("missing trie node") {
        ChainError::IncompleteResults { message }
    } else if let Some(code) = rpc_error_code(&lower) {
        ChainError::Server { code, message }
    } else if lower.contains("timed out") || lower.contains("timeout") {
        ChainError::Transport { message }
    } else if lower.contains("invalid private key")
        || lower.contains("insufficient funds")
        || lower.contains("unauthorized")
        || lower.contains("forbidden")
    {
        ChainError::Unauthorized { message }
    } else if lower.contains("failed to decode") || lower.contains("invalid data") {
        ChainError::Decode { message }
    } else {
        ChainError::Transport { message }
    }
}

/// `code: -32005` or `(code: 503)` style fragments
fn rpc_error_code(lower: &str) -> Option<i64> {
    let start = lower.find("code: ")? + "code: ".len();
    let digits: String = lower[start..]
        .chars()
        .take_while(|c| *c == '-' || c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

fn parse_hex(output: &str) -> Result<Bytes, ChainError> {
    let digits = output.strip_prefix("0x").unwrap_or(output);
    hex::decode(digits)
        .map(Bytes::from)
        .map_err(|e| ChainError::decode(format!("`cast` returned non-hex output `{output}`: {e}")))
}

fn resolve_key(key: &KeyRef) -> Result<String, ChainError> {
    std::env::var(key.name())
        .map_err(|_| ChainError::unauthorized(format!("environment variable `{}` is not set", key.name())))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CastReceipt {
    transaction_hash: B256,
    #[serde(default)]
    block_number: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

fn parse_receipt(output: &str) -> Result<TxReceipt, ChainError> {
    let receipt: CastReceipt = serde_json::from_str(output)
        .map_err(|e| ChainError::decode(format!("unreadable receipt: {e}")))?;
    if receipt.status.as_deref() == Some("0x0") {
        return Err(ChainError::reverted(format!(
            "transaction {} reverted",
            receipt.transaction_hash
        )));
    }
    let block_number = receipt
        .block_number
        .as_deref()
        .and_then(|n| u64::from_str_radix(n.trim_start_matches("0x"), 16).ok());
    Ok(TxReceipt {
        tx_hash: receipt.transaction_hash,
        block_number,
    })
}

/// [`ChainEffects`] over `cast call`, `cast send` and `cast code`
#[derive(Debug, Clone)]
pub struct CastChain {
    runner: CastRunner,
    rpc_urls: HashMap<NetworkId, String>,
}

impl CastChain {
    /// Chain with one RPC endpoint per network
    pub fn new(rpc_urls: HashMap<NetworkId, String>) -> Self {
        Self {
            runner: CastRunner {
                bin: PathBuf::from(CAST_BIN),
            },
            rpc_urls,
        }
    }

    /// Endpoints of every network that has one configured
    pub fn from_config(config: &SyncConfig) -> Self {
        let rpc_urls = config
            .networks
            .iter()
            .filter_map(|(name, network)| {
                network
                    .rpc_url
                    .clone()
                    .map(|url| (NetworkId::new(name.as_str()), url))
            })
            .collect();
        Self::new(rpc_urls)
    }

    /// Use a specific `cast` executable
    pub fn with_binary(mut self, bin: impl Into<PathBuf>) -> Self {
        self.runner.bin = bin.into();
        self
    }

    fn rpc_url(&self, network: &NetworkId) -> Result<&str, ChainError> {
        self.rpc_urls
            .get(network)
            .map(String::as_str)
            .ok_or_else(|| ChainError::unauthorized(format!("no RPC endpoint configured for `{network}`")))
    }
}

#[async_trait]
impl ChainEffects for CastChain {
    async fn read(
        &self,
        network: &NetworkId,
        contract: Address,
        call: &CallSpec,
    ) -> Result<Bytes, ChainError> {
        let rpc = self.rpc_url(network)?;
        tracing::trace!(network = %network, %contract, call = call.signature, "cast call");
        let output = self
            .runner
            .run([
                "call",
                &contract.to_string(),
                &call.calldata.to_string(),
                "--rpc-url",
                rpc,
            ])
            .await?;
        parse_hex(&output)
    }

    async fn write(
        &self,
        network: &NetworkId,
        contract: Address,
        call: &CallSpec,
        key: &KeyRef,
    ) -> Result<TxReceipt, ChainError> {
        let rpc = self.rpc_url(network)?;
        let private_key = resolve_key(key)?;
        tracing::debug!(network = %network, %contract, call = call.signature, "cast send");
        let output = self
            .runner
            .run([
                "send",
                &contract.to_string(),
                &call.calldata.to_string(),
                "--rpc-url",
                rpc,
                "--private-key",
                &private_key,
                "--json",
            ])
            .await?;
        parse_receipt(&output)
    }

    async fn code_at(&self, network: &NetworkId, address: Address) -> Result<Bytes, ChainError> {
        let rpc = self.rpc_url(network)?;
        let output = self
            .runner
            .run(["code", &address.to_string(), "--rpc-url", rpc])
            .await?;
        parse_hex(&output)
    }
}

/// [`SignerEffects`] over `cast wallet`
#[derive(Debug, Clone)]
pub struct CastSigner {
    runner: CastRunner,
    key: KeyRef,
    address: Address,
}

impl CastSigner {
    /// Resolve the signing address of `key`
    pub async fn connect(key: KeyRef) -> Result<Self, ChainError> {
        Self::connect_with_binary(key, CAST_BIN).await
    }

    /// Resolve the signing address of `key` with a specific `cast` executable
    pub async fn connect_with_binary(key: KeyRef, bin: impl Into<PathBuf>) -> Result<Self, ChainError> {
        let runner = CastRunner { bin: bin.into() };
        let private_key = resolve_key(&key)?;
        let output = runner
            .run(["wallet", "address", "--private-key", &private_key])
            .await?;
        let address = output
            .parse::<Address>()
            .map_err(|e| ChainError::decode(format!("`cast wallet address` returned `{output}`: {e}")))?;
        Ok(Self {
            runner,
            key,
            address,
        })
    }
}

#[async_trait]
impl SignerEffects for CastSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign_hash(&self, hash: B256) -> Result<Bytes, ChainError> {
        let private_key = resolve_key(&self.key)?;
        let output = self
            .runner
            .run([
                "wallet",
                "sign",
                "--no-hash",
                &hash.to_string(),
                "--private-key",
                &private_key,
            ])
            .await?;
        let signature = parse_hex(&output)?;
        if signature.len() != 65 {
            return Err(ChainError::decode(format!(
                "expected a 65-byte signature, got {} bytes",
                signature.len()
            )));
        }
        Ok(signature)
    }
}
