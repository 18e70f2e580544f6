//! In-memory chain simulator
//!
//! [`SimulatedChain`] answers the exact calls the engine issues: registry
//! reads and writes on a diamond, `isOwner`/`nonce` on a Safe,
//! `getMinDelay`/`getTimestamp` on a timelock, and the ERC-20 probe on
//! token contracts.
//! Calldata is decoded with the same `sol!` bindings the engine encodes
//! with, so a mismatch shows up as a revert.
//!
//! Faults are injected per network and consumed in order by the next
//! calls. Every write is recorded for assertions.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{keccak256, Address, Bytes, Selector, B256, U256};
use alloy_sol_types::{SolCall, SolValue};
use async_trait::async_trait;
use dsync_core::abi::{IDexManager, IERC20Probe, ISafe, ITimelockController, IWhitelistManager};
use dsync_core::{
    CallSpec, ChainEffects, ChainError, KeyRef, NetworkId, RegistryInterface, TrustEntry,
    TrustedFunction, TxReceipt,
};
use parking_lot::Mutex;

/// Placeholder bytecode for deployed contracts
const DEPLOYED_CODE: &[u8] = &[0x60, 0x80, 0x60, 0x40, 0x52];

/// How the diamond answers the bulk pair read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BulkRead {
    /// Normal ABI-encoded answer
    #[default]
    Available,
    /// The call reverts (older facet without the bulk getter)
    Reverts,
    /// Zero bytes come back
    Empty,
    /// Parallel arrays of different lengths
    Mismatched,
}

/// A recorded write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    /// Network written to
    pub network: NetworkId,
    /// Call target
    pub contract: Address,
    /// Solidity signature of the call
    pub signature: &'static str,
    /// Raw calldata
    pub calldata: Bytes,
    /// Key the write was signed with
    pub key: String,
}

#[derive(Debug, Clone, Default)]
struct SafeState {
    address: Address,
    owners: HashSet<Address>,
    nonce: u64,
}

#[derive(Debug, Clone)]
struct TimelockState {
    address: Address,
    delay: U256,
    scheduled: HashSet<B256>,
}

#[derive(Debug, Clone)]
struct SimNetwork {
    diamond: Address,
    interface: RegistryInterface,
    pairs: BTreeSet<TrustEntry>,
    code: HashSet<Address>,
    tokens: HashSet<Address>,
    safe: Option<SafeState>,
    timelock: Option<TimelockState>,
    bulk: BulkRead,
    ignore_writes: bool,
    faults: VecDeque<ChainError>,
    write_faults: VecDeque<ChainError>,
    writes: Vec<WriteRecord>,
    reads: usize,
}

impl SimNetwork {
    fn new(diamond: Address, interface: RegistryInterface) -> Self {
        let mut code = HashSet::new();
        code.insert(diamond);
        Self {
            diamond,
            interface,
            pairs: BTreeSet::new(),
            code,
            tokens: HashSet::new(),
            safe: None,
            timelock: None,
            bulk: BulkRead::default(),
            ignore_writes: false,
            faults: VecDeque::new(),
            write_faults: VecDeque::new(),
            writes: Vec::new(),
            reads: 0,
        }
    }
}

#[derive(Debug, Default)]
struct ChainState {
    networks: HashMap<NetworkId, SimNetwork>,
    latency: Duration,
    tx_counter: u64,
}

/// Deterministic multi-network chain for tests
#[derive(Debug, Clone, Default)]
pub struct SimulatedChain {
    state: Arc<Mutex<ChainState>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl SimulatedChain {
    /// Empty chain without networks
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a network whose diamond lives at `diamond`
    pub fn with_network(self, network: &str, diamond: Address, interface: RegistryInterface) -> Self {
        self.state
            .lock()
            .networks
            .insert(NetworkId::new(network), SimNetwork::new(diamond, interface));
        self
    }

    /// Delay every call by `latency`
    pub fn with_latency(self, latency: Duration) -> Self {
        self.state.lock().latency = latency;
        self
    }

    fn with<R>(&self, network: &str, f: impl FnOnce(&mut SimNetwork) -> R) -> R {
        let mut state = self.state.lock();
        let sim = state
            .networks
            .get_mut(&NetworkId::new(network))
            .unwrap_or_else(|| panic!("network `{network}` is not simulated"));
        f(sim)
    }

    /// Replace the registry contents; legacy registries keep addresses only
    pub fn set_registry(&self, network: &str, entries: impl IntoIterator<Item = TrustEntry>) {
        self.with(network, |sim| sim.pairs = entries.into_iter().collect());
    }

    /// Current registry contents
    pub fn registry(&self, network: &str) -> BTreeSet<TrustEntry> {
        self.with(network, |sim| sim.pairs.clone())
    }

    /// Deploy plain contracts at `addresses`
    pub fn deploy(&self, network: &str, addresses: impl IntoIterator<Item = Address>) {
        self.with(network, |sim| sim.code.extend(addresses));
    }

    /// Deploy an ERC-20 lookalike at `address`
    pub fn deploy_token(&self, network: &str, address: Address) {
        self.with(network, |sim| {
            sim.code.insert(address);
            sim.tokens.insert(address);
        });
    }

    /// Deploy a Safe with `owners` at nonce `nonce`
    pub fn deploy_safe(&self, network: &str, safe: Address, owners: impl IntoIterator<Item = Address>, nonce: u64) {
        self.with(network, |sim| {
            sim.code.insert(safe);
            sim.safe = Some(SafeState {
                address: safe,
                owners: owners.into_iter().collect(),
                nonce,
            });
        });
    }

    /// Set the Safe nonce, as if transactions were executed
    pub fn set_safe_nonce(&self, network: &str, nonce: u64) {
        self.with(network, |sim| {
            if let Some(safe) = sim.safe.as_mut() {
                safe.nonce = nonce;
            }
        });
    }

    /// Deploy a timelock with minimum delay `delay` seconds
    pub fn deploy_timelock(&self, network: &str, timelock: Address, delay: u64) {
        self.with(network, |sim| {
            sim.code.insert(timelock);
            sim.timelock = Some(TimelockState {
                address: timelock,
                delay: U256::from(delay),
                scheduled: HashSet::new(),
            });
        });
    }

    /// Record operation `id` as scheduled on the timelock, as if a proposal
    /// carrying it had been executed
    pub fn mark_scheduled(&self, network: &str, id: B256) {
        self.with(network, |sim| {
            if let Some(timelock) = sim.timelock.as_mut() {
                timelock.scheduled.insert(id);
            }
        });
    }

    /// Change how the bulk pair read answers
    pub fn set_bulk_read(&self, network: &str, bulk: BulkRead) {
        self.with(network, |sim| sim.bulk = bulk);
    }

    /// Accept writes without applying them
    pub fn ignore_writes(&self, network: &str) {
        self.with(network, |sim| sim.ignore_writes = true);
    }

    /// Fail the next `count` calls on `network` with `error`
    pub fn fail_next(&self, network: &str, count: usize, error: ChainError) {
        self.with(network, |sim| {
            sim.faults.extend(std::iter::repeat(error).take(count));
        });
    }

    /// Fail the next `count` writes on `network` with `error`; reads are
    /// unaffected
    pub fn fail_writes(&self, network: &str, count: usize, error: ChainError) {
        self.with(network, |sim| {
            sim.write_faults.extend(std::iter::repeat(error).take(count));
        });
    }

    /// Writes recorded on `network`
    pub fn writes(&self, network: &str) -> Vec<WriteRecord> {
        self.with(network, |sim| sim.writes.clone())
    }

    /// Total writes across every network
    pub fn total_writes(&self) -> usize {
        self.state.lock().networks.values().map(|sim| sim.writes.len()).sum()
    }

    /// Reads served on `network`
    pub fn reads(&self, network: &str) -> usize {
        self.with(network, |sim| sim.reads)
    }

    /// Highest number of calls that were in flight at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> InFlight {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let guard = InFlight(Arc::clone(&self.in_flight));
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let latency = self.state.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        guard
    }

    fn network<'a>(
        state: &'a mut ChainState,
        network: &NetworkId,
    ) -> Result<&'a mut SimNetwork, ChainError> {
        let sim = state
            .networks
            .get_mut(network)
            .ok_or_else(|| ChainError::transport(format!("no RPC endpoint for `{network}`")))?;
        if let Some(fault) = sim.faults.pop_front() {
            tracing::trace!(network = %network, error = %fault, "injected fault");
            return Err(fault);
        }
        Ok(sim)
    }
}

struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn selector_of(calldata: &[u8]) -> Result<[u8; 4], ChainError> {
    calldata
        .get(..4)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| ChainError::reverted("calldata shorter than a selector"))
}

fn decode<C: SolCall>(calldata: &[u8]) -> Result<C, ChainError> {
    C::abi_decode(calldata, true).map_err(|e| ChainError::reverted(format!("bad calldata: {e}")))
}

fn read_registry(sim: &SimNetwork, calldata: &[u8]) -> Result<Vec<u8>, ChainError> {
    let selector = selector_of(calldata)?;
    match (sim.interface, selector) {
        (RegistryInterface::Granular, IWhitelistManager::getAllContractSelectorPairsCall::SELECTOR) => {
            let (contracts, selectors) = grouped(&sim.pairs);
            match sim.bulk {
                BulkRead::Available => Ok((contracts, selectors).abi_encode_params()),
                BulkRead::Reverts => Err(ChainError::reverted("Diamond: Function does not exist")),
                BulkRead::Empty => Ok(Vec::new()),
                BulkRead::Mismatched => {
                    let mut contracts = contracts;
                    contracts.push(Address::repeat_byte(0xee));
                    Ok((contracts, selectors).abi_encode_params())
                }
            }
        }
        (RegistryInterface::Granular, IWhitelistManager::getWhitelistedAddressesCall::SELECTOR) => {
            let (contracts, _) = grouped(&sim.pairs);
            Ok((contracts,).abi_encode_params())
        }
        (RegistryInterface::Granular, IWhitelistManager::getWhitelistedSelectorsForContractCall::SELECTOR) => {
            let call = decode::<IWhitelistManager::getWhitelistedSelectorsForContractCall>(calldata)?;
            let selectors: Vec<Selector> = sim
                .pairs
                .iter()
                .filter(|entry| entry.contract == call._contract)
                .map(|entry| entry.function.to_wire())
                .collect();
            Ok((selectors,).abi_encode_params())
        }
        (RegistryInterface::Legacy, IDexManager::approvedDexsCall::SELECTOR) => {
            let dexs: Vec<Address> = sim.pairs.iter().map(|entry| entry.contract).collect();
            Ok((dexs,).abi_encode_params())
        }
        _ => Err(ChainError::reverted("Diamond: Function does not exist")),
    }
}

fn write_registry(sim: &mut SimNetwork, calldata: &[u8]) -> Result<(), ChainError> {
    let selector = selector_of(calldata)?;
    match (sim.interface, selector) {
        (RegistryInterface::Granular, IWhitelistManager::batchSetContractSelectorWhitelistCall::SELECTOR) => {
            let call = decode::<IWhitelistManager::batchSetContractSelectorWhitelistCall>(calldata)?;
            if call._contracts.len() != call._selectors.len() {
                return Err(ChainError::reverted("InvalidConfig"));
            }
            if sim.ignore_writes {
                return Ok(());
            }
            for (contract, selector) in call._contracts.into_iter().zip(call._selectors) {
                let entry = TrustEntry::selector(contract, selector);
                if call._whitelisted {
                    sim.pairs.insert(entry);
                } else {
                    sim.pairs.remove(&entry);
                }
            }
            Ok(())
        }
        (RegistryInterface::Legacy, IDexManager::batchAddDexCall::SELECTOR) => {
            let call = decode::<IDexManager::batchAddDexCall>(calldata)?;
            if !sim.ignore_writes {
                sim.pairs.extend(call._dexs.into_iter().map(TrustEntry::approve_only));
            }
            Ok(())
        }
        (RegistryInterface::Legacy, IDexManager::batchRemoveDexCall::SELECTOR) => {
            let call = decode::<IDexManager::batchRemoveDexCall>(calldata)?;
            if !sim.ignore_writes {
                for dex in call._dexs {
                    sim.pairs.remove(&TrustEntry::approve_only(dex));
                }
            }
            Ok(())
        }
        _ => Err(ChainError::reverted("Diamond: Function does not exist")),
    }
}

fn read_safe(safe: &SafeState, calldata: &[u8]) -> Result<Vec<u8>, ChainError> {
    match selector_of(calldata)? {
        ISafe::nonceCall::SELECTOR => Ok(U256::from(safe.nonce).abi_encode()),
        ISafe::isOwnerCall::SELECTOR => {
            let call = decode::<ISafe::isOwnerCall>(calldata)?;
            Ok(safe.owners.contains(&call.owner).abi_encode())
        }
        _ => Err(ChainError::reverted("unknown Safe function")),
    }
}

fn read_timelock(timelock: &TimelockState, calldata: &[u8]) -> Result<Vec<u8>, ChainError> {
    match selector_of(calldata)? {
        ITimelockController::getMinDelayCall::SELECTOR => Ok(timelock.delay.abi_encode()),
        ITimelockController::getTimestampCall::SELECTOR => {
            let call = decode::<ITimelockController::getTimestampCall>(calldata)?;
            let timestamp = if timelock.scheduled.contains(&call.id) { 1u64 } else { 0 };
            Ok(U256::from(timestamp).abi_encode())
        }
        _ => Err(ChainError::reverted("unknown timelock function")),
    }
}

fn read_token(calldata: &[u8]) -> Result<Vec<u8>, ChainError> {
    match selector_of(calldata)? {
        IERC20Probe::decimalsCall::SELECTOR => Ok(U256::from(18u8).abi_encode()),
        IERC20Probe::totalSupplyCall::SELECTOR => Ok(U256::from(1_000_000u64).abi_encode()),
        _ => Err(ChainError::reverted("unknown token function")),
    }
}

/// Registry contents as the parallel arrays the bulk getter returns
fn grouped(pairs: &BTreeSet<TrustEntry>) -> (Vec<Address>, Vec<Vec<Selector>>) {
    let mut contracts: Vec<Address> = Vec::new();
    let mut selectors: Vec<Vec<Selector>> = Vec::new();
    for entry in pairs {
        if contracts.last() != Some(&entry.contract) {
            contracts.push(entry.contract);
            selectors.push(Vec::new());
        }
        if let Some(list) = selectors.last_mut() {
            list.push(entry.function.to_wire());
        }
    }
    (contracts, selectors)
}

#[async_trait]
impl ChainEffects for SimulatedChain {
    async fn read(
        &self,
        network: &NetworkId,
        contract: Address,
        call: &CallSpec,
    ) -> Result<Bytes, ChainError> {
        let _guard = self.enter().await;
        let mut state = self.state.lock();
        let sim = Self::network(&mut state, network)?;
        sim.reads += 1;

        let data = &call.calldata[..];
        let raw = if contract == sim.diamond {
            read_registry(sim, data)
        } else if let Some(safe) = sim.safe.as_ref().filter(|safe| safe.address == contract) {
            read_safe(safe, data)
        } else if let Some(timelock) = sim.timelock.as_ref().filter(|timelock| timelock.address == contract) {
            read_timelock(timelock, data)
        } else if sim.tokens.contains(&contract) {
            read_token(data)
        } else if sim.code.contains(&contract) {
            Err(ChainError::reverted("execution reverted"))
        } else {
            // calls to an address without code succeed with no data
            Ok(Vec::new())
        }?;
        Ok(Bytes::from(raw))
    }

    async fn write(
        &self,
        network: &NetworkId,
        contract: Address,
        call: &CallSpec,
        key: &KeyRef,
    ) -> Result<TxReceipt, ChainError> {
        let _guard = self.enter().await;
        let mut state = self.state.lock();
        state.tx_counter += 1;
        let counter = state.tx_counter;
        let sim = Self::network(&mut state, network)?;

        if let Some(fault) = sim.write_faults.pop_front() {
            tracing::trace!(network = %network, error = %fault, "injected write fault");
            return Err(fault);
        }
        if contract != sim.diamond {
            return Err(ChainError::reverted("write to an unknown contract"));
        }
        write_registry(sim, &call.calldata)?;
        tracing::trace!(network = %network, call = call.signature, ignored = sim.ignore_writes, "simulated write");
        sim.writes.push(WriteRecord {
            network: network.clone(),
            contract,
            signature: call.signature,
            calldata: call.calldata.clone(),
            key: key.name().to_string(),
        });
        Ok(TxReceipt {
            tx_hash: tx_hash(counter),
            block_number: Some(counter),
        })
    }

    async fn code_at(&self, network: &NetworkId, address: Address) -> Result<Bytes, ChainError> {
        let _guard = self.enter().await;
        let mut state = self.state.lock();
        let sim = Self::network(&mut state, network)?;
        sim.reads += 1;
        Ok(if sim.code.contains(&address) {
            Bytes::from_static(DEPLOYED_CODE)
        } else {
            Bytes::new()
        })
    }
}

fn tx_hash(counter: u64) -> B256 {
    keccak256(counter.to_be_bytes())
}

/// `true` when the entry is the approve-only marker for `contract`
pub fn is_approve_only(entry: &TrustEntry, contract: Address) -> bool {
    entry.contract == contract && entry.function == TrustedFunction::ApproveOnly
}
