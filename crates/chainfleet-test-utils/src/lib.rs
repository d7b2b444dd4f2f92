//! Testing utilities for chainfleet workspace
//!
//! Shared fixtures: a simulated chain, ledgers, and a harness wiring the
//! engine components to both.

#![allow(missing_docs)]

use chainfleet_core::simulator::{SimConfig, SimulatedChain};
use chainfleet_core::{
    Address, BatchConfig, BatchExecutor, ChainConfig, ChainId, ConfirmationPolicy, MigrationItem,
    MigrationWorkflow, NameRegistrar, Provisioner, ProxyTracker, VersionGate,
};
use chainfleet_ledger::Ledger;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Chain id used by every fixture
pub const TEST_CHAIN: ChainId = ChainId(31_337);

/// Network name used by every fixture
pub const TEST_NETWORK: &str = "sim";

/// Retry policy with millisecond backoff
pub fn fast_policy() -> ConfirmationPolicy {
    ConfirmationPolicy::new()
        .with_max_attempts(3)
        .with_backoff(Duration::from_millis(1), Duration::from_millis(4))
        .with_attempt_timeout(Duration::from_secs(5))
}

pub fn sim_chain() -> Arc<SimulatedChain> {
    Arc::new(SimulatedChain::new(SimConfig::default()))
}

pub fn jittery_chain(seed: u64, max_jitter_ms: u64) -> Arc<SimulatedChain> {
    Arc::new(SimulatedChain::new(
        SimConfig::default().with_seed(seed).with_jitter(max_jitter_ms),
    ))
}

pub fn memory_ledger() -> Ledger {
    Ledger::in_memory(TEST_NETWORK)
}

/// File-backed ledger in a fresh temporary directory
pub fn temp_ledger() -> (TempDir, Ledger) {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Ledger::open(dir.path(), TEST_NETWORK);
    (dir, ledger)
}

/// Deterministic address `0x0000...00nn`
pub fn address(n: u8) -> Address {
    let mut bytes = [0u8; Address::LEN];
    bytes[Address::LEN - 1] = n;
    Address::from_bytes(bytes)
}

/// `n` unmigrated items `item-0..item-{n-1}` owned by `owner`
pub fn items(owner: &Address, n: usize) -> Vec<MigrationItem> {
    (0..n)
        .map(|i| {
            MigrationItem::new(format!("item-{i}"), owner.clone(), TEST_CHAIN)
                .with_attribute("amount", (i as u64 + 1) * 100)
        })
        .collect()
}

/// Engine components bound to one simulated chain and one ledger
pub struct Harness {
    pub chain: Arc<SimulatedChain>,
    pub ledger: Ledger,
    pub policy: ConfirmationPolicy,
}

impl Harness {
    pub fn new(chain: Arc<SimulatedChain>, ledger: Ledger) -> Self {
        Self {
            chain,
            ledger,
            policy: fast_policy(),
        }
    }

    /// Simulated chain with an in-memory ledger
    pub fn in_memory() -> Self {
        Self::new(sim_chain(), memory_ledger())
    }

    pub fn chain_config(&self, batch: BatchConfig) -> ChainConfig {
        ChainConfig::new(TEST_CHAIN, TEST_NETWORK)
            .with_batch(batch)
            .with_confirmation(self.policy.clone())
    }

    pub fn provisioner(&self) -> Provisioner {
        Provisioner::new(self.ledger.clone(), self.chain.clone(), self.policy.clone())
    }

    pub fn executor(&self) -> BatchExecutor {
        BatchExecutor::new(self.chain.clone(), self.chain.clone(), self.policy.clone())
    }

    pub fn tracker(&self) -> ProxyTracker {
        ProxyTracker::new(self.provisioner())
    }

    pub fn gate(&self) -> VersionGate {
        VersionGate::new(self.chain.clone())
    }

    pub fn workflow(&self, batch: BatchConfig) -> MigrationWorkflow {
        MigrationWorkflow::new(
            self.provisioner(),
            self.executor(),
            self.chain.clone(),
            self.chain.clone(),
            &self.chain_config(batch),
        )
    }

    /// Registrar submitting as the simulator's operator
    pub fn registrar(&self) -> NameRegistrar {
        NameRegistrar::new(
            self.provisioner(),
            self.chain.clone(),
            self.chain.operator().clone(),
        )
    }
}
