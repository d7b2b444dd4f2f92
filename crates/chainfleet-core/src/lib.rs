//! chainfleet Core - idempotent provisioning and resumable migration
//!
//! Drives multi-step deployments of on-chain fleets so that every step can
//! be interrupted and re-run without duplicating side effects:
//! - Deploy-or-attach provisioning keyed by the ledger
//! - Proxy upgrades tracked by implementation version
//! - Version-gated post-deploy wiring
//! - Chunked multicall submission with bounded parallelism
//! - Group-by-group item migration marked from receipt evidence
//! - Parent-before-child name registration with ownership handover
//!
//! # Example
//!
//! ```rust,ignore
//! use chainfleet_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), FleetError> {
//! let chain = Arc::new(SimulatedChain::new(SimConfig::default()));
//! let provisioner = Provisioner::new(
//!     Ledger::in_memory("sim"),
//!     chain.clone(),
//!     ConfirmationPolicy::default(),
//! );
//!
//! let token = chain.contract("Token", "1.0.0");
//! let key = LedgerKey::parse("Token")?;
//! let deployed = provisioner.provision(&key, &token, &vec![]).await?;
//! println!("Token at {}", deployed.address);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Core modules
pub mod batch;
pub mod chain;
pub mod config;
pub mod confirm;
pub mod error;
pub mod gate;
pub mod migration;
pub mod provision;
pub mod proxy;
pub mod registrar;
pub mod simulator;
pub mod types;
pub mod version;

// Re-exports for convenience
pub use batch::{BatchExecutor, BatchSummary, ChunkReceipt, CollectReceipts, ReceiptSink};
pub use chain::{
    decode_events, BatchSubmitter, Confirmer, Deployable, EventDecoder, ImplementationCode,
    UpgradeOptions, Upgradeable, VersionSource,
};
pub use config::{BatchConfig, ChainConfig, EngineConfig, MigrationConfig, MigrationEvents};
pub use confirm::{await_receipt, ConfirmationPolicy};
pub use error::{
    BatchError, ChainError, ConfigError, ConfirmError, FleetError, GateError, MigrationError,
    ProvisionError, ProxyError, RegistrarError,
};
pub use gate::{reported_version, GateDecision, GateReport, VersionGate, WiringStep};
pub use migration::{
    group_status, namespace_status, GroupState, MigrationGroup, MigrationItem, MigrationReport,
    MigrationStatus, MigrationTarget, MigrationWorkflow,
};
pub use provision::{Outcome, Provisioned, Provisioner, Resolution};
pub use proxy::{ProxyRecord, ProxyTracker, UpgradeOutcome};
pub use registrar::{NameRegistrar, NameRequest, NameService, Registration};
pub use types::{
    Address, ChainId, ConstructorArgs, EncodedCall, EventRecord, InvalidAddress, PendingRef,
    RawLog, Receipt, ReceiptStatus,
};
pub use version::{InvalidVersion, Version};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for driving a fleet
    pub use crate::simulator::{SimConfig, SimulatedChain};
    pub use crate::{
        Address, BatchConfig, BatchExecutor, ChainConfig, ChainId, ConfirmationPolicy,
        Deployable, EngineConfig, FleetError, MigrationItem, MigrationWorkflow, NameRegistrar,
        NameRequest, Provisioner, ProxyTracker, Upgradeable, Version, VersionGate,
    };
    pub use chainfleet_ledger::{Ledger, LedgerKey};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
