//! Collaborator ports
//!
//! The engine never talks to a network directly. Everything it submits or
//! reads goes through these traits, implemented by a real client in
//! deployment scripts and by [`crate::simulator::SimulatedChain`] in tests.

use crate::error::ChainError;
use crate::types::{
    Address, ConstructorArgs, EncodedCall, EventRecord, PendingRef, Receipt, RawLog,
};
use crate::version::Version;
use serde::{Deserialize, Serialize};

/// Source of receipts for submitted operations
#[async_trait::async_trait]
pub trait Confirmer: Send + Sync {
    /// Wait for `pending` to be included and return its receipt
    ///
    /// Reverted submissions return a receipt with `Reverted` status, not an
    /// error.
    async fn receipt(&self, pending: &PendingRef) -> Result<Receipt, ChainError>;
}

/// A resource that can be deployed once and attached afterwards
#[async_trait::async_trait]
pub trait Deployable: Send + Sync {
    /// Handle type returned to callers
    type Handle: Send;

    /// Resource name, for logs
    fn name(&self) -> &str;

    /// Submit the deployment
    async fn deploy(&self, args: &ConstructorArgs) -> Result<PendingRef, ChainError>;

    /// Bind a handle to an existing deployment
    fn attach(&self, address: &Address) -> Self::Handle;
}

/// Anything that can report the code version behind an address
#[async_trait::async_trait]
pub trait VersionSource: Send + Sync {
    /// Self-reported semantic version; `None` if the code has no version getter
    async fn version(&self, address: &Address) -> Result<Option<String>, ChainError>;
}

/// Implementation code offered for an upgrade
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImplementationCode {
    /// Contract name
    pub name: String,
    /// Version the new implementation reports
    pub version: Version,
    /// Collaborator-specific artifact reference (bytecode hash, build id)
    pub artifact: String,
}

/// Options passed through to the upgrade collaborator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeOptions {
    /// Call executed atomically with the upgrade
    pub call: Option<EncodedCall>,
    /// Skip the collaborator's storage layout check
    pub unsafe_skip_storage_check: bool,
}

/// Proxy-backed resource with a swappable implementation
#[async_trait::async_trait]
pub trait Upgradeable: Deployable + VersionSource {
    /// Submit an implementation swap for `proxy`
    async fn upgrade(
        &self,
        proxy: &Address,
        code: &ImplementationCode,
        opts: &UpgradeOptions,
    ) -> Result<PendingRef, ChainError>;

    /// Implementation currently behind `proxy`
    async fn implementation_address(&self, proxy: &Address) -> Result<Address, ChainError>;
}

/// Submission of calls, alone or bundled
#[async_trait::async_trait]
pub trait BatchSubmitter: Send + Sync {
    /// Submit one call
    async fn submit(&self, call: &EncodedCall) -> Result<PendingRef, ChainError>;

    /// Submit calls bundled into one multicall operation
    async fn submit_multicall(&self, calls: &[EncodedCall]) -> Result<PendingRef, ChainError>;
}

/// Typed event decoding, matched by event name
pub trait EventDecoder: Send + Sync {
    /// Decode `log` as event `name`; `None` if the log is a different event
    fn decode_event(&self, name: &str, log: &RawLog) -> Option<EventRecord>;
}

/// All events named `name` in `receipt`, in log order
pub fn decode_events(decoder: &dyn EventDecoder, receipt: &Receipt, name: &str) -> Vec<EventRecord> {
    receipt
        .logs
        .iter()
        .filter_map(|log| decoder.decode_event(name, log))
        .collect()
}
