//! Version-gated configuration
//!
//! Post-deploy wiring calls only make sense on code new enough to accept
//! them, and only once. Each [`WiringStep`] is planned as:
//! 1. read the target's reported version (`0.0.0` if unreadable)
//! 2. below the step's minimum: skip, "not yet applicable"
//! 3. already applied per state or event history: skip
//! 4. otherwise encode the call
//!
//! Skipped steps become `None` and are dropped by the batch executor.

use crate::batch::BatchExecutor;
use crate::chain::VersionSource;
use crate::config::BatchConfig;
use crate::error::{ChainError, GateError};
use crate::types::{Address, EncodedCall, Receipt};
use crate::version::Version;
use std::sync::Arc;

/// One post-deploy wiring call
#[async_trait::async_trait]
pub trait WiringStep: Send + Sync {
    /// Step name, for logs
    fn name(&self) -> &str;

    /// Resource the call is applied to
    fn target(&self) -> &Address;

    /// Minimum implementation version accepting the call
    fn min_version(&self) -> &Version;

    /// Whether existing state or event history shows the call was applied
    async fn already_applied(&self) -> Result<bool, ChainError>;

    /// Encode the call
    fn encode(&self) -> Result<EncodedCall, ChainError>;
}

/// Planning decision for one step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Submit this call
    Apply(EncodedCall),
    /// Target code is older than the step requires
    NotYetApplicable { found: Version, required: Version },
    /// Pre-check shows the step already took effect
    AlreadyApplied,
}

/// Counts from [`VersionGate::configure_fleet`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GateReport {
    /// Calls submitted
    pub applied: usize,
    /// Steps skipped for version
    pub not_applicable: usize,
    /// Steps skipped as already applied
    pub already_applied: usize,
    /// Receipts of the submitted chunks
    pub receipts: Vec<Receipt>,
}

/// Self-reported version of `address`, `0.0.0` when it cannot be read
pub async fn reported_version<V: VersionSource + ?Sized>(source: &V, address: &Address) -> Version {
    match source.version(address).await {
        Ok(Some(raw)) => Version::parse(&raw).unwrap_or_else(|err| {
            tracing::debug!(address = %address, error = %err, "unparsable version, assuming 0.0.0");
            Version::ZERO
        }),
        Ok(None) => Version::ZERO,
        Err(err) => {
            tracing::debug!(address = %address, error = %err, "version unreadable, assuming 0.0.0");
            Version::ZERO
        }
    }
}

/// Plans wiring steps against reported versions
#[derive(Clone)]
pub struct VersionGate {
    versions: Arc<dyn VersionSource>,
}

impl std::fmt::Debug for VersionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionGate").finish_non_exhaustive()
    }
}

impl VersionGate {
    /// Create gate reading versions from `versions`
    #[inline]
    #[must_use]
    pub fn new(versions: Arc<dyn VersionSource>) -> Self {
        Self { versions }
    }

    /// Decide what to do with `step`
    ///
    /// # Errors
    /// `GateError::Check` if the applied pre-check fails, `GateError::Encode`
    /// if the call cannot be encoded. An unreadable version is not an error.
    pub async fn decide(&self, step: &dyn WiringStep) -> Result<GateDecision, GateError> {
        let found = reported_version(self.versions.as_ref(), step.target()).await;
        let required = step.min_version().clone();
        if found < required {
            tracing::info!(
                step = step.name(),
                target = %step.target(),
                found = %found,
                required = %required,
                "not yet applicable"
            );
            return Ok(GateDecision::NotYetApplicable { found, required });
        }

        let applied = step.already_applied().await.map_err(|source| GateError::Check {
            step: step.name().to_string(),
            source,
        })?;
        if applied {
            tracing::debug!(step = step.name(), target = %step.target(), "already applied");
            return Ok(GateDecision::AlreadyApplied);
        }

        let call = step.encode().map_err(|source| GateError::Encode {
            step: step.name().to_string(),
            source,
        })?;
        Ok(GateDecision::Apply(call))
    }

    /// Encoded call for `step`, or `None` when it must be skipped
    ///
    /// # Errors
    /// As [`VersionGate::decide`].
    pub async fn plan(&self, step: &dyn WiringStep) -> Result<Option<EncodedCall>, GateError> {
        Ok(match self.decide(step).await? {
            GateDecision::Apply(call) => Some(call),
            GateDecision::NotYetApplicable { .. } | GateDecision::AlreadyApplied => None,
        })
    }

    /// Plan every step and submit the surviving calls in batches
    ///
    /// # Errors
    /// Planning failures, or `GateError::Batch` if a chunk fails.
    pub async fn configure_fleet(
        &self,
        steps: &[Arc<dyn WiringStep>],
        executor: &BatchExecutor,
        batch: BatchConfig,
    ) -> Result<GateReport, GateError> {
        let mut report = GateReport::default();
        let mut operations = Vec::with_capacity(steps.len());

        for step in steps {
            let decision = self.decide(step.as_ref()).await?;
            operations.push(match decision {
                GateDecision::Apply(call) => {
                    report.applied += 1;
                    Some(call)
                }
                GateDecision::NotYetApplicable { .. } => {
                    report.not_applicable += 1;
                    None
                }
                GateDecision::AlreadyApplied => {
                    report.already_applied += 1;
                    None
                }
            });
        }

        report.receipts = executor
            .execute_batch(operations, batch.chunk_size, batch.parallelism)
            .await?;
        tracing::info!(
            applied = report.applied,
            not_applicable = report.not_applicable,
            already_applied = report.already_applied,
            "fleet configuration finished"
        );
        Ok(report)
    }
}
