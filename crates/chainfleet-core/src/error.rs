//! Error types for chainfleet core
//!
//! Provides error handling for:
//! - Chain collaborator failures (submission, calls, confirmation)
//! - Provisioning and proxy upgrades
//! - Batch execution and migration bookkeeping
//! - Name registration authorization
//! - Configuration loading
//!
//! Nothing here is caught and retried implicitly except transient
//! confirmation failures (see [`crate::confirm`]). Every other error ends
//! the run; re-invocation resumes from the ledger.

use crate::types::{Address, ChainId, InvalidAddress, PendingRef};
use crate::version::{InvalidVersion, Version};
use chainfleet_ledger::LedgerError;
use std::path::PathBuf;

/// Main chainfleet error type
#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    /// Ledger read/write failed
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Provisioning failed
    #[error("provisioning failed: {0}")]
    Provision(#[from] ProvisionError),

    /// Proxy deploy/upgrade failed
    #[error("proxy error: {0}")]
    Proxy(#[from] ProxyError),

    /// Version-gated configuration failed
    #[error("configuration step failed: {0}")]
    Gate(#[from] GateError),

    /// Batch execution failed
    #[error("batch failed: {0}")]
    Batch(#[from] BatchError),

    /// Migration failed
    #[error("migration failed: {0}")]
    Migration(#[from] MigrationError),

    /// Name registration failed
    #[error("name registration failed: {0}")]
    Registrar(#[from] RegistrarError),

    /// Configuration invalid
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl FleetError {
    /// Check if re-running the pipeline may succeed without operator action
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provision(e)
            | Self::Proxy(ProxyError::Provision(e))
            | Self::Migration(MigrationError::Provision(e))
            | Self::Registrar(RegistrarError::Provision(e)) => e.is_retryable(),
            Self::Batch(e)
            | Self::Gate(GateError::Batch(e))
            | Self::Migration(MigrationError::Batch(e)) => e.is_retryable(),
            Self::Proxy(ProxyError::Submit { source, .. }) => source.is_transient(),
            _ => false,
        }
    }

    /// Check if an operator must inspect the chain and edit the ledger
    #[must_use]
    pub fn requires_intervention(&self) -> bool {
        match self {
            Self::Provision(e) | Self::Proxy(ProxyError::Provision(e)) => e.requires_intervention(),
            Self::Migration(MigrationError::Provision(e))
            | Self::Registrar(RegistrarError::Provision(e)) => e.requires_intervention(),
            Self::Registrar(RegistrarError::Diverged { .. })
            | Self::Migration(MigrationError::GroupIdMissing { .. }) => true,
            _ => false,
        }
    }

    /// What the operator should do before re-running, when intervention is required
    #[must_use]
    pub fn intervention_hint(&self) -> Option<String> {
        match self {
            Self::Provision(e)
            | Self::Proxy(ProxyError::Provision(e))
            | Self::Migration(MigrationError::Provision(e))
            | Self::Registrar(RegistrarError::Provision(e)) => e.intervention_hint(),
            Self::Migration(MigrationError::GroupIdMissing { owner, pending, .. }) => Some(format!(
                "find the group created by {pending} for {owner} and record its id, or clear the pending reference under the group key"
            )),
            Self::Registrar(RegistrarError::Diverged { node, .. }) => Some(format!(
                "check who controls '{node}', then fix or remove its ledger record"
            )),
            _ => None,
        }
    }
}

/// Errors reported by chain collaborators
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChainError {
    /// Temporary failure (RPC timeout, rate limit); may be retried
    #[error("transient chain error: {0}")]
    Transient(String),

    /// Submission refused by the node
    #[error("submission rejected: {0}")]
    Rejected(String),

    /// Network no longer knows the submission
    #[error("submission {0} was dropped by the network")]
    Dropped(PendingRef),

    /// Read-only call failed
    #[error("call failed: {0}")]
    CallFailed(String),

    /// Call could not be encoded
    #[error("encoding failed: {0}")]
    Encoding(String),

    /// Collaborator returned a malformed address
    #[error(transparent)]
    InvalidAddress(#[from] InvalidAddress),
}

impl ChainError {
    /// Whether this failure may clear up on retry
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Awaiting confirmation failed
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfirmError {
    /// Included but reverted
    #[error("submission {pending} reverted in block {block_number}")]
    Reverted {
        pending: PendingRef,
        block_number: u64,
    },

    /// Network dropped the submission; it will never confirm
    #[error("submission {0} was dropped and will never confirm")]
    Dropped(PendingRef),

    /// Every attempt timed out
    #[error("submission {pending} unconfirmed after {attempts} attempts")]
    TimedOut { pending: PendingRef, attempts: u32 },

    /// Transient errors outlasted the retry budget
    #[error("confirming {pending} failed after {attempts} attempts: {last}")]
    Exhausted {
        pending: PendingRef,
        attempts: u32,
        last: ChainError,
    },

    /// Non-transient collaborator failure
    #[error("confirming {pending} failed: {source}")]
    Chain {
        pending: PendingRef,
        #[source]
        source: ChainError,
    },
}

impl ConfirmError {
    /// Whether a later run may confirm the same submission
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TimedOut { .. } | Self::Exhausted { .. })
    }
}

/// Provisioning errors
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// Ledger access failed
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Submitting the operation failed; nothing was persisted
    #[error("submitting '{key}' failed: {source}")]
    Submit {
        key: String,
        #[source]
        source: ChainError,
    },

    /// The pending submission did not confirm
    #[error("confirming '{key}' failed: {source}")]
    Confirm {
        key: String,
        #[source]
        source: ConfirmError,
    },

    /// Deployment receipt carried no contract address
    #[error("deployment of '{key}' confirmed in {pending} without a contract address")]
    MissingAddress { key: String, pending: PendingRef },

    /// Post-deploy read failed
    #[error("reading '{key}' after confirmation failed: {source}")]
    Read {
        key: String,
        #[source]
        source: ChainError,
    },
}

impl ProvisionError {
    /// Transient submission or confirmation failure
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Submit { source, .. } => source.is_transient(),
            Self::Confirm { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Whether the pending reference must be cleared by an operator
    #[must_use]
    pub fn requires_intervention(&self) -> bool {
        matches!(
            self,
            Self::Confirm {
                source: ConfirmError::Dropped(_) | ConfirmError::Reverted { .. },
                ..
            } | Self::MissingAddress { .. }
        )
    }

    /// Operator hint naming the ledger key to clear, when applicable
    #[must_use]
    pub fn intervention_hint(&self) -> Option<String> {
        match self {
            Self::Confirm { key, .. } | Self::MissingAddress { key, .. }
                if self.requires_intervention() =>
            {
                Some(format!(
                    "inspect the submission, then run `chainfleet ledger clear-pending {key}` to allow resubmission"
                ))
            }
            _ => None,
        }
    }
}

/// Proxy tracker errors
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Underlying provisioning failed
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    /// Ledger access failed
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Upgrade requested before the proxy exists
    #[error("proxy '{0}' has not been deployed")]
    NotDeployed(String),

    /// Submitting the upgrade failed
    #[error("submitting upgrade of '{key}' to {target} failed: {source}")]
    Submit {
        key: String,
        target: Version,
        #[source]
        source: ChainError,
    },
}

/// Version-gated configuration errors
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// Pre-check read failed
    #[error("checking '{step}' failed: {source}")]
    Check {
        step: String,
        #[source]
        source: ChainError,
    },

    /// Encoding the wiring call failed
    #[error("encoding '{step}' failed: {source}")]
    Encode {
        step: String,
        #[source]
        source: ChainError,
    },

    /// Submitting the planned calls failed
    #[error(transparent)]
    Batch(#[from] BatchError),
}

/// Batch executor errors
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// Chunk size or parallelism is zero
    #[error("invalid batch configuration: chunk size {chunk_size}, parallelism {parallelism}")]
    InvalidConfig {
        chunk_size: usize,
        parallelism: usize,
    },

    /// Submitting a chunk failed
    #[error("submitting chunk {index} failed: {source}")]
    Submit {
        index: usize,
        #[source]
        source: ChainError,
    },

    /// Chunk confirmation failed or reverted
    #[error("chunk {index} did not confirm: {source}")]
    Confirm {
        index: usize,
        #[source]
        source: ConfirmError,
    },

    /// Per-chunk bookkeeping failed
    #[error("recording chunk receipt failed: {0}")]
    Ledger(#[from] LedgerError),
}

impl BatchError {
    /// Transient chunk submission or confirmation failure
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Submit { source, .. } => source.is_transient(),
            Self::Confirm { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

/// Migration workflow errors
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// Ledger access failed
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Group creation submission failed
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    /// Item batch failed
    #[error(transparent)]
    Batch(#[from] BatchError),

    /// Encoding a migration call failed
    #[error("encoding migration call for {owner} failed: {source}")]
    Encode {
        owner: Address,
        #[source]
        source: ChainError,
    },

    /// Creation receipt lacked the group id event
    #[error("group creation for {owner} confirmed in {pending} without a '{event}' event")]
    GroupIdMissing {
        owner: Address,
        pending: PendingRef,
        event: String,
    },

    /// Discovered item belongs to a different chain or owner
    #[error("item '{item}' does not belong to group {owner} on chain {chain_id}")]
    ForeignItem {
        item: String,
        owner: Address,
        chain_id: ChainId,
    },
}

/// Name registrar errors
#[derive(Debug, thiserror::Error)]
pub enum RegistrarError {
    /// Caller does not own the parent node; nothing was submitted
    #[error("{caller} cannot create '{node}': parent '{parent}' is owned by {}", owner_label(.parent_owner))]
    Unauthorized {
        node: String,
        parent: String,
        parent_owner: Option<Address>,
        caller: Address,
    },

    /// Caller does not own the node it should hand over; nothing was submitted
    #[error("{caller} cannot hand over '{node}': it is owned by {}", owner_label(.owner))]
    TransferUnauthorized {
        node: String,
        owner: Option<Address>,
        caller: Address,
    },

    /// Name has no parent
    #[error("invalid name '{0}': expected label.parent")]
    InvalidName(String),

    /// Recorded or just-confirmed creation is not what the name service resolves
    #[error("'{node}' is recorded as pointing at {recorded} but resolves to {}", owner_label(.resolved))]
    Diverged {
        node: String,
        recorded: Address,
        resolved: Option<Address>,
    },

    /// Name service read failed
    #[error("name service query for '{node}' failed: {source}")]
    Query {
        node: String,
        #[source]
        source: ChainError,
    },

    /// Creation or ownership transfer failed
    #[error(transparent)]
    Provision(#[from] ProvisionError),
}

fn owner_label(owner: &Option<Address>) -> String {
    owner
        .as_ref()
        .map_or_else(|| "nobody".to_string(), ToString::to_string)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file unreadable
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for the schema
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Values out of range or inconsistent
    #[error("invalid config: {0}")]
    Invalid(String),

    /// No chain with this id is configured
    #[error("chain {0} is not configured")]
    UnknownChain(ChainId),

    /// Malformed version requirement
    #[error(transparent)]
    Version(#[from] InvalidVersion),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> PendingRef {
        PendingRef::new("0xfeed")
    }

    #[test]
    fn dropped_pending_requires_intervention() {
        let err = ProvisionError::Confirm {
            key: "Staking".into(),
            source: ConfirmError::Dropped(pending()),
        };
        assert!(err.requires_intervention());
        assert!(err.intervention_hint().unwrap().contains("clear-pending Staking"));

        let fleet = FleetError::from(err);
        assert!(fleet.requires_intervention());
        assert!(!fleet.is_retryable());
    }

    #[test]
    fn hint_survives_wrapping() {
        let err = FleetError::from(MigrationError::Provision(ProvisionError::Confirm {
            key: "migration.0xab".into(),
            source: ConfirmError::Dropped(pending()),
        }));
        assert!(err.intervention_hint().unwrap().contains("clear-pending migration.0xab"));

        let missing = FleetError::from(MigrationError::GroupIdMissing {
            owner: Address::zero(),
            pending: pending(),
            event: "PoolCreated".into(),
        });
        assert!(missing.requires_intervention());
        assert!(missing.intervention_hint().is_some());
    }

    #[test]
    fn timeouts_are_retryable() {
        let err = FleetError::from(ProvisionError::Confirm {
            key: "Staking".into(),
            source: ConfirmError::TimedOut {
                pending: pending(),
                attempts: 3,
            },
        });
        assert!(err.is_retryable());
        assert!(!err.requires_intervention());
    }

    #[test]
    fn unauthorized_names_parent_owner() {
        let err = RegistrarError::Unauthorized {
            node: "vault.fleet.eth".into(),
            parent: "fleet.eth".into(),
            parent_owner: None,
            caller: Address::zero(),
        };
        let msg = err.to_string();
        assert!(msg.contains("fleet.eth"));
        assert!(msg.contains("nobody"));
        assert!(!FleetError::from(err).is_retryable());
    }
}
