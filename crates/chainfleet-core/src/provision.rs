//! Resource provisioning primitive
//!
//! Idempotent deploy-or-attach on top of the ledger. For a key `K`:
//! 1. `K.address` recorded: attach, no side effect
//! 2. `K-pending` recorded: await that submission, persist the address
//! 3. Otherwise submit, persist `K-pending`, await, persist `K.address`
//!
//! The pending reference is always durable before the await, so a crash
//! at any point resumes without a second submission. The terminal field
//! is generic: deployments resolve `address`, migration groups resolve
//! `poolId`, name nodes resolve `target`.

use crate::chain::{Confirmer, Deployable};
use crate::confirm::{await_receipt, ConfirmationPolicy};
use crate::error::{ChainError, ProvisionError};
use crate::types::{Address, ConstructorArgs, PendingRef, Receipt};
use chainfleet_ledger::{Ledger, LedgerKey};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;

/// How a provisioned value was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Already recorded; nothing submitted
    Attached,
    /// Resolved from a pending submission left by an earlier run
    Recovered,
    /// Submitted and confirmed by this call
    Deployed,
}

/// Result of [`Provisioner::resolve_or_submit`]
#[derive(Debug, Clone)]
pub enum Resolution<T> {
    /// Terminal value already in the ledger
    Known(T),
    /// Submission confirmed; caller extracts and commits the value
    Confirmed {
        pending: PendingRef,
        receipt: Receipt,
        recovered: bool,
    },
}

/// Provisioned resource
#[derive(Debug, Clone)]
pub struct Provisioned<H> {
    /// Handle bound to the resolved address
    pub handle: H,
    /// Resolved address
    pub address: Address,
    /// How the address was obtained
    pub outcome: Outcome,
}

/// Deploy-or-attach engine bound to one network ledger
#[derive(Clone)]
pub struct Provisioner {
    ledger: Ledger,
    confirmer: Arc<dyn Confirmer>,
    policy: ConfirmationPolicy,
}

impl std::fmt::Debug for Provisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provisioner")
            .field("network", &self.ledger.network())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Provisioner {
    /// Create provisioner
    #[must_use]
    pub fn new(ledger: Ledger, confirmer: Arc<dyn Confirmer>, policy: ConfirmationPolicy) -> Self {
        Self {
            ledger,
            confirmer,
            policy,
        }
    }

    /// Ledger this provisioner records into
    #[inline]
    #[must_use]
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Confirmation policy
    #[inline]
    #[must_use]
    pub fn policy(&self) -> &ConfirmationPolicy {
        &self.policy
    }

    /// Deploy `resource` under `key` at most once, or attach to the recorded address
    ///
    /// # Errors
    /// - `ProvisionError::Submit` if the deployment cannot be submitted
    /// - `ProvisionError::Confirm` if the submission never confirms or reverts;
    ///   the pending reference stays recorded
    /// - `ProvisionError::MissingAddress` if the receipt has no contract address
    pub async fn provision<D: Deployable + ?Sized>(
        &self,
        key: &LedgerKey,
        resource: &D,
        args: &ConstructorArgs,
    ) -> Result<Provisioned<D::Handle>, ProvisionError> {
        let resolution = self
            .resolve_or_submit::<Address, _, _>(key, "address", || resource.deploy(args))
            .await?;

        let (address, outcome) = match resolution {
            Resolution::Known(address) => {
                tracing::debug!(key = %key, address = %address, "attached to recorded deployment");
                (address, Outcome::Attached)
            }
            Resolution::Confirmed {
                pending,
                receipt,
                recovered,
            } => {
                let address = receipt
                    .contract_address
                    .ok_or_else(|| ProvisionError::MissingAddress {
                        key: key.to_string(),
                        pending,
                    })?;
                self.commit(key, "address", &address).await?;
                tracing::info!(
                    key = %key,
                    resource = resource.name(),
                    address = %address,
                    recovered,
                    "deployment recorded"
                );
                let outcome = if recovered {
                    Outcome::Recovered
                } else {
                    Outcome::Deployed
                };
                (address, outcome)
            }
        };

        Ok(Provisioned {
            handle: resource.attach(&address),
            address,
            outcome,
        })
    }

    /// Return the recorded `key.field`, or drive a submission to confirmation
    ///
    /// `submit` runs only if neither the terminal value nor a pending
    /// reference is recorded. Its reference is persisted before awaiting.
    /// On `Confirmed` the caller must extract the value from the receipt and
    /// [`commit`](Self::commit) it.
    ///
    /// # Errors
    /// Ledger, submission and confirmation failures.
    pub async fn resolve_or_submit<T, F, Fut>(
        &self,
        key: &LedgerKey,
        field: &str,
        submit: F,
    ) -> Result<Resolution<T>, ProvisionError>
    where
        T: DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<PendingRef, ChainError>>,
    {
        let value_key = key.child(field)?;
        if let Some(value) = self.ledger.get_as::<T>(&value_key).await? {
            return Ok(Resolution::Known(value));
        }

        let pending_key = key.pending();
        if let Some(pending) = self.ledger.get_as::<PendingRef>(&pending_key).await? {
            tracing::info!(key = %key, pending = %pending, "resuming pending submission");
            let receipt = self.confirm(key, &pending).await?;
            return Ok(Resolution::Confirmed {
                pending,
                receipt,
                recovered: true,
            });
        }

        let pending = submit().await.map_err(|source| ProvisionError::Submit {
            key: key.to_string(),
            source,
        })?;
        self.ledger.set(&pending_key, &pending).await?;
        tracing::info!(key = %key, pending = %pending, "submitted, awaiting confirmation");

        let receipt = self.confirm(key, &pending).await?;
        Ok(Resolution::Confirmed {
            pending,
            receipt,
            recovered: false,
        })
    }

    /// Persist the terminal value for `key.field`
    ///
    /// # Errors
    /// Ledger failures.
    pub async fn commit<T: Serialize + ?Sized>(
        &self,
        key: &LedgerKey,
        field: &str,
        value: &T,
    ) -> Result<(), ProvisionError> {
        self.ledger.set(&key.child(field)?, value).await?;
        Ok(())
    }

    /// Await `pending` under this provisioner's policy
    ///
    /// # Errors
    /// `ProvisionError::Confirm` wrapping the confirmation failure.
    pub async fn confirm(
        &self,
        key: &LedgerKey,
        pending: &PendingRef,
    ) -> Result<Receipt, ProvisionError> {
        await_receipt(self.confirmer.as_ref(), pending, &self.policy)
            .await
            .map_err(|source| ProvisionError::Confirm {
                key: key.to_string(),
                source,
            })
    }

    /// Operator intervention: forget the pending reference for `key`
    ///
    /// Returns the removed reference. Only safe once the submission is known
    /// to have been dropped.
    ///
    /// # Errors
    /// Ledger failures.
    pub async fn clear_pending(&self, key: &LedgerKey) -> Result<Option<PendingRef>, ProvisionError> {
        let removed = self.ledger.remove(&key.pending()).await?;
        Ok(removed.and_then(|v| serde_json::from_value(v).ok()))
    }
}
