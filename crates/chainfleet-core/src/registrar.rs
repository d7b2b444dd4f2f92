//! Dependency-ordered name registration
//!
//! A node `label.parent` can only be created by the parent's current owner.
//! The registrar checks that before submitting anything, so an unauthorized
//! request fails with zero writes. Nodes that already resolve to the right
//! target are left alone, which keeps reruns idempotent even after a parent
//! has been handed to its final owner.
//!
//! Creation and ownership transfer are tracked in the ledger under
//! `names.<node>` (dots stored as `/`) like any other submission.

use crate::error::{ChainError, ProvisionError, RegistrarError};
use crate::provision::{Provisioner, Resolution};
use crate::types::{Address, PendingRef};
use chainfleet_ledger::{segment, LedgerKey};
use std::sync::Arc;

/// Hierarchical name service
#[async_trait::async_trait]
pub trait NameService: Send + Sync {
    /// Current owner of `node`, `None` if unowned
    async fn owner(&self, node: &str) -> Result<Option<Address>, ChainError>;

    /// Target `node` resolves to, `None` if unset
    async fn resolve(&self, node: &str) -> Result<Option<Address>, ChainError>;

    /// Create `label.parent` owned by `owner`, pointing at `target`
    async fn create_subnode(
        &self,
        parent: &str,
        label: &str,
        owner: &Address,
        target: &Address,
    ) -> Result<PendingRef, ChainError>;

    /// Hand `node` to `owner`
    async fn set_owner(&self, node: &str, owner: &Address) -> Result<PendingRef, ChainError>;
}

/// Desired end state of one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameRequest {
    /// Full dotted name, e.g. `vault.fleet.eth`
    pub node: String,
    /// Address the node must resolve to
    pub target: Address,
    /// Final owner, when it differs from the registering caller
    pub final_owner: Option<Address>,
}

impl NameRequest {
    /// Create request kept by the caller
    #[must_use]
    pub fn new(node: impl Into<String>, target: Address) -> Self {
        Self {
            node: node.into(),
            target,
            final_owner: None,
        }
    }

    /// With a different final owner
    #[inline]
    #[must_use]
    pub fn with_final_owner(mut self, owner: Address) -> Self {
        self.final_owner = Some(owner);
        self
    }

    /// `(label, parent)`, `None` for a top-level name
    #[must_use]
    pub fn split(&self) -> Option<(&str, &str)> {
        self.node
            .split_once('.')
            .filter(|(label, parent)| !label.is_empty() && !parent.is_empty())
    }

    /// Number of labels above this node
    #[must_use]
    pub fn depth(&self) -> usize {
        self.node.matches('.').count()
    }
}

/// What [`NameRegistrar::register`] did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registration {
    pub node: String,
    pub created: bool,
    pub transferred: bool,
}

impl Registration {
    /// Nothing was submitted
    #[inline]
    #[must_use]
    pub fn is_noop(&self) -> bool {
        !self.created && !self.transferred
    }
}

/// Registers nodes on behalf of `caller`
#[derive(Clone)]
pub struct NameRegistrar {
    provisioner: Provisioner,
    names: Arc<dyn NameService>,
    caller: Address,
}

impl std::fmt::Debug for NameRegistrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NameRegistrar")
            .field("caller", &self.caller)
            .finish_non_exhaustive()
    }
}

impl NameRegistrar {
    /// Create registrar submitting as `caller`
    #[must_use]
    pub fn new(provisioner: Provisioner, names: Arc<dyn NameService>, caller: Address) -> Self {
        Self {
            provisioner,
            names,
            caller,
        }
    }

    /// Bring one node to its desired state
    ///
    /// # Errors
    /// - `RegistrarError::InvalidName` for a name without a parent
    /// - `RegistrarError::Unauthorized` if the caller does not own the parent;
    ///   nothing is submitted
    /// - `RegistrarError::TransferUnauthorized` if a hand-over is needed but
    ///   the caller does not own the node
    /// - `RegistrarError::Diverged` if a recorded or confirmed creation is
    ///   not reflected by the name service
    pub async fn register(&self, request: &NameRequest) -> Result<Registration, RegistrarError> {
        let created = self.ensure_created(request).await?;
        let transferred = self.ensure_owner(request).await?;
        Ok(Registration {
            node: request.node.clone(),
            created,
            transferred,
        })
    }

    /// Register many nodes: parents are created before children, and
    /// ownership is handed over child-first once every node exists
    ///
    /// # Errors
    /// The first failure; earlier nodes stay registered.
    pub async fn register_all(
        &self,
        requests: &[NameRequest],
    ) -> Result<Vec<Registration>, RegistrarError> {
        let mut order: Vec<usize> = (0..requests.len()).collect();
        order.sort_by_key(|&i| requests[i].depth());

        let mut done: Vec<Registration> = requests
            .iter()
            .map(|r| Registration {
                node: r.node.clone(),
                ..Registration::default()
            })
            .collect();

        for &i in &order {
            done[i].created = self.ensure_created(&requests[i]).await?;
        }
        for &i in order.iter().rev() {
            done[i].transferred = self.ensure_owner(&requests[i]).await?;
        }
        Ok(done)
    }

    async fn ensure_created(&self, request: &NameRequest) -> Result<bool, RegistrarError> {
        let node = request.node.as_str();
        let (label, parent) = request
            .split()
            .ok_or_else(|| RegistrarError::InvalidName(node.to_string()))?;
        let key = node_key(node)?;

        let resolved = self.query(node, self.names.resolve(node)).await?;
        if resolved.as_ref() == Some(&request.target) {
            self.provisioner
                .commit(&key, "target", &request.target)
                .await?;
            tracing::debug!(node, target = %request.target, "already resolves");
            return Ok(false);
        }

        let parent_owner = self.query(parent, self.names.owner(parent)).await?;
        if parent_owner.as_ref() != Some(&self.caller) {
            tracing::error!(node, parent, caller = %self.caller, "caller does not own parent");
            return Err(RegistrarError::Unauthorized {
                node: node.to_string(),
                parent: parent.to_string(),
                parent_owner,
                caller: self.caller.clone(),
            });
        }

        self.forget_stale_target(&key, node, &request.target).await?;

        let names = Arc::clone(&self.names);
        let caller = self.caller.clone();
        let target = request.target.clone();
        let parent_name = parent.to_string();
        let label_name = label.to_string();
        let resolution = self
            .provisioner
            .resolve_or_submit::<Address, _, _>(&key, "target", || async move {
                names
                    .create_subnode(&parent_name, &label_name, &caller, &target)
                    .await
            })
            .await?;

        match resolution {
            Resolution::Known(recorded) => Err(RegistrarError::Diverged {
                node: node.to_string(),
                recorded,
                resolved,
            }),
            Resolution::Confirmed { pending, .. } => {
                let resolved = self.query(node, self.names.resolve(node)).await?;
                if resolved.as_ref() != Some(&request.target) {
                    tracing::error!(node, pending = %pending, resolved = ?resolved, "creation confirmed but not reflected");
                    return Err(RegistrarError::Diverged {
                        node: node.to_string(),
                        recorded: request.target.clone(),
                        resolved,
                    });
                }
                self.provisioner
                    .commit(&key, "target", &request.target)
                    .await?;
                tracing::info!(node, target = %request.target, "name created");
                Ok(true)
            }
        }
    }

    /// Drop a recorded creation for a different target so the node is re-pointed
    async fn forget_stale_target(
        &self,
        key: &LedgerKey,
        node: &str,
        target: &Address,
    ) -> Result<(), RegistrarError> {
        let ledger = self.provisioner.ledger();
        let target_key = key.child("target").map_err(ProvisionError::from)?;
        let recorded = ledger
            .get_as::<Address>(&target_key)
            .await
            .map_err(ProvisionError::from)?;
        match recorded {
            Some(recorded) if &recorded != target => {
                tracing::info!(node, recorded = %recorded, target = %target, "re-pointing name");
                ledger.remove(&target_key).await.map_err(ProvisionError::from)?;
                ledger.remove(&key.pending()).await.map_err(ProvisionError::from)?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn ensure_owner(&self, request: &NameRequest) -> Result<bool, RegistrarError> {
        let node = request.node.as_str();
        let desired = request.final_owner.as_ref().unwrap_or(&self.caller);
        let current = self.query(node, self.names.owner(node)).await?;
        if current.as_ref() == Some(desired) {
            return Ok(false);
        }
        if current.as_ref() != Some(&self.caller) {
            tracing::error!(node, owner = ?current, caller = %self.caller, "caller does not own node");
            return Err(RegistrarError::TransferUnauthorized {
                node: node.to_string(),
                owner: current,
                caller: self.caller.clone(),
            });
        }

        let key = node_key(node)?.child("transfer").map_err(ProvisionError::from)?;
        let names = Arc::clone(&self.names);
        let owner = desired.clone();
        let node_name = node.to_string();
        let resolution = self
            .provisioner
            .resolve_or_submit::<Address, _, _>(&key, "owner", || async move {
                names.set_owner(&node_name, &owner).await
            })
            .await?;
        match resolution {
            Resolution::Known(recorded) => {
                tracing::warn!(node, recorded = %recorded, current = ?current, "transfer recorded but not reflected");
                Ok(false)
            }
            Resolution::Confirmed { .. } => {
                self.provisioner.commit(&key, "owner", desired).await?;
                tracing::info!(node, owner = %desired, "ownership transferred");
                Ok(true)
            }
        }
    }

    async fn query<T>(
        &self,
        node: &str,
        read: impl std::future::Future<Output = Result<T, ChainError>>,
    ) -> Result<T, RegistrarError> {
        read.await.map_err(|source| RegistrarError::Query {
            node: node.to_string(),
            source,
        })
    }
}

fn node_key(node: &str) -> Result<LedgerKey, RegistrarError> {
    LedgerKey::parse("names")
        .and_then(|names| names.child(&segment(node)))
        .map_err(|err| ProvisionError::from(err).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_and_depth() {
        let req = NameRequest::new("vault.fleet.eth", Address::zero());
        assert_eq!(req.split(), Some(("vault", "fleet.eth")));
        assert_eq!(req.depth(), 2);
        assert_eq!(NameRequest::new("eth", Address::zero()).split(), None);
        assert_eq!(NameRequest::new(".eth", Address::zero()).split(), None);
    }
}
