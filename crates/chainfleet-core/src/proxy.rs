//! Proxy upgrade tracker
//!
//! Layers implementation bookkeeping on the provisioning primitive. After
//! every confirmed deploy or upgrade the ledger records:
//! - `<key>.impl.address`: implementation behind the proxy
//! - `<key>.impl.version`: version the implementation reports
//! - `<key>.constructorArgs`: initializer arguments used
//!
//! Upgrades are keyed by target version. An in-flight upgrade is recorded
//! at `<key>-upgrade-pending` together with its target, so a restarted run
//! awaits it instead of submitting a second swap.

use crate::chain::{ImplementationCode, UpgradeOptions, Upgradeable};
use crate::error::{ProvisionError, ProxyError};
use crate::gate::reported_version;
use crate::provision::{Outcome, Provisioned, Provisioner};
use crate::types::{Address, ConstructorArgs, PendingRef};
use crate::version::Version;
use chainfleet_ledger::LedgerKey;
use serde::{Deserialize, Serialize};

const UPGRADE_SUFFIX: &str = "-upgrade";

/// Recorded state of an upgradeable resource
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProxyRecord {
    pub address: Option<Address>,
    pub implementation: Option<Address>,
    pub version: Option<Version>,
    pub constructor_args: Option<ConstructorArgs>,
}

/// Upgrade submitted but not yet recorded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct PendingUpgrade {
    pending: PendingRef,
    target: Version,
}

/// Result of [`ProxyTracker::upgrade`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeOutcome {
    /// Recorded version already satisfies the target
    Current(Version),
    /// Finished an upgrade left pending by an earlier run
    Recovered(Version),
    /// Submitted and confirmed by this call
    Upgraded(Version),
}

/// Version and implementation bookkeeping for proxies
#[derive(Debug, Clone)]
pub struct ProxyTracker {
    provisioner: Provisioner,
}

impl ProxyTracker {
    /// Create tracker on top of `provisioner`
    #[inline]
    #[must_use]
    pub fn new(provisioner: Provisioner) -> Self {
        Self { provisioner }
    }

    /// Deploy the proxy once and record its implementation
    ///
    /// Attaching to an existing proxy backfills the implementation record if
    /// an earlier run crashed before writing it.
    ///
    /// # Errors
    /// Provisioning failures, or `ProxyError::Provision` wrapping a failed
    /// post-deploy read.
    pub async fn deploy<U: Upgradeable + ?Sized>(
        &self,
        key: &LedgerKey,
        resource: &U,
        args: &ConstructorArgs,
    ) -> Result<Provisioned<U::Handle>, ProxyError> {
        let provisioned = self.provisioner.provision(key, resource, args).await?;

        let recorded = self
            .provisioner
            .ledger()
            .contains(&key.child("impl.address")?)
            .await?;
        if provisioned.outcome != Outcome::Attached || !recorded {
            let version = self
                .record_implementation(key, resource, &provisioned.address)
                .await?;
            self.provisioner
                .commit(key, "constructorArgs", args)
                .await?;
            tracing::info!(
                key = %key,
                proxy = %provisioned.address,
                version = %version,
                "proxy implementation recorded"
            );
        }
        Ok(provisioned)
    }

    /// Upgrade the proxy to `code` unless the recorded version already satisfies it
    ///
    /// # Errors
    /// - `ProxyError::NotDeployed` if `key` has no recorded proxy
    /// - `ProxyError::Submit` if the upgrade cannot be submitted
    /// - confirmation and ledger failures
    pub async fn upgrade<U: Upgradeable + ?Sized>(
        &self,
        key: &LedgerKey,
        resource: &U,
        code: &ImplementationCode,
        opts: &UpgradeOptions,
    ) -> Result<UpgradeOutcome, ProxyError> {
        let ledger = self.provisioner.ledger();
        let proxy: Address = ledger
            .get_as(&key.child("address")?)
            .await?
            .ok_or_else(|| ProxyError::NotDeployed(key.to_string()))?;

        let recorded = self.recorded_version(key).await?;
        if recorded >= code.version {
            tracing::debug!(key = %key, recorded = %recorded, target = %code.version, "upgrade not needed");
            return Ok(UpgradeOutcome::Current(recorded));
        }

        let upgrade_key = key.with_suffix(UPGRADE_SUFFIX);
        let pending_key = upgrade_key.pending();

        let stale = ledger
            .get_as::<PendingUpgrade>(&pending_key)
            .await?
            .filter(|stale| stale.target > recorded);
        if let Some(stale) = stale {
            tracing::info!(
                key = %key,
                pending = %stale.pending,
                target = %stale.target,
                "resuming pending upgrade"
            );
            self.provisioner.confirm(&upgrade_key, &stale.pending).await?;
            let version = self.record_implementation(key, resource, &proxy).await?;
            ledger.remove(&pending_key).await?;
            if stale.target == code.version || version >= code.version {
                return Ok(UpgradeOutcome::Recovered(version));
            }
        }

        let pending = resource
            .upgrade(&proxy, code, opts)
            .await
            .map_err(|source| ProxyError::Submit {
                key: key.to_string(),
                target: code.version.clone(),
                source,
            })?;
        ledger
            .set(
                &pending_key,
                &PendingUpgrade {
                    pending: pending.clone(),
                    target: code.version.clone(),
                },
            )
            .await?;
        tracing::info!(key = %key, pending = %pending, target = %code.version, "upgrade submitted");

        self.provisioner.confirm(&upgrade_key, &pending).await?;
        let version = self.record_implementation(key, resource, &proxy).await?;
        ledger.remove(&pending_key).await?;
        if version < code.version {
            tracing::warn!(
                key = %key,
                reported = %version,
                target = %code.version,
                "implementation reports an older version than the upgrade target"
            );
        }
        Ok(UpgradeOutcome::Upgraded(version))
    }

    /// Recorded implementation version, `0.0.0` if none
    ///
    /// # Errors
    /// Ledger failures.
    pub async fn recorded_version(&self, key: &LedgerKey) -> Result<Version, ProxyError> {
        Ok(self
            .provisioner
            .ledger()
            .get_as::<Version>(&key.child("impl.version")?)
            .await?
            .unwrap_or_default())
    }

    /// Everything recorded for `key`
    ///
    /// # Errors
    /// Ledger failures.
    pub async fn record(&self, key: &LedgerKey) -> Result<ProxyRecord, ProxyError> {
        let ledger = self.provisioner.ledger();
        Ok(ProxyRecord {
            address: ledger.get_as(&key.child("address")?).await?,
            implementation: ledger.get_as(&key.child("impl.address")?).await?,
            version: ledger.get_as(&key.child("impl.version")?).await?,
            constructor_args: ledger.get_as(&key.child("constructorArgs")?).await?,
        })
    }

    async fn record_implementation<U: Upgradeable + ?Sized>(
        &self,
        key: &LedgerKey,
        resource: &U,
        proxy: &Address,
    ) -> Result<Version, ProxyError> {
        let implementation = resource
            .implementation_address(proxy)
            .await
            .map_err(|source| ProvisionError::Read {
                key: key.to_string(),
                source,
            })?;
        let version = reported_version(resource, proxy).await;

        self.provisioner
            .commit(key, "impl.address", &implementation)
            .await?;
        self.provisioner
            .commit(key, "impl.version", &version)
            .await?;
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirm::ConfirmationPolicy;
    use crate::simulator::{SimConfig, SimulatedChain};
    use chainfleet_ledger::Ledger;
    use serde_json::json;
    use std::sync::Arc;

    fn tracker(chain: &Arc<SimulatedChain>) -> ProxyTracker {
        ProxyTracker::new(Provisioner::new(
            Ledger::in_memory("sim"),
            chain.clone(),
            ConfirmationPolicy::no_retry(),
        ))
    }

    fn code(version: &str) -> ImplementationCode {
        ImplementationCode {
            name: "Staking".into(),
            version: Version::parse(version).unwrap(),
            artifact: format!("staking-{version}"),
        }
    }

    #[tokio::test]
    async fn deploy_records_implementation() {
        let chain = Arc::new(SimulatedChain::new(SimConfig::default()));
        let staking = chain.upgradeable("Staking", "0.1.0");
        let tracker = tracker(&chain);
        let key = LedgerKey::parse("Staking").unwrap();

        tracker.deploy(&key, &staking, &vec![json!(21)]).await.unwrap();
        let record = tracker.record(&key).await.unwrap();

        assert!(record.address.is_some());
        assert!(record.implementation.is_some());
        assert_ne!(record.address, record.implementation);
        assert_eq!(record.version, Some(Version::new(0, 1, 0)));
        assert_eq!(record.constructor_args, Some(vec![json!(21)]));
    }

    #[tokio::test]
    async fn upgrade_happens_once_per_target() {
        let chain = Arc::new(SimulatedChain::new(SimConfig::default()));
        let staking = chain.upgradeable("Staking", "0.1.0");
        let tracker = tracker(&chain);
        let key = LedgerKey::parse("Staking").unwrap();
        tracker.deploy(&key, &staking, &vec![]).await.unwrap();

        let opts = UpgradeOptions::default();
        let first = tracker.upgrade(&key, &staking, &code("0.1.2"), &opts).await.unwrap();
        let second = tracker.upgrade(&key, &staking, &code("0.1.2"), &opts).await.unwrap();

        assert_eq!(first, UpgradeOutcome::Upgraded(Version::new(0, 1, 2)));
        assert_eq!(second, UpgradeOutcome::Current(Version::new(0, 1, 2)));
        assert_eq!(chain.stats().upgrades, 1);
    }

    #[tokio::test]
    async fn pending_upgrade_is_resumed() {
        let chain = Arc::new(SimulatedChain::new(SimConfig::default()));
        let staking = chain.upgradeable("Staking", "0.1.0");
        let tracker = tracker(&chain);
        let key = LedgerKey::parse("Staking").unwrap();
        let proxy = tracker.deploy(&key, &staking, &vec![]).await.unwrap().address;

        // Crash after submitting the upgrade
        let target = code("0.2.0");
        let pending = staking
            .upgrade(&proxy, &target, &UpgradeOptions::default())
            .await
            .unwrap();
        tracker
            .provisioner
            .ledger()
            .set(
                &key.with_suffix(UPGRADE_SUFFIX).pending(),
                &PendingUpgrade {
                    pending,
                    target: target.version.clone(),
                },
            )
            .await
            .unwrap();

        let outcome = tracker
            .upgrade(&key, &staking, &target, &UpgradeOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome, UpgradeOutcome::Recovered(Version::new(0, 2, 0)));
        assert_eq!(chain.stats().upgrades, 1);
    }

    #[tokio::test]
    async fn applied_upgrade_is_not_awaited_again() {
        let chain = Arc::new(SimulatedChain::new(SimConfig::default()));
        let staking = chain.upgradeable("Staking", "0.1.0");
        let tracker = tracker(&chain);
        let key = LedgerKey::parse("Staking").unwrap();
        let pending_key = key.with_suffix(UPGRADE_SUFFIX).pending();
        let opts = UpgradeOptions::default();
        tracker.deploy(&key, &staking, &vec![]).await.unwrap();

        tracker.upgrade(&key, &staking, &code("0.1.2"), &opts).await.unwrap();
        let ledger = tracker.provisioner.ledger();
        assert!(!ledger.contains(&pending_key).await.unwrap());

        // Left behind by an earlier run; the node no longer knows it
        let gone = PendingRef::new("0xdead");
        chain.drop_submission(&gone);
        ledger
            .set(
                &pending_key,
                &PendingUpgrade {
                    pending: gone,
                    target: Version::new(0, 1, 2),
                },
            )
            .await
            .unwrap();

        let outcome = tracker.upgrade(&key, &staking, &code("0.2.0"), &opts).await.unwrap();
        assert_eq!(outcome, UpgradeOutcome::Upgraded(Version::new(0, 2, 0)));
        assert_eq!(chain.stats().upgrades, 2);
        assert!(!ledger.contains(&pending_key).await.unwrap());
    }

    #[tokio::test]
    async fn upgrade_requires_deployed_proxy() {
        let chain = Arc::new(SimulatedChain::new(SimConfig::default()));
        let staking = chain.upgradeable("Staking", "0.1.0");
        let err = tracker(&chain)
            .upgrade(
                &LedgerKey::parse("Staking").unwrap(),
                &staking,
                &code("0.2.0"),
                &UpgradeOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::NotDeployed(_)));
    }
}
