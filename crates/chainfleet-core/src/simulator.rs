//! In-process simulated chain
//!
//! Implements every collaborator port in memory so the engine can be driven
//! end to end without a network:
//! - effects apply when an operation is submitted; the receipt is handed
//!   out on confirmation after a seeded random delay
//! - multicalls are atomic: a failing call reverts the whole bundle
//! - counters record deploys, upgrades, bundles and peak unconfirmed bundles
//!
//! Fault injection covers the failures a resumable pipeline must survive:
//! reverted chunks, partially applied chunks, dropped submissions,
//! transient confirmation outages and a crash after N submissions.

use crate::chain::{
    BatchSubmitter, Confirmer, Deployable, EventDecoder, ImplementationCode, UpgradeOptions,
    Upgradeable, VersionSource,
};
use crate::error::ChainError;
use crate::gate::WiringStep;
use crate::migration::{MigrationItem, MigrationTarget};
use crate::registrar::NameService;
use crate::types::{
    Address, ConstructorArgs, EncodedCall, EventRecord, PendingRef, RawLog, Receipt, ReceiptStatus,
};
use crate::version::Version;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Method name of the group-creating migration call
pub const CREATE_GROUP_METHOD: &str = "createPoolAndMigrate";
/// Method name of the single-item migration call
pub const MIGRATE_METHOD: &str = "migrate";
/// Method name of simulated wiring calls
pub const WIRE_METHOD: &str = "wire";

/// Simulator configuration
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Random seed for hashes and confirmation delays
    pub seed: u64,
    /// Upper bound of the random confirmation delay
    pub max_jitter_ms: u64,
    /// Account the simulator submits as
    pub operator: Address,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            max_jitter_ms: 0,
            operator: Address::from_bytes([0xaa; Address::LEN]),
        }
    }
}

impl SimConfig {
    /// With seed
    #[inline]
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// With confirmation jitter
    #[inline]
    #[must_use]
    pub fn with_jitter(mut self, max_jitter_ms: u64) -> Self {
        self.max_jitter_ms = max_jitter_ms;
        self
    }

    /// With operator account
    #[inline]
    #[must_use]
    pub fn with_operator(mut self, operator: Address) -> Self {
        self.operator = operator;
        self
    }
}

/// Simulator counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SimStats {
    /// Accepted submissions of any kind
    pub submissions: usize,
    pub deploys: usize,
    pub upgrades: usize,
    /// Bundled multicall submissions
    pub multicalls: usize,
    /// Non-bundled call submissions
    pub single_calls: usize,
    /// Name creations and ownership transfers
    pub name_writes: usize,
    /// Receipts handed out (first confirmation only)
    pub confirmations: usize,
    /// Submissions whose receipt is reverted
    pub reverted: usize,
    /// Multicalls submitted but not yet confirmed
    pub in_flight: usize,
    /// Peak of `in_flight`
    pub max_in_flight: usize,
}

#[derive(Debug, Clone)]
struct Code {
    version: Option<String>,
    /// Set for proxies
    implementation: Option<Address>,
}

#[derive(Debug, Clone)]
struct Pool {
    owner: Address,
    items: BTreeSet<String>,
}

#[derive(Debug, Clone)]
struct NameRecord {
    owner: Address,
    target: Option<Address>,
}

/// Mutable on-chain state; cloned to make multicalls atomic
#[derive(Debug, Clone, Default)]
struct World {
    contracts: HashMap<Address, Code>,
    pools: BTreeMap<u64, Pool>,
    next_pool: u64,
    wired: BTreeSet<(Address, String)>,
    names: BTreeMap<String, NameRecord>,
}

#[derive(Debug)]
struct Submission {
    receipt: Receipt,
    multicall: bool,
    confirmed: bool,
}

#[derive(Debug, Default)]
struct Faults {
    revert_multicalls: HashSet<usize>,
    skip_items: HashSet<String>,
    dropped: HashSet<PendingRef>,
    transient_failures: u32,
    crash_after: Option<usize>,
}

#[derive(Debug)]
struct State {
    nonce: u64,
    block: u64,
    rng: StdRng,
    world: World,
    submissions: HashMap<PendingRef, Submission>,
    faults: Faults,
    stats: SimStats,
}

struct Shared {
    config: SimConfig,
    state: Mutex<State>,
}

/// In-memory chain implementing every collaborator port
#[derive(Clone)]
pub struct SimulatedChain {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for SimulatedChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedChain")
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl SimulatedChain {
    /// Create empty chain
    #[must_use]
    pub fn new(config: SimConfig) -> Self {
        let state = State {
            nonce: 0,
            block: 0,
            rng: StdRng::seed_from_u64(config.seed),
            world: World::default(),
            submissions: HashMap::new(),
            faults: Faults::default(),
            stats: SimStats::default(),
        };
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(state),
            }),
        }
    }

    /// Account submitting operations
    #[must_use]
    pub fn operator(&self) -> &Address {
        &self.shared.config.operator
    }

    /// Counter snapshot
    #[must_use]
    pub fn stats(&self) -> SimStats {
        self.shared.state.lock().stats
    }

    /// Plain contract reporting `version`
    #[must_use]
    pub fn contract(&self, name: &str, version: &str) -> SimContract {
        SimContract {
            chain: self.clone(),
            name: name.to_string(),
            version: Some(version.to_string()),
            upgradeable: false,
        }
    }

    /// Contract without a version getter
    #[must_use]
    pub fn legacy_contract(&self, name: &str) -> SimContract {
        SimContract {
            chain: self.clone(),
            name: name.to_string(),
            version: None,
            upgradeable: false,
        }
    }

    /// Proxy-backed contract whose first implementation reports `version`
    #[must_use]
    pub fn upgradeable(&self, name: &str, version: &str) -> SimContract {
        SimContract {
            chain: self.clone(),
            name: name.to_string(),
            version: Some(version.to_string()),
            upgradeable: true,
        }
    }

    /// Wiring step against `target`, applicable from `min_version`
    #[must_use]
    pub fn wiring_step(&self, name: &str, target: &Address, min_version: Version) -> SimWiring {
        SimWiring {
            chain: self.clone(),
            name: name.to_string(),
            target: target.clone(),
            min_version,
        }
    }

    /// Whether `step` has been applied to `target`
    #[must_use]
    pub fn is_wired(&self, target: &Address, step: &str) -> bool {
        self.shared
            .state
            .lock()
            .world
            .wired
            .contains(&(target.clone(), step.to_string()))
    }

    /// Item ids recorded in group `group_id`
    #[must_use]
    pub fn group_items(&self, group_id: u64) -> BTreeSet<String> {
        self.shared
            .state
            .lock()
            .world
            .pools
            .get(&group_id)
            .map(|pool| pool.items.clone())
            .unwrap_or_default()
    }

    /// Number of groups created
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.shared.state.lock().world.pools.len()
    }

    /// Owner of group `group_id`
    #[must_use]
    pub fn group_owner(&self, group_id: u64) -> Option<Address> {
        self.shared
            .state
            .lock()
            .world
            .pools
            .get(&group_id)
            .map(|pool| pool.owner.clone())
    }

    /// Set a name's owner directly (registry setup, not counted as a write)
    pub fn set_name_owner(&self, node: &str, owner: &Address) {
        let mut state = self.shared.state.lock();
        state
            .world
            .names
            .entry(node.to_string())
            .and_modify(|record| record.owner = owner.clone())
            .or_insert_with(|| NameRecord {
                owner: owner.clone(),
                target: None,
            });
    }

    /// Revert the multicall with this zero-based submission ordinal
    pub fn revert_multicall(&self, ordinal: usize) {
        self.shared.state.lock().faults.revert_multicalls.insert(ordinal);
    }

    /// Silently ignore migrations of `item` (partial chunk application)
    pub fn skip_item(&self, item: &str) {
        self.shared.state.lock().faults.skip_items.insert(item.to_string());
    }

    /// Stop ignoring migrations of `item`
    pub fn unskip_item(&self, item: &str) {
        self.shared.state.lock().faults.skip_items.remove(item);
    }

    /// Forget `pending`; confirming it reports `Dropped` from now on
    pub fn drop_submission(&self, pending: &PendingRef) {
        self.shared.state.lock().faults.dropped.insert(pending.clone());
    }

    /// Fail the next `count` confirmation requests with a transient error
    pub fn fail_confirmations(&self, count: u32) {
        self.shared.state.lock().faults.transient_failures = count;
    }

    /// Become unreachable once `submissions` operations have been accepted
    pub fn crash_after(&self, submissions: usize) {
        self.shared.state.lock().faults.crash_after = Some(submissions);
    }

    /// Become reachable again; accepted submissions keep their receipts
    pub fn recover(&self) {
        self.shared.state.lock().faults.crash_after = None;
    }

    fn submit_with(
        &self,
        kind: &str,
        apply: impl FnOnce(&mut State, &Address) -> Result<Effect, String>,
        count: impl FnOnce(&mut SimStats),
    ) -> Result<PendingRef, ChainError> {
        let mut state = self.shared.state.lock();
        if state.is_down() {
            return Err(ChainError::Transient("node unreachable".into()));
        }

        state.nonce += 1;
        state.block += 1;
        let pending = PendingRef::new(format!(
            "0x{}",
            hex::encode(digest(self.shared.config.seed, state.nonce, kind))
        ));

        let snapshot = state.world.clone();
        let operator = self.shared.config.operator.clone();
        let (status, effect) = match apply(&mut *state, &operator) {
            Ok(effect) => (ReceiptStatus::Success, effect),
            Err(reason) => {
                tracing::debug!(kind, reason = %reason, "simulated revert");
                state.world = snapshot;
                state.stats.reverted += 1;
                (ReceiptStatus::Reverted, Effect::default())
            }
        };

        state.stats.submissions += 1;
        count(&mut state.stats);
        let receipt = Receipt {
            pending: pending.clone(),
            block_number: state.block,
            status,
            contract_address: effect.created,
            logs: effect.logs,
        };
        let multicall = kind == "multicall";
        if multicall {
            state.stats.in_flight += 1;
            state.stats.max_in_flight = state.stats.max_in_flight.max(state.stats.in_flight);
        }
        state.submissions.insert(
            pending.clone(),
            Submission {
                receipt,
                multicall,
                confirmed: false,
            },
        );
        Ok(pending)
    }

    fn deploy_code(&self, name: &str, version: Option<&str>, upgradeable: bool) -> Result<PendingRef, ChainError> {
        let seed = self.shared.config.seed;
        let version = version.map(str::to_string);
        self.submit_with(
            "deploy",
            |state, _| {
                let implementation = state.fresh_address(seed, name);
                state.world.contracts.insert(
                    implementation.clone(),
                    Code {
                        version: version.clone(),
                        implementation: None,
                    },
                );
                let created = if upgradeable {
                    let proxy = state.fresh_address(seed, name);
                    state.world.contracts.insert(
                        proxy.clone(),
                        Code {
                            version: None,
                            implementation: Some(implementation),
                        },
                    );
                    proxy
                } else {
                    implementation
                };
                Ok(Effect {
                    created: Some(created),
                    logs: Vec::new(),
                })
            },
            |stats| stats.deploys += 1,
        )
    }
}

impl State {
    fn is_down(&self) -> bool {
        self.faults
            .crash_after
            .is_some_and(|limit| self.stats.submissions >= limit)
    }

    fn fresh_address(&mut self, seed: u64, name: &str) -> Address {
        self.nonce += 1;
        let hash = digest(seed, self.nonce, name);
        let mut bytes = [0u8; Address::LEN];
        bytes.copy_from_slice(&hash[..Address::LEN]);
        Address::from_bytes(bytes)
    }

    fn execute(&mut self, call: &EncodedCall) -> Result<Vec<RawLog>, String> {
        match call.method.as_str() {
            CREATE_GROUP_METHOD => {
                let args: CreateGroupArgs = decode(&call.data)?;
                self.world.next_pool += 1;
                let group_id = self.world.next_pool;
                self.world.pools.insert(
                    group_id,
                    Pool {
                        owner: args.owner.clone(),
                        items: BTreeSet::new(),
                    },
                );
                let mut logs = vec![event(
                    "PoolCreated",
                    json!({ "poolId": group_id, "owner": args.owner }),
                )];
                for item in &args.items {
                    logs.extend(self.migrate(group_id, item)?);
                }
                Ok(logs)
            }
            MIGRATE_METHOD => {
                let args: MigrateArgs = decode(&call.data)?;
                Ok(self.migrate(args.pool_id, &args.item_id)?.into_iter().collect())
            }
            WIRE_METHOD => {
                let args: WireArgs = decode(&call.data)?;
                if !self.world.contracts.contains_key(&args.target) {
                    return Err(format!("no code at {}", args.target));
                }
                self.world.wired.insert((args.target.clone(), args.step.clone()));
                Ok(vec![event(
                    "Wired",
                    json!({ "target": args.target, "step": args.step }),
                )])
            }
            // Unknown calls succeed without effect
            _ => Ok(Vec::new()),
        }
    }

    fn migrate(&mut self, group_id: u64, item: &str) -> Result<Option<RawLog>, String> {
        let pool = self
            .world
            .pools
            .get_mut(&group_id)
            .ok_or_else(|| format!("unknown pool {group_id}"))?;
        if self.faults.skip_items.contains(item) {
            return Ok(None);
        }
        // Re-migrating is idempotent and re-emits the event
        pool.items.insert(item.to_string());
        Ok(Some(event(
            "ItemMigrated",
            json!({ "poolId": group_id, "itemId": item }),
        )))
    }
}

#[derive(Debug, Default)]
struct Effect {
    created: Option<Address>,
    logs: Vec<RawLog>,
}

#[derive(Serialize, Deserialize)]
struct CreateGroupArgs {
    owner: Address,
    items: Vec<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MigrateArgs {
    pool_id: u64,
    item_id: String,
}

#[derive(Serialize, Deserialize)]
struct WireArgs {
    target: Address,
    step: String,
}

fn digest(seed: u64, nonce: u64, label: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(seed.to_be_bytes());
    hasher.update(nonce.to_be_bytes());
    hasher.update(label.as_bytes());
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

fn encode<T: Serialize>(method: &str, args: &T) -> Result<EncodedCall, ChainError> {
    serde_json::to_vec(args)
        .map(|data| EncodedCall::new(method, data))
        .map_err(|err| ChainError::Encoding(err.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T, String> {
    serde_json::from_slice(data).map_err(|err| format!("bad call data: {err}"))
}

fn event(name: &str, args: Value) -> RawLog {
    RawLog {
        emitter: Address::zero(),
        topics: vec![name.to_string()],
        data: args.to_string().into_bytes(),
    }
}

#[async_trait::async_trait]
impl Confirmer for SimulatedChain {
    async fn receipt(&self, pending: &PendingRef) -> Result<Receipt, ChainError> {
        let delay = {
            let mut state = self.shared.state.lock();
            if state.is_down() {
                return Err(ChainError::Transient("node unreachable".into()));
            }
            if state.faults.transient_failures > 0 {
                state.faults.transient_failures -= 1;
                return Err(ChainError::Transient("simulated outage".into()));
            }
            if state.faults.dropped.contains(pending) || !state.submissions.contains_key(pending) {
                return Err(ChainError::Dropped(pending.clone()));
            }
            let max = self.shared.config.max_jitter_ms;
            if max == 0 {
                Duration::ZERO
            } else {
                Duration::from_millis(state.rng.gen_range(0..=max))
            }
        };

        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.shared.state.lock();
        let State {
            submissions, stats, ..
        } = &mut *state;
        let submission = submissions
            .get_mut(pending)
            .ok_or_else(|| ChainError::Dropped(pending.clone()))?;
        if !submission.confirmed {
            submission.confirmed = true;
            stats.confirmations += 1;
            if submission.multicall {
                stats.in_flight -= 1;
            }
        }
        Ok(submission.receipt.clone())
    }
}

#[async_trait::async_trait]
impl BatchSubmitter for SimulatedChain {
    async fn submit(&self, call: &EncodedCall) -> Result<PendingRef, ChainError> {
        self.submit_with(
            "call",
            |state, _| {
                let logs = state.execute(call)?;
                Ok(Effect {
                    created: None,
                    logs,
                })
            },
            |stats| stats.single_calls += 1,
        )
    }

    async fn submit_multicall(&self, calls: &[EncodedCall]) -> Result<PendingRef, ChainError> {
        self.submit_with(
            "multicall",
            |state, _| {
                let ordinal = state.stats.multicalls;
                if state.faults.revert_multicalls.contains(&ordinal) {
                    return Err(format!("multicall {ordinal} reverted by fault injection"));
                }
                let mut logs = Vec::new();
                for call in calls {
                    logs.extend(state.execute(call)?);
                }
                Ok(Effect {
                    created: None,
                    logs,
                })
            },
            |stats| stats.multicalls += 1,
        )
    }
}

impl EventDecoder for SimulatedChain {
    fn decode_event(&self, name: &str, log: &RawLog) -> Option<EventRecord> {
        if log.topics.first().map(String::as_str) != Some(name) {
            return None;
        }
        let args: Map<String, Value> = serde_json::from_slice(&log.data).ok()?;
        Some(EventRecord {
            name: name.to_string(),
            args,
        })
    }
}

impl MigrationTarget for SimulatedChain {
    fn encode_create_group(
        &self,
        owner: &Address,
        items: &[MigrationItem],
    ) -> Result<EncodedCall, ChainError> {
        encode(
            CREATE_GROUP_METHOD,
            &CreateGroupArgs {
                owner: owner.clone(),
                items: items.iter().map(|item| item.id.clone()).collect(),
            },
        )
    }

    fn encode_migrate(&self, group_id: u64, item: &MigrationItem) -> Result<EncodedCall, ChainError> {
        encode(
            MIGRATE_METHOD,
            &MigrateArgs {
                pool_id: group_id,
                item_id: item.id.clone(),
            },
        )
    }
}

#[async_trait::async_trait]
impl VersionSource for SimulatedChain {
    async fn version(&self, address: &Address) -> Result<Option<String>, ChainError> {
        let state = self.shared.state.lock();
        let code = state
            .world
            .contracts
            .get(address)
            .ok_or_else(|| ChainError::CallFailed(format!("no code at {address}")))?;
        let code = match &code.implementation {
            Some(implementation) => state
                .world
                .contracts
                .get(implementation)
                .ok_or_else(|| ChainError::CallFailed(format!("no code at {implementation}")))?,
            None => code,
        };
        Ok(code.version.clone())
    }
}

#[async_trait::async_trait]
impl NameService for SimulatedChain {
    async fn owner(&self, node: &str) -> Result<Option<Address>, ChainError> {
        Ok(self
            .shared
            .state
            .lock()
            .world
            .names
            .get(node)
            .map(|record| record.owner.clone()))
    }

    async fn resolve(&self, node: &str) -> Result<Option<Address>, ChainError> {
        Ok(self
            .shared
            .state
            .lock()
            .world
            .names
            .get(node)
            .and_then(|record| record.target.clone()))
    }

    async fn create_subnode(
        &self,
        parent: &str,
        label: &str,
        owner: &Address,
        target: &Address,
    ) -> Result<PendingRef, ChainError> {
        let node = format!("{label}.{parent}");
        self.submit_with(
            "name",
            |state, operator| {
                let parent_owner = state.world.names.get(parent).map(|r| r.owner.clone());
                if parent_owner.as_ref() != Some(operator) {
                    return Err(format!("{operator} does not own {parent}"));
                }
                state.world.names.insert(
                    node.clone(),
                    NameRecord {
                        owner: owner.clone(),
                        target: Some(target.clone()),
                    },
                );
                Ok(Effect::default())
            },
            |stats| stats.name_writes += 1,
        )
    }

    async fn set_owner(&self, node: &str, owner: &Address) -> Result<PendingRef, ChainError> {
        self.submit_with(
            "name",
            |state, operator| {
                let record = state
                    .world
                    .names
                    .get_mut(node)
                    .ok_or_else(|| format!("{node} does not exist"))?;
                if &record.owner != operator {
                    return Err(format!("{operator} does not own {node}"));
                }
                record.owner = owner.clone();
                Ok(Effect::default())
            },
            |stats| stats.name_writes += 1,
        )
    }
}

/// Handle to a simulated deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractHandle {
    pub name: String,
    pub address: Address,
}

/// Deployable resource on a [`SimulatedChain`]
#[derive(Debug, Clone)]
pub struct SimContract {
    chain: SimulatedChain,
    name: String,
    version: Option<String>,
    upgradeable: bool,
}

#[async_trait::async_trait]
impl Deployable for SimContract {
    type Handle = ContractHandle;

    fn name(&self) -> &str {
        &self.name
    }

    async fn deploy(&self, _args: &ConstructorArgs) -> Result<PendingRef, ChainError> {
        self.chain
            .deploy_code(&self.name, self.version.as_deref(), self.upgradeable)
    }

    fn attach(&self, address: &Address) -> ContractHandle {
        ContractHandle {
            name: self.name.clone(),
            address: address.clone(),
        }
    }
}

#[async_trait::async_trait]
impl VersionSource for SimContract {
    async fn version(&self, address: &Address) -> Result<Option<String>, ChainError> {
        self.chain.version(address).await
    }
}

#[async_trait::async_trait]
impl Upgradeable for SimContract {
    async fn upgrade(
        &self,
        proxy: &Address,
        code: &ImplementationCode,
        opts: &UpgradeOptions,
    ) -> Result<PendingRef, ChainError> {
        if !self.upgradeable {
            return Err(ChainError::Rejected(format!("{} is not upgradeable", self.name)));
        }
        let seed = self.chain.shared.config.seed;
        let version = code.version.to_string();
        self.chain.submit_with(
            "upgrade",
            |state, _| {
                if !state
                    .world
                    .contracts
                    .get(proxy)
                    .is_some_and(|c| c.implementation.is_some())
                {
                    return Err(format!("{proxy} is not a proxy"));
                }
                let implementation = state.fresh_address(seed, &code.name);
                state.world.contracts.insert(
                    implementation.clone(),
                    Code {
                        version: Some(version.clone()),
                        implementation: None,
                    },
                );
                if let Some(proxy_code) = state.world.contracts.get_mut(proxy) {
                    proxy_code.implementation = Some(implementation);
                }
                let logs = match &opts.call {
                    Some(call) => state.execute(call)?,
                    None => Vec::new(),
                };
                Ok(Effect {
                    created: None,
                    logs,
                })
            },
            |stats| stats.upgrades += 1,
        )
    }

    async fn implementation_address(&self, proxy: &Address) -> Result<Address, ChainError> {
        let state = self.chain.shared.state.lock();
        state
            .world
            .contracts
            .get(proxy)
            .and_then(|code| code.implementation.clone())
            .ok_or_else(|| ChainError::CallFailed(format!("{proxy} is not a proxy")))
    }
}

/// Wiring call recorded by the simulator
#[derive(Debug, Clone)]
pub struct SimWiring {
    chain: SimulatedChain,
    name: String,
    target: Address,
    min_version: Version,
}

#[async_trait::async_trait]
impl WiringStep for SimWiring {
    fn name(&self) -> &str {
        &self.name
    }

    fn target(&self) -> &Address {
        &self.target
    }

    fn min_version(&self) -> &Version {
        &self.min_version
    }

    async fn already_applied(&self) -> Result<bool, ChainError> {
        Ok(self.chain.is_wired(&self.target, &self.name))
    }

    fn encode(&self) -> Result<EncodedCall, ChainError> {
        encode(
            WIRE_METHOD,
            &WireArgs {
                target: self.target.clone(),
                step: self.name.clone(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deploy_yields_address_on_confirmation() {
        let chain = SimulatedChain::new(SimConfig::default());
        let token = chain.contract("Token", "1.2.3");
        let pending = token.deploy(&vec![]).await.unwrap();
        let receipt = chain.receipt(&pending).await.unwrap();
        let address = receipt.contract_address.unwrap();
        assert_eq!(chain.version(&address).await.unwrap().as_deref(), Some("1.2.3"));
        assert_eq!(chain.stats().deploys, 1);
    }

    #[tokio::test]
    async fn hashes_are_deterministic_per_seed() {
        let a = SimulatedChain::new(SimConfig::default().with_seed(7));
        let b = SimulatedChain::new(SimConfig::default().with_seed(7));
        let pa = a.contract("T", "1.0.0").deploy(&vec![]).await.unwrap();
        let pb = b.contract("T", "1.0.0").deploy(&vec![]).await.unwrap();
        assert_eq!(pa, pb);
        assert_eq!(pa.as_str().len(), 66);
    }

    #[tokio::test]
    async fn reverted_multicall_leaves_no_effect() {
        let chain = SimulatedChain::new(SimConfig::default());
        let create = chain
            .encode_create_group(&Address::zero(), &[])
            .unwrap();
        chain.submit(&create).await.unwrap();

        let item = MigrationItem::new("a", Address::zero(), crate::types::ChainId(1));
        let bogus = EncodedCall::new(MIGRATE_METHOD, b"{}".to_vec());
        let good = chain.encode_migrate(1, &item).unwrap();
        let pending = chain.submit_multicall(&[good, bogus]).await.unwrap();

        let receipt = chain.receipt(&pending).await.unwrap();
        assert_eq!(receipt.status, ReceiptStatus::Reverted);
        assert!(chain.group_items(1).is_empty());
    }

    #[tokio::test]
    async fn transient_failures_then_success() {
        let chain = SimulatedChain::new(SimConfig::default());
        let pending = chain.contract("T", "1.0.0").deploy(&vec![]).await.unwrap();
        chain.fail_confirmations(1);
        assert!(chain.receipt(&pending).await.unwrap_err().is_transient());
        assert!(chain.receipt(&pending).await.is_ok());
    }

    #[tokio::test]
    async fn crash_blocks_until_recovered() {
        let chain = SimulatedChain::new(SimConfig::default());
        chain.crash_after(1);
        let token = chain.contract("T", "1.0.0");
        let pending = token.deploy(&vec![]).await.unwrap();
        assert!(token.deploy(&vec![]).await.is_err());
        assert!(chain.receipt(&pending).await.is_err());

        chain.recover();
        assert!(chain.receipt(&pending).await.unwrap().succeeded());
        assert_eq!(chain.stats().deploys, 1);
    }
}
