//! Resumable batch migration
//!
//! Moves items owned by one account into a newly created group, one group
//! per `(chain, owner)`. Per group the workflow walks
//! `NOT_STARTED -> POOL_CREATED -> ITEMS_MIGRATING -> COMPLETE`:
//! - the first chunk goes out in a single call that creates the group and
//!   migrates that chunk; it is tracked like a deployment, so a crash
//!   between submission and commit never creates a second group
//! - remaining items go through the batch executor against the known id
//! - an item is marked migrated only when a receipt carries its
//!   `ItemMigrated` event, never because it was part of a submitted chunk
//!
//! Ledger layout under `<namespace>.<owner>`:
//! `poolId`, `state`, `-pending`, `items.<id>.migrated`.

use crate::batch::{BatchExecutor, ChunkReceipt, ReceiptSink};
use crate::chain::{decode_events, EventDecoder};
use crate::config::{BatchConfig, ChainConfig, MigrationConfig, MigrationEvents};
use crate::error::{BatchError, ChainError, MigrationError};
use crate::provision::{Provisioner, Resolution};
use crate::types::{Address, ChainId, EncodedCall, PendingRef, Receipt};
use chainfleet_ledger::{segment, Ledger, LedgerError, LedgerKey};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Encodes calls against the migration contract
pub trait MigrationTarget: Send + Sync {
    /// Call creating the group for `owner` and migrating `items` into it
    ///
    /// # Errors
    /// `ChainError::Encoding` if the call cannot be built.
    fn encode_create_group(
        &self,
        owner: &Address,
        items: &[MigrationItem],
    ) -> Result<EncodedCall, ChainError>;

    /// Call migrating one item into an existing group
    ///
    /// # Errors
    /// `ChainError::Encoding` if the call cannot be built.
    fn encode_migrate(&self, group_id: u64, item: &MigrationItem) -> Result<EncodedCall, ChainError>;
}

/// One item to migrate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationItem {
    pub id: String,
    pub owner: Address,
    pub chain_id: ChainId,
    #[serde(default)]
    pub migrated: bool,
    /// Domain attributes carried through to the ledger
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl MigrationItem {
    /// Create unmigrated item
    #[must_use]
    pub fn new(id: impl Into<String>, owner: Address, chain_id: ChainId) -> Self {
        Self {
            id: id.into(),
            owner,
            chain_id,
            migrated: false,
            attributes: Map::new(),
        }
    }

    /// With a domain attribute
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// With migrated flag
    #[inline]
    #[must_use]
    pub fn with_migrated(mut self, migrated: bool) -> Self {
        self.migrated = migrated;
        self
    }
}

/// Persisted form of an item under `items.<id>`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ItemRecord {
    /// Empty when the record was written as a bare `items.<id>.migrated` flag
    #[serde(default)]
    id: String,
    #[serde(default)]
    migrated: bool,
    #[serde(flatten)]
    attributes: Map<String, Value>,
}

/// Item records under `items_key`, keyed by slot, ids filled from the slot when absent
async fn load_records(
    ledger: &Ledger,
    items_key: &LedgerKey,
) -> Result<BTreeMap<String, ItemRecord>, MigrationError> {
    let mut records: BTreeMap<String, ItemRecord> =
        ledger.get_as(items_key).await?.unwrap_or_default();
    for (slot, record) in &mut records {
        if record.id.is_empty() {
            record.id = slot.replace('/', ".");
        }
    }
    Ok(records)
}

/// Group lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupState {
    NotStarted,
    PoolCreated,
    ItemsMigrating,
    Complete,
}

impl fmt::Display for GroupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotStarted => "NOT_STARTED",
            Self::PoolCreated => "POOL_CREATED",
            Self::ItemsMigrating => "ITEMS_MIGRATING",
            Self::Complete => "COMPLETE",
        })
    }
}

/// Items of one owner on one chain, merged with ledger state
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationGroup {
    pub owner: Address,
    pub chain_id: ChainId,
    /// Assigned group id; 0 until creation is confirmed
    pub group_id: u64,
    pub items: Vec<MigrationItem>,
    recorded: Option<GroupState>,
}

impl MigrationGroup {
    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> GroupState {
        if self.pending_count() == 0 {
            GroupState::Complete
        } else if self.group_id == 0 {
            GroupState::NotStarted
        } else if self.recorded == Some(GroupState::ItemsMigrating) {
            GroupState::ItemsMigrating
        } else {
            GroupState::PoolCreated
        }
    }

    /// Items still awaiting migration, in load order
    pub fn pending(&self) -> impl Iterator<Item = &MigrationItem> {
        self.items.iter().filter(|item| !item.migrated)
    }

    /// Number of items still awaiting migration
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending().count()
    }
}

/// Outcome of driving one group
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub owner: Address,
    pub group_id: u64,
    pub state: GroupState,
    /// Whether the group was created (or recovered) by this run
    pub created: bool,
    /// Items marked migrated by this run
    pub migrated_now: usize,
    /// Items still unmigrated; non-zero when a chunk applied only partially
    pub remaining: usize,
}

/// Read-only progress of one group
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub owner: String,
    pub group_id: u64,
    pub state: GroupState,
    pub total: usize,
    pub migrated: usize,
    /// Unconfirmed group creation, if any
    pub pending: Option<PendingRef>,
}

/// Progress of one recorded group, from the ledger alone
///
/// # Errors
/// Ledger failures, or an invalid namespace/owner key.
pub async fn group_status(
    ledger: &Ledger,
    namespace: &str,
    owner: &str,
) -> Result<MigrationStatus, MigrationError> {
    let key = LedgerKey::parse(namespace)?.child(owner)?;
    let records = load_records(ledger, &key.child("items")?).await?;
    let group_id = ledger.get_as::<u64>(&key.child("poolId")?).await?.unwrap_or(0);
    let recorded = ledger.get_as::<GroupState>(&key.child("state")?).await?;
    let pending = if group_id == 0 {
        ledger.get_as::<PendingRef>(&key.pending()).await?
    } else {
        None
    };

    let migrated = records.values().filter(|r| r.migrated).count();
    let state = match recorded {
        Some(state) => state,
        None if group_id == 0 => GroupState::NotStarted,
        None if migrated == records.len() => GroupState::Complete,
        None => GroupState::PoolCreated,
    };
    Ok(MigrationStatus {
        owner: owner.to_string(),
        group_id,
        state,
        total: records.len(),
        migrated,
        pending,
    })
}

/// Progress of every group recorded under `namespace`
///
/// # Errors
/// As [`group_status`].
pub async fn namespace_status(
    ledger: &Ledger,
    namespace: &str,
) -> Result<Vec<MigrationStatus>, MigrationError> {
    let Some(groups) = ledger.subtree(&LedgerKey::parse(namespace)?).await? else {
        return Ok(Vec::new());
    };
    let mut out = Vec::new();
    for (owner, value) in &groups {
        // `<owner>-pending` siblings are not groups
        if value.is_object() {
            out.push(group_status(ledger, namespace, owner).await?);
        }
    }
    Ok(out)
}

/// Drives groups to completion against one chain
#[derive(Clone)]
pub struct MigrationWorkflow {
    provisioner: Provisioner,
    executor: BatchExecutor,
    target: Arc<dyn MigrationTarget>,
    decoder: Arc<dyn EventDecoder>,
    chain_id: ChainId,
    config: MigrationConfig,
    batch: BatchConfig,
}

impl fmt::Debug for MigrationWorkflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationWorkflow")
            .field("chain_id", &self.chain_id)
            .field("config", &self.config)
            .field("batch", &self.batch)
            .finish_non_exhaustive()
    }
}

impl MigrationWorkflow {
    /// Create workflow using `chain`'s migration and batch settings
    #[must_use]
    pub fn new(
        provisioner: Provisioner,
        executor: BatchExecutor,
        target: Arc<dyn MigrationTarget>,
        decoder: Arc<dyn EventDecoder>,
        chain: &ChainConfig,
    ) -> Self {
        Self {
            provisioner,
            executor,
            target,
            decoder,
            chain_id: chain.chain_id,
            config: chain.migration.clone(),
            batch: chain.batch,
        }
    }

    /// With batch settings
    #[inline]
    #[must_use]
    pub fn with_batch(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    fn ledger(&self) -> &Ledger {
        self.provisioner.ledger()
    }

    fn group_key(&self, owner: &Address) -> Result<LedgerKey, MigrationError> {
        Ok(LedgerKey::parse(self.config.namespace.as_str())?.child(owner.as_str())?)
    }

    /// Merge discovered items with the ledger's item records
    ///
    /// A recorded `migrated = true` always wins. Newly discovered items are
    /// recorded; recorded items missing from `discovered` are kept.
    ///
    /// # Errors
    /// `MigrationError::ForeignItem` if an item belongs to another owner or
    /// chain, otherwise ledger failures.
    pub async fn load_group(
        &self,
        owner: &Address,
        discovered: Vec<MigrationItem>,
    ) -> Result<MigrationGroup, MigrationError> {
        let key = self.group_key(owner)?;
        let items_key = key.child("items")?;
        let mut records = load_records(self.ledger(), &items_key).await?;

        let mut items = Vec::with_capacity(discovered.len().max(records.len()));
        let mut seen = HashSet::new();
        let mut added = 0usize;

        for mut item in discovered {
            if &item.owner != owner || item.chain_id != self.chain_id {
                return Err(MigrationError::ForeignItem {
                    item: item.id,
                    owner: owner.clone(),
                    chain_id: self.chain_id,
                });
            }
            let slot = segment(&item.id);
            if !seen.insert(slot.clone()) {
                continue;
            }
            match records.get(&slot) {
                Some(record) => item.migrated |= record.migrated,
                None => {
                    records.insert(
                        slot,
                        ItemRecord {
                            id: item.id.clone(),
                            migrated: item.migrated,
                            attributes: item.attributes.clone(),
                        },
                    );
                    added += 1;
                }
            }
            items.push(item);
        }

        for (slot, record) in &records {
            if !seen.contains(slot) {
                let mut item = MigrationItem::new(record.id.clone(), owner.clone(), self.chain_id)
                    .with_migrated(record.migrated);
                item.attributes.clone_from(&record.attributes);
                items.push(item);
            }
        }

        if added > 0 {
            self.ledger().set(&items_key, &records).await?;
            tracing::debug!(owner = %owner, added, "recorded discovered items");
        }

        let group_id = self.ledger().get_as::<u64>(&key.child("poolId")?).await?.unwrap_or(0);
        let recorded = self.ledger().get_as::<GroupState>(&key.child("state")?).await?;
        Ok(MigrationGroup {
            owner: owner.clone(),
            chain_id: self.chain_id,
            group_id,
            items,
            recorded,
        })
    }

    /// Drive one group as far as possible
    ///
    /// Safe to re-run after any failure: completed items and an already
    /// created group are skipped. A run that leaves `remaining > 0` without
    /// an error saw chunks apply only partially; re-run to retry them.
    ///
    /// # Errors
    /// - `MigrationError::Provision` if group creation fails to submit or confirm
    /// - `MigrationError::GroupIdMissing` if the creation receipt lacks the id
    /// - `MigrationError::Batch` if a migration chunk fails; items evidenced by
    ///   chunks that did confirm are already recorded
    pub async fn run(
        &self,
        owner: &Address,
        discovered: Vec<MigrationItem>,
    ) -> Result<MigrationReport, MigrationError> {
        let mut group = self.load_group(owner, discovered).await?;
        let key = self.group_key(owner)?;
        let mut report = MigrationReport {
            owner: owner.clone(),
            group_id: group.group_id,
            state: group.state(),
            created: false,
            migrated_now: 0,
            remaining: group.pending_count(),
        };

        if report.remaining == 0 {
            // Every item recorded but the creation never committed its id
            if group.group_id == 0 && self.ledger().contains(&key.pending()).await? {
                let (group_id, _) = self.create_group(&key, &group).await?;
                report.group_id = group_id;
                report.created = true;
            }
            tracing::info!(owner = %owner, group = report.group_id, "group already complete");
            self.record_state(&key, GroupState::Complete).await?;
            report.state = GroupState::Complete;
            return Ok(report);
        }

        if group.group_id == 0 {
            let (group_id, marked) = self.create_group(&key, &group).await?;
            group.group_id = group_id;
            report.group_id = group_id;
            report.created = true;
            report.migrated_now += marked.len();
            for item in &mut group.items {
                if marked.contains(&item.id) {
                    item.migrated = true;
                }
            }
        }

        let pending: Vec<&MigrationItem> = group.pending().collect();
        if !pending.is_empty() {
            self.record_state(&key, GroupState::ItemsMigrating).await?;
            let mut operations = Vec::with_capacity(pending.len());
            for item in &pending {
                let call = self
                    .target
                    .encode_migrate(group.group_id, item)
                    .map_err(|source| MigrationError::Encode {
                        owner: owner.clone(),
                        source,
                    })?;
                operations.push(Some(call));
            }

            let mut sink = EvidenceSink {
                ledger: self.ledger().clone(),
                decoder: Arc::clone(&self.decoder),
                events: self.config.events.clone(),
                items_key: key.child("items")?,
                group_id: group.group_id,
                awaiting: pending.iter().map(|item| item.id.clone()).collect(),
                marked: 0,
            };
            tracing::info!(
                owner = %owner,
                group = group.group_id,
                items = operations.len(),
                "migrating remaining items"
            );
            let outcome = self
                .executor
                .execute_batch_with(operations, self.batch.chunk_size, self.batch.parallelism, &mut sink)
                .await;
            report.migrated_now += sink.marked;
            if let Err(err) = outcome {
                tracing::error!(
                    owner = %owner,
                    group = group.group_id,
                    marked = sink.marked,
                    error = %err,
                    "migration batch failed"
                );
                return Err(err.into());
            }
            report.remaining = sink.awaiting.len();
        } else {
            report.remaining = 0;
        }

        report.state = if report.remaining == 0 {
            GroupState::Complete
        } else {
            tracing::warn!(
                owner = %owner,
                group = group.group_id,
                remaining = report.remaining,
                "items without migration evidence; re-run to retry them"
            );
            GroupState::ItemsMigrating
        };
        self.record_state(&key, report.state).await?;
        tracing::info!(
            owner = %owner,
            group = report.group_id,
            state = %report.state,
            migrated = report.migrated_now,
            "group migration finished"
        );
        Ok(report)
    }

    /// Run every group in order, stopping at the first failure
    ///
    /// # Errors
    /// The first group failure.
    pub async fn run_all(
        &self,
        groups: Vec<(Address, Vec<MigrationItem>)>,
    ) -> Result<Vec<MigrationReport>, MigrationError> {
        let mut reports = Vec::with_capacity(groups.len());
        for (owner, items) in groups {
            reports.push(self.run(&owner, items).await?);
        }
        Ok(reports)
    }

    /// Recorded progress of `owner`'s group
    ///
    /// # Errors
    /// Ledger failures.
    pub async fn status(&self, owner: &Address) -> Result<MigrationStatus, MigrationError> {
        group_status(self.ledger(), &self.config.namespace, owner.as_str()).await
    }

    /// Create the group with the first chunk, or recover an earlier creation
    ///
    /// Returns the group id and the ids evidenced by the creation receipt.
    async fn create_group(
        &self,
        key: &LedgerKey,
        group: &MigrationGroup,
    ) -> Result<(u64, HashSet<String>), MigrationError> {
        let first: Vec<MigrationItem> = group
            .pending()
            .take(self.batch.chunk_size.max(1))
            .cloned()
            .collect();
        let call = self
            .target
            .encode_create_group(&group.owner, &first)
            .map_err(|source| MigrationError::Encode {
                owner: group.owner.clone(),
                source,
            })?;
        let submitter = Arc::clone(self.executor.submitter());

        let resolution = self
            .provisioner
            .resolve_or_submit::<u64, _, _>(key, "poolId", || async move {
                submitter.submit(&call).await
            })
            .await?;

        let (pending, receipt) = match resolution {
            Resolution::Known(group_id) => return Ok((group_id, HashSet::new())),
            Resolution::Confirmed {
                pending, receipt, ..
            } => (pending, receipt),
        };

        let events = &self.config.events;
        let group_id = decode_events(self.decoder.as_ref(), &receipt, &events.group_created)
            .iter()
            .find_map(|event| event.arg_u64(&events.group_id_field))
            .filter(|id| *id != 0)
            .ok_or_else(|| MigrationError::GroupIdMissing {
                owner: group.owner.clone(),
                pending,
                event: events.group_created.clone(),
            })?;

        // Id before items; marked items without an id read as a finished group
        self.provisioner.commit(key, "poolId", &group_id).await?;

        let awaiting: HashSet<String> = group.pending().map(|item| item.id.clone()).collect();
        let marked = evidenced_items(self.decoder.as_ref(), events, &receipt, group_id, &awaiting);
        mark_migrated(self.ledger(), &key.child("items")?, &marked).await?;
        self.record_state(key, GroupState::PoolCreated).await?;
        tracing::info!(
            owner = %group.owner,
            group = group_id,
            migrated = marked.len(),
            "group created"
        );
        Ok((group_id, marked))
    }

    async fn record_state(&self, key: &LedgerKey, state: GroupState) -> Result<(), MigrationError> {
        self.ledger().set(&key.child("state")?, &state).await?;
        Ok(())
    }
}

/// Item ids in `awaiting` that `receipt` shows moved into `group_id`
fn evidenced_items(
    decoder: &dyn EventDecoder,
    events: &MigrationEvents,
    receipt: &Receipt,
    group_id: u64,
    awaiting: &HashSet<String>,
) -> HashSet<String> {
    decode_events(decoder, receipt, &events.item_migrated)
        .iter()
        .filter(|event| {
            event
                .arg_u64(&events.group_id_field)
                .map_or(true, |id| id == group_id)
        })
        .filter_map(|event| event.arg_string(&events.item_id_field))
        .filter(|id| awaiting.contains(id))
        .collect()
}

/// Record every id in `ids` as migrated with a single ledger store
async fn mark_migrated<'a>(
    ledger: &Ledger,
    items_key: &LedgerKey,
    ids: impl IntoIterator<Item = &'a String>,
) -> Result<(), LedgerError> {
    let entries = ids
        .into_iter()
        .map(|id| Ok::<_, LedgerError>((items_key.child(&segment(id))?.child("migrated")?, true)))
        .collect::<Result<Vec<_>, LedgerError>>()?;
    ledger.set_many(&entries).await
}

/// Records receipt evidence chunk by chunk
struct EvidenceSink {
    ledger: Ledger,
    decoder: Arc<dyn EventDecoder>,
    events: MigrationEvents,
    items_key: LedgerKey,
    group_id: u64,
    awaiting: HashSet<String>,
    marked: usize,
}

#[async_trait::async_trait]
impl ReceiptSink for EvidenceSink {
    async fn on_receipt(&mut self, chunk: &ChunkReceipt) -> Result<(), BatchError> {
        let evidenced = evidenced_items(
            self.decoder.as_ref(),
            &self.events,
            &chunk.receipt,
            self.group_id,
            &self.awaiting,
        );
        mark_migrated(&self.ledger, &self.items_key, &evidenced).await?;
        for id in &evidenced {
            self.awaiting.remove(id);
        }
        self.marked += evidenced.len();
        if evidenced.len() < chunk.calls {
            tracing::warn!(
                chunk = chunk.index + 1,
                total = chunk.total,
                calls = chunk.calls,
                evidenced = evidenced.len(),
                "chunk applied partially"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirm::ConfirmationPolicy;
    use crate::simulator::{SimConfig, SimulatedChain};
    use chainfleet_ledger::MemoryBackend;

    fn owner() -> Address {
        Address::from_bytes([7; 20])
    }

    fn workflow(chain: &Arc<SimulatedChain>, ledger: Ledger, chunk_size: usize) -> MigrationWorkflow {
        let policy = ConfirmationPolicy::no_retry();
        MigrationWorkflow::new(
            Provisioner::new(ledger, chain.clone(), policy.clone()),
            BatchExecutor::new(chain.clone(), chain.clone(), policy),
            chain.clone(),
            chain.clone(),
            &ChainConfig::new(ChainId(31_337), "sim"),
        )
        .with_batch(BatchConfig::new(chunk_size, 2))
    }

    fn items(n: usize) -> Vec<MigrationItem> {
        (0..n)
            .map(|i| MigrationItem::new(format!("item-{i}"), owner(), ChainId(31_337)))
            .collect()
    }

    #[tokio::test]
    async fn foreign_items_are_rejected() {
        let chain = Arc::new(SimulatedChain::new(SimConfig::default()));
        let wf = workflow(&chain, Ledger::in_memory("sim"), 3);
        let stray = MigrationItem::new("x", owner(), ChainId(1));
        let err = wf.load_group(&owner(), vec![stray]).await.unwrap_err();
        assert!(matches!(err, MigrationError::ForeignItem { .. }));
    }

    #[tokio::test]
    async fn recorded_migrated_flag_wins() {
        let chain = Arc::new(SimulatedChain::new(SimConfig::default()));
        let ledger = Ledger::in_memory("sim");
        let wf = workflow(&chain, ledger.clone(), 3);
        wf.load_group(&owner(), items(3)).await.unwrap();
        let key = LedgerKey::parse(format!("migration.{}.items", owner())).unwrap();
        mark_migrated(&ledger, &key, &["item-1".to_string()]).await.unwrap();

        let group = wf.load_group(&owner(), items(3)).await.unwrap();
        assert_eq!(group.pending_count(), 2);
        assert_eq!(group.state(), GroupState::NotStarted);
    }

    #[tokio::test]
    async fn run_completes_group() {
        let chain = Arc::new(SimulatedChain::new(SimConfig::default()));
        let wf = workflow(&chain, Ledger::in_memory("sim"), 3);

        let report = wf.run(&owner(), items(7)).await.unwrap();
        assert_eq!(report.state, GroupState::Complete);
        assert!(report.created);
        assert_eq!(report.migrated_now, 7);
        assert_ne!(report.group_id, 0);

        // 1 creation call + ceil(4 / 3) chunks
        assert_eq!(chain.stats().single_calls, 1);
        assert_eq!(chain.stats().multicalls, 2);

        let status = wf.status(&owner()).await.unwrap();
        assert_eq!((status.total, status.migrated), (7, 7));
        assert_eq!(status.state, GroupState::Complete);
    }

    #[tokio::test]
    async fn chunk_evidence_is_one_store() {
        let chain = Arc::new(SimulatedChain::new(SimConfig::default()));
        let backend = Arc::new(MemoryBackend::new());
        let wf = workflow(&chain, Ledger::with_backend("sim", backend.clone()), 10);

        let report = wf.run(&owner(), items(20)).await.unwrap();
        assert_eq!(report.migrated_now, 20);
        // items, pending, poolId, creation marks, 3 states, chunk marks
        assert_eq!(backend.store_count(), 8);
    }

    #[tokio::test]
    async fn empty_group_submits_nothing() {
        let chain = Arc::new(SimulatedChain::new(SimConfig::default()));
        let wf = workflow(&chain, Ledger::in_memory("sim"), 3);
        let report = wf.run(&owner(), Vec::new()).await.unwrap();
        assert_eq!(report.state, GroupState::Complete);
        assert_eq!(chain.stats().submissions, 0);
    }
}
