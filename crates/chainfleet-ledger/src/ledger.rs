//! Durable progress ledger
//!
//! One [`Ledger`] exists per network identity. All reads and writes go
//! through a single async lock, so concurrent logical steps in the same
//! process never interleave on the document. Every mutation is stored by
//! the backend before the call returns; if the store fails the in-memory
//! view is left unchanged.

use crate::backend::{JsonFileBackend, LedgerBackend, MemoryBackend};
use crate::error::{LedgerError, Result};
use crate::key::LedgerKey;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Handle to a network's ledger; clones share one serialization queue
#[derive(Debug, Clone)]
pub struct Ledger {
    inner: Arc<LedgerInner>,
}

#[derive(Debug)]
struct LedgerInner {
    network: String,
    backend: Arc<dyn LedgerBackend>,
    doc: Mutex<Option<Map<String, Value>>>,
}

impl Ledger {
    /// Create ledger over an arbitrary backend
    #[must_use]
    pub fn with_backend(network: impl Into<String>, backend: Arc<dyn LedgerBackend>) -> Self {
        Self {
            inner: Arc::new(LedgerInner {
                network: network.into(),
                backend,
                doc: Mutex::new(None),
            }),
        }
    }

    /// Open the JSON ledger for `network` under `dir` (`<dir>/<network>.json`)
    #[must_use]
    pub fn open(dir: impl AsRef<Path>, network: impl Into<String>) -> Self {
        let network = network.into();
        let path = dir.as_ref().join(format!("{network}.json"));
        Self::with_backend(network, Arc::new(JsonFileBackend::new(path)))
    }

    /// Non-durable ledger for tests and dry runs
    #[must_use]
    pub fn in_memory(network: impl Into<String>) -> Self {
        Self::with_backend(network, Arc::new(MemoryBackend::new()))
    }

    /// Network identity this ledger records
    #[inline]
    #[must_use]
    pub fn network(&self) -> &str {
        &self.inner.network
    }

    /// Backend location for logs
    #[must_use]
    pub fn location(&self) -> String {
        self.inner.backend.describe()
    }

    /// Raw value at `key`
    ///
    /// # Errors
    /// Propagates backend load failures.
    pub async fn get(&self, key: &LedgerKey) -> Result<Option<Value>> {
        self.read(|doc| lookup(doc, key).cloned()).await
    }

    /// Typed value at `key`; `null` reads as absent
    ///
    /// # Errors
    /// Propagates backend load failures and `LedgerError::Deserialize` when the
    /// stored value has a different shape.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &LedgerKey) -> Result<Option<T>> {
        match self.get(key).await? {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|source| LedgerError::Deserialize {
                    key: key.to_string(),
                    source,
                }),
        }
    }

    /// Whether `key` holds a non-null value
    ///
    /// # Errors
    /// Propagates backend load failures.
    pub async fn contains(&self, key: &LedgerKey) -> Result<bool> {
        self.read(|doc| !matches!(lookup(doc, key), None | Some(Value::Null)))
            .await
    }

    /// Durably write `value` at `key`
    ///
    /// # Errors
    /// Returns `LedgerError::KeyConflict` if a prefix of `key` holds a scalar,
    /// and propagates backend store failures.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &LedgerKey, value: &T) -> Result<()> {
        let value = serde_json::to_value(value).map_err(|source| LedgerError::Serialize {
            key: key.to_string(),
            source,
        })?;
        self.mutate(|doc| insert(doc, key, value)).await?;
        tracing::debug!(network = %self.inner.network, key = %key, "ledger set");
        Ok(())
    }

    /// Durably write every `(key, value)` pair in one store
    ///
    /// Either all entries are recorded or none are.
    ///
    /// # Errors
    /// As [`Ledger::set`] for any entry.
    pub async fn set_many<T: Serialize>(&self, entries: &[(LedgerKey, T)]) -> Result<()> {
        let mut values = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let value = serde_json::to_value(value).map_err(|source| LedgerError::Serialize {
                key: key.to_string(),
                source,
            })?;
            values.push((key, value));
        }
        if values.is_empty() {
            return Ok(());
        }
        self.mutate(|doc| {
            values
                .into_iter()
                .try_for_each(|(key, value)| insert(doc, key, value))
        })
        .await?;
        tracing::debug!(network = %self.inner.network, entries = entries.len(), "ledger set");
        Ok(())
    }

    /// Durably remove `key`, returning the previous value
    ///
    /// # Errors
    /// Propagates backend store failures.
    pub async fn remove(&self, key: &LedgerKey) -> Result<Option<Value>> {
        let removed = self.mutate(|doc| Ok(remove(doc, key))).await?;
        if removed.is_some() {
            tracing::info!(network = %self.inner.network, key = %key, "ledger entry removed");
        }
        Ok(removed)
    }

    /// Nested object stored under `prefix`
    ///
    /// # Errors
    /// Propagates backend load failures.
    pub async fn subtree(&self, prefix: &LedgerKey) -> Result<Option<Map<String, Value>>> {
        self.read(|doc| match lookup(doc, prefix) {
            Some(Value::Object(map)) => Some(map.clone()),
            _ => None,
        })
        .await
    }

    /// Full document snapshot
    ///
    /// # Errors
    /// Propagates backend load failures.
    pub async fn snapshot(&self) -> Result<Map<String, Value>> {
        self.read(Clone::clone).await
    }

    /// Explicit reset: durably empty the whole document
    ///
    /// # Errors
    /// Propagates backend store failures.
    pub async fn reset(&self) -> Result<()> {
        self.mutate(|doc| {
            doc.clear();
            Ok(())
        })
        .await?;
        tracing::warn!(network = %self.inner.network, "ledger reset");
        Ok(())
    }

    async fn read<R>(&self, f: impl FnOnce(&Map<String, Value>) -> R) -> Result<R> {
        let mut guard = self.inner.doc.lock().await;
        let doc = self.loaded(&mut guard).await?;
        Ok(f(doc))
    }

    async fn mutate<R>(&self, f: impl FnOnce(&mut Map<String, Value>) -> Result<R>) -> Result<R> {
        let mut guard = self.inner.doc.lock().await;
        let current = self.loaded(&mut guard).await?;

        let mut next = current.clone();
        let out = f(&mut next)?;
        self.inner.backend.store(&next).await?;
        *guard = Some(next);
        Ok(out)
    }

    async fn loaded<'g>(
        &self,
        guard: &'g mut Option<Map<String, Value>>,
    ) -> Result<&'g mut Map<String, Value>> {
        if guard.is_none() {
            let doc = self.inner.backend.load().await?;
            tracing::debug!(
                network = %self.inner.network,
                location = %self.inner.backend.describe(),
                entries = doc.len(),
                "ledger loaded"
            );
            *guard = Some(doc);
        }
        Ok(guard.get_or_insert_with(Map::new))
    }
}

fn lookup<'a>(doc: &'a Map<String, Value>, key: &LedgerKey) -> Option<&'a Value> {
    let mut segments = key.segments();
    let first = segments.next()?;
    segments.try_fold(doc.get(first)?, |node, segment| node.as_object()?.get(segment))
}

fn insert(doc: &mut Map<String, Value>, key: &LedgerKey, value: Value) -> Result<()> {
    let segments: Vec<&str> = key.segments().collect();
    let Some((last, parents)) = segments.split_last() else {
        return Err(LedgerError::InvalidKey(key.to_string()));
    };

    let mut node = doc;
    for (depth, segment) in parents.iter().enumerate() {
        let slot = node
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if slot.is_null() {
            *slot = Value::Object(Map::new());
        }
        node = match slot {
            Value::Object(map) => map,
            _ => {
                return Err(LedgerError::KeyConflict {
                    key: key.to_string(),
                    blocking: parents[..=depth].join("."),
                })
            }
        };
    }
    node.insert((*last).to_string(), value);
    Ok(())
}

fn remove(doc: &mut Map<String, Value>, key: &LedgerKey) -> Option<Value> {
    let segments: Vec<&str> = key.segments().collect();
    let (last, parents) = segments.split_last()?;

    let mut node = doc;
    for segment in parents {
        node = node.get_mut(*segment)?.as_object_mut()?;
    }
    node.remove(*last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(raw: &str) -> LedgerKey {
        LedgerKey::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn dotted_keys_nest() {
        let ledger = Ledger::in_memory("testnet");
        ledger.set(&key("Staking.address"), "0x01").await.unwrap();
        ledger.set(&key("Staking.impl.version"), "0.1.0").await.unwrap();

        let snapshot = ledger.snapshot().await.unwrap();
        assert_eq!(
            Value::Object(snapshot),
            json!({ "Staking": { "address": "0x01", "impl": { "version": "0.1.0" } } })
        );
    }

    #[tokio::test]
    async fn null_reads_as_absent() {
        let ledger = Ledger::in_memory("testnet");
        ledger.set(&key("a.b"), &Value::Null).await.unwrap();
        assert!(!ledger.contains(&key("a.b")).await.unwrap());
        assert_eq!(ledger.get_as::<String>(&key("a.b")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn writing_under_scalar_conflicts() {
        let ledger = Ledger::in_memory("testnet");
        ledger.set(&key("a.b"), &1).await.unwrap();
        let err = ledger.set(&key("a.b.c"), &2).await.unwrap_err();
        assert!(matches!(err, LedgerError::KeyConflict { ref blocking, .. } if blocking == "a.b"));
        // Failed write leaves document untouched
        assert_eq!(ledger.get_as::<u64>(&key("a.b")).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn wrong_type_is_deserialize_error() {
        let ledger = Ledger::in_memory("testnet");
        ledger.set(&key("a"), "text").await.unwrap();
        assert!(matches!(
            ledger.get_as::<u64>(&key("a")).await,
            Err(LedgerError::Deserialize { .. })
        ));
    }

    #[tokio::test]
    async fn remove_and_subtree() {
        let ledger = Ledger::in_memory("testnet");
        ledger.set(&key("pools.0xaa.poolId"), &3).await.unwrap();
        ledger.set(&key("pools.0xaa.items.1.migrated"), &true).await.unwrap();

        let tree = ledger.subtree(&key("pools.0xaa")).await.unwrap().unwrap();
        assert_eq!(tree.len(), 2);

        assert_eq!(
            ledger.remove(&key("pools.0xaa.poolId")).await.unwrap(),
            Some(json!(3))
        );
        assert_eq!(ledger.remove(&key("pools.0xbb.poolId")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_many_is_one_store() {
        let backend = Arc::new(MemoryBackend::new());
        let ledger = Ledger::with_backend("testnet", backend.clone());
        let entries: Vec<(LedgerKey, bool)> = (0..5)
            .map(|i| (key(&format!("pools.0xaa.items.{i}.migrated")), true))
            .collect();
        ledger.set_many(&entries).await.unwrap();
        assert_eq!(backend.store_count(), 1);
        assert_eq!(
            ledger.get_as::<bool>(&key("pools.0xaa.items.4.migrated")).await.unwrap(),
            Some(true)
        );

        ledger.set_many::<bool>(&[]).await.unwrap();
        assert_eq!(backend.store_count(), 1);
    }

    #[tokio::test]
    async fn set_many_conflict_writes_nothing() {
        let mut seeded = Map::new();
        seeded.insert("pools".into(), json!({ "0xaa": { "items": 7 } }));
        let backend = Arc::new(MemoryBackend::with_document(seeded));
        let ledger = Ledger::with_backend("testnet", backend.clone());

        let err = ledger
            .set_many(&[
                (key("pools.0xbb.poolId"), json!(1)),
                (key("pools.0xaa.items.1.migrated"), json!(true)),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::KeyConflict { .. }));
        assert_eq!(backend.store_count(), 0);
        assert!(!ledger.contains(&key("pools.0xbb.poolId")).await.unwrap());
    }

    #[tokio::test]
    async fn reset_clears_everything() {
        let ledger = Ledger::in_memory("testnet");
        ledger.set(&key("x"), &1).await.unwrap();
        ledger.reset().await.unwrap();
        assert!(ledger.snapshot().await.unwrap().is_empty());
    }
}
