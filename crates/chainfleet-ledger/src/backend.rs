//! Ledger storage backends
//!
//! A backend loads and stores the whole ledger document. The [`Ledger`]
//! serializes all access, so backends never see concurrent calls for the
//! same document.
//!
//! [`Ledger`]: crate::Ledger

use crate::error::{LedgerError, Result};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Persistence for one ledger document
#[async_trait::async_trait]
pub trait LedgerBackend: Send + Sync + std::fmt::Debug {
    /// Load the document, or an empty object if none exists yet
    async fn load(&self) -> Result<Map<String, Value>>;

    /// Durably replace the document
    async fn store(&self, doc: &Map<String, Value>) -> Result<()>;

    /// Human-readable location for logs
    fn describe(&self) -> String;
}

/// JSON file backend with atomic replace-on-write
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    /// Create backend for `path`; the file is created on first store
    #[inline]
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing document
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl LedgerBackend for JsonFileBackend {
    async fn load(&self) -> Result<Map<String, Value>> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(err) => return Err(LedgerError::io(&self.path, err)),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Map::new());
        }
        match serde_json::from_slice(&bytes) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(LedgerError::NotAnObject(self.path.clone())),
            Err(source) => Err(LedgerError::Corrupt {
                path: self.path.clone(),
                source,
            }),
        }
    }

    async fn store(&self, doc: &Map<String, Value>) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(doc).map_err(|source| LedgerError::Serialize {
            key: self.path.display().to_string(),
            source,
        })?;
        atomic_write(&self.path, &bytes).await
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

async fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| LedgerError::io(parent, err))?;
        }
    }

    let tmp = path.with_extension("json.tmp");
    let mut file = fs::File::create(&tmp)
        .await
        .map_err(|err| LedgerError::io(&tmp, err))?;
    file.write_all(bytes)
        .await
        .map_err(|err| LedgerError::io(&tmp, err))?;
    file.sync_all()
        .await
        .map_err(|err| LedgerError::io(&tmp, err))?;
    drop(file);

    fs::rename(&tmp, path)
        .await
        .map_err(|err| LedgerError::io(path, err))?;
    Ok(())
}

/// In-memory backend
///
/// Not durable across processes. Counts stores so tests can assert how many
/// writes a step performed.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    doc: Mutex<Map<String, Value>>,
    stores: Mutex<usize>,
}

impl MemoryBackend {
    /// Create empty backend
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create backend pre-seeded with a document
    #[must_use]
    pub fn with_document(doc: Map<String, Value>) -> Self {
        Self {
            doc: Mutex::new(doc),
            stores: Mutex::new(0),
        }
    }

    /// Number of completed stores
    #[must_use]
    pub fn store_count(&self) -> usize {
        *self.stores.lock()
    }
}

#[async_trait::async_trait]
impl LedgerBackend for MemoryBackend {
    async fn load(&self) -> Result<Map<String, Value>> {
        Ok(self.doc.lock().clone())
    }

    async fn store(&self, doc: &Map<String, Value>) -> Result<()> {
        *self.doc.lock() = doc.clone();
        *self.stores.lock() += 1;
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let backend = JsonFileBackend::new(dir.path().join("absent.json"));
        assert!(backend.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn store_then_load_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let backend = JsonFileBackend::new(dir.path().join("nested/mainnet.json"));

        let mut doc = Map::new();
        doc.insert("Staking".into(), json!({ "address": "0x01" }));
        backend.store(&doc).await.unwrap();

        assert_eq!(backend.load().await.unwrap(), doc);
        assert!(!dir.path().join("nested/mainnet.json.tmp").exists());
    }

    #[tokio::test]
    async fn non_object_document_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "[1,2,3]").unwrap();

        let err = JsonFileBackend::new(&path).load().await.unwrap_err();
        assert!(matches!(err, LedgerError::NotAnObject(_)));
    }

    #[tokio::test]
    async fn garbage_document_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = JsonFileBackend::new(&path).load().await.unwrap_err();
        assert!(matches!(err, LedgerError::Corrupt { .. }));
    }
}
