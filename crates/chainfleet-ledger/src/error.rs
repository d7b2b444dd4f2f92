//! Error types for the ledger
//!
//! Every variant is fatal for the current run. The ledger never retries
//! or swallows an I/O failure; callers propagate it with `?`.

use std::path::PathBuf;

/// Ledger errors
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Backing file could not be read or written
    #[error("ledger io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Backing document is not valid JSON
    #[error("ledger document {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Backing document is valid JSON but not an object
    #[error("ledger document {0} is not a JSON object")]
    NotAnObject(PathBuf),

    /// Value could not be serialized for storage
    #[error("cannot serialize value for '{key}': {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Stored value does not match the requested type
    #[error("cannot deserialize value at '{key}': {source}")]
    Deserialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Key is empty or has an empty segment
    #[error("invalid ledger key: '{0}'")]
    InvalidKey(String),

    /// A write would nest beneath an existing non-object value
    #[error("cannot write '{key}': '{blocking}' already holds a non-object value")]
    KeyConflict { key: String, blocking: String },
}

impl LedgerError {
    /// Create IO error for path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result alias for ledger operations
pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_conflict_display_names_both_keys() {
        let err = LedgerError::KeyConflict {
            key: "a.b.c".to_string(),
            blocking: "a.b".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("a.b.c"));
        assert!(msg.contains("'a.b'"));
    }
}
