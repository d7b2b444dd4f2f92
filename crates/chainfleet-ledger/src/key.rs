//! Dotted ledger keys
//!
//! Keys are dot-separated paths into the ledger document:
//! `Staking.address`, `Staking.impl.version`, `pools.0xabc.items.7.migrated`.
//! Segments may contain any character except `.`; use [`segment`] to
//! embed free-form names (such as name-service nodes) as one segment.

use crate::error::{LedgerError, Result};
use std::fmt;
use std::str::FromStr;

/// Suffix appended to a resource key for its pending submission reference
pub const PENDING_SUFFIX: &str = "-pending";

/// Validated dotted key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LedgerKey(String);

impl LedgerKey {
    /// Parse and validate a dotted key
    ///
    /// # Errors
    /// Returns `LedgerError::InvalidKey` for empty keys or empty segments.
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.is_empty() || raw.split('.').any(str::is_empty) {
            return Err(LedgerError::InvalidKey(raw));
        }
        Ok(Self(raw))
    }

    /// Key segments in order
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// Append a child field
    ///
    /// # Errors
    /// Returns `LedgerError::InvalidKey` if the field is empty or dotted-empty.
    pub fn child(&self, field: &str) -> Result<Self> {
        Self::parse(format!("{}.{}", self.0, field))
    }

    /// Sibling key holding the pending submission reference (`<key>-pending`)
    #[inline]
    #[must_use]
    pub fn pending(&self) -> Self {
        self.with_suffix(PENDING_SUFFIX)
    }

    /// Sibling key with a suffix glued onto the last segment
    #[inline]
    #[must_use]
    pub fn with_suffix(&self, suffix: &str) -> Self {
        Self(format!("{}{}", self.0, suffix))
    }

    /// Raw dotted form
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LedgerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for LedgerKey {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Encode a free-form name as a single key segment (`.` becomes `/`)
#[must_use]
pub fn segment(name: &str) -> String {
    name.replace('.', "/")
}
