//! Process-wide ledger registry
//!
//! Hands out exactly one [`Ledger`] per network identity so every caller
//! in the process shares the same serialization queue for that network.

use crate::ledger::Ledger;
use dashmap::DashMap;
use std::path::{Path, PathBuf};

/// One ledger per network identity
#[derive(Debug)]
pub struct LedgerRegistry {
    dir: Option<PathBuf>,
    ledgers: DashMap<String, Ledger>,
}

impl LedgerRegistry {
    /// Registry of JSON ledgers stored under `dir`
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            ledgers: DashMap::new(),
        }
    }

    /// Registry of in-memory ledgers
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            ledgers: DashMap::new(),
        }
    }

    /// Directory backing this registry, if durable
    #[inline]
    #[must_use]
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Ledger for `network`, opened on first use
    #[must_use]
    pub fn ledger(&self, network: &str) -> Ledger {
        self.ledgers
            .entry(network.to_string())
            .or_insert_with(|| match &self.dir {
                Some(dir) => Ledger::open(dir, network),
                None => Ledger::in_memory(network),
            })
            .clone()
    }

    /// Networks opened so far
    #[must_use]
    pub fn networks(&self) -> Vec<String> {
        let mut names: Vec<String> = self.ledgers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::LedgerKey;

    #[tokio::test]
    async fn same_network_shares_one_ledger() {
        let registry = LedgerRegistry::in_memory();
        let key = LedgerKey::parse("Staking.address").unwrap();

        registry.ledger("mainnet").set(&key, "0x01").await.unwrap();
        let again = registry.ledger("mainnet");
        assert_eq!(again.get_as::<String>(&key).await.unwrap().as_deref(), Some("0x01"));

        assert!(!registry.ledger("testnet").contains(&key).await.unwrap());
        assert_eq!(registry.networks(), vec!["mainnet", "testnet"]);
    }
}
