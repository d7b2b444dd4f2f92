//! Engine configuration
//!
//! Per-chain parameters are explicit structs keyed by chain identity and
//! handed to components at construction time. Loaded from TOML:
//!
//! ```toml
//! ledger_dir = "deployments"
//!
//! [[chains]]
//! chain_id = 11155111
//! network = "sepolia"
//! operator = "0x1111111111111111111111111111111111111111"
//!
//! [chains.batch]
//! chunk_size = 50
//! parallelism = 4
//!
//! [chains.migration]
//! namespace = "stakingMigration"
//! ```

use crate::confirm::ConfirmationPolicy;
use crate::error::ConfigError;
use crate::types::{Address, ChainId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory holding one ledger document per network
    #[serde(default = "default_ledger_dir")]
    pub ledger_dir: PathBuf,
    /// Configured chains
    #[serde(default)]
    pub chains: Vec<ChainConfig>,
}

fn default_ledger_dir() -> PathBuf {
    PathBuf::from("deployments")
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ledger_dir: default_ledger_dir(),
            chains: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Create empty configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With an additional chain
    #[must_use]
    pub fn with_chain(mut self, chain: ChainConfig) -> Self {
        self.chains.push(chain);
        self
    }

    /// Parse and validate TOML
    ///
    /// # Errors
    /// `ConfigError::Parse` for malformed TOML, `ConfigError::Invalid` for
    /// out-of-range values.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    ///
    /// # Errors
    /// `ConfigError::Io` if the file cannot be read, otherwise as
    /// [`EngineConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Check cross-field consistency
    ///
    /// # Errors
    /// `ConfigError::Invalid` describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut ids = BTreeSet::new();
        let mut networks = BTreeSet::new();
        for chain in &self.chains {
            if !ids.insert(chain.chain_id) {
                return Err(ConfigError::Invalid(format!(
                    "chain {} configured twice",
                    chain.chain_id
                )));
            }
            if !networks.insert(chain.network.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "network '{}' configured twice",
                    chain.network
                )));
            }
            chain.validate()?;
        }
        Ok(())
    }

    /// Configuration for `chain_id`
    ///
    /// # Errors
    /// `ConfigError::UnknownChain` if not configured.
    pub fn chain(&self, chain_id: ChainId) -> Result<&ChainConfig, ConfigError> {
        self.chains
            .iter()
            .find(|c| c.chain_id == chain_id)
            .ok_or(ConfigError::UnknownChain(chain_id))
    }

    /// Configuration for a network name
    #[must_use]
    pub fn network(&self, network: &str) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.network == network)
    }
}

/// Parameters for one chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Chain identity
    pub chain_id: ChainId,
    /// Network name; also the ledger document name
    pub network: String,
    /// Account submitting operations
    #[serde(default)]
    pub operator: Option<Address>,
    /// Batch executor settings
    #[serde(default)]
    pub batch: BatchConfig,
    /// Confirmation retry policy
    #[serde(default)]
    pub confirmation: ConfirmationPolicy,
    /// Migration workflow settings
    #[serde(default)]
    pub migration: MigrationConfig,
    /// Role identifiers by name
    #[serde(default)]
    pub roles: BTreeMap<String, String>,
    /// Free-form per-chain parameters for scripts
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
}

impl ChainConfig {
    /// Create chain config with defaults
    #[must_use]
    pub fn new(chain_id: ChainId, network: impl Into<String>) -> Self {
        Self {
            chain_id,
            network: network.into(),
            operator: None,
            batch: BatchConfig::default(),
            confirmation: ConfirmationPolicy::default(),
            migration: MigrationConfig::default(),
            roles: BTreeMap::new(),
            params: BTreeMap::new(),
        }
    }

    /// With batch settings
    #[inline]
    #[must_use]
    pub fn with_batch(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    /// With confirmation policy
    #[inline]
    #[must_use]
    pub fn with_confirmation(mut self, policy: ConfirmationPolicy) -> Self {
        self.confirmation = policy;
        self
    }

    /// With operator account
    #[inline]
    #[must_use]
    pub fn with_operator(mut self, operator: Address) -> Self {
        self.operator = Some(operator);
        self
    }

    /// Role identifier by name
    #[must_use]
    pub fn role(&self, name: &str) -> Option<&str> {
        self.roles.get(name).map(String::as_str)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.network.is_empty() || self.network.contains(['/', '\\', '.']) {
            return Err(ConfigError::Invalid(format!(
                "chain {}: network name '{}' must be non-empty and path-safe",
                self.chain_id, self.network
            )));
        }
        self.batch.validate().map_err(|msg| {
            ConfigError::Invalid(format!("chain {}: {msg}", self.chain_id))
        })?;
        if self.confirmation.max_attempts == 0 {
            return Err(ConfigError::Invalid(format!(
                "chain {}: confirmation.max_attempts must be at least 1",
                self.chain_id
            )));
        }
        if self.migration.namespace.is_empty() || self.migration.namespace.contains('.') {
            return Err(ConfigError::Invalid(format!(
                "chain {}: migration.namespace must be a single key segment",
                self.chain_id
            )));
        }
        Ok(())
    }
}

/// Batch executor settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Operations per multicall chunk
    pub chunk_size: usize,
    /// Chunks awaiting confirmation at once
    pub parallelism: usize,
}

impl BatchConfig {
    /// Create batch settings
    #[inline]
    #[must_use]
    pub fn new(chunk_size: usize, parallelism: usize) -> Self {
        Self {
            chunk_size,
            parallelism,
        }
    }

    fn validate(&self) -> Result<(), String> {
        if self.chunk_size == 0 {
            return Err("batch.chunk_size must be at least 1".into());
        }
        if self.parallelism == 0 {
            return Err("batch.parallelism must be at least 1".into());
        }
        Ok(())
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: 50,
            parallelism: 4,
        }
    }
}

/// Migration workflow settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Ledger namespace for groups (`<namespace>.<owner>...`)
    pub namespace: String,
    /// Event names and fields used as completion evidence
    pub events: MigrationEvents,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            namespace: "migration".into(),
            events: MigrationEvents::default(),
        }
    }
}

impl MigrationConfig {
    /// With ledger namespace
    #[inline]
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }
}

/// Event names and argument fields the migration workflow decodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationEvents {
    /// Emitted once when the group is created
    pub group_created: String,
    /// Argument of `group_created` holding the new group id
    pub group_id_field: String,
    /// Emitted per item whose state changed
    pub item_migrated: String,
    /// Argument of `item_migrated` holding the item id
    pub item_id_field: String,
}

impl Default for MigrationEvents {
    fn default() -> Self {
        Self {
            group_created: "PoolCreated".into(),
            group_id_field: "poolId".into(),
            item_migrated: "ItemMigrated".into(),
            item_id_field: "itemId".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
ledger_dir = "out"

[[chains]]
chain_id = 11155111
network = "sepolia"
operator = "0x1111111111111111111111111111111111111111"

[chains.batch]
chunk_size = 25

[chains.confirmation]
max_attempts = 2

[chains.roles]
minter = "0x9f2df0fed2c77648de5860a4cc508cd0818c85b8b8a1ab4ceeef8d981c8956a6"

[chains.params]
unbondingDays = 21

[[chains]]
chain_id = 1
network = "mainnet"
"#;

    #[test]
    fn parses_sample_config() {
        let config = EngineConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.ledger_dir, PathBuf::from("out"));

        let sepolia = config.chain(ChainId(11_155_111)).unwrap();
        assert_eq!(sepolia.batch, BatchConfig::new(25, 4));
        assert_eq!(sepolia.confirmation.max_attempts, 2);
        assert_eq!(sepolia.confirmation.initial_backoff_ms, 2_000);
        assert!(sepolia.role("minter").is_some());
        assert_eq!(sepolia.params["unbondingDays"], Value::from(21));
        assert_eq!(sepolia.migration.events.group_created, "PoolCreated");

        assert!(config.network("mainnet").is_some());
        assert!(matches!(config.chain(ChainId(5)), Err(ConfigError::UnknownChain(_))));
    }

    #[test]
    fn rejects_duplicate_chain_ids() {
        let text = "[[chains]]\nchain_id = 1\nnetwork = \"a\"\n[[chains]]\nchain_id = 1\nnetwork = \"b\"\n";
        assert!(matches!(
            EngineConfig::from_toml_str(text),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_zero_parallelism() {
        let text = "[[chains]]\nchain_id = 1\nnetwork = \"a\"\n[chains.batch]\nparallelism = 0\n";
        assert!(matches!(
            EngineConfig::from_toml_str(text),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_bad_operator_address() {
        let text = "[[chains]]\nchain_id = 1\nnetwork = \"a\"\noperator = \"0x12\"\n";
        assert!(matches!(
            EngineConfig::from_toml_str(text),
            Err(ConfigError::Parse(_))
        ));
    }
}
