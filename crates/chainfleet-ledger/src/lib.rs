//! chainfleet Ledger - durable provisioning progress
//!
//! A persisted key to value store, one document per network identity:
//! - Dotted keys (`Staking.impl.version`) stored as nested JSON
//! - Serialized access per network (single async lock)
//! - Durable writes (atomic replace) before each mutation returns
//! - I/O failures surface as [`LedgerError`] and are never swallowed
//!
//! # Example
//!
//! ```rust,ignore
//! use chainfleet_ledger::{Ledger, LedgerKey};
//!
//! # async fn example() -> Result<(), chainfleet_ledger::LedgerError> {
//! let ledger = Ledger::open("deployments", "mainnet");
//! let key = LedgerKey::parse("Staking.address")?;
//! ledger.set(&key, "0x5fbdb2315678afecb367f032d93f642f64180aa3").await?;
//! let address: Option<String> = ledger.get_as(&key).await?;
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod backend;
pub mod error;
pub mod key;
pub mod ledger;
pub mod registry;

pub use backend::{JsonFileBackend, LedgerBackend, MemoryBackend};
pub use error::{LedgerError, Result};
pub use key::{segment, LedgerKey, PENDING_SUFFIX};
pub use ledger::Ledger;
pub use registry::LedgerRegistry;
