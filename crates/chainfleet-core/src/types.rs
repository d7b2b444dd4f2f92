//! Core types for chainfleet
//!
//! Defines the values exchanged with chain collaborators:
//! - Addresses and pending submission references
//! - Encoded calls and receipts
//! - Raw and decoded event logs

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Chain identity (EIP-155 chain id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(pub u64);

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 20-byte account address, stored lower-case with `0x` prefix
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Byte length of an address
    pub const LEN: usize = 20;

    /// Parse a hex address
    ///
    /// # Errors
    /// Returns `InvalidAddress` unless the input is `0x` followed by 40 hex digits.
    pub fn parse(raw: &str) -> Result<Self, InvalidAddress> {
        let digits = raw
            .strip_prefix("0x")
            .or_else(|| raw.strip_prefix("0X"))
            .ok_or_else(|| InvalidAddress(raw.to_string()))?;
        if digits.len() != Self::LEN * 2 || hex::decode(digits).is_err() {
            return Err(InvalidAddress(raw.to_string()));
        }
        Ok(Self(format!("0x{}", digits.to_ascii_lowercase())))
    }

    /// Address from raw bytes
    #[must_use]
    pub fn from_bytes(bytes: [u8; Self::LEN]) -> Self {
        Self(format!("0x{}", hex::encode(bytes)))
    }

    /// The zero address
    #[must_use]
    pub fn zero() -> Self {
        Self::from_bytes([0; Self::LEN])
    }

    /// Hex form
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = InvalidAddress;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = InvalidAddress;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.0
    }
}

/// Rejected address text
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid address: '{0}'")]
pub struct InvalidAddress(pub String);

/// Reference to a submitted, possibly unconfirmed operation (transaction hash)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PendingRef(pub String);

impl PendingRef {
    /// Create reference from a hash string
    #[inline]
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    /// Hash string
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PendingRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Constructor / initializer arguments, kept opaque
pub type ConstructorArgs = Vec<Value>;

/// One encoded call (`encodeCall(method, args)`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedCall {
    /// Method name, for logs
    pub method: String,
    /// Collaborator-specific call data
    pub data: Vec<u8>,
}

impl EncodedCall {
    /// Create encoded call
    #[inline]
    pub fn new(method: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            method: method.into(),
            data,
        }
    }
}

/// Final status of a confirmed submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptStatus {
    /// Executed and committed
    Success,
    /// Included but reverted, no state change
    Reverted,
}

/// Undecoded log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    /// Emitting contract
    pub emitter: Address,
    /// Indexed topics
    pub topics: Vec<String>,
    /// Non-indexed data
    pub data: Vec<u8>,
}

/// Confirmation of a submitted operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Submission this receipt confirms
    pub pending: PendingRef,
    /// Inclusion block
    pub block_number: u64,
    /// Outcome
    pub status: ReceiptStatus,
    /// Address created by a deployment
    pub contract_address: Option<Address>,
    /// Emitted logs in order
    pub logs: Vec<RawLog>,
}

impl Receipt {
    /// Whether the operation committed
    #[inline]
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.status == ReceiptStatus::Success
    }
}

/// Event decoded by name from a raw log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Event name
    pub name: String,
    /// Named arguments
    pub args: Map<String, Value>,
}

impl EventRecord {
    /// Numeric argument (accepts JSON numbers and decimal strings)
    #[must_use]
    pub fn arg_u64(&self, field: &str) -> Option<u64> {
        match self.args.get(field)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// String argument (numbers are rendered in decimal)
    #[must_use]
    pub fn arg_string(&self, field: &str) -> Option<String> {
        match self.args.get(field)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn address_normalizes_case() {
        let a = Address::parse("0xABCDEF0123456789abcdef0123456789ABCDEF01").unwrap();
        assert_eq!(a.as_str(), "0xabcdef0123456789abcdef0123456789abcdef01");
        assert_eq!(a, "0xabcdef0123456789ABCDEF0123456789abcdef01".parse().unwrap());
    }

    #[test]
    fn address_rejects_bad_input() {
        assert!(Address::parse("abcdef0123456789abcdef0123456789abcdef01").is_err());
        assert!(Address::parse("0x1234").is_err());
        assert!(Address::parse("0xzzcdef0123456789abcdef0123456789abcdef01").is_err());
    }

    #[test]
    fn address_serde_validates() {
        let ok: Address = serde_json::from_value(json!("0x0000000000000000000000000000000000000001")).unwrap();
        assert_eq!(ok.to_string(), "0x0000000000000000000000000000000000000001");
        assert!(serde_json::from_value::<Address>(json!("0x01")).is_err());
    }

    #[test]
    fn event_args_accept_strings_and_numbers() {
        let mut args = Map::new();
        args.insert("poolId".into(), json!("7"));
        args.insert("itemId".into(), json!(12));
        let event = EventRecord {
            name: "ItemMigrated".into(),
            args,
        };
        assert_eq!(event.arg_u64("poolId"), Some(7));
        assert_eq!(event.arg_string("itemId").as_deref(), Some("12"));
        assert_eq!(event.arg_u64("missing"), None);
    }
}
