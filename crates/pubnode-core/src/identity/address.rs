//! Node addresses
//!
//! Format: `0x{40 lower-case hex chars}`
//!
//! The address is the last 20 bytes of `sha256(ed25519_public_key)`, so it
//! identifies a node without revealing the full key and fits the `address`
//! field type of typed documents.

use crate::error::{NodeError, NodeResult};
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Length of an address in bytes
pub const ADDRESS_LEN: usize = 20;

/// Identity key of a node
///
/// Always stored checksum-normalized (lower-case hex), so two addresses that
/// differ only in letter case compare equal after parsing.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Derive the address controlled by an Ed25519 public key
    pub fn from_public_key(public_key: &VerifyingKey) -> Self {
        let hash = Sha256::digest(public_key.as_bytes());
        Address(format!("0x{}", hex::encode(&hash[32 - ADDRESS_LEN..])))
    }

    /// Parse and normalize an address string
    pub fn parse(s: &str) -> NodeResult<Self> {
        let trimmed = s.trim();
        let hex_part = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| NodeError::InvalidPayload(format!("address must start with 0x: {}", s)))?;

        if hex_part.len() != ADDRESS_LEN * 2 {
            return Err(NodeError::InvalidPayload(format!(
                "address must be {} hex characters: {}",
                ADDRESS_LEN * 2,
                s
            )));
        }
        if !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(NodeError::InvalidPayload(format!(
                "address contains non-hex characters: {}",
                s
            )));
        }

        Ok(Address(format!("0x{}", hex_part.to_ascii_lowercase())))
    }

    /// Get the address as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Raw 20 address bytes
    pub fn to_bytes(&self) -> [u8; ADDRESS_LEN] {
        let mut out = [0u8; ADDRESS_LEN];
        // Format is validated on construction
        if let Ok(decoded) = hex::decode(&self.0[2..]) {
            out.copy_from_slice(&decoded);
        }
        out
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Address {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = NodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
