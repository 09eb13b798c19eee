//! Core types for pubnode
//!
//! Relational rows (`Node`, `Connection`, `Content`, `Publication`), the
//! typed-document schemas every signed action uses, and the JSON bodies
//! exchanged between nodes.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{NodeError, NodeResult};

pub mod connection;
pub mod content;
pub mod documents;
pub mod node;
pub mod publication;
pub mod wire;

pub use connection::Connection;
pub use content::{Content, ContentKind, POST_MIMETYPE};
pub use node::Node;
pub use publication::{FeedCursor, Publication, PublicationKey};
pub use wire::{
    ConnectionRequest, ContentQuery, ErrorBody, ProfileUpdateRequest, PublicationMeta, PublicationPage,
    PublicationQuery, RemoteProfile, ReplicationRequest, SignedPublication,
};

/// Content address: `0x` + hex(sha256(bytes))
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash a complete byte slice
    pub fn of(bytes: &[u8]) -> Self {
        Self::from_digest(Sha256::digest(bytes).into())
    }

    /// Wrap an already computed sha256 digest
    pub fn from_digest(digest: [u8; 32]) -> Self {
        Self(format!("0x{}", hex::encode(digest)))
    }

    /// Parse and normalize a content hash string
    pub fn parse(s: &str) -> NodeResult<Self> {
        let hex_part = s
            .trim()
            .strip_prefix("0x")
            .ok_or_else(|| NodeError::InvalidPayload(format!("content hash must start with 0x: {}", s)))?;
        if hex_part.len() != 64 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(NodeError::InvalidPayload(format!(
                "content hash must be 64 hex characters: {}",
                s
            )));
        }
        Ok(Self(format!("0x{}", hex_part.to_ascii_lowercase())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hex digits without the `0x` prefix
    pub fn hex(&self) -> &str {
        &self.0[2..]
    }

    /// Directory shard for file storage (first byte of the hash)
    pub fn shard(&self) -> &str {
        &self.0[2..4]
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ContentHash {
    type Error = NodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}

/// Current unix timestamp in seconds
pub fn now_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_of_known_bytes() {
        let hash = ContentHash::of(b"# Hello");
        let expected = format!("0x{}", hex::encode(Sha256::digest(b"# Hello")));
        assert_eq!(hash.as_str(), expected);
        assert_eq!(hash.as_str().len(), 66);
    }

    #[test]
    fn test_content_hash_shard() {
        let hash = ContentHash::parse(&format!("0xAB{}", "0".repeat(62))).unwrap();
        assert_eq!(hash.shard(), "ab");
        assert_eq!(hash.hex().len(), 64);
    }

    #[test]
    fn test_content_hash_rejects_garbage() {
        assert!(ContentHash::parse("abc").is_err());
        assert!(ContentHash::parse("0x1234").is_err());
        assert!(ContentHash::parse(&format!("0x{}", "g".repeat(64))).is_err());
    }

    #[test]
    fn test_content_hash_serde() {
        let hash = ContentHash::of(b"bytes");
        let json = serde_json::to_string(&hash).unwrap();
        let back: ContentHash = serde_json::from_str(&json).unwrap();
        assert_eq!(hash, back);
    }
}
