//! Publications
//!
//! A publication points at content and starts as an unsigned draft. Once
//! signed it is immutable and eligible for replication. `created_at` is part
//! of the signed document and orders the timeline.
//!
//! The author's node also records when each publication was signed and a
//! per-node publish sequence. Followers page the author's feed in that
//! order, so a draft signed long after it was created is still seen.

use serde::{Deserialize, Serialize};

use crate::identity::Address;
use crate::types::ContentHash;

/// A (possibly signed) publication of content by an author
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publication {
    pub id: u64,
    pub content_hash: ContentHash,
    pub author_address: Address,
    /// `None` for drafts
    pub signature: Option<String>,
    pub comment_count: u64,
    pub created_at: i64,
    /// Required for FILE content
    pub description: Option<String>,
    /// When the signature was attached on the author's node
    pub published_at: Option<i64>,
    /// Position in the author's publish order; unset for drafts and
    /// publications replicated from elsewhere
    pub publish_seq: Option<u64>,
}

impl Publication {
    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    /// Where this publication sits in its author's feed
    pub fn feed_cursor(&self) -> Option<FeedCursor> {
        Some(FeedCursor {
            published_at: self.published_at?,
            sequence: self.publish_seq?,
        })
    }

    pub fn key(&self) -> PublicationKey {
        PublicationKey {
            content_hash: self.content_hash.clone(),
            author_address: self.author_address.clone(),
            created_at: self.created_at,
        }
    }
}

/// A point in an author's publish-ordered feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedCursor {
    pub published_at: i64,
    pub sequence: u64,
}

/// Identity of a publication across nodes: (content, author, created_at second)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PublicationKey {
    pub content_hash: ContentHash,
    pub author_address: Address,
    pub created_at: i64,
}

impl PublicationKey {
    /// Storage key; the timestamp is zero-padded so keys sort by time per author
    pub fn storage_key(&self) -> String {
        format!(
            "{}|{:020}|{}",
            self.author_address, self.created_at, self.content_hash
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::NodeKeypair;

    #[test]
    fn test_key_matches_fields() {
        let publication = Publication {
            id: 1,
            content_hash: ContentHash::of(b"x"),
            author_address: NodeKeypair::generate().address(),
            signature: None,
            comment_count: 0,
            created_at: 1_700_000_000,
            description: None,
            published_at: None,
            publish_seq: None,
        };
        let key = publication.key();
        assert_eq!(key.created_at, 1_700_000_000);
        assert!(!publication.is_signed());
        assert_eq!(publication.feed_cursor(), None);
        assert!(key.storage_key().contains("|00000000001700000000|"));
    }
}
