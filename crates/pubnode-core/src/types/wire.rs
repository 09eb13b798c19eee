//! JSON bodies exchanged between nodes
//!
//! Field names are camelCase on the wire.

use serde::{Deserialize, Serialize};

use crate::identity::{Address, TypedDocument};
use crate::types::content::ContentKind;
use crate::types::publication::FeedCursor;

/// `GET /profile` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteProfile {
    pub address: Address,
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub profile_version: u64,
}

/// `POST /connections` and `DELETE /connections` body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRequest {
    pub typed_data: TypedDocument,
    pub signature: String,
    /// Set when a node forwards the request to the other party
    #[serde(default)]
    pub relayed: bool,
}

impl ConnectionRequest {
    pub fn new(typed_data: TypedDocument, signature: impl Into<String>) -> Self {
        Self {
            typed_data,
            signature: signature.into(),
            relayed: false,
        }
    }

    /// Copy of this request marked as forwarded by a peer
    pub fn relayed(&self) -> Self {
        Self {
            relayed: true,
            ..self.clone()
        }
    }
}

/// Unsigned metadata that travels with a publication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicationMeta {
    pub kind: ContentKind,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub mimetype: Option<String>,
    /// Sign time on the author's node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<i64>,
    /// Author's publish sequence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
}

/// A publication as listed by `GET /publications` or pushed by replication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedPublication {
    pub typed_data: TypedDocument,
    /// Unsigned items are never trusted
    #[serde(default)]
    pub signature: Option<String>,
    pub meta: PublicationMeta,
}

impl SignedPublication {
    /// Feed position the author listed this item at
    pub fn feed_cursor(&self) -> Option<FeedCursor> {
        Some(FeedCursor {
            published_at: self.meta.published_at?,
            sequence: self.meta.sequence?,
        })
    }
}

/// `POST /replications` body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationRequest {
    #[serde(flatten)]
    pub publication: SignedPublication,
    /// Publisher's current profile version, a freshness hint
    #[serde(default)]
    pub profile_version: Option<u64>,
}

/// `POST /nodes/updates` body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdateRequest {
    pub typed_data: TypedDocument,
    pub signature: String,
}

/// `GET /publications` query
///
/// Without `after`, lists everything published at or after `since`. With
/// `after`, lists everything later in publish order than that sequence and
/// `since` is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationQuery {
    pub since: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<u64>,
    pub limit: usize,
    /// 1-based
    pub page: usize,
}

impl PublicationQuery {
    /// First page of everything following `cursor`
    pub fn following(cursor: FeedCursor, limit: usize) -> Self {
        Self {
            since: cursor.published_at,
            after: Some(cursor.sequence),
            limit,
            page: 1,
        }
    }
}

impl Default for PublicationQuery {
    fn default() -> Self {
        Self {
            since: 0,
            after: None,
            limit: 50,
            page: 1,
        }
    }
}

/// `GET /publications` response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicationPage {
    pub items: Vec<SignedPublication>,
    pub page: usize,
    pub total_pages: usize,
    pub has_next_page: bool,
}

/// Error body every endpoint answers failures with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// `GET /contents/{hash}` query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentQuery {
    /// Created-at of the publication the caller is syncing
    #[serde(default)]
    pub timestamp: Option<i64>,
    /// `bytes=start-end`
    #[serde(default)]
    pub range: Option<String>,
    /// Validator from a previous response; a mismatch serves the full body
    #[serde(default)]
    pub if_range: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::NodeKeypair;
    use crate::types::documents::publication_document;
    use crate::types::ContentHash;

    #[test]
    fn test_replication_request_is_flat() {
        let author = NodeKeypair::generate().address();
        let request = ReplicationRequest {
            publication: SignedPublication {
                typed_data: publication_document(&author, &author, &ContentHash::of(b"x"), 5),
                signature: Some("0xabc".into()),
                meta: PublicationMeta {
                    kind: ContentKind::Post,
                    description: None,
                    filename: None,
                    mimetype: None,
                    published_at: Some(9),
                    sequence: Some(2),
                },
            },
            profile_version: Some(3),
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["signature"], "0xabc");
        assert_eq!(json["profileVersion"], 3);
        assert_eq!(json["meta"]["kind"], "POST");
        assert_eq!(json["meta"]["publishedAt"], 9);
        assert!(json.get("typedData").is_some());
        assert_eq!(
            request.publication.feed_cursor(),
            Some(FeedCursor {
                published_at: 9,
                sequence: 2
            })
        );

        let back: ReplicationRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn test_meta_without_feed_position_has_no_cursor() {
        let meta: PublicationMeta = serde_json::from_value(serde_json::json!({
            "kind": "FILE",
            "description": "a file"
        }))
        .unwrap();
        assert_eq!(meta.published_at, None);
        assert_eq!(meta.sequence, None);
    }

    #[test]
    fn test_query_follows_cursor() {
        let query = PublicationQuery::following(
            FeedCursor {
                published_at: 100,
                sequence: 7,
            },
            25,
        );
        assert_eq!(query.since, 100);
        assert_eq!(query.after, Some(7));
        assert_eq!(query.page, 1);
        assert_eq!(PublicationQuery::default().after, None);
    }

    #[test]
    fn test_connection_request_relayed_defaults_false() {
        let json = serde_json::json!({
            "typedData": {
                "domain": {"name": "pubnode", "version": "1"},
                "types": {},
                "primaryType": "Connection",
                "message": {}
            },
            "signature": "0x00"
        });
        let request: ConnectionRequest = serde_json::from_value(json).unwrap();
        assert!(!request.relayed);
        assert!(request.relayed().relayed);
    }
}
