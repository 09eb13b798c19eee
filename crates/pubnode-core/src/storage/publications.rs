//! Publication Storage - attestations that an author published some content
//!
//! Three tables move together in one write transaction:
//! - publications by id
//! - the idempotency key `author|created_at|hash` mapping to the id
//! - per-content reference counts
//!
//! The key index is ordered by author then zero-padded timestamp, so an
//! author's timeline is a single prefix scan. Signing stamps the row with
//! its place in the node's publish order, which is what followers page by.

use crate::error::NodeError;
use crate::identity::Address;
use crate::types::{ContentHash, Publication, PublicationKey};
use redb::{ReadableTable, TableDefinition, WriteTransaction};

use super::contents::CONTENTS_TABLE;
use super::{decode, encode, next_id, Storage};

/// Table for publications (key: id, value: serialized Publication)
pub(crate) const PUBLICATIONS_TABLE: TableDefinition<u64, &[u8]> =
    TableDefinition::new("publications");

/// Table for the publication idempotency key (key: storage key, value: id)
pub(crate) const PUBLICATION_KEYS_TABLE: TableDefinition<&str, u64> =
    TableDefinition::new("publication_keys");

/// Table for content reference counts (key: content hash, value: count)
pub(crate) const CONTENT_REFS_TABLE: TableDefinition<&str, u64> =
    TableDefinition::new("content_refs");

const PUBLICATION_COUNTER: &str = "publications";
const PUBLISH_SEQUENCE: &str = "publish_sequence";

fn adjust_refs(txn: &WriteTransaction, hash: &ContentHash, delta: i64) -> Result<u64, NodeError> {
    let mut table = txn.open_table(CONTENT_REFS_TABLE)?;
    let current = table.get(hash.as_str())?.map(|v| v.value()).unwrap_or(0);
    let next = if delta < 0 {
        current.saturating_sub(delta.unsigned_abs())
    } else {
        current + delta as u64
    };
    if next == 0 {
        table.remove(hash.as_str())?;
    } else {
        table.insert(hash.as_str(), next)?;
    }
    Ok(next)
}

impl Storage {
    // ═══════════════════════════════════════════════════════════════════════
    // Publication Operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Insert a publication.
    ///
    /// Fails with `ReplicationAlreadyExists` if a publication with the same
    /// (content_hash, author, created_at) is present, and with
    /// `ContentNotFound` if the referenced content row does not exist.
    /// Returns the stored row with its assigned id.
    pub fn insert_publication(&self, publication: &Publication) -> Result<Publication, NodeError> {
        let key = publication.key().storage_key();

        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;

        {
            let keys = write_txn.open_table(PUBLICATION_KEYS_TABLE)?;
            if keys.get(key.as_str())?.is_some() {
                return Err(NodeError::ReplicationAlreadyExists(key));
            }
        }
        {
            let contents = write_txn.open_table(CONTENTS_TABLE)?;
            if contents.get(publication.content_hash.as_str())?.is_none() {
                return Err(NodeError::ContentNotFound(publication.content_hash.to_string()));
            }
        }

        let mut stored = publication.clone();
        stored.id = next_id(&write_txn, PUBLICATION_COUNTER)?;

        {
            let mut table = write_txn.open_table(PUBLICATIONS_TABLE)?;
            let serialized = encode(&stored)?;
            table.insert(stored.id, serialized.as_slice())?;

            let mut keys = write_txn.open_table(PUBLICATION_KEYS_TABLE)?;
            keys.insert(key.as_str(), stored.id)?;
        }
        adjust_refs(&write_txn, &stored.content_hash, 1)?;

        write_txn.commit()?;
        Ok(stored)
    }

    /// Load a publication by id
    pub fn load_publication(&self, id: u64) -> Result<Option<Publication>, NodeError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let table = read_txn.open_table(PUBLICATIONS_TABLE)?;

        match table.get(id)? {
            Some(data) => Ok(Some(decode(data.value())?)),
            None => Ok(None),
        }
    }

    /// Look a publication up by its idempotency key
    pub fn find_publication(&self, key: &PublicationKey) -> Result<Option<Publication>, NodeError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let keys = read_txn.open_table(PUBLICATION_KEYS_TABLE)?;

        let id = match keys.get(key.storage_key().as_str())? {
            Some(v) => v.value(),
            None => return Ok(None),
        };

        let table = read_txn.open_table(PUBLICATIONS_TABLE)?;
        match table.get(id)? {
            Some(data) => Ok(Some(decode(data.value())?)),
            None => Ok(None),
        }
    }

    /// Attach a signature to an unsigned publication.
    ///
    /// Records `published_at` and takes the next publish sequence number in
    /// the same transaction, so sequence order is commit order. Signed
    /// publications are immutable; a second call fails with
    /// `PublicationAlreadySigned`.
    pub fn set_publication_signature(
        &self,
        id: u64,
        signature: &str,
        published_at: i64,
    ) -> Result<Publication, NodeError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;
        let publication = {
            let mut table = write_txn.open_table(PUBLICATIONS_TABLE)?;
            let mut publication: Publication = match table.get(id)? {
                Some(data) => decode(data.value())?,
                None => return Err(NodeError::PublicationNotFound(id.to_string())),
            };
            if publication.is_signed() {
                return Err(NodeError::PublicationAlreadySigned(id.to_string()));
            }
            publication.signature = Some(signature.to_string());
            publication.published_at = Some(published_at);
            publication.publish_seq = Some(next_id(&write_txn, PUBLISH_SEQUENCE)?);
            let serialized = encode(&publication)?;
            table.insert(id, serialized.as_slice())?;
            publication
        };
        write_txn.commit()?;
        Ok(publication)
    }

    /// Delete a publication and release its content reference.
    ///
    /// Returns the removed row.
    pub fn delete_publication(&self, id: u64) -> Result<Publication, NodeError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;
        let publication: Publication = {
            let mut table = write_txn.open_table(PUBLICATIONS_TABLE)?;
            let publication: Publication = match table.remove(id)? {
                Some(data) => decode(data.value())?,
                None => return Err(NodeError::PublicationNotFound(id.to_string())),
            };
            publication
        };
        {
            let mut keys = write_txn.open_table(PUBLICATION_KEYS_TABLE)?;
            keys.remove(publication.key().storage_key().as_str())?;
        }
        adjust_refs(&write_txn, &publication.content_hash, -1)?;
        write_txn.commit()?;
        Ok(publication)
    }

    /// Publications by `author` with `created_at >= since`, oldest first.
    ///
    /// With `signed_only`, drafts are skipped.
    pub fn list_publications_by_author(
        &self,
        author: &Address,
        since: i64,
        signed_only: bool,
    ) -> Result<Vec<Publication>, NodeError> {
        let prefix = format!("{}|", author);
        let start = format!("{}{:020}", prefix, since.max(0));

        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let keys = read_txn.open_table(PUBLICATION_KEYS_TABLE)?;
        let table = read_txn.open_table(PUBLICATIONS_TABLE)?;

        let mut publications = Vec::new();
        for entry in keys.range(start.as_str()..)? {
            let (key, id) = entry?;
            if !key.value().starts_with(&prefix) {
                break;
            }
            let publication: Publication = match table.get(id.value())? {
                Some(data) => decode(data.value())?,
                None => continue,
            };
            if publication.created_at < since || (signed_only && !publication.is_signed()) {
                continue;
            }
            publications.push(publication);
        }
        Ok(publications)
    }

    /// Signed publications by `author` in publish order.
    ///
    /// Without `after`, starts at the first one published at or after
    /// `since`. With `after`, starts right past that publish sequence.
    pub fn list_published(
        &self,
        author: &Address,
        since: i64,
        after: Option<u64>,
    ) -> Result<Vec<Publication>, NodeError> {
        let mut published: Vec<(u64, Publication)> = self
            .list_publications_by_author(author, i64::MIN, true)?
            .into_iter()
            .filter_map(|p| {
                let seq = p.publish_seq?;
                let included = match after {
                    Some(after) => seq > after,
                    None => p.published_at.unwrap_or(p.created_at) >= since,
                };
                included.then_some((seq, p))
            })
            .collect();
        published.sort_by_key(|(seq, _)| *seq);
        Ok(published.into_iter().map(|(_, p)| p).collect())
    }

    /// Every publication referencing `hash`
    pub fn publications_for_content(
        &self,
        hash: &ContentHash,
    ) -> Result<Vec<Publication>, NodeError> {
        Ok(self
            .list_publications()?
            .into_iter()
            .filter(|p| &p.content_hash == hash)
            .collect())
    }

    /// List every publication, in id order
    pub fn list_publications(&self) -> Result<Vec<Publication>, NodeError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let table = read_txn.open_table(PUBLICATIONS_TABLE)?;

        let mut publications = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            publications.push(decode(value.value())?);
        }
        Ok(publications)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::create_test_storage;
    use super::*;
    use crate::identity::NodeKeypair;
    use crate::types::{Content, ContentKind, POST_MIMETYPE};

    fn store_post(storage: &Storage, body: &str) -> ContentHash {
        let hash = ContentHash::of(body.as_bytes());
        storage
            .insert_content_if_absent(&Content {
                content_hash: hash.clone(),
                kind: ContentKind::Post,
                body: Some(body.to_string()),
                filename: None,
                mimetype: POST_MIMETYPE.to_string(),
                size: body.len() as u64,
                local_path: None,
                created_at: 0,
            })
            .unwrap();
        hash
    }

    fn publication(author: &Address, hash: &ContentHash, created_at: i64, signed: bool) -> Publication {
        Publication {
            id: 0,
            content_hash: hash.clone(),
            author_address: author.clone(),
            signature: signed.then(|| "0xsig".to_string()),
            comment_count: 0,
            created_at,
            description: None,
            published_at: None,
            publish_seq: None,
        }
    }

    #[test]
    fn test_insert_requires_content() {
        let (storage, _temp) = create_test_storage();
        let author = NodeKeypair::generate().address();
        let missing = ContentHash::of(b"never stored");

        let err = storage
            .insert_publication(&publication(&author, &missing, 1, true))
            .unwrap_err();
        assert!(matches!(err, NodeError::ContentNotFound(_)));
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let (storage, _temp) = create_test_storage();
        let author = NodeKeypair::generate().address();
        let hash = store_post(&storage, "# Hello");

        let stored = storage
            .insert_publication(&publication(&author, &hash, 42, true))
            .unwrap();
        assert!(stored.id > 0);

        let err = storage
            .insert_publication(&publication(&author, &hash, 42, true))
            .unwrap_err();
        assert!(matches!(err, NodeError::ReplicationAlreadyExists(_)));

        // Same content at a different time is a separate publication
        storage
            .insert_publication(&publication(&author, &hash, 43, true))
            .unwrap();
        assert_eq!(storage.content_ref_count(&hash).unwrap(), 2);
        assert_eq!(storage.publications_for_content(&hash).unwrap().len(), 2);
    }

    #[test]
    fn test_sign_once() {
        let (storage, _temp) = create_test_storage();
        let author = NodeKeypair::generate().address();
        let hash = store_post(&storage, "draft");

        let draft = storage
            .insert_publication(&publication(&author, &hash, 5, false))
            .unwrap();
        let signed = storage
            .set_publication_signature(draft.id, "0xabc", 10)
            .unwrap();
        assert!(signed.is_signed());
        assert_eq!(signed.published_at, Some(10));
        assert_eq!(signed.publish_seq, Some(1));

        let err = storage
            .set_publication_signature(draft.id, "0xdef", 11)
            .unwrap_err();
        assert!(matches!(err, NodeError::PublicationAlreadySigned(_)));

        let err = storage.set_publication_signature(999, "0x", 12).unwrap_err();
        assert!(matches!(err, NodeError::PublicationNotFound(_)));
    }

    #[test]
    fn test_delete_releases_reference() {
        let (storage, _temp) = create_test_storage();
        let author = NodeKeypair::generate().address();
        let hash = store_post(&storage, "bye");

        let stored = storage
            .insert_publication(&publication(&author, &hash, 5, true))
            .unwrap();
        assert_eq!(storage.content_ref_count(&hash).unwrap(), 1);

        storage.delete_publication(stored.id).unwrap();
        assert_eq!(storage.content_ref_count(&hash).unwrap(), 0);
        assert!(storage.find_publication(&stored.key()).unwrap().is_none());
        assert!(matches!(
            storage.delete_publication(stored.id),
            Err(NodeError::PublicationNotFound(_))
        ));
    }

    #[test]
    fn test_list_by_author_since_is_ascending() {
        let (storage, _temp) = create_test_storage();
        let author = NodeKeypair::from_seed(&[1; 32]).address();
        let other = NodeKeypair::from_seed(&[2; 32]).address();
        let hash = store_post(&storage, "x");

        for ts in [300, 100, 200] {
            storage
                .insert_publication(&publication(&author, &hash, ts, true))
                .unwrap();
        }
        storage
            .insert_publication(&publication(&author, &hash, 250, false))
            .unwrap();
        storage
            .insert_publication(&publication(&other, &hash, 150, true))
            .unwrap();

        let listed: Vec<i64> = storage
            .list_publications_by_author(&author, 200, true)
            .unwrap()
            .into_iter()
            .map(|p| p.created_at)
            .collect();
        assert_eq!(listed, vec![200, 300]);

        let all = storage.list_publications_by_author(&author, 0, false).unwrap();
        assert_eq!(all.len(), 4);
    }

    #[test]
    fn test_published_listing_follows_sign_order() {
        let (storage, _temp) = create_test_storage();
        let author = NodeKeypair::generate().address();
        let hash = store_post(&storage, "x");

        // Drafted oldest first, signed newest first
        let old = storage
            .insert_publication(&publication(&author, &hash, 100, false))
            .unwrap();
        let new = storage
            .insert_publication(&publication(&author, &hash, 200, false))
            .unwrap();
        storage.set_publication_signature(new.id, "0x1", 300).unwrap();
        storage.set_publication_signature(old.id, "0x2", 300).unwrap();

        let order: Vec<i64> = storage
            .list_published(&author, 0, None)
            .unwrap()
            .into_iter()
            .map(|p| p.created_at)
            .collect();
        assert_eq!(order, vec![200, 100]);

        // The late-signed draft is still reachable from a watermark past its created_at
        let since_250 = storage.list_published(&author, 250, None).unwrap();
        assert_eq!(since_250.len(), 2);
        assert!(storage.list_published(&author, 301, None).unwrap().is_empty());

        // Same second, later in sequence
        let after_first = storage.list_published(&author, 300, Some(1)).unwrap();
        assert_eq!(after_first.len(), 1);
        assert_eq!(after_first[0].created_at, 100);
        assert!(storage.list_published(&author, 300, Some(2)).unwrap().is_empty());
    }
}
