//! Content Storage - the content-addressed index
//!
//! Rows are keyed by content hash. FILE bytes live on disk; the row records
//! where. Reference counts are kept by the publications table and consulted
//! here before anything is removed.

use crate::error::NodeError;
use crate::types::{Content, ContentHash};
use redb::{ReadableTable, TableDefinition};

use super::publications::CONTENT_REFS_TABLE;
use super::{decode, encode, Storage};

/// Table for contents (key: content hash, value: serialized Content)
pub(crate) const CONTENTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("contents");

/// Outcome of [`Storage::remove_content_if_unreferenced`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentRemoval {
    /// Row removed (and the on-delete hook ran)
    Removed(Content),
    /// A publication references the content
    Referenced,
    /// Row is newer than the cutoff
    TooRecent,
    /// No such row
    Missing,
}

impl Storage {
    // ═══════════════════════════════════════════════════════════════════════
    // Content Operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Load a content row by hash
    pub fn load_content(&self, hash: &ContentHash) -> Result<Option<Content>, NodeError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let table = read_txn.open_table(CONTENTS_TABLE)?;

        match table.get(hash.as_str())? {
            Some(data) => Ok(Some(decode(data.value())?)),
            None => Ok(None),
        }
    }

    /// Insert a content row unless one with the same hash exists.
    ///
    /// Content rows are immutable: an existing row is returned untouched.
    /// Returns the stored row and whether it was newly inserted.
    pub fn insert_content_if_absent(&self, content: &Content) -> Result<(Content, bool), NodeError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;
        let result = {
            let mut table = write_txn.open_table(CONTENTS_TABLE)?;
            let existing: Option<Content> = match table.get(content.content_hash.as_str())? {
                Some(data) => Some(decode(data.value())?),
                None => None,
            };

            match existing {
                Some(row) => (row, false),
                None => {
                    let serialized = encode(content)?;
                    table.insert(content.content_hash.as_str(), serialized.as_slice())?;
                    (content.clone(), true)
                }
            }
        };
        write_txn.commit()?;
        Ok(result)
    }

    /// List every content row
    pub fn list_contents(&self) -> Result<Vec<Content>, NodeError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let table = read_txn.open_table(CONTENTS_TABLE)?;

        let mut contents = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            contents.push(decode(value.value())?);
        }
        Ok(contents)
    }

    /// Number of publications referencing `hash`
    pub fn content_ref_count(&self, hash: &ContentHash) -> Result<u64, NodeError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let table = read_txn.open_table(CONTENT_REFS_TABLE)?;
        Ok(table.get(hash.as_str())?.map(|v| v.value()).unwrap_or(0))
    }

    /// Remove a content row if nothing references it.
    ///
    /// The reference count is re-read inside the write transaction, so a
    /// publication committed after the caller's scan keeps its content.
    /// `on_delete` runs before commit; if it fails the row stays.
    pub fn remove_content_if_unreferenced<F>(
        &self,
        hash: &ContentHash,
        created_before: i64,
        on_delete: F,
    ) -> Result<ContentRemoval, NodeError>
    where
        F: FnOnce(&Content) -> std::io::Result<()>,
    {
        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;

        let refs = {
            let refs = write_txn.open_table(CONTENT_REFS_TABLE)?;
            let count = refs.get(hash.as_str())?.map(|v| v.value()).unwrap_or(0);
            count
        };
        if refs > 0 {
            return Ok(ContentRemoval::Referenced);
        }

        let removed = {
            let mut table = write_txn.open_table(CONTENTS_TABLE)?;
            let row: Content = match table.get(hash.as_str())? {
                Some(data) => decode(data.value())?,
                None => return Ok(ContentRemoval::Missing),
            };
            if row.created_at >= created_before {
                return Ok(ContentRemoval::TooRecent);
            }

            on_delete(&row)?;
            table.remove(hash.as_str())?;
            row
        };
        write_txn.commit()?;
        Ok(ContentRemoval::Removed(removed))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::create_test_storage;
    use super::*;
    use crate::types::{ContentKind, POST_MIMETYPE};

    fn post(body: &str, created_at: i64) -> Content {
        Content {
            content_hash: ContentHash::of(body.as_bytes()),
            kind: ContentKind::Post,
            body: Some(body.to_string()),
            filename: None,
            mimetype: POST_MIMETYPE.to_string(),
            size: body.len() as u64,
            local_path: None,
            created_at,
        }
    }

    #[test]
    fn test_insert_is_idempotent() {
        let (storage, _temp) = create_test_storage();
        let content = post("# Hello", 10);

        let (_, inserted) = storage.insert_content_if_absent(&content).unwrap();
        assert!(inserted);
        let (row, inserted) = storage.insert_content_if_absent(&content).unwrap();
        assert!(!inserted);
        assert_eq!(row.content_hash, content.content_hash);
        assert_eq!(storage.list_contents().unwrap().len(), 1);
    }

    #[test]
    fn test_remove_unreferenced_respects_cutoff() {
        let (storage, _temp) = create_test_storage();
        let content = post("old", 100);
        storage.insert_content_if_absent(&content).unwrap();

        let outcome = storage
            .remove_content_if_unreferenced(&content.content_hash, 50, |_| Ok(()))
            .unwrap();
        assert_eq!(outcome, ContentRemoval::TooRecent);

        let mut hook_ran = false;
        let outcome = storage
            .remove_content_if_unreferenced(&content.content_hash, 200, |_| {
                hook_ran = true;
                Ok(())
            })
            .unwrap();
        assert!(matches!(outcome, ContentRemoval::Removed(_)));
        assert!(hook_ran);
        assert!(storage.load_content(&content.content_hash).unwrap().is_none());

        let outcome = storage
            .remove_content_if_unreferenced(&content.content_hash, 200, |_| Ok(()))
            .unwrap();
        assert_eq!(outcome, ContentRemoval::Missing);
    }

    #[test]
    fn test_failed_hook_keeps_row() {
        let (storage, _temp) = create_test_storage();
        let content = post("keep me", 1);
        storage.insert_content_if_absent(&content).unwrap();

        let result = storage.remove_content_if_unreferenced(&content.content_hash, 100, |_| {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk"))
        });
        assert!(result.is_err());
        assert!(storage.load_content(&content.content_hash).unwrap().is_some());
    }
}
