//! Persistent storage using redb.
//!
//! This module is the relational CRUD store the federation engine reads and
//! writes through:
//! - Node identity keypair
//! - Nodes (self + remote)
//! - Connections (directed follow edges)
//! - Contents (content-addressed index; FILE bytes live on disk)
//! - Publications (+ idempotency key index and content reference counts)
//!
//! Multi-row invariants (unique edges, unique publication keys, reference
//! counts) are enforced inside a single write transaction. redb serializes
//! write transactions, so a check-then-write inside one is atomic.

use crate::error::NodeError;
use crate::identity::NodeKeypair;
use parking_lot::RwLock;
use redb::{Database, ReadableTable, TableDefinition, WriteTransaction};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

// Submodules
mod connections;
mod contents;
mod nodes;
mod publications;

use connections::CONNECTIONS_TABLE;
use contents::CONTENTS_TABLE;
use nodes::NODES_TABLE;
use publications::{CONTENT_REFS_TABLE, PUBLICATIONS_TABLE, PUBLICATION_KEYS_TABLE};

pub use contents::ContentRemoval;

// Table definitions
const IDENTITY_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("identity");
const META_TABLE: TableDefinition<&str, &str> = TableDefinition::new("meta");
const COUNTERS_TABLE: TableDefinition<&str, u64> = TableDefinition::new("counters");

/// Storage layer using redb for ACID-compliant persistence
#[derive(Clone)]
pub struct Storage {
    db: Arc<RwLock<Database>>,
}

impl Storage {
    /// Create a new storage instance at the given path.
    ///
    /// This will:
    /// - Create the database directory if it doesn't exist
    /// - Initialize the database file
    /// - Create all required tables
    pub fn new(path: impl AsRef<Path>) -> Result<Self, NodeError> {
        let path = path.as_ref();

        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path)?;

        // Initialize all tables
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(IDENTITY_TABLE)?;
            let _ = write_txn.open_table(META_TABLE)?;
            let _ = write_txn.open_table(COUNTERS_TABLE)?;
            let _ = write_txn.open_table(NODES_TABLE)?;
            let _ = write_txn.open_table(CONNECTIONS_TABLE)?;
            let _ = write_txn.open_table(CONTENTS_TABLE)?;
            let _ = write_txn.open_table(PUBLICATIONS_TABLE)?;
            let _ = write_txn.open_table(PUBLICATION_KEYS_TABLE)?;
            let _ = write_txn.open_table(CONTENT_REFS_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(RwLock::new(db)),
        })
    }

    /// Get a handle to the underlying database
    ///
    /// Used by the per-table submodules.
    pub(crate) fn db_handle(&self) -> Arc<RwLock<Database>> {
        Arc::clone(&self.db)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Identity Operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Identity storage key (there's only one identity per node)
    const IDENTITY_KEY: &'static str = "node_identity";

    /// Save the node's signing keypair.
    pub fn save_identity(&self, keypair: &NodeKeypair) -> Result<(), NodeError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(IDENTITY_TABLE)?;
            table.insert(Self::IDENTITY_KEY, keypair.to_bytes().as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load the node's signing keypair.
    ///
    /// Returns `None` if no identity has been created yet.
    pub fn load_identity(&self) -> Result<Option<NodeKeypair>, NodeError> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(IDENTITY_TABLE)?;

        match table.get(Self::IDENTITY_KEY)? {
            Some(v) => Ok(Some(NodeKeypair::from_bytes(v.value())?)),
            None => Ok(None),
        }
    }

    /// Check if an identity exists in storage.
    pub fn has_identity(&self) -> Result<bool, NodeError> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(IDENTITY_TABLE)?;
        Ok(table.get(Self::IDENTITY_KEY)?.is_some())
    }
}

/// Allocate the next id from a named counter inside `txn`
fn next_id(txn: &WriteTransaction, counter: &str) -> Result<u64, NodeError> {
    let mut table = txn.open_table(COUNTERS_TABLE)?;
    let next = table.get(counter)?.map(|v| v.value()).unwrap_or(0) + 1;
    table.insert(counter, next)?;
    Ok(next)
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, NodeError> {
    postcard::to_allocvec(value).map_err(|e| NodeError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, NodeError> {
    postcard::from_bytes(bytes).map_err(|e| NodeError::Serialization(e.to_string()))
}
