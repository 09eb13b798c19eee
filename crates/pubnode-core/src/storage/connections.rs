//! Connection Storage - directed follow edges between nodes
//!
//! Keyed by `follower|followee`, so the (follower, followee) pair is unique
//! by construction.

use crate::error::NodeError;
use crate::identity::Address;
use crate::types::Connection;
use redb::{ReadableTable, TableDefinition};

use super::{decode, encode, next_id, Storage};

/// Table for connections (key: "follower|followee", value: serialized Connection)
pub(crate) const CONNECTIONS_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("connections");

const CONNECTION_COUNTER: &str = "connections";

impl Storage {
    // ═══════════════════════════════════════════════════════════════════════
    // Connection Operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Insert a follow edge.
    ///
    /// Fails with `ConnectionAlreadyExists` if the edge is already present.
    /// Returns the stored row with its assigned id.
    pub fn insert_connection(&self, connection: &Connection) -> Result<Connection, NodeError> {
        let key = Connection::key(&connection.follower_address, &connection.followee_address);

        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;

        {
            let table = write_txn.open_table(CONNECTIONS_TABLE)?;
            if table.get(key.as_str())?.is_some() {
                return Err(NodeError::ConnectionAlreadyExists(key));
            }
        }

        let mut stored = connection.clone();
        stored.id = next_id(&write_txn, CONNECTION_COUNTER)?;

        {
            let mut table = write_txn.open_table(CONNECTIONS_TABLE)?;
            let serialized = encode(&stored)?;
            table.insert(key.as_str(), serialized.as_slice())?;
        }
        write_txn.commit()?;
        Ok(stored)
    }

    /// Load the edge `follower -> followee`
    pub fn load_connection(
        &self,
        follower: &Address,
        followee: &Address,
    ) -> Result<Option<Connection>, NodeError> {
        let key = Connection::key(follower, followee);

        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let table = read_txn.open_table(CONNECTIONS_TABLE)?;

        match table.get(key.as_str())? {
            Some(data) => Ok(Some(decode(data.value())?)),
            None => Ok(None),
        }
    }

    /// Remove the edge `follower -> followee`.
    ///
    /// Returns `true` if an edge was removed.
    pub fn remove_connection(
        &self,
        follower: &Address,
        followee: &Address,
    ) -> Result<bool, NodeError> {
        let key = Connection::key(follower, followee);

        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(CONNECTIONS_TABLE)?;
            let removed = table.remove(key.as_str())?.is_some();
            removed
        };
        write_txn.commit()?;
        Ok(removed)
    }

    /// Whether `follower` follows `followee`
    pub fn is_following(&self, follower: &Address, followee: &Address) -> Result<bool, NodeError> {
        Ok(self.load_connection(follower, followee)?.is_some())
    }

    /// Addresses of every node that follows `followee`
    pub fn list_followers(&self, followee: &Address) -> Result<Vec<Address>, NodeError> {
        Ok(self
            .list_connections()?
            .into_iter()
            .filter(|c| &c.followee_address == followee)
            .map(|c| c.follower_address)
            .collect())
    }

    /// Addresses of every node `follower` follows
    pub fn list_followees(&self, follower: &Address) -> Result<Vec<Address>, NodeError> {
        let prefix = format!("{}|", follower);

        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let table = read_txn.open_table(CONNECTIONS_TABLE)?;

        let mut followees = Vec::new();
        for entry in table.range(prefix.as_str()..)? {
            let (key, value) = entry?;
            if !key.value().starts_with(&prefix) {
                break;
            }
            let connection: Connection = decode(value.value())?;
            followees.push(connection.followee_address);
        }
        Ok(followees)
    }

    /// List every stored edge
    pub fn list_connections(&self) -> Result<Vec<Connection>, NodeError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let table = read_txn.open_table(CONNECTIONS_TABLE)?;

        let mut connections = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            connections.push(decode(value.value())?);
        }
        Ok(connections)
    }
}
