//! Node Storage - the local node's own row plus every remote node we have met
//!
//! The self row is keyed like any other node and flagged `is_self`; its
//! address is also recorded in the meta table so it can be found without a
//! scan.

use crate::error::NodeError;
use crate::identity::Address;
use crate::types::{Node, RemoteProfile};
use redb::{ReadableTable, TableDefinition};

use super::{decode, encode, Storage, META_TABLE};

/// Table for nodes (key: address string, value: serialized Node)
pub(crate) const NODES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");

const SELF_ADDRESS_KEY: &str = "self_address";

impl Storage {
    // ═══════════════════════════════════════════════════════════════════════
    // Node Operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Save a node row, overwriting any existing row for the same address
    pub fn save_node(&self, node: &Node) -> Result<(), NodeError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;
        {
            let mut table = write_txn.open_table(NODES_TABLE)?;
            let serialized = encode(node)?;
            table.insert(node.address.as_str(), serialized.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load a node by address
    pub fn load_node(&self, address: &Address) -> Result<Option<Node>, NodeError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let table = read_txn.open_table(NODES_TABLE)?;

        match table.get(address.as_str())? {
            Some(data) => Ok(Some(decode(data.value())?)),
            None => Ok(None),
        }
    }

    /// Record `node` as the local node.
    ///
    /// Writes the row with `is_self = true` and remembers its address.
    pub fn set_self_node(&self, node: &Node) -> Result<(), NodeError> {
        let mut node = node.clone();
        node.is_self = true;

        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;
        {
            let mut nodes = write_txn.open_table(NODES_TABLE)?;
            let serialized = encode(&node)?;
            nodes.insert(node.address.as_str(), serialized.as_slice())?;

            let mut meta = write_txn.open_table(META_TABLE)?;
            meta.insert(SELF_ADDRESS_KEY, node.address.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load the local node's row, if the node has been initialized
    pub fn load_self_node(&self) -> Result<Option<Node>, NodeError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let meta = read_txn.open_table(META_TABLE)?;

        let address = match meta.get(SELF_ADDRESS_KEY)? {
            Some(v) => v.value().to_string(),
            None => return Ok(None),
        };

        let nodes = read_txn.open_table(NODES_TABLE)?;
        match nodes.get(address.as_str())? {
            Some(data) => Ok(Some(decode(data.value())?)),
            None => Ok(None),
        }
    }

    /// List every known node, self included
    pub fn list_nodes(&self) -> Result<Vec<Node>, NodeError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let table = read_txn.open_table(NODES_TABLE)?;

        let mut nodes = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            nodes.push(decode(value.value())?);
        }
        Ok(nodes)
    }

    /// Insert or refresh a remote node from a fetched profile.
    ///
    /// Never touches the self row. An existing row is only updated when the
    /// profile carries a strictly newer version. Returns the stored row.
    pub fn upsert_remote_profile(&self, profile: &RemoteProfile) -> Result<Node, NodeError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;
        let node = {
            let mut table = write_txn.open_table(NODES_TABLE)?;
            let existing: Option<Node> = match table.get(profile.address.as_str())? {
                Some(data) => Some(decode(data.value())?),
                None => None,
            };

            match existing {
                Some(node) if node.is_self => node,
                Some(mut node) => {
                    if node.apply_profile(profile) {
                        let serialized = encode(&node)?;
                        table.insert(node.address.as_str(), serialized.as_slice())?;
                    }
                    node
                }
                None => {
                    let node = Node::from_profile(profile);
                    let serialized = encode(&node)?;
                    table.insert(node.address.as_str(), serialized.as_slice())?;
                    node
                }
            }
        };
        write_txn.commit()?;
        Ok(node)
    }

    /// Apply a pushed profile update to a known remote node.
    ///
    /// Fails with `NodeNotFound` for unknown nodes and `StaleProfileVersion`
    /// when the pushed version is not newer than the stored one.
    pub fn apply_profile_update(&self, profile: &RemoteProfile) -> Result<Node, NodeError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;
        let node = {
            let mut table = write_txn.open_table(NODES_TABLE)?;
            let mut node: Node = match table.get(profile.address.as_str())? {
                Some(data) => decode(data.value())?,
                None => return Err(NodeError::NodeNotFound(profile.address.to_string())),
            };

            if node.is_self {
                return Err(NodeError::ValidationFailed(
                    "cannot overwrite the local node's profile".into(),
                ));
            }
            if !node.apply_profile(profile) {
                return Err(NodeError::StaleProfileVersion {
                    stored: node.profile_version,
                    received: profile.profile_version,
                });
            }
            let serialized = encode(&node)?;
            table.insert(node.address.as_str(), serialized.as_slice())?;
            node
        };
        write_txn.commit()?;
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::create_test_storage;
    use super::*;
    use crate::identity::NodeKeypair;

    fn remote_profile(seed: u8, version: u64, title: &str) -> RemoteProfile {
        RemoteProfile {
            address: NodeKeypair::from_seed(&[seed; 32]).address(),
            url: format!("https://node{}.example", seed),
            title: title.to_string(),
            description: String::new(),
            profile_version: version,
        }
    }

    #[test]
    fn test_self_node_roundtrip() {
        let (storage, _temp) = create_test_storage();
        assert!(storage.load_self_node().unwrap().is_none());

        let me = Node::new_self(
            NodeKeypair::generate().address(),
            "https://me.example",
            "Me",
        );
        storage.set_self_node(&me).unwrap();

        let loaded = storage.load_self_node().unwrap().unwrap();
        assert_eq!(loaded, me);
        assert!(loaded.is_self);
    }

    #[test]
    fn test_upsert_creates_then_only_moves_forward() {
        let (storage, _temp) = create_test_storage();

        let node = storage
            .upsert_remote_profile(&remote_profile(1, 2, "first"))
            .unwrap();
        assert!(!node.is_self);
        assert_eq!(node.title, "first");

        let node = storage
            .upsert_remote_profile(&remote_profile(1, 1, "older"))
            .unwrap();
        assert_eq!(node.title, "first");

        let node = storage
            .upsert_remote_profile(&remote_profile(1, 5, "newer"))
            .unwrap();
        assert_eq!(node.title, "newer");
        assert_eq!(storage.list_nodes().unwrap().len(), 1);
    }

    #[test]
    fn test_upsert_never_overwrites_self() {
        let (storage, _temp) = create_test_storage();
        let profile = remote_profile(9, 100, "impostor");
        let me = Node::new_self(profile.address.clone(), "https://me.example", "Me");
        storage.set_self_node(&me).unwrap();

        let node = storage.upsert_remote_profile(&profile).unwrap();
        assert!(node.is_self);
        assert_eq!(node.title, "Me");
    }

    #[test]
    fn test_apply_profile_update_rejects_stale() {
        let (storage, _temp) = create_test_storage();
        storage
            .upsert_remote_profile(&remote_profile(2, 3, "v3"))
            .unwrap();

        let err = storage
            .apply_profile_update(&remote_profile(2, 3, "v3 again"))
            .unwrap_err();
        assert!(matches!(
            err,
            NodeError::StaleProfileVersion {
                stored: 3,
                received: 3
            }
        ));

        let node = storage
            .apply_profile_update(&remote_profile(2, 4, "v4"))
            .unwrap();
        assert_eq!(node.title, "v4");
    }

    #[test]
    fn test_apply_profile_update_unknown_node() {
        let (storage, _temp) = create_test_storage();
        let err = storage
            .apply_profile_update(&remote_profile(3, 1, "x"))
            .unwrap_err();
        assert!(matches!(err, NodeError::NodeNotFound(_)));
    }
}
