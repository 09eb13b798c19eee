//! Node records
//!
//! One row per known node. Exactly one row has `is_self = true`: the local
//! identity created at init. Remote rows are created on first contact and
//! refreshed only when a strictly newer `profile_version` arrives.

use serde::{Deserialize, Serialize};

use crate::identity::Address;
use crate::types::now_timestamp;
use crate::types::wire::RemoteProfile;

/// A node of the federation, local or remote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub address: Address,
    pub url: String,
    pub title: String,
    pub description: String,
    pub is_self: bool,
    /// Monotonic counter; stale profile pushes are rejected
    pub profile_version: u64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Node {
    /// Row for the local identity
    pub fn new_self(address: Address, url: impl Into<String>, title: impl Into<String>) -> Self {
        let now = now_timestamp();
        Self {
            address,
            url: url.into(),
            title: title.into(),
            description: String::new(),
            is_self: true,
            profile_version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Row for a remote node seen for the first time
    pub fn from_profile(profile: &RemoteProfile) -> Self {
        let now = now_timestamp();
        Self {
            address: profile.address.clone(),
            url: profile.url.clone(),
            title: profile.title.clone(),
            description: profile.description.clone(),
            is_self: false,
            profile_version: profile.profile_version,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a remote profile if it is strictly newer
    ///
    /// Returns `true` when the row changed.
    pub fn apply_profile(&mut self, profile: &RemoteProfile) -> bool {
        if profile.profile_version <= self.profile_version {
            return false;
        }
        self.url = profile.url.clone();
        self.title = profile.title.clone();
        self.description = profile.description.clone();
        self.profile_version = profile.profile_version;
        self.updated_at = now_timestamp();
        true
    }

    /// Public profile as served by `GET /profile`
    pub fn to_profile(&self) -> RemoteProfile {
        RemoteProfile {
            address: self.address.clone(),
            url: self.url.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            profile_version: self.profile_version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::NodeKeypair;

    fn profile(version: u64, title: &str) -> RemoteProfile {
        RemoteProfile {
            address: NodeKeypair::from_seed(&[1u8; 32]).address(),
            url: "https://a.example".into(),
            title: title.into(),
            description: String::new(),
            profile_version: version,
        }
    }

    #[test]
    fn test_new_self() {
        let address = NodeKeypair::generate().address();
        let node = Node::new_self(address.clone(), "https://me.example", "Me");
        assert!(node.is_self);
        assert_eq!(node.address, address);
        assert_eq!(node.profile_version, 1);
    }

    #[test]
    fn test_apply_profile_only_when_newer() {
        let mut node = Node::from_profile(&profile(3, "old"));
        assert!(!node.is_self);

        assert!(!node.apply_profile(&profile(3, "same version")));
        assert_eq!(node.title, "old");

        assert!(!node.apply_profile(&profile(2, "older")));
        assert_eq!(node.title, "old");

        assert!(node.apply_profile(&profile(4, "new")));
        assert_eq!(node.title, "new");
        assert_eq!(node.profile_version, 4);
    }

    #[test]
    fn test_profile_roundtrip() {
        let p = profile(7, "t");
        assert_eq!(Node::from_profile(&p).to_profile(), p);
    }
}
