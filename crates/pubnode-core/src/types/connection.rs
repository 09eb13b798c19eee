//! Directed follow edges

use serde::{Deserialize, Serialize};

use crate::identity::Address;
use crate::types::now_timestamp;

/// Follower → followee edge; the pair is unique
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub id: u64,
    pub follower_address: Address,
    pub followee_address: Address,
    pub created_at: i64,
}

impl Connection {
    /// New edge; `id` is assigned by storage on insert
    pub fn new(follower_address: Address, followee_address: Address) -> Self {
        Self {
            id: 0,
            follower_address,
            followee_address,
            created_at: now_timestamp(),
        }
    }

    /// Storage key for the (follower, followee) pair
    pub fn key(follower: &Address, followee: &Address) -> String {
        format!("{}|{}", follower, followee)
    }
}
