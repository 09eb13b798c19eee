//! Federation events
//!
//! Emitted on a broadcast channel so the CLI, tests or an outer server can
//! observe background work (fan-out, inbound replication, sync cycles)
//! without polling storage.

use std::fmt;

use crate::identity::Address;
use crate::types::ContentHash;

/// Events emitted by the federation engine
#[derive(Debug, Clone, PartialEq)]
pub enum FederationEvent {
    /// A follow edge was stored
    ConnectionCreated {
        follower: Address,
        followee: Address,
    },
    /// A follow edge was removed
    ConnectionDestroyed {
        follower: Address,
        followee: Address,
    },
    /// One follower could not receive a fan-out push
    ReplicationFailed {
        peer: Address,
        content_hash: ContentHash,
        error: String,
    },
    /// A fan-out job finished for every follower
    ReplicationCompleted {
        content_hash: ContentHash,
        created_at: i64,
        delivered: usize,
        failed: usize,
    },
    /// A publication landed locally, pushed or pulled
    PublicationReceived {
        peer: Address,
        content_hash: ContentHash,
        created_at: i64,
    },
    /// A remote profile was refreshed
    ProfileUpdated { peer: Address, profile_version: u64 },
    /// A sync cycle finished
    SyncCycleCompleted {
        peers: usize,
        synced: usize,
        failed: usize,
    },
}

impl FederationEvent {
    /// The remote peer this event concerns, if it concerns exactly one
    pub fn peer(&self) -> Option<&Address> {
        match self {
            FederationEvent::ReplicationFailed { peer, .. }
            | FederationEvent::PublicationReceived { peer, .. }
            | FederationEvent::ProfileUpdated { peer, .. } => Some(peer),
            _ => None,
        }
    }
}

impl fmt::Display for FederationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FederationEvent::ConnectionCreated { follower, followee } => {
                write!(f, "{} now follows {}", follower, followee)
            }
            FederationEvent::ConnectionDestroyed { follower, followee } => {
                write!(f, "{} unfollowed {}", follower, followee)
            }
            FederationEvent::ReplicationFailed {
                peer,
                content_hash,
                error,
            } => write!(f, "push of {} to {} failed: {}", content_hash, peer, error),
            FederationEvent::ReplicationCompleted {
                content_hash,
                delivered,
                failed,
                ..
            } => write!(
                f,
                "fan-out of {}: {} delivered, {} failed",
                content_hash, delivered, failed
            ),
            FederationEvent::PublicationReceived {
                peer, content_hash, ..
            } => write!(f, "received {} from {}", content_hash, peer),
            FederationEvent::ProfileUpdated {
                peer,
                profile_version,
            } => write!(f, "profile of {} now at version {}", peer, profile_version),
            FederationEvent::SyncCycleCompleted {
                peers,
                synced,
                failed,
            } => write!(
                f,
                "sync cycle over {} peers: {} synced, {} failed",
                peers, synced, failed
            ),
        }
    }
}
