//! Federation - everything that crosses a node boundary
//!
//! - [`client`]: the outbound [`PeerClient`] seam and its HTTP implementation
//! - [`loopback`]: an in-process network of nodes for tests and demos
//! - [`handshake`]: signed follow / unfollow between two nodes
//! - [`publishing`]: drafts, signing and the fan-out queue
//! - [`replication`]: accepting pushed publications
//! - [`profile`]: signed profile pushes and refreshes
//!
//! Components share a [`FederationContext`] built once by
//! [`PubNode`](crate::PubNode); nothing here is a global.

pub mod client;
pub mod events;
pub mod handshake;
pub mod loopback;
pub mod profile;
pub mod publishing;
pub mod replication;

pub use client::{with_timeout, FetchedContent, HttpPeerClient, PeerClient};
pub use events::FederationEvent;
pub use handshake::Handshake;
pub use loopback::LoopbackNetwork;
pub use profile::{ProfileChanges, ProfilePushReport, ProfileService};
pub use publishing::{Publisher, ReplicationJob, ReplicationQueue};
pub use replication::{ReplicationOutcome, Replicator};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::trace;

use crate::content::ContentStore;
use crate::error::{NodeError, NodeResult};
use crate::identity::{Address, NodeKeypair, Verifier};
use crate::storage::Storage;
use crate::types::{Node, RemoteProfile};

/// Default capacity for the event broadcast channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Who is calling a handshake endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// The initial caller; the node forwards to the other party
    Client,
    /// The other party forwarding; never forwarded again
    Peer,
}

impl Origin {
    /// Origin implied by a request's `relayed` flag
    pub fn from_relayed(relayed: bool) -> Self {
        if relayed {
            Origin::Peer
        } else {
            Origin::Client
        }
    }
}

/// Shared handles every federation component works through
#[derive(Clone)]
pub struct FederationContext {
    pub storage: Storage,
    pub content: ContentStore,
    pub keypair: Arc<NodeKeypair>,
    pub client: Arc<dyn PeerClient>,
    pub verifier: Verifier,
    pub request_timeout: Duration,
    pub events: broadcast::Sender<FederationEvent>,
}

impl std::fmt::Debug for FederationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FederationContext")
            .field("address", &self.keypair.address())
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl FederationContext {
    /// This node's address
    pub fn address(&self) -> Address {
        self.keypair.address()
    }

    /// This node's row
    pub fn self_node(&self) -> NodeResult<Node> {
        self.storage
            .load_self_node()?
            .ok_or_else(|| NodeError::Identity("node has not been initialized".into()))
    }

    /// A known node's row
    pub fn node(&self, address: &Address) -> NodeResult<Node> {
        self.storage
            .load_node(address)?
            .ok_or_else(|| NodeError::NodeNotFound(address.to_string()))
    }

    /// Publish an event; having no subscribers is fine
    pub fn emit(&self, event: FederationEvent) {
        trace!(%event, "Federation event");
        let _ = self.events.send(event);
    }

    /// Fetch a peer's profile under the request deadline
    pub async fn fetch_profile(&self, base_url: &str) -> NodeResult<RemoteProfile> {
        with_timeout(
            self.request_timeout,
            "profile fetch",
            self.client.fetch_profile(base_url),
        )
        .await
    }
}
