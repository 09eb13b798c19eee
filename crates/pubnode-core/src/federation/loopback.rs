//! In-process network of nodes
//!
//! [`LoopbackNetwork`] implements [`PeerClient`] by dispatching straight to
//! the target node's [`NodeApi`] handlers, with the same error mapping an
//! HTTP round trip would apply. Nodes are looked up by base URL and held
//! weakly, so dropping a node takes it off the network.
//!
//! Tests can also take a node offline or make it serve corrupted bytes for
//! a given content hash.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tracing::trace;

use crate::api::{ApiError, NodeApi};
use crate::error::{NodeError, NodeResult};
use crate::federation::client::FetchedContent;
use crate::federation::PeerClient;
use crate::types::{
    ConnectionRequest, ContentHash, ContentQuery, ProfileUpdateRequest, PublicationPage,
    PublicationQuery, RemoteProfile, ReplicationRequest,
};

#[derive(Default)]
struct LoopbackState {
    nodes: HashMap<String, Weak<NodeApi>>,
    offline: HashSet<String>,
    tampered: HashMap<(String, ContentHash), Bytes>,
}

/// Shared registry of in-process nodes
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    state: Arc<RwLock<LoopbackState>>,
}

impl std::fmt::Debug for LoopbackNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("LoopbackNetwork")
            .field("nodes", &state.nodes.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn normalize(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

fn remote_error(e: ApiError) -> NodeError {
    NodeError::from_remote(e.status, &e.code, &e.message)
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `api` reachable at `url`
    pub fn register(&self, url: &str, api: &Arc<NodeApi>) {
        self.state
            .write()
            .nodes
            .insert(normalize(url), Arc::downgrade(api));
    }

    /// Take the node at `url` off the network, or bring it back
    pub fn set_offline(&self, url: &str, offline: bool) {
        let mut state = self.state.write();
        if offline {
            state.offline.insert(normalize(url));
        } else {
            state.offline.remove(&normalize(url));
        }
    }

    /// Make the node at `url` serve `bytes` instead of the real content
    pub fn tamper_content(&self, url: &str, hash: &ContentHash, bytes: impl Into<Bytes>) {
        self.state
            .write()
            .tampered
            .insert((normalize(url), hash.clone()), bytes.into());
    }

    fn resolve(&self, url: &str) -> NodeResult<Arc<NodeApi>> {
        let url = normalize(url);
        let state = self.state.read();
        if state.offline.contains(&url) {
            return Err(NodeError::RemoteUnavailable(format!("{} is offline", url)));
        }
        state
            .nodes
            .get(&url)
            .and_then(Weak::upgrade)
            .ok_or_else(|| NodeError::RemoteUnavailable(format!("no node at {}", url)))
    }
}

#[async_trait]
impl PeerClient for LoopbackNetwork {
    async fn fetch_profile(&self, base_url: &str) -> NodeResult<RemoteProfile> {
        trace!(url = %base_url, "loopback GET /profile");
        let api = self.resolve(base_url)?;
        api.profile().await.map(|r| r.body).map_err(remote_error)
    }

    async fn create_connection(
        &self,
        base_url: &str,
        request: &ConnectionRequest,
    ) -> NodeResult<()> {
        trace!(url = %base_url, "loopback POST /connections");
        let api = self.resolve(base_url)?;
        api.create_connection(request.clone())
            .await
            .map(|_| ())
            .map_err(remote_error)
    }

    async fn destroy_connection(
        &self,
        base_url: &str,
        request: &ConnectionRequest,
    ) -> NodeResult<()> {
        trace!(url = %base_url, "loopback DELETE /connections");
        let api = self.resolve(base_url)?;
        api.destroy_connection(request.clone())
            .await
            .map(|_| ())
            .map_err(remote_error)
    }

    async fn replicate(&self, base_url: &str, request: &ReplicationRequest) -> NodeResult<()> {
        trace!(url = %base_url, "loopback POST /replications");
        let api = self.resolve(base_url)?;
        api.replicate(request.clone())
            .await
            .map(|_| ())
            .map_err(remote_error)
    }

    async fn fetch_publications(
        &self,
        base_url: &str,
        query: &PublicationQuery,
    ) -> NodeResult<PublicationPage> {
        trace!(url = %base_url, page = query.page, "loopback GET /publications");
        let api = self.resolve(base_url)?;
        api.publications(*query)
            .await
            .map(|r| r.body)
            .map_err(remote_error)
    }

    async fn fetch_content(
        &self,
        base_url: &str,
        hash: &ContentHash,
        timestamp: Option<i64>,
    ) -> NodeResult<FetchedContent> {
        trace!(url = %base_url, content_hash = %hash, "loopback GET /contents");
        let api = self.resolve(base_url)?;
        let query = ContentQuery {
            timestamp,
            ..Default::default()
        };
        let body = api
            .content(hash.as_str(), query)
            .await
            .map(|r| r.body)
            .map_err(remote_error)?;

        let tampered = self
            .state
            .read()
            .tampered
            .get(&(normalize(base_url), hash.clone()))
            .cloned();
        let bytes = tampered.unwrap_or(body.bytes);

        Ok(FetchedContent {
            mimetype: Some(body.mimetype),
            reader: Box::new(std::io::Cursor::new(bytes)),
        })
    }

    async fn push_profile_update(
        &self,
        base_url: &str,
        request: &ProfileUpdateRequest,
    ) -> NodeResult<()> {
        trace!(url = %base_url, "loopback POST /nodes/updates");
        let api = self.resolve(base_url)?;
        api.profile_update(request.clone())
            .await
            .map(|_| ())
            .map_err(remote_error)
    }
}
