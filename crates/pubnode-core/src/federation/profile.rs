//! Profile updates between nodes
//!
//! A node bumps its `profile_version` whenever its public profile changes
//! and pushes a signed `ProfileUpdate` document to its followers. Receivers
//! apply an update only when its version is strictly greater than what they
//! hold, so replays and reordering are harmless.

use futures::future::join_all;
use tracing::{info, warn};

use crate::error::{NodeError, NodeResult};
use crate::federation::{with_timeout, FederationContext, FederationEvent};
use crate::identity::Address;
use crate::types::documents::{parse_profile_update, profile_update_document, validate_url};
use crate::types::{now_timestamp, Node, ProfileUpdateRequest};

/// Outcome of pushing a profile change to followers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilePushReport {
    pub profile_version: u64,
    pub delivered: usize,
    pub failed: usize,
}

/// Fields an operator may change; `None` keeps the current value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileChanges {
    pub url: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ProfileService {
    ctx: FederationContext,
}

impl ProfileService {
    pub fn new(ctx: FederationContext) -> Self {
        Self { ctx }
    }

    /// Change this node's profile and push the signed update to followers
    pub async fn update_profile(&self, changes: ProfileChanges) -> NodeResult<ProfilePushReport> {
        let mut me = self.ctx.self_node()?;
        if let Some(url) = changes.url {
            me.url = validate_url(&url)?;
        }
        if let Some(title) = changes.title {
            if title.trim().is_empty() {
                return Err(NodeError::ValidationFailed("title is empty".into()));
            }
            me.title = title;
        }
        if let Some(description) = changes.description {
            me.description = description;
        }
        me.profile_version += 1;
        me.updated_at = now_timestamp();
        self.ctx.storage.set_self_node(&me)?;
        info!(version = me.profile_version, "Profile updated");

        let report = self.push(&me).await?;
        Ok(report)
    }

    async fn push(&self, me: &Node) -> NodeResult<ProfilePushReport> {
        let document = profile_update_document(&me.to_profile());
        let signature = self.ctx.keypair.sign_document(&document)?;
        let request = ProfileUpdateRequest {
            typed_data: document,
            signature: signature.to_hex(),
        };

        let followers = self.ctx.storage.list_followers(&me.address)?;
        let pushes = followers.iter().map(|follower| {
            let request = &request;
            async move {
                let node = self.ctx.node(follower)?;
                with_timeout(
                    self.ctx.request_timeout,
                    "profile push",
                    self.ctx.client.push_profile_update(&node.url, request),
                )
                .await
            }
        });
        let results = join_all(pushes).await;

        let mut delivered = 0;
        for (follower, result) in followers.iter().zip(results) {
            match result {
                Ok(()) | Err(NodeError::StaleProfileVersion { .. }) => delivered += 1,
                Err(NodeError::RemoteRejected { code, .. }) if code == "STALE_PROFILE_VERSION" => {
                    delivered += 1
                }
                Err(e) => warn!(peer = %follower, error = %e, "Profile push failed"),
            }
        }
        Ok(ProfilePushReport {
            profile_version: me.profile_version,
            delivered,
            failed: followers.len() - delivered,
        })
    }

    /// Apply a pushed `ProfileUpdate`.
    ///
    /// The document must be signed by the node it describes, and its version
    /// must be strictly newer than the cached one.
    pub fn receive_update(&self, request: &ProfileUpdateRequest) -> NodeResult<Node> {
        let profile = parse_profile_update(&request.typed_data)?;
        let signer = self
            .ctx
            .verifier
            .recover_signer(&request.typed_data, &request.signature)?;
        if signer != profile.address {
            return Err(NodeError::SignerMismatch(format!(
                "profile of {} signed by {}",
                profile.address, signer
            )));
        }

        let node = self.ctx.storage.apply_profile_update(&profile)?;
        info!(peer = %node.address, version = node.profile_version, "Applied pushed profile update");
        self.ctx.emit(FederationEvent::ProfileUpdated {
            peer: node.address.clone(),
            profile_version: node.profile_version,
        });
        Ok(node)
    }

    /// Re-fetch a known peer's profile and store it if newer
    pub async fn refresh(&self, peer: &Address) -> NodeResult<Node> {
        let known = self.ctx.node(peer)?;
        let profile = self.ctx.fetch_profile(&known.url).await?;
        if &profile.address != peer {
            return Err(NodeError::SignerMismatch(format!(
                "profile at {} now belongs to {}",
                known.url, profile.address
            )));
        }

        let node = self.ctx.storage.upsert_remote_profile(&profile)?;
        if node.profile_version > known.profile_version {
            info!(peer = %peer, version = node.profile_version, "Refreshed profile");
            self.ctx.emit(FederationEvent::ProfileUpdated {
                peer: peer.clone(),
                profile_version: node.profile_version,
            });
        }
        Ok(node)
    }
}
