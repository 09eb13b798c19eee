//! Inbound replication - publications pushed by followed peers

use tracing::{debug, info, warn};

use crate::error::{NodeError, NodeResult};
use crate::federation::{FederationContext, ProfileService};
use crate::sync::{SyncEngine, SyncItemOutcome};
use crate::types::documents::PublicationMessage;
use crate::types::{Publication, PublicationKey, ReplicationRequest};

/// Result of accepting a pushed publication
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationOutcome {
    Replicated(Publication),
    /// Already present; senders treat this as delivered
    AlreadyReplicated,
}

/// Accepts `POST /replications`
#[derive(Clone, Debug)]
pub struct Replicator {
    ctx: FederationContext,
    sync: SyncEngine,
    profiles: ProfileService,
}

impl Replicator {
    pub fn new(ctx: FederationContext, sync: SyncEngine, profiles: ProfileService) -> Self {
        Self {
            ctx,
            sync,
            profiles,
        }
    }

    pub async fn replicate(&self, request: &ReplicationRequest) -> NodeResult<ReplicationOutcome> {
        let item = &request.publication;
        let message = PublicationMessage::from_document(&item.typed_data)
            .map_err(|e| NodeError::InvalidPayload(e.to_string()))?;
        let publisher = &message.author_address;

        if !self.ctx.storage.is_following(&self.ctx.address(), publisher)? {
            return Err(NodeError::NotFollowing(publisher.to_string()));
        }

        let key = PublicationKey {
            content_hash: message.content_hash.clone(),
            author_address: publisher.clone(),
            created_at: message.created_at,
        };
        if self.ctx.storage.find_publication(&key)?.is_some() {
            debug!(peer = %publisher, content_hash = %key.content_hash, "Push for known publication");
            return Ok(ReplicationOutcome::AlreadyReplicated);
        }

        let peer = self.ctx.node(publisher)?;
        let outcome = match self
            .sync
            .sync_one(&peer, item, self.ctx.request_timeout)
            .await?
        {
            SyncItemOutcome::Synced(publication) => {
                info!(peer = %publisher, content_hash = %publication.content_hash, "Replicated pushed publication");
                ReplicationOutcome::Replicated(publication)
            }
            SyncItemOutcome::Skipped => ReplicationOutcome::AlreadyReplicated,
        };

        if let Some(version) = request.profile_version {
            if version > peer.profile_version {
                let profiles = self.profiles.clone();
                let address = publisher.clone();
                tokio::spawn(async move {
                    if let Err(e) = profiles.refresh(&address).await {
                        warn!(peer = %address, error = %e, "Profile refresh failed");
                    }
                });
            }
        }

        Ok(outcome)
    }
}
