//! Publication signing and fan-out
//!
//! A publication starts as an unsigned draft. The owner signs the canonical
//! document returned by [`Publisher::signing_document`]; [`Publisher::sign`]
//! rebuilds that document server-side, checks the signature, stores it and
//! hands a job to the [`ReplicationQueue`] worker, which pushes the
//! publication to every follower.

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{NodeError, NodeResult};
use crate::federation::{with_timeout, FederationContext, FederationEvent};
use crate::identity::TypedDocument;
use crate::types::documents::publication_document;
use crate::types::{
    now_timestamp, Content, ContentHash, ContentKind, Publication, PublicationMeta,
    ReplicationRequest, SignedPublication,
};

/// One fan-out: push `request` to every follower of this node
#[derive(Debug, Clone)]
pub struct ReplicationJob {
    pub request: ReplicationRequest,
    pub content_hash: ContentHash,
    pub created_at: i64,
}

/// Handle to the background fan-out worker
#[derive(Clone, Debug)]
pub struct ReplicationQueue {
    tx: mpsc::UnboundedSender<ReplicationJob>,
}

impl ReplicationQueue {
    /// Spawn the worker on the current runtime
    pub fn start(ctx: FederationContext) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<ReplicationJob>();
        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                fan_out(&ctx, job).await;
            }
            debug!("Replication queue closed");
        });
        (Self { tx }, handle)
    }

    /// Queue a job; fails only if the worker is gone
    pub fn enqueue(&self, job: ReplicationJob) -> NodeResult<()> {
        self.tx
            .send(job)
            .map_err(|_| NodeError::Storage("replication worker stopped".into()))
    }
}

async fn fan_out(ctx: &FederationContext, job: ReplicationJob) {
    let followers = match ctx.storage.list_followers(&ctx.address()) {
        Ok(followers) => followers,
        Err(e) => {
            warn!(content_hash = %job.content_hash, error = %e, "Cannot list followers for fan-out");
            return;
        }
    };

    let pushes = followers.iter().map(|follower| {
        let job = &job;
        async move {
            let result = match ctx.node(follower) {
                Ok(node) => {
                    with_timeout(
                        ctx.request_timeout,
                        "replication push",
                        ctx.client.replicate(&node.url, &job.request),
                    )
                    .await
                }
                Err(e) => Err(e),
            };
            match result {
                Ok(()) | Err(NodeError::ReplicationAlreadyExists(_)) => true,
                Err(e) => {
                    warn!(peer = %follower, content_hash = %job.content_hash, error = %e, "Replication push failed");
                    ctx.emit(FederationEvent::ReplicationFailed {
                        peer: follower.clone(),
                        content_hash: job.content_hash.clone(),
                        error: e.to_string(),
                    });
                    false
                }
            }
        }
    });
    let results = join_all(pushes).await;

    let delivered = results.iter().filter(|ok| **ok).count();
    let failed = results.len() - delivered;
    info!(
        content_hash = %job.content_hash,
        delivered,
        failed,
        "Fan-out finished"
    );
    ctx.emit(FederationEvent::ReplicationCompleted {
        content_hash: job.content_hash,
        created_at: job.created_at,
        delivered,
        failed,
    });
}

/// Owner-side publication lifecycle
#[derive(Clone, Debug)]
pub struct Publisher {
    ctx: FederationContext,
    queue: ReplicationQueue,
}

impl Publisher {
    pub fn new(ctx: FederationContext, queue: ReplicationQueue) -> Self {
        Self { ctx, queue }
    }

    /// Create an unsigned publication of stored content, authored by this node
    pub fn create_draft(
        &self,
        content_hash: &ContentHash,
        description: Option<String>,
    ) -> NodeResult<Publication> {
        let content = self
            .ctx
            .storage
            .load_content(content_hash)?
            .ok_or_else(|| NodeError::ContentNotFound(content_hash.to_string()))?;

        let description = description.map(|d| d.trim().to_string()).filter(|d| !d.is_empty());
        if content.kind == ContentKind::File && description.is_none() {
            return Err(NodeError::ContentDescriptionMissing(content_hash.to_string()));
        }

        let draft = Publication {
            id: 0,
            content_hash: content_hash.clone(),
            author_address: self.ctx.address(),
            signature: None,
            comment_count: 0,
            created_at: now_timestamp(),
            description,
            published_at: None,
            publish_seq: None,
        };
        let stored = self.ctx.storage.insert_publication(&draft)?;
        debug!(id = stored.id, content_hash = %content_hash, "Draft created");
        Ok(stored)
    }

    /// The canonical document the author must sign
    pub fn signing_document(&self, publication_id: u64) -> NodeResult<TypedDocument> {
        let publication = self.load(publication_id)?;
        Ok(publication_document(
            &self.ctx.address(),
            &publication.author_address,
            &publication.content_hash,
            publication.created_at,
        ))
    }

    /// Attach the author's signature and queue the fan-out
    pub fn sign(&self, publication_id: u64, signature: &str) -> NodeResult<Publication> {
        let publication = self.load(publication_id)?;
        let document = self.signing_document(publication_id)?;

        self.ctx
            .verifier
            .require_signer(&document, signature, &publication.author_address)?;
        if publication.is_signed() {
            return Err(NodeError::PublicationAlreadySigned(publication_id.to_string()));
        }

        let signed = self
            .ctx
            .storage
            .set_publication_signature(publication_id, signature, now_timestamp())?;
        info!(id = signed.id, content_hash = %signed.content_hash, "Publication signed");

        let request = ReplicationRequest {
            publication: signed_publication(&self.ctx, &signed)?,
            profile_version: Some(self.ctx.self_node()?.profile_version),
        };
        self.queue.enqueue(ReplicationJob {
            request,
            content_hash: signed.content_hash.clone(),
            created_at: signed.created_at,
        })?;
        Ok(signed)
    }

    /// Sign a draft with this node's own key
    pub fn sign_with_node_key(&self, publication_id: u64) -> NodeResult<Publication> {
        let document = self.signing_document(publication_id)?;
        let signature = self.ctx.keypair.sign_document(&document)?;
        self.sign(publication_id, &signature.to_hex())
    }

    /// Unpublish. The content stays until orphan cleanup reclaims it.
    pub fn delete_publication(&self, publication_id: u64) -> NodeResult<Publication> {
        let removed = self.ctx.storage.delete_publication(publication_id)?;
        info!(id = removed.id, content_hash = %removed.content_hash, "Publication deleted");
        Ok(removed)
    }

    fn load(&self, publication_id: u64) -> NodeResult<Publication> {
        self.ctx
            .storage
            .load_publication(publication_id)?
            .ok_or_else(|| NodeError::PublicationNotFound(publication_id.to_string()))
    }
}

/// Wire form of a local publication
pub fn signed_publication(
    ctx: &FederationContext,
    publication: &Publication,
) -> NodeResult<SignedPublication> {
    let content = ctx
        .storage
        .load_content(&publication.content_hash)?
        .ok_or_else(|| NodeError::ContentNotFound(publication.content_hash.to_string()))?;
    Ok(SignedPublication {
        typed_data: publication_document(
            &ctx.address(),
            &publication.author_address,
            &publication.content_hash,
            publication.created_at,
        ),
        signature: publication.signature.clone(),
        meta: meta_for(&content, publication),
    })
}

fn meta_for(content: &Content, publication: &Publication) -> PublicationMeta {
    PublicationMeta {
        kind: content.kind,
        description: publication.description.clone(),
        filename: content.filename.clone(),
        mimetype: Some(content.mimetype.clone()),
        published_at: publication.published_at,
        sequence: publication.publish_seq,
    }
}
