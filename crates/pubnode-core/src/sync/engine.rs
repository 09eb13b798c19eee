//! Sync Engine - pull publications from a followed peer
//!
//! [`SyncEngine::sync_one`] lands a single signed publication: verify the
//! author, fetch the raw bytes, recompute the hash, store content and
//! publication. [`SyncEngine::sync_backlog`] pages through a peer's
//! `GET /publications` feed and runs `sync_one` per item, collecting
//! failures instead of aborting.
//!
//! The feed is in the author's publish order. Each page after the first is
//! requested from the position of the previous page's last item, and the
//! report carries the last position seen so the caller can resume there.
//!
//! Both are idempotent: a publication already present is reported as
//! skipped.

use std::time::Duration;

use tokio::io::AsyncReadExt;
use tracing::{debug, error, info, warn};

use crate::content::{CreateContent, StreamSource, DEFAULT_MIMETYPE};
use crate::error::{ErrorClass, NodeError, NodeResult};
use crate::federation::{with_timeout, FederationContext, FederationEvent};
use crate::types::documents::PublicationMessage;
use crate::types::{
    Content, ContentHash, ContentKind, FeedCursor, Node, Publication, PublicationKey,
    PublicationQuery, SignedPublication,
};

/// Result of landing one publication
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncItemOutcome {
    /// Stored locally for the first time
    Synced(Publication),
    /// Already present; nothing changed
    Skipped,
}

impl SyncItemOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, SyncItemOutcome::Skipped)
    }
}

/// Paging limits for one backlog run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BacklogOptions {
    pub limit: usize,
    pub max_pages: usize,
    /// Deadline per outbound call (page fetch or content fetch)
    pub timeout: Duration,
}

impl Default for BacklogOptions {
    fn default() -> Self {
        Self {
            limit: 50,
            max_pages: 20,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Overall result of a backlog run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BacklogOutcome {
    /// No errors
    Success,
    /// Errors, but at least one publication landed
    PartialSuccess,
    /// Errors and nothing landed
    Failure,
}

/// One item (or page) that failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncItemError {
    /// `None` for page-level failures
    pub content_hash: Option<String>,
    pub created_at: Option<i64>,
    pub code: &'static str,
    pub message: String,
    pub class: ErrorClass,
}

impl SyncItemError {
    fn from_error(item: Option<&SignedPublication>, e: &NodeError) -> Self {
        let parsed = item.and_then(|i| PublicationMessage::from_document(&i.typed_data).ok());
        Self {
            content_hash: parsed.as_ref().map(|m| m.content_hash.to_string()),
            created_at: parsed.as_ref().map(|m| m.created_at),
            code: e.code(),
            message: e.to_string(),
            class: e.class(),
        }
    }
}

/// Result of [`SyncEngine::sync_backlog`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BacklogReport {
    pub outcome: BacklogOutcome,
    pub synced: usize,
    pub skipped: usize,
    pub failed: usize,
    pub pages: usize,
    pub errors: Vec<SyncItemError>,
    /// Set when a page fetch ended the run early
    pub page_error: Option<SyncItemError>,
    /// `max_pages` was reached while the peer still had more to list
    pub truncated: bool,
    /// Feed position of the last item listed
    pub cursor: Option<FeedCursor>,
}

impl BacklogReport {
    fn new() -> Self {
        Self {
            outcome: BacklogOutcome::Success,
            synced: 0,
            skipped: 0,
            failed: 0,
            pages: 0,
            errors: Vec::new(),
            page_error: None,
            truncated: false,
            cursor: None,
        }
    }

    fn finish(mut self) -> Self {
        let has_errors = !self.errors.is_empty() || self.page_error.is_some();
        self.outcome = if !has_errors {
            BacklogOutcome::Success
        } else if self.synced > 0 {
            BacklogOutcome::PartialSuccess
        } else {
            BacklogOutcome::Failure
        };
        self
    }

    /// Whether any failure may succeed on retry
    pub fn has_retryable_errors(&self) -> bool {
        self.errors
            .iter()
            .chain(self.page_error.iter())
            .any(|e| e.class == ErrorClass::Transient)
    }
}

/// Pull-side replication
#[derive(Clone, Debug)]
pub struct SyncEngine {
    ctx: FederationContext,
}

impl SyncEngine {
    pub fn new(ctx: FederationContext) -> Self {
        Self { ctx }
    }

    /// Land one signed publication from `peer`.
    ///
    /// `timeout` bounds the content fetch including streaming the bytes to
    /// disk.
    pub async fn sync_one(
        &self,
        peer: &Node,
        item: &SignedPublication,
        timeout: Duration,
    ) -> NodeResult<SyncItemOutcome> {
        let message = PublicationMessage::from_document(&item.typed_data)
            .map_err(|e| NodeError::InvalidPayload(e.to_string()))?;
        let key = PublicationKey {
            content_hash: message.content_hash.clone(),
            author_address: message.author_address.clone(),
            created_at: message.created_at,
        };
        if self.ctx.storage.find_publication(&key)?.is_some() {
            debug!(peer = %peer.address, content_hash = %key.content_hash, "Publication already present");
            return Ok(SyncItemOutcome::Skipped);
        }

        let signature = item
            .signature
            .as_deref()
            .ok_or_else(|| NodeError::InvalidSignature("publication is unsigned".into()))?;
        self.ctx
            .verifier
            .require_signer(&item.typed_data, signature, &message.author_address)?;
        if message.author_address != peer.address {
            return Err(NodeError::SignerMismatch(format!(
                "publication by {} offered by peer {}",
                message.author_address, peer.address
            )));
        }

        let description = item
            .meta
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty());
        if item.meta.kind == ContentKind::File && description.is_none() {
            return Err(NodeError::ContentDescriptionMissing(
                message.content_hash.to_string(),
            ));
        }

        let content = with_timeout(
            timeout,
            "content fetch",
            self.fetch_and_store(peer, item, &message),
        )
        .await
        .map_err(|e| {
            if let NodeError::ContentHashMismatch { .. } = e {
                error!(peer = %peer.address, content_hash = %message.content_hash, error = %e, "Peer served corrupted content");
            }
            e
        })?;

        let publication = Publication {
            id: 0,
            content_hash: content.content_hash,
            author_address: message.author_address.clone(),
            signature: Some(signature.to_string()),
            comment_count: 0,
            created_at: message.created_at,
            description: description.map(str::to_string),
            published_at: None,
            publish_seq: None,
        };
        let stored = match self.ctx.storage.insert_publication(&publication) {
            Ok(stored) => stored,
            Err(NodeError::ReplicationAlreadyExists(_)) => return Ok(SyncItemOutcome::Skipped),
            Err(e) => return Err(e),
        };

        info!(
            peer = %peer.address,
            content_hash = %stored.content_hash,
            created_at = stored.created_at,
            "Publication synced"
        );
        self.ctx.emit(FederationEvent::PublicationReceived {
            peer: peer.address.clone(),
            content_hash: stored.content_hash.clone(),
            created_at: stored.created_at,
        });
        Ok(SyncItemOutcome::Synced(stored))
    }

    async fn fetch_and_store(
        &self,
        peer: &Node,
        item: &SignedPublication,
        message: &PublicationMessage,
    ) -> NodeResult<Content> {
        let fetched = self
            .ctx
            .client
            .fetch_content(&peer.url, &message.content_hash, Some(message.created_at))
            .await?;

        match item.meta.kind {
            ContentKind::Post => {
                let mut bytes = Vec::new();
                fetched
                    .reader
                    .take(self.ctx.content.max_bytes() + 1)
                    .read_to_end(&mut bytes)
                    .await?;
                if bytes.len() as u64 > self.ctx.content.max_bytes() {
                    return Err(NodeError::ValidationFailed(format!(
                        "content exceeds {} bytes",
                        self.ctx.content.max_bytes()
                    )));
                }
                let actual = ContentHash::of(&bytes);
                if actual != message.content_hash {
                    return Err(NodeError::ContentHashMismatch {
                        expected: message.content_hash.to_string(),
                        actual: actual.to_string(),
                    });
                }
                let body = String::from_utf8(bytes)
                    .map_err(|_| NodeError::InvalidPayload("post body is not UTF-8".into()))?;
                self.ctx
                    .content
                    .create_verified(CreateContent::post(body), &message.content_hash)
                    .await
            }
            ContentKind::File => {
                let filename = item
                    .meta
                    .filename
                    .clone()
                    .filter(|f| !f.trim().is_empty())
                    .unwrap_or_else(|| message.content_hash.hex().to_string());
                let mimetype = item
                    .meta
                    .mimetype
                    .clone()
                    .or(fetched.mimetype)
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_MIMETYPE.to_string());
                let source = StreamSource::new(filename, mimetype, fetched.reader);
                self.ctx
                    .content
                    .create_verified(CreateContent::file(source), &message.content_hash)
                    .await
            }
        }
    }

    /// Pull everything `peer` published since `since`, or past the publish
    /// sequence `after` when resuming from a known feed position.
    ///
    /// Pages are fetched strictly in order. Item failures are collected; a
    /// page failure ends the run and is recorded as `page_error`. Hitting
    /// `max_pages` with more to list sets `truncated`, which is not an error.
    pub async fn sync_backlog(
        &self,
        peer: &Node,
        since: i64,
        after: Option<u64>,
        options: BacklogOptions,
    ) -> BacklogReport {
        let mut report = BacklogReport::new();
        let mut query = PublicationQuery {
            since,
            after,
            limit: options.limit,
            page: 1,
        };

        loop {
            if report.pages >= options.max_pages {
                debug!(peer = %peer.address, pages = report.pages, "Page limit reached");
                report.truncated = true;
                break;
            }

            let fetched = with_timeout(
                options.timeout,
                "publications fetch",
                self.ctx.client.fetch_publications(&peer.url, &query),
            )
            .await;
            let listing = match fetched {
                Ok(listing) => listing,
                Err(e) => {
                    warn!(peer = %peer.address, page = query.page, error = %e, "Publications page fetch failed");
                    report.page_error = Some(SyncItemError::from_error(None, &e));
                    break;
                }
            };
            report.pages += 1;

            for item in &listing.items {
                match self.sync_one(peer, item, options.timeout).await {
                    Ok(SyncItemOutcome::Synced(_)) => report.synced += 1,
                    Ok(SyncItemOutcome::Skipped) => report.skipped += 1,
                    Err(e) => {
                        warn!(peer = %peer.address, error = %e, "Failed to sync publication");
                        report.failed += 1;
                        report.errors.push(SyncItemError::from_error(Some(item), &e));
                    }
                }
            }

            let last = listing.items.last().and_then(SignedPublication::feed_cursor);
            if last.is_some() {
                report.cursor = last;
            }
            if !listing.has_next_page {
                break;
            }
            // Peers that do not report feed positions are paged by number
            query = match last {
                Some(cursor) => PublicationQuery::following(cursor, options.limit),
                None => PublicationQuery {
                    page: query.page + 1,
                    ..query
                },
            };
        }

        let report = report.finish();
        info!(
            peer = %peer.address,
            since,
            synced = report.synced,
            skipped = report.skipped,
            failed = report.failed,
            outcome = ?report.outcome,
            truncated = report.truncated,
            "Backlog sync finished"
        );
        report
    }
}
