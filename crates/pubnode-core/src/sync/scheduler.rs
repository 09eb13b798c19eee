//! Sync Scheduler - periodic catch-up across every followed peer
//!
//! Peers are processed in batches of `batch_size` running concurrently,
//! with a fixed pause between batches. Within one peer, pages are strictly
//! sequential (see [`SyncEngine::sync_backlog`]).
//!
//! The watermark only moves on a run without errors, and only as far as the
//! feed position of the last item the peer listed. Positions come from the
//! peer's publish order, so a draft signed after an earlier run still sorts
//! past the watermark. A run cut short by `max_pages` advances the same way
//! and the next cycle picks up where it stopped.

use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::NodeResult;
use crate::federation::{FederationContext, FederationEvent};
use crate::identity::Address;
use crate::sync::engine::{BacklogOptions, BacklogOutcome, BacklogReport, SyncEngine, SyncItemError};
use crate::sync::state::{SyncState, SyncStateStore};
use crate::types::now_timestamp;

/// What happened to one peer in a cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerRunStatus {
    /// In cooldown after repeated failures; not contacted
    Cooldown,
    /// Backlog pulled (possibly with errors)
    Ran(BacklogReport),
    /// Could not even start (unknown peer, state I/O)
    Aborted(String),
}

/// Result for one peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRunResult {
    pub peer: Address,
    pub status: PeerRunStatus,
}

/// An error attributed to a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSyncError {
    pub peer: Address,
    pub error: SyncItemError,
}

/// Aggregate of one scheduler cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub peers: usize,
    pub succeeded_peers: usize,
    pub failed_peers: usize,
    pub cooldown_peers: usize,
    pub synced: usize,
    pub skipped: usize,
    pub failed: usize,
    /// First `max_reported_errors` errors
    pub errors: Vec<PeerSyncError>,
    /// Errors dropped from `errors`
    pub truncated_errors: usize,
}

impl CycleReport {
    fn absorb(&mut self, result: &PeerRunResult, max_errors: usize) {
        self.peers += 1;
        match &result.status {
            PeerRunStatus::Cooldown => self.cooldown_peers += 1,
            PeerRunStatus::Aborted(_) => self.failed_peers += 1,
            PeerRunStatus::Ran(report) => {
                if report.outcome == BacklogOutcome::Success {
                    self.succeeded_peers += 1;
                } else {
                    self.failed_peers += 1;
                }
                self.synced += report.synced;
                self.skipped += report.skipped;
                self.failed += report.failed;
                for error in report.errors.iter().chain(report.page_error.iter()) {
                    if self.errors.len() < max_errors {
                        self.errors.push(PeerSyncError {
                            peer: result.peer.clone(),
                            error: error.clone(),
                        });
                    } else {
                        self.truncated_errors += 1;
                    }
                }
            }
        }
    }
}

/// Drives [`SyncEngine`] over every followed peer
#[derive(Clone, Debug)]
pub struct SyncScheduler {
    ctx: FederationContext,
    engine: SyncEngine,
    states: SyncStateStore,
    config: SyncConfig,
}

impl SyncScheduler {
    pub fn new(
        ctx: FederationContext,
        engine: SyncEngine,
        states: SyncStateStore,
        config: SyncConfig,
    ) -> Self {
        Self {
            ctx,
            engine,
            states,
            config,
        }
    }

    /// Where the next run for `peer` starts
    pub fn start_time(&self, peer: &Address) -> NodeResult<i64> {
        Ok(self.states.load(peer)?.start_time())
    }

    /// Whether `state` keeps its peer out of the next cycle
    pub fn should_skip(&self, state: &SyncState) -> bool {
        state.should_skip(
            self.config.max_retries,
            self.config.cooldown_secs,
            now_timestamp(),
        )
    }

    /// Sync state of every followed peer
    pub fn status(&self) -> NodeResult<Vec<(Address, SyncState)>> {
        let followees = self.ctx.storage.list_followees(&self.ctx.address())?;
        followees
            .into_iter()
            .map(|peer| {
                let state = self.states.load(&peer)?;
                Ok((peer, state))
            })
            .collect()
    }

    /// One pass over every followed peer
    pub async fn run_cycle(&self) -> NodeResult<CycleReport> {
        let followees = self.ctx.storage.list_followees(&self.ctx.address())?;
        let batch_size = self.config.batch_size.max(1);
        info!(peers = followees.len(), batch_size, "Starting sync cycle");

        let mut report = CycleReport::default();
        let batches: Vec<&[Address]> = followees.chunks(batch_size).collect();
        for (i, batch) in batches.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.config.batch_pause()).await;
            }
            let results = join_all(batch.iter().map(|peer| self.run_peer(peer, false))).await;
            for result in &results {
                report.absorb(result, self.config.max_reported_errors);
            }
        }

        info!(
            peers = report.peers,
            synced = report.synced,
            failed = report.failed,
            cooldown = report.cooldown_peers,
            "Sync cycle finished"
        );
        self.ctx.emit(FederationEvent::SyncCycleCompleted {
            peers: report.peers,
            synced: report.synced,
            failed: report.failed,
        });
        Ok(report)
    }

    /// Sync a single peer. With `force`, cooldown is ignored.
    pub async fn run_peer(&self, peer: &Address, force: bool) -> PeerRunResult {
        let status = match self.run_peer_inner(peer, force).await {
            Ok(status) => status,
            Err(e) => {
                warn!(peer = %peer, error = %e, "Peer sync aborted");
                PeerRunStatus::Aborted(e.to_string())
            }
        };
        PeerRunResult {
            peer: peer.clone(),
            status,
        }
    }

    async fn run_peer_inner(&self, peer: &Address, force: bool) -> NodeResult<PeerRunStatus> {
        let mut state = self.states.load(peer)?;
        if !force && self.should_skip(&state) {
            debug!(
                peer = %peer,
                failures = state.consecutive_failure_count,
                "Peer in cooldown, skipping"
            );
            return Ok(PeerRunStatus::Cooldown);
        }

        let node = self.ctx.node(peer)?;
        let run_start = now_timestamp();
        let options = BacklogOptions {
            limit: self.config.page_limit,
            max_pages: self.config.max_pages,
            timeout: self.ctx.request_timeout,
        };

        let report = self
            .engine
            .sync_backlog(&node, state.start_time(), state.last_success_sequence, options)
            .await;

        state.last_attempt_timestamp = Some(run_start);
        state.total_runs += 1;
        state.total_synced += report.synced as u64;
        state.total_skipped += report.skipped as u64;
        state.total_failed += report.failed as u64;
        if report.outcome == BacklogOutcome::Success {
            if let Some(cursor) = report.cursor {
                state.last_success_timestamp = Some(cursor.published_at);
                state.last_success_sequence = Some(cursor.sequence);
            }
            state.consecutive_failure_count = 0;
            state.last_error = None;
            if report.truncated {
                info!(peer = %peer, pages = report.pages, "Page limit reached, resuming next cycle");
            }
        } else {
        self.states.save(peer, &state)?;

        Ok(PeerRunStatus::Ran(report))
    }

    /// Run cycles forever, `interval` apart
    pub async fn run_forever(&self, interval: Duration) {
        loop {
            if let Err(e) = self.run_cycle().await {
                warn!(error = %e, "Sync cycle failed");
            }
            tokio::time::sleep(interval).await;
        }
    }
}
