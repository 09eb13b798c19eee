//! Synchronization - pull-based catch-up with followed peers
//!
//! ```text
//! SyncScheduler ── per cycle, batches of followed peers
//!   └── SyncEngine::sync_backlog ── pages of GET /publications
//!         └── SyncEngine::sync_one ── verify, fetch, hash, store
//! SyncStateStore ── one JSON file per peer (watermark, failures, totals)
//! ```

pub mod engine;
pub mod scheduler;
pub mod state;

pub use engine::{
    BacklogOptions, BacklogOutcome, BacklogReport, SyncEngine, SyncItemError, SyncItemOutcome,
};
pub use scheduler::{CycleReport, PeerRunResult, PeerRunStatus, PeerSyncError, SyncScheduler};
pub use state::{SyncState, SyncStateStore};
