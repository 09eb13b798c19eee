//! Per-peer sync bookkeeping
//!
//! Lives outside the relational store: one small JSON file per remote peer
//! under `<data_dir>/sync/`, replaced atomically (write temp, rename) after
//! every peer run.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{NodeError, NodeResult};
use crate::identity::Address;

/// Directory under the data dir holding sync state files
pub const SYNC_STATE_DIR: &str = "sync";

/// Sync progress and health for one remote peer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    /// Watermark: the peer's publish time of the last item listed in a run
    /// without errors
    #[serde(default)]
    pub last_success_timestamp: Option<i64>,
    /// Publish sequence of that same item; the next run resumes past it
    #[serde(default)]
    pub last_success_sequence: Option<u64>,
    #[serde(default)]
    pub consecutive_failure_count: u32,
    #[serde(default)]
    pub last_attempt_timestamp: Option<i64>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub total_synced: u64,
    #[serde(default)]
    pub total_skipped: u64,
    #[serde(default)]
    pub total_failed: u64,
    #[serde(default)]
    pub total_runs: u64,
}

impl SyncState {
    /// Where the next backlog pull starts
    pub fn start_time(&self) -> i64 {
        self.last_success_timestamp.unwrap_or(0)
    }

    /// Whether the peer is in cooldown after repeated failures
    pub fn should_skip(&self, max_retries: u32, cooldown_secs: i64, now: i64) -> bool {
        if self.consecutive_failure_count < max_retries {
            return false;
        }
        match self.last_attempt_timestamp {
            Some(last) => now - last < cooldown_secs,
            None => false,
        }
    }
}

/// Atomic JSON file per peer
#[derive(Debug, Clone)]
pub struct SyncStateStore {
    dir: PathBuf,
}

impl SyncStateStore {
    /// Store rooted at `<data_dir>/sync`
    pub fn new(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.join(SYNC_STATE_DIR),
        }
    }

    fn path_for(&self, peer: &Address) -> PathBuf {
        self.dir.join(format!("{}.json", peer))
    }

    /// Load a peer's state; unknown peers start from the default
    pub fn load(&self, peer: &Address) -> NodeResult<SyncState> {
        let path = self.path_for(peer);
        match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| NodeError::Serialization(format!("{}: {}", path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SyncState::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace a peer's state
    pub fn save(&self, peer: &Address, state: &SyncState) -> NodeResult<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(peer);
        let encoded = serde_json::to_vec_pretty(state)
            .map_err(|e| NodeError::Serialization(e.to_string()))?;

        let tmp = path.with_extension("tmp");
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(&encoded)?;
        file.sync_all()?;
        drop(file);
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Every stored state, in address order
    pub fn list(&self) -> NodeResult<Vec<(Address, SyncState)>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut states = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let address = match Address::parse(stem) {
                Ok(address) => address,
                Err(_) => {
                    warn!(path = %path.display(), "Ignoring stray sync state file");
                    continue;
                }
            };
            let state = self.load(&address)?;
            states.push((address, state));
        }
        states.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(states)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::NodeKeypair;
    use tempfile::TempDir;

    #[test]
    fn test_start_time_defaults_to_epoch() {
        assert_eq!(SyncState::default().start_time(), 0);
        let state = SyncState {
            last_success_timestamp: Some(500),
            ..Default::default()
        };
        assert_eq!(state.start_time(), 500);
    }

    #[test]
    fn test_should_skip_only_in_cooldown() {
        let now = 1_000_000;
        let mut state = SyncState {
            consecutive_failure_count: 2,
            last_attempt_timestamp: Some(now - 10),
            ..Default::default()
        };
        assert!(!state.should_skip(3, 86_400, now));

        state.consecutive_failure_count = 3;
        assert!(state.should_skip(3, 86_400, now));

        state.last_attempt_timestamp = Some(now - 86_400);
        assert!(!state.should_skip(3, 86_400, now));
    }

    #[test]
    fn test_store_roundtrip_and_list() {
        let temp = TempDir::new().unwrap();
        let store = SyncStateStore::new(temp.path());
        let peer = NodeKeypair::generate().address();

        assert_eq!(store.load(&peer).unwrap(), SyncState::default());

        let state = SyncState {
            last_success_timestamp: Some(42),
            last_success_sequence: Some(3),
            total_runs: 1,
            ..Default::default()
        };
        store.save(&peer, &state).unwrap();
        assert_eq!(store.load(&peer).unwrap(), state);

        std::fs::write(temp.path().join(SYNC_STATE_DIR).join("notes.txt"), "x").unwrap();
        let listed = store.list().unwrap();
        assert_eq!(listed, vec![(peer, state)]);
    }

    #[test]
    fn test_save_replaces_state_and_leaves_no_temp_file() {
        let temp = TempDir::new().unwrap();
        let store = SyncStateStore::new(temp.path());
        let peer = NodeKeypair::generate().address();
        store.save(&peer, &SyncState::default()).unwrap();

        let updated = SyncState {
            last_success_timestamp: Some(7),
            last_success_sequence: Some(1),
            consecutive_failure_count: 0,
            ..Default::default()
        };
        store.save(&peer, &updated).unwrap();
        assert_eq!(store.load(&peer).unwrap(), updated);

        let names: Vec<_> = std::fs::read_dir(temp.path().join(SYNC_STATE_DIR))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(!temp
            .path()
            .join(SYNC_STATE_DIR)
            .join(format!("{}.tmp", peer))
            .exists());
    }

    #[test]
    fn test_state_without_sequence_still_loads() {
        let temp = TempDir::new().unwrap();
        let store = SyncStateStore::new(temp.path());
        let peer = NodeKeypair::generate().address();
        std::fs::create_dir_all(temp.path().join(SYNC_STATE_DIR)).unwrap();
        std::fs::write(
            temp.path().join(SYNC_STATE_DIR).join(format!("{}.json", peer)),
            r#"{"lastSuccessTimestamp": 12, "consecutiveFailureCount": 1}"#,
        )
        .unwrap();

        let state = store.load(&peer).unwrap();
        assert_eq!(state.start_time(), 12);
        assert_eq!(state.last_success_sequence, None);
        assert_eq!(state.consecutive_failure_count, 1);
    }
}
