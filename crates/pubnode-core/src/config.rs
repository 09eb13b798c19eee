//! Node configuration
//!
//! Loaded from `<data_dir>/pubnode.toml`. Every field has a default so a
//! missing file, or a file that only sets `url`, is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{NodeError, NodeResult};
use crate::identity::DEFAULT_FRESHNESS_WINDOW_SECS;

/// Name of the config file inside the data directory
pub const CONFIG_FILE_NAME: &str = "pubnode.toml";

/// Complete node configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Public base URL other nodes reach this node at.
    #[serde(default = "default_url")]
    pub url: String,
    /// Display title.
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Accepted clock skew for signed documents, in seconds.
    #[serde(default = "default_freshness_window")]
    pub freshness_window_secs: i64,
    /// Largest FILE content accepted, in bytes.
    #[serde(default = "default_max_content_bytes")]
    pub max_content_bytes: u64,
    /// Deadline for every outbound peer call.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Sync settings.
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Synchronization configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Peers synced concurrently per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Pause between batches.
    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,
    /// Consecutive failures before a peer enters cooldown.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: i64,
    /// Items requested per publications page.
    #[serde(default = "default_page_limit")]
    pub page_limit: usize,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    /// Cap on per-item errors kept in a cycle report.
    #[serde(default = "default_max_reported_errors")]
    pub max_reported_errors: usize,
    /// Unreferenced content younger than this is left alone.
    #[serde(default = "default_orphan_min_age")]
    pub orphan_min_age_secs: i64,
}

// Default value functions

fn default_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_title() -> String {
    "pubnode".to_string()
}

fn default_freshness_window() -> i64 {
    DEFAULT_FRESHNESS_WINDOW_SECS
}

fn default_max_content_bytes() -> u64 {
    100 * 1024 * 1024
}

fn default_request_timeout() -> u64 {
    30
}

fn default_batch_size() -> usize {
    5
}

fn default_batch_pause_ms() -> u64 {
    1000
}

fn default_max_retries() -> u32 {
    3
}

fn default_cooldown_secs() -> i64 {
    24 * 60 * 60
}

fn default_page_limit() -> usize {
    50
}

fn default_max_pages() -> usize {
    20
}

fn default_max_reported_errors() -> usize {
    50
}

fn default_orphan_min_age() -> i64 {
    3600
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            title: default_title(),
            description: String::new(),
            freshness_window_secs: default_freshness_window(),
            max_content_bytes: default_max_content_bytes(),
            request_timeout_secs: default_request_timeout(),
            sync: SyncConfig::default(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_pause_ms: default_batch_pause_ms(),
            max_retries: default_max_retries(),
            cooldown_secs: default_cooldown_secs(),
            page_limit: default_page_limit(),
            max_pages: default_max_pages(),
            max_reported_errors: default_max_reported_errors(),
            orphan_min_age_secs: default_orphan_min_age(),
        }
    }
}

impl NodeConfig {
    /// Path of the config file inside `data_dir`
    pub fn path_in(data_dir: &Path) -> PathBuf {
        data_dir.join(CONFIG_FILE_NAME)
    }

    /// Load configuration from `data_dir`.
    ///
    /// Falls back to defaults if the file does not exist.
    pub fn load(data_dir: &Path) -> NodeResult<Self> {
        let path = Self::path_in(data_dir);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> NodeResult<Self> {
        toml::from_str(content).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Write this configuration to `data_dir`
    pub fn save(&self, data_dir: &Path) -> NodeResult<()> {
        std::fs::create_dir_all(data_dir)?;
        let content =
            toml::to_string_pretty(self).map_err(|e| NodeError::Config(e.to_string()))?;
        std::fs::write(Self::path_in(data_dir), content)?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl SyncConfig {
    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.freshness_window_secs, 3600);
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.sync.batch_size, 5);
        assert_eq!(config.sync.batch_pause_ms, 1000);
        assert_eq!(config.sync.max_retries, 3);
        assert_eq!(config.sync.cooldown_secs, 86_400);
        assert_eq!(config.sync.page_limit, 50);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = NodeConfig::from_toml(
            r#"
            url = "https://blog.example"

            [sync]
            batch_size = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.url, "https://blog.example");
        assert_eq!(config.title, "pubnode");
        assert_eq!(config.sync.batch_size, 2);
        assert_eq!(config.sync.max_pages, 20);
    }

    #[test]
    fn test_missing_file_is_default() {
        let temp = TempDir::new().unwrap();
        assert_eq!(NodeConfig::load(temp.path()).unwrap(), NodeConfig::default());
    }

    #[test]
    fn test_save_then_load() {
        let temp = TempDir::new().unwrap();
        let mut config = NodeConfig::default();
        config.title = "Saved".into();
        config.sync.max_retries = 7;
        config.save(temp.path()).unwrap();

        assert_eq!(NodeConfig::load(temp.path()).unwrap(), config);
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        let err = NodeConfig::from_toml("url = [").unwrap_err();
        assert!(matches!(err, NodeError::Config(_)));
    }
}
