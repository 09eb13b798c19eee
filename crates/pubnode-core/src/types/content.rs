//! Content rows
//!
//! Content is immutable and addressed by the sha256 of its bytes. POST
//! bodies live in the row; FILE bytes live on disk under a sharded path.

use serde::{Deserialize, Serialize};

use crate::types::ContentHash;

/// Mimetype assigned to every POST body
pub const POST_MIMETYPE: &str = "text/markdown";

/// Kind of content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContentKind {
    /// Markdown text stored inline
    Post,
    /// Arbitrary bytes stored as a file
    File,
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentKind::Post => write!(f, "POST"),
            ContentKind::File => write!(f, "FILE"),
        }
    }
}

/// A content-addressed blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    pub content_hash: ContentHash,
    pub kind: ContentKind,
    /// POST only
    pub body: Option<String>,
    /// FILE only
    pub filename: Option<String>,
    pub mimetype: String,
    pub size: u64,
    /// FILE only, relative to the content root
    pub local_path: Option<String>,
    pub created_at: i64,
}
