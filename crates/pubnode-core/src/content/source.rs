//! File-like inputs to the content store
//!
//! A [`ContentSource`] names its bytes and hands out a reader once. The store
//! never needs to know whether the bytes come from disk, memory or an HTTP
//! response body.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncRead;

use crate::error::{NodeError, NodeResult};

/// Boxed byte stream handed to the content store
pub type ContentReader = Box<dyn AsyncRead + Send + Unpin>;

/// Fallback mimetype for unrecognized files
pub const DEFAULT_MIMETYPE: &str = "application/octet-stream";

/// Something the content store can ingest as a FILE
#[async_trait]
pub trait ContentSource: Send {
    fn filename(&self) -> &str;

    fn mimetype(&self) -> &str;

    /// Consume the source and open its byte stream
    async fn open(self: Box<Self>) -> NodeResult<ContentReader>;
}

/// A file on the local filesystem
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    filename: String,
    mimetype: String,
}

impl FileSource {
    /// Source for `path`, named after its file name, mimetype guessed from
    /// the extension
    pub fn new(path: impl AsRef<Path>) -> NodeResult<Self> {
        let path = path.as_ref().to_path_buf();
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                NodeError::ValidationFailed(format!("path has no file name: {}", path.display()))
            })?
            .to_string();
        let mimetype = guess_mimetype(&filename).to_string();
        Ok(Self {
            path,
            filename,
            mimetype,
        })
    }

    pub fn with_mimetype(mut self, mimetype: impl Into<String>) -> Self {
        self.mimetype = mimetype.into();
        self
    }
}

#[async_trait]
impl ContentSource for FileSource {
    fn filename(&self) -> &str {
        &self.filename
    }

    fn mimetype(&self) -> &str {
        &self.mimetype
    }

    async fn open(self: Box<Self>) -> NodeResult<ContentReader> {
        let file = tokio::fs::File::open(&self.path).await?;
        Ok(Box::new(file))
    }
}

/// Bytes already in memory
#[derive(Debug, Clone)]
pub struct BytesSource {
    filename: String,
    mimetype: String,
    bytes: Bytes,
}

impl BytesSource {
    pub fn new(
        filename: impl Into<String>,
        mimetype: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            filename: filename.into(),
            mimetype: mimetype.into(),
            bytes: bytes.into(),
        }
    }
}

#[async_trait]
impl ContentSource for BytesSource {
    fn filename(&self) -> &str {
        &self.filename
    }

    fn mimetype(&self) -> &str {
        &self.mimetype
    }

    async fn open(self: Box<Self>) -> NodeResult<ContentReader> {
        Ok(Box::new(std::io::Cursor::new(self.bytes)))
    }
}

/// An already-open stream, e.g. a peer's HTTP response body
pub struct StreamSource {
    filename: String,
    mimetype: String,
    reader: ContentReader,
}

impl StreamSource {
    pub fn new(filename: impl Into<String>, mimetype: impl Into<String>, reader: ContentReader) -> Self {
        Self {
            filename: filename.into(),
            mimetype: mimetype.into(),
            reader,
        }
    }
}

impl std::fmt::Debug for StreamSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSource")
            .field("filename", &self.filename)
            .field("mimetype", &self.mimetype)
            .finish()
    }
}

#[async_trait]
impl ContentSource for StreamSource {
    fn filename(&self) -> &str {
        &self.filename
    }

    fn mimetype(&self) -> &str {
        &self.mimetype
    }

    async fn open(self: Box<Self>) -> NodeResult<ContentReader> {
        Ok(self.reader)
    }
}

/// Mimetype for common extensions
pub fn guess_mimetype(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "md" | "markdown" => "text/markdown",
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        "zip" => "application/zip",
        _ => DEFAULT_MIMETYPE,
    }
}
