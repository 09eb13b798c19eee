//! Content Store - content-addressed POST and FILE storage
//!
//! POST bodies live in the content row. FILE bytes are streamed through
//! sha256 into a temp file and then moved to `files/<shard>/<hex>`, where
//! `<shard>` is the first two hex characters of the hash.
//!
//! Identical bytes always collapse to one row and one file. Rows are never
//! mutated; unreferenced ones are reclaimed by [`ContentStore::cleanup_orphans`].
//!
//! # Example
//!
//! ```ignore
//! let content = store.create(CreateContent::post("# Hello")).await?;
//! assert_eq!(content.content_hash, ContentHash::of(b"# Hello"));
//! ```

mod source;

pub use source::{
    guess_mimetype, BytesSource, ContentReader, ContentSource, FileSource, StreamSource,
    DEFAULT_MIMETYPE,
};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, error, info, warn};

use crate::error::{NodeError, NodeResult};
use crate::storage::{ContentRemoval, Storage};
use crate::types::{now_timestamp, Content, ContentHash, ContentKind, POST_MIMETYPE};

/// Chunk size used while hashing streamed content
const CHUNK_SIZE: usize = 64 * 1024;

/// Directory under the data dir holding FILE bytes
const FILES_DIR: &str = "files";

/// Staging directory for in-flight uploads
const TMP_DIR: &str = "tmp";

/// What to store
pub enum CreateContent {
    Post { body: String },
    File { source: Box<dyn ContentSource> },
}

impl CreateContent {
    pub fn post(body: impl Into<String>) -> Self {
        CreateContent::Post { body: body.into() }
    }

    pub fn file(source: impl ContentSource + 'static) -> Self {
        CreateContent::File {
            source: Box::new(source),
        }
    }
}

impl std::fmt::Debug for CreateContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CreateContent::Post { body } => f.debug_struct("Post").field("len", &body.len()).finish(),
            CreateContent::File { source } => f
                .debug_struct("File")
                .field("filename", &source.filename())
                .finish(),
        }
    }
}

/// Stored bytes plus what is needed to serve them
#[derive(Debug, Clone)]
pub struct ContentBytes {
    pub content: Content,
    pub bytes: Bytes,
    /// Last modification, unix seconds
    pub modified: i64,
}

/// Per-item failure during orphan cleanup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanError {
    pub content_hash: ContentHash,
    pub message: String,
}

/// Result of one orphan cleanup pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrphanCleanupReport {
    /// Content rows examined
    pub scanned: usize,
    pub deleted: usize,
    pub freed_bytes: u64,
    pub errors: Vec<OrphanError>,
}

/// Content-addressed store over [`Storage`] and the data directory.
#[derive(Clone)]
pub struct ContentStore {
    storage: Storage,
    root: PathBuf,
    max_bytes: u64,
    /// Held around "move file into place + commit row" and around orphan
    /// deletion so the two never interleave
    write_gate: Arc<Mutex<()>>,
}

impl std::fmt::Debug for ContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentStore")
            .field("root", &self.root)
            .field("max_bytes", &self.max_bytes)
            .finish()
    }
}

impl ContentStore {
    /// Create a store rooted at `data_dir`
    pub fn new(storage: Storage, data_dir: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            storage,
            root: data_dir.into(),
            max_bytes,
            write_gate: Arc::new(Mutex::new(())),
        }
    }

    /// Store content, returning the existing row when the bytes are known
    pub async fn create(&self, request: CreateContent) -> NodeResult<Content> {
        self.create_inner(request, None).await
    }

    /// Store content only if its bytes hash to `expected`.
    ///
    /// On mismatch nothing is persisted and `ContentHashMismatch` is returned.
    pub async fn create_verified(
        &self,
        request: CreateContent,
        expected: &ContentHash,
    ) -> NodeResult<Content> {
        self.create_inner(request, Some(expected)).await
    }

    /// Largest content accepted, in bytes
    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Look up a content row
    pub fn load(&self, hash: &ContentHash) -> NodeResult<Option<Content>> {
        self.storage.load_content(hash)
    }

    /// Absolute path of a FILE content's bytes
    pub fn file_path(&self, content: &Content) -> Option<PathBuf> {
        content.local_path.as_ref().map(|p| self.root.join(p))
    }

    /// Read a content's bytes
    pub async fn read(&self, hash: &ContentHash) -> NodeResult<ContentBytes> {
        let content = self
            .storage
            .load_content(hash)?
            .ok_or_else(|| NodeError::ContentNotFound(hash.to_string()))?;

        match content.kind {
            ContentKind::Post => {
                let bytes = Bytes::from(content.body.clone().unwrap_or_default());
                let modified = content.created_at;
                Ok(ContentBytes {
                    content,
                    bytes,
                    modified,
                })
            }
            ContentKind::File => {
                let path = self
                    .file_path(&content)
                    .ok_or_else(|| NodeError::ContentNotFound(hash.to_string()))?;
                let bytes = match tokio::fs::read(&path).await {
                    Ok(bytes) => Bytes::from(bytes),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        error!(content_hash = %hash, path = %path.display(), "Content file missing");
                        return Err(NodeError::ContentNotFound(hash.to_string()));
                    }
                    Err(e) => return Err(e.into()),
                };
                let modified = file_mtime(&path).await.unwrap_or(content.created_at);
                Ok(ContentBytes {
                    content,
                    bytes,
                    modified,
                })
            }
        }
    }

    async fn create_inner(
        &self,
        request: CreateContent,
        expected: Option<&ContentHash>,
    ) -> NodeResult<Content> {
        match request {
            CreateContent::Post { body } => self.create_post(body, expected),
            CreateContent::File { source } => self.create_file(source, expected).await,
        }
    }

    fn create_post(&self, body: String, expected: Option<&ContentHash>) -> NodeResult<Content> {
        if body.trim().is_empty() {
            return Err(NodeError::ValidationFailed("post body is empty".into()));
        }

        let hash = ContentHash::of(body.as_bytes());
        check_expected(&hash, expected)?;

        if let Some(existing) = self.storage.load_content(&hash)? {
            debug!(content_hash = %hash, "Post content already stored");
            return Ok(existing);
        }

        let content = Content {
            content_hash: hash,
            kind: ContentKind::Post,
            size: body.len() as u64,
            body: Some(body),
            filename: None,
            mimetype: POST_MIMETYPE.to_string(),
            local_path: None,
            created_at: now_timestamp(),
        };
        let (stored, inserted) = self.storage.insert_content_if_absent(&content)?;
        if inserted {
            info!(content_hash = %stored.content_hash, size = stored.size, "Stored post content");
        }
        Ok(stored)
    }

    async fn create_file(
        &self,
        source: Box<dyn ContentSource>,
        expected: Option<&ContentHash>,
    ) -> NodeResult<Content> {
        let filename = source.filename().trim().to_string();
        let mimetype = source.mimetype().trim().to_string();
        if filename.is_empty() {
            return Err(NodeError::ValidationFailed("filename is empty".into()));
        }
        if mimetype.is_empty() {
            return Err(NodeError::ValidationFailed("mimetype is empty".into()));
        }

        let reader = source.open().await?;
        let tmp_path = self.tmp_path()?;
        let (hash, size) = match self.stream_to_temp(reader, &tmp_path).await {
            Ok(result) => result,
            Err(e) => {
                discard(&tmp_path).await;
                return Err(e);
            }
        };

        if let Err(e) = check_expected(&hash, expected) {
            discard(&tmp_path).await;
            return Err(e);
        }

        let relative = Path::new(FILES_DIR).join(hash.shard()).join(hash.hex());
        let final_path = self.root.join(&relative);

        let result = {
            let _gate = self.write_gate.lock();
            self.commit_file(&hash, &tmp_path, &final_path, || Content {
                content_hash: hash.clone(),
                kind: ContentKind::File,
                body: None,
                filename: Some(filename.clone()),
                mimetype: mimetype.clone(),
                size,
                local_path: Some(relative.to_string_lossy().into_owned()),
                created_at: now_timestamp(),
            })
        };

        if result.is_err() || tmp_path.exists() {
            discard(&tmp_path).await;
        }
        result
    }

    /// Move the staged file into place and commit its row. Caller holds the
    /// write gate.
    fn commit_file<F>(
        &self,
        hash: &ContentHash,
        tmp_path: &Path,
        final_path: &Path,
        row: F,
    ) -> NodeResult<Content>
    where
        F: FnOnce() -> Content,
    {
        if let Some(existing) = self.storage.load_content(hash)? {
            debug!(content_hash = %hash, "File content already stored");
            return Ok(existing);
        }

        if let Some(parent) = final_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::rename(tmp_path, final_path)?;

        let (stored, inserted) = self.storage.insert_content_if_absent(&row())?;
        if inserted {
            info!(content_hash = %hash, size = stored.size, "Stored file content");
        }
        Ok(stored)
    }

    async fn stream_to_temp(
        &self,
        mut reader: ContentReader,
        tmp_path: &Path,
    ) -> NodeResult<(ContentHash, u64)> {
        let mut file = tokio::fs::File::create(tmp_path).await?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut size: u64 = 0;

        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            size += n as u64;
            if size > self.max_bytes {
                return Err(NodeError::ValidationFailed(format!(
                    "content exceeds {} bytes",
                    self.max_bytes
                )));
            }
            hasher.update(&buf[..n]);
            file.write_all(&buf[..n]).await?;
        }
        file.flush().await?;
        file.sync_all().await?;

        Ok((ContentHash::from_digest(hasher.finalize().into()), size))
    }

    fn tmp_path(&self) -> NodeResult<PathBuf> {
        let dir = self.root.join(FILES_DIR).join(TMP_DIR);
        std::fs::create_dir_all(&dir)?;

        let mut nonce = [0u8; 8];
        getrandom::getrandom(&mut nonce)
            .map_err(|e| NodeError::Storage(format!("failed to generate temp name: {}", e)))?;
        Ok(dir.join(format!("upload-{}.part", hex::encode(nonce))))
    }

    /// Remove content no publication references.
    ///
    /// Rows created less than `min_age` ago are skipped. Each deletion
    /// re-checks the reference count inside its own transaction; content
    /// that gained a reference in the meantime is skipped, not reported.
    pub fn cleanup_orphans(&self, min_age: Duration) -> NodeResult<OrphanCleanupReport> {
        let cutoff = now_timestamp() - min_age.as_secs() as i64;
        let contents = self.storage.list_contents()?;
        let mut report = OrphanCleanupReport {
            scanned: contents.len(),
            ..Default::default()
        };

        for content in contents {
            if content.created_at >= cutoff {
                continue;
            }
            if self.storage.content_ref_count(&content.content_hash)? > 0 {
                continue;
            }

            let outcome = {
                let _gate = self.write_gate.lock();
                self.storage
                    .remove_content_if_unreferenced(&content.content_hash, cutoff, |row| {
                        self.remove_file(row)
                    })
            };

            match outcome {
                Ok(ContentRemoval::Removed(row)) => {
                    debug!(content_hash = %row.content_hash, "Removed orphaned content");
                    report.deleted += 1;
                    report.freed_bytes += row.size;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(content_hash = %content.content_hash, error = %e, "Orphan cleanup failed");
                    report.errors.push(OrphanError {
                        content_hash: content.content_hash.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        info!(
            scanned = report.scanned,
            deleted = report.deleted,
            freed_bytes = report.freed_bytes,
            errors = report.errors.len(),
            "Orphan cleanup finished"
        );
        Ok(report)
    }

    fn remove_file(&self, content: &Content) -> std::io::Result<()> {
        let Some(path) = self.file_path(content) else {
            return Ok(());
        };
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn check_expected(actual: &ContentHash, expected: Option<&ContentHash>) -> NodeResult<()> {
    match expected {
        Some(expected) if expected != actual => Err(NodeError::ContentHashMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }),
        _ => Ok(()),
    }
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove temp file");
        }
    }
}

async fn file_mtime(path: &Path) -> Option<i64> {
    let modified = tokio::fs::metadata(path).await.ok()?.modified().ok()?;
    let since_epoch = modified.duration_since(std::time::UNIX_EPOCH).ok()?;
    Some(since_epoch.as_secs() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::NodeKeypair;
    use crate::types::Publication;
    use tempfile::TempDir;

    fn create_test_store() -> (ContentStore, Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::new(temp_dir.path().join("test.redb")).unwrap();
        let store = ContentStore::new(storage.clone(), temp_dir.path(), 1024 * 1024);
        (store, storage, temp_dir)
    }

    fn reference(storage: &Storage, hash: &ContentHash) {
        storage
            .insert_publication(&Publication {
                id: 0,
                content_hash: hash.clone(),
                author_address: NodeKeypair::generate().address(),
                signature: None,
                comment_count: 0,
                created_at: 1,
                description: None,
                published_at: None,
                publish_seq: None,
            })
            .unwrap();
    }

    fn file_count(root: &Path) -> usize {
        let files = root.join(FILES_DIR);
        std::fs::read_dir(&files)
            .map(|shards| {
                shards
                    .filter_map(|s| s.ok())
                    .filter(|s| s.file_name() != TMP_DIR)
                    .map(|s| std::fs::read_dir(s.path()).map(|d| d.count()).unwrap_or(0))
                    .sum()
            })
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_post_hash_and_fields() {
        let (store, _storage, _temp) = create_test_store();
        let content = store.create(CreateContent::post("# Hello")).await.unwrap();

        assert_eq!(content.content_hash, ContentHash::of(b"# Hello"));
        assert_eq!(content.kind, ContentKind::Post);
        assert_eq!(content.mimetype, "text/markdown");
        assert_eq!(content.size, 7);
        assert_eq!(content.body.as_deref(), Some("# Hello"));
    }

    #[tokio::test]
    async fn test_empty_post_rejected() {
        let (store, _storage, _temp) = create_test_store();
        let err = store.create(CreateContent::post("   ")).await.unwrap_err();
        assert!(matches!(err, NodeError::ValidationFailed(_)));
    }

    #[tokio::test]
    async fn test_file_is_sharded_and_idempotent() {
        let (store, storage, temp) = create_test_store();
        let bytes = b"%PDF-1.4 pretend".to_vec();

        let mut hashes = Vec::new();
        for _ in 0..3 {
            let content = store
                .create(CreateContent::file(BytesSource::new(
                    "doc.pdf",
                    "application/pdf",
                    bytes.clone(),
                )))
                .await
                .unwrap();
            hashes.push(content.content_hash);
        }

        let expected = ContentHash::of(&bytes);
        assert!(hashes.iter().all(|h| h == &expected));
        assert_eq!(storage.list_contents().unwrap().len(), 1);
        assert_eq!(file_count(temp.path()), 1);

        let on_disk = temp
            .path()
            .join(FILES_DIR)
            .join(expected.shard())
            .join(expected.hex());
        assert_eq!(std::fs::read(on_disk).unwrap(), bytes);

        let tmp_left = std::fs::read_dir(temp.path().join(FILES_DIR).join(TMP_DIR))
            .unwrap()
            .count();
        assert_eq!(tmp_left, 0);
    }

    #[tokio::test]
    async fn test_file_requires_name_and_type() {
        let (store, _storage, _temp) = create_test_store();
        let err = store
            .create(CreateContent::file(BytesSource::new("", "text/plain", &b"x"[..])))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::ValidationFailed(_)));

        let err = store
            .create(CreateContent::file(BytesSource::new("a.txt", " ", &b"x"[..])))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::ValidationFailed(_)));
    }

    #[tokio::test]
    async fn test_oversized_file_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::new(temp_dir.path().join("test.redb")).unwrap();
        let store = ContentStore::new(storage.clone(), temp_dir.path(), 4);

        let err = store
            .create(CreateContent::file(BytesSource::new("a.bin", "application/octet-stream", &b"12345"[..])))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::ValidationFailed(_)));
        assert!(storage.list_contents().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_verified_rejects_mismatch() {
        let (store, storage, temp) = create_test_store();
        let wrong = ContentHash::of(b"something else");

        let err = store
            .create_verified(
                CreateContent::file(BytesSource::new("a.txt", "text/plain", &b"actual"[..])),
                &wrong,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::ContentHashMismatch { .. }));
        assert!(storage.list_contents().unwrap().is_empty());
        assert_eq!(file_count(temp.path()), 0);

        let err = store
            .create_verified(CreateContent::post("# Hi"), &wrong)
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::ContentHashMismatch { .. }));

        let right = ContentHash::of(b"# Hi");
        let content = store
            .create_verified(CreateContent::post("# Hi"), &right)
            .await
            .unwrap();
        assert_eq!(content.content_hash, right);
    }

    #[tokio::test]
    async fn test_read_post_and_file() {
        let (store, _storage, _temp) = create_test_store();
        let post = store.create(CreateContent::post("body")).await.unwrap();
        let file = store
            .create(CreateContent::file(BytesSource::new("f.txt", "text/plain", &b"file bytes"[..])))
            .await
            .unwrap();

        assert_eq!(&store.read(&post.content_hash).await.unwrap().bytes[..], b"body");
        let read = store.read(&file.content_hash).await.unwrap();
        assert_eq!(&read.bytes[..], b"file bytes");
        assert_eq!(read.content.mimetype, "text/plain");

        let missing = store.read(&ContentHash::of(b"nope")).await.unwrap_err();
        assert!(matches!(missing, NodeError::ContentNotFound(_)));
    }

    #[tokio::test]
    async fn test_cleanup_orphans() {
        let (store, storage, temp) = create_test_store();
        let orphan = store
            .create(CreateContent::file(BytesSource::new("o.txt", "text/plain", &b"orphan"[..])))
            .await
            .unwrap();
        let kept = store.create(CreateContent::post("kept")).await.unwrap();
        reference(&storage, &kept.content_hash);

        // Everything is younger than an hour
        let report = store.cleanup_orphans(Duration::from_secs(3600)).unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(report.deleted, 0);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let report = store.cleanup_orphans(Duration::ZERO).unwrap();
        assert!(report.errors.is_empty());
        assert_eq!(report.deleted, 1);
        assert_eq!(report.freed_bytes, 6);

        assert!(storage.load_content(&orphan.content_hash).unwrap().is_none());
        assert!(storage.load_content(&kept.content_hash).unwrap().is_some());
        assert_eq!(file_count(temp.path()), 0);
    }

    #[tokio::test]
    async fn test_reference_landing_before_delete_keeps_content() {
        let (store, storage, _temp) = create_test_store();
        let content = store
            .create(CreateContent::file(BytesSource::new("r.txt", "text/plain", &b"raced"[..])))
            .await
            .unwrap();
        let path = store.file_path(&content).unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;

        // Cleanup saw zero references, then a publication landed
        assert_eq!(storage.content_ref_count(&content.content_hash).unwrap(), 0);
        reference(&storage, &content.content_hash);

        let removal = storage
            .remove_content_if_unreferenced(&content.content_hash, now_timestamp() + 1, |_| {
                panic!("referenced content must not reach the file delete")
            })
            .unwrap();
        assert!(matches!(removal, ContentRemoval::Referenced));
        assert!(storage.load_content(&content.content_hash).unwrap().is_some());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_cleanup_tolerates_concurrent_inserts() {
        let (store, storage, _temp) = create_test_store();
        let mut contents = Vec::new();
        for i in 0..20 {
            let body = format!("orphan {}", i);
            let content = store
                .create(CreateContent::file(BytesSource::new(
                    format!("{}.txt", i),
                    "text/plain",
                    body.into_bytes(),
                )))
                .await
                .unwrap();
            contents.push(content);
        }
        tokio::time::sleep(Duration::from_millis(1100)).await;

        let cleaner = {
            let store = store.clone();
            tokio::task::spawn_blocking(move || store.cleanup_orphans(Duration::ZERO))
        };
        let inserter = {
            let storage = storage.clone();
            let hashes: Vec<ContentHash> = contents.iter().map(|c| c.content_hash.clone()).collect();
            tokio::task::spawn_blocking(move || {
                let author = NodeKeypair::generate().address();
                hashes
                    .into_iter()
                    .map(|hash| {
                        let inserted = storage.insert_publication(&Publication {
                            id: 0,
                            content_hash: hash.clone(),
                            author_address: author.clone(),
                            signature: None,
                            comment_count: 0,
                            created_at: 1,
                            description: None,
                            published_at: None,
                            publish_seq: None,
                        });
                        (hash, inserted)
                    })
                    .collect::<Vec<_>>()
            })
        };

        let report = cleaner.await.unwrap().unwrap();
        let inserts = inserter.await.unwrap();
        assert!(report.errors.is_empty());

        // Every insert either kept its content or lost the race cleanly
        let mut kept = 0;
        for (content, (hash, inserted)) in contents.iter().zip(inserts) {
            assert_eq!(content.content_hash, hash);
            let row = storage.load_content(&hash).unwrap();
            let path = store.file_path(content).unwrap();
            match inserted {
                Ok(_) => {
                    kept += 1;
                    assert!(row.is_some());
                    assert!(path.exists());
                }
                Err(e) => {
                    assert!(matches!(e, NodeError::ContentNotFound(_)));
                    assert!(row.is_none());
                    assert!(!path.exists());
                }
            }
        }
        assert_eq!(kept + report.deleted, contents.len());
    }
}
