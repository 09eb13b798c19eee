//! PubNode - the primary entry point
//!
//! Opens storage, loads the node identity and wires every component
//! together. Components receive their dependencies from here; nothing is
//! global, so several nodes can live in one process (see
//! [`LoopbackNetwork`](crate::federation::LoopbackNetwork)).
//!
//! # Example
//!
//! ```ignore
//! use pubnode_core::{NodeConfig, PubNode};
//!
//! let node = PubNode::init_http("~/.pubnode", NodeConfig::default()).await?;
//! let publication = node.publish_post("# Hello", None).await?;
//! node.follow("https://friend.example").await?;
//! let report = node.sync_cycle().await?;
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

use crate::api::NodeApi;
use crate::config::NodeConfig;
use crate::content::{ContentSource, ContentStore, CreateContent, OrphanCleanupReport};
use crate::error::{NodeError, NodeResult};
use crate::federation::{
    FederationContext, FederationEvent, Handshake, HttpPeerClient, PeerClient, ProfileChanges,
    ProfilePushReport, ProfileService, Publisher, ReplicationQueue, Replicator,
    EVENT_CHANNEL_CAPACITY,
};
use crate::identity::{Address, NodeKeypair, TypedDocument, Verifier};
use crate::storage::Storage;
use crate::sync::{CycleReport, PeerRunResult, SyncEngine, SyncScheduler, SyncState, SyncStateStore};
use crate::types::{Connection, Content, ContentHash, Node, Publication};

/// Database file inside the data directory
pub const DATABASE_FILE_NAME: &str = "pubnode.redb";

/// A running federated publishing node
pub struct PubNode {
    data_dir: PathBuf,
    config: NodeConfig,
    ctx: FederationContext,
    handshake: Handshake,
    publisher: Publisher,
    profiles: ProfileService,
    sync: SyncEngine,
    scheduler: SyncScheduler,
    api: Arc<NodeApi>,
    replication_worker: JoinHandle<()>,
}

impl std::fmt::Debug for PubNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubNode")
            .field("data_dir", &self.data_dir)
            .field("address", &self.address())
            .finish()
    }
}

impl Drop for PubNode {
    fn drop(&mut self) {
        self.replication_worker.abort();
    }
}

impl PubNode {
    /// Create a new node in `data_dir` with a fresh identity.
    ///
    /// Writes `config` to the data directory and stores the self node row.
    /// Fails if the directory already holds a node.
    pub async fn init(
        data_dir: impl AsRef<Path>,
        config: NodeConfig,
        client: Arc<dyn PeerClient>,
    ) -> NodeResult<Self> {
        Self::init_with_keypair(data_dir, config, NodeKeypair::generate(), client).await
    }

    /// Like [`Self::init`] with a caller-provided identity
    pub async fn init_with_keypair(
        data_dir: impl AsRef<Path>,
        config: NodeConfig,
        keypair: NodeKeypair,
        client: Arc<dyn PeerClient>,
    ) -> NodeResult<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)?;

        let db_path = data_dir.join(DATABASE_FILE_NAME);
        if db_path.exists() {
            return Err(NodeError::Identity(format!(
                "{} already holds a node",
                data_dir.display()
            )));
        }
        let url = crate::types::documents::validate_url(&config.url)?;
        let storage = Storage::new(db_path)?;
        let mut me = Node::new_self(keypair.address(), url, config.title.clone());
        me.description = config.description.clone();

        storage.save_identity(&keypair)?;
        storage.set_self_node(&me)?;
        config.save(&data_dir)?;
        info!(address = %me.address, url = %me.url, "Initialized node");

        Self::assemble(data_dir, config, storage, keypair, client)
    }

    /// Create a new node that talks to peers over HTTP
    pub async fn init_http(data_dir: impl AsRef<Path>, config: NodeConfig) -> NodeResult<Self> {
        let client = Arc::new(HttpPeerClient::new(config.request_timeout())?);
        Self::init(data_dir, config, client).await
    }

    /// Open an existing node, reading `pubnode.toml` from `data_dir`
    pub async fn open(data_dir: impl AsRef<Path>, client: Arc<dyn PeerClient>) -> NodeResult<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        let config = NodeConfig::load(&data_dir)?;
        Self::open_with_config(data_dir, config, client).await
    }

    /// Open an existing node that talks to peers over HTTP
    pub async fn open_http(data_dir: impl AsRef<Path>) -> NodeResult<Self> {
        let config = NodeConfig::load(data_dir.as_ref())?;
        let client = Arc::new(HttpPeerClient::new(config.request_timeout())?);
        Self::open_with_config(data_dir, config, client).await
    }

    /// Open an existing node with an explicit configuration
    pub async fn open_with_config(
        data_dir: impl AsRef<Path>,
        config: NodeConfig,
        client: Arc<dyn PeerClient>,
    ) -> NodeResult<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        let db_path = data_dir.join(DATABASE_FILE_NAME);
        if !db_path.exists() {
            return Err(NodeError::Identity(format!(
                "no node in {}; run init first",
                data_dir.display()
            )));
        }

        let storage = Storage::new(db_path)?;
        let keypair = storage
            .load_identity()?
            .ok_or_else(|| NodeError::Identity("node has no identity; run init first".into()))?;
        info!(address = %keypair.address(), data_dir = %data_dir.display(), "Opened node");

        Self::assemble(data_dir, config, storage, keypair, client)
    }

    fn assemble(
        data_dir: PathBuf,
        config: NodeConfig,
        storage: Storage,
        keypair: NodeKeypair,
        client: Arc<dyn PeerClient>,
    ) -> NodeResult<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let content = ContentStore::new(storage.clone(), data_dir.clone(), config.max_content_bytes);

        let ctx = FederationContext {
            storage,
            content,
            keypair: Arc::new(keypair),
            client,
            verifier: Verifier::new(config.freshness_window_secs),
            request_timeout: config.request_timeout(),
            events,
        };

        let (queue, replication_worker) = ReplicationQueue::start(ctx.clone());
        let handshake = Handshake::new(ctx.clone());
        let publisher = Publisher::new(ctx.clone(), queue);
        let profiles = ProfileService::new(ctx.clone());
        let sync = SyncEngine::new(ctx.clone());
        let scheduler = SyncScheduler::new(
            ctx.clone(),
            sync.clone(),
            SyncStateStore::new(&data_dir),
            config.sync.clone(),
        );
        let replicator = Replicator::new(ctx.clone(), sync.clone(), profiles.clone());
        let api = Arc::new(NodeApi::new(
            ctx.clone(),
            handshake.clone(),
            replicator,
            profiles.clone(),
        ));

        Ok(Self {
            data_dir,
            config,
            ctx,
            handshake,
            publisher,
            profiles,
            sync,
            scheduler,
            api,
            replication_worker,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn address(&self) -> Address {
        self.ctx.address()
    }

    /// This node's current row
    pub fn self_node(&self) -> NodeResult<Node> {
        self.ctx.self_node()
    }

    pub fn storage(&self) -> &Storage {
        &self.ctx.storage
    }

    pub fn content(&self) -> &ContentStore {
        &self.ctx.content
    }

    /// The node's signing key, for owner-side signing
    pub fn keypair(&self) -> &NodeKeypair {
        &self.ctx.keypair
    }

    /// Inbound endpoint handlers
    pub fn api(&self) -> &Arc<NodeApi> {
        &self.api
    }

    pub fn sync_engine(&self) -> &SyncEngine {
        &self.sync
    }

    /// Subscribe to federation events
    pub fn subscribe(&self) -> broadcast::Receiver<FederationEvent> {
        self.ctx.events.subscribe()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Content & Publications
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn create_content(&self, request: CreateContent) -> NodeResult<Content> {
        self.ctx.content.create(request).await
    }

    pub fn create_draft(
        &self,
        content_hash: &ContentHash,
        description: Option<String>,
    ) -> NodeResult<Publication> {
        self.publisher.create_draft(content_hash, description)
    }

    pub fn signing_document(&self, publication_id: u64) -> NodeResult<TypedDocument> {
        self.publisher.signing_document(publication_id)
    }

    /// Attach an owner signature to a draft and fan it out
    pub fn sign_publication(&self, publication_id: u64, signature: &str) -> NodeResult<Publication> {
        self.publisher.sign(publication_id, signature)
    }

    /// Sign a draft with the node key and fan it out
    pub fn sign_with_node_key(&self, publication_id: u64) -> NodeResult<Publication> {
        self.publisher.sign_with_node_key(publication_id)
    }

    pub fn delete_publication(&self, publication_id: u64) -> NodeResult<Publication> {
        self.publisher.delete_publication(publication_id)
    }

    /// Store a markdown post and publish it in one step
    pub async fn publish_post(
        &self,
        body: impl Into<String>,
        description: Option<String>,
    ) -> NodeResult<Publication> {
        let content = self.create_content(CreateContent::post(body)).await?;
        let draft = self.create_draft(&content.content_hash, description)?;
        self.sign_with_node_key(draft.id)
    }

    /// Store a file and publish it in one step
    pub async fn publish_file(
        &self,
        source: impl ContentSource + 'static,
        description: impl Into<String>,
    ) -> NodeResult<Publication> {
        let content = self.create_content(CreateContent::file(source)).await?;
        let draft = self.create_draft(&content.content_hash, Some(description.into()))?;
        self.sign_with_node_key(draft.id)
    }

    /// Publications authored here, drafts included, oldest first
    pub fn own_publications(&self) -> NodeResult<Vec<Publication>> {
        self.ctx
            .storage
            .list_publications_by_author(&self.address(), 0, false)
    }

    /// Remove content no publication references any more
    pub fn cleanup_orphans(&self) -> NodeResult<OrphanCleanupReport> {
        let min_age = Duration::from_secs(self.config.sync.orphan_min_age_secs.max(0) as u64);
        self.ctx.content.cleanup_orphans(min_age)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Connections & Profile
    // ═══════════════════════════════════════════════════════════════════════

    /// Follow the node at `url`
    pub async fn follow(&self, url: &str) -> NodeResult<Connection> {
        self.handshake.initiate_follow(url).await
    }

    /// Stop following `followee`
    pub async fn unfollow(&self, followee: &Address) -> NodeResult<()> {
        self.handshake.initiate_unfollow(followee).await
    }

    pub fn followers(&self) -> NodeResult<Vec<Address>> {
        self.ctx.storage.list_followers(&self.address())
    }

    pub fn followees(&self) -> NodeResult<Vec<Address>> {
        self.ctx.storage.list_followees(&self.address())
    }

    /// Change the public profile and push it to followers
    ///
    /// The stored self node is authoritative; `pubnode.toml` is rewritten so
    /// the next `open` reports the same values.
    pub async fn update_profile(&self, changes: ProfileChanges) -> NodeResult<ProfilePushReport> {
        let report = self.profiles.update_profile(changes).await?;
        let me = self.self_node()?;
        let config = NodeConfig {
            url: me.url,
            title: me.title,
            description: me.description,
            ..self.config.clone()
        };
        config.save(&self.data_dir)?;
        Ok(report)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Sync
    // ═══════════════════════════════════════════════════════════════════════

    /// Run one sync cycle over every followed peer
    pub async fn sync_cycle(&self) -> NodeResult<CycleReport> {
        self.scheduler.run_cycle().await
    }

    /// Sync one followed peer now, ignoring cooldown
    pub async fn sync_peer(&self, peer: &Address) -> PeerRunResult {
        self.scheduler.run_peer(peer, true).await
    }

    /// Sync state of every followed peer
    pub fn sync_status(&self) -> NodeResult<Vec<(Address, SyncState)>> {
        self.scheduler.status()
    }

    pub fn scheduler(&self) -> &SyncScheduler {
        &self.scheduler
    }
}
