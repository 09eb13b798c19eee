//! pubnode Core Library
//!
//! A self-hosted publishing node that federates with other independently
//! operated nodes. Every cross-node action is authenticated purely by a
//! signature over a typed structured document; there is no shared identity
//! provider.
//!
//! ## Overview
//!
//! - **Identity**: node keypairs, addresses, typed-document digests, the
//!   signer [`Verifier`]
//! - **Content**: content-addressed POST and FILE storage ([`ContentStore`])
//! - **Handshake**: signed follow / unfollow kept symmetric on both nodes
//! - **Publishing**: drafts, owner signatures, fan-out to followers
//! - **Sync**: pull-based catch-up with per-peer watermarks and cooldown
//!
//! ## Quick Start
//!
//! ```ignore
//! use pubnode_core::{NodeConfig, PubNode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = NodeConfig::default();
//!     config.url = "https://blog.example".into();
//!
//!     let node = PubNode::init_http("~/.pubnode", config).await?;
//!     node.publish_post("# Hello", None).await?;
//!     node.follow("https://friend.example").await?;
//!
//!     let report = node.sync_cycle().await?;
//!     println!("synced {} publications", report.synced);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod content;
pub mod error;
pub mod federation;
pub mod identity;
pub mod node;
pub mod storage;
pub mod sync;
pub mod types;

// Re-exports
pub use api::{ApiError, ApiResponse, NodeApi};
pub use config::{NodeConfig, SyncConfig};
pub use content::{BytesSource, ContentSource, ContentStore, CreateContent, FileSource};
pub use error::{ErrorClass, NodeError, NodeResult};
pub use federation::{
    FederationEvent, HttpPeerClient, LoopbackNetwork, Origin, PeerClient, ProfileChanges,
};
pub use identity::{Address, NodeKeypair, RecoverableSignature, TypedDocument, Verifier};
pub use node::PubNode;
pub use storage::Storage;
pub use sync::{BacklogOutcome, BacklogReport, CycleReport, SyncItemOutcome, SyncState};
pub use types::*;
