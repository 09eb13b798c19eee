//! pubnode CLI
//!
//! Thin wrapper around pubnode-core for operating a node from the shell.
//!
//! ## Usage
//!
//! ```bash
//! # Create a node
//! pubnode init --url https://blog.example --title "My Blog"
//!
//! # Show node information
//! pubnode info
//!
//! # Publish a markdown post or a file
//! pubnode post "# Hello"
//! pubnode post --file photo.jpg --description "Sunset"
//!
//! # Follow another node and pull its publications
//! pubnode follow https://friend.example
//! pubnode sync run
//!
//! # Inspect per-peer sync state
//! pubnode sync status
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use pubnode_core::federation::FederationEvent;
use pubnode_core::sync::PeerRunStatus;
use pubnode_core::{
    Address, CycleReport, FileSource, NodeConfig, ProfileChanges, PubNode, Publication,
};
use tokio::sync::broadcast;

/// How long `post` waits for followers to acknowledge a push
const FANOUT_WAIT: Duration = Duration::from_secs(60);

/// pubnode - federated publishing node
#[derive(Parser)]
#[command(name = "pubnode")]
#[command(version)]
#[command(about = "pubnode - federated publishing node")]
#[command(
    long_about = "Publish posts and files from your own node and follow other nodes. Every cross-node action is authenticated by a signature over a typed document."
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Data directory (default: ~/.pubnode)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new node identity in the data directory
    Init {
        /// Public URL other nodes reach this node at
        #[arg(short, long)]
        url: String,

        /// Node title
        #[arg(short, long)]
        title: Option<String>,

        /// Node description
        #[arg(long)]
        description: Option<String>,
    },

    /// Show node information
    Info,

    /// Publish a markdown post or a file
    Post {
        /// Markdown body
        #[arg(required_unless_present = "file", conflicts_with = "file")]
        body: Option<String>,

        /// Publish a file instead of a post
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Description (required for files)
        #[arg(short, long)]
        description: Option<String>,

        /// Store a draft without signing it
        #[arg(long)]
        draft: bool,
    },

    /// Publication management
    Publications {
        #[command(subcommand)]
        action: PublicationAction,
    },

    /// Follow the node at URL
    Follow {
        url: String,
    },

    /// Stop following a node
    Unfollow {
        /// Address of the followed node (0x...)
        address: String,
    },

    /// List followers and followees
    Connections,

    /// Pull-based synchronization
    Sync {
        #[command(subcommand)]
        action: SyncAction,
    },

    /// Profile management
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },

    /// Remove stored content no publication references
    Cleanup,
}

#[derive(Subcommand)]
enum PublicationAction {
    /// List publications authored here
    List,
    /// Print the typed document to sign for a draft
    Document {
        id: u64,
    },
    /// Sign a draft (with the node key unless a signature is given)
    Sign {
        id: u64,

        /// Externally produced signature (0x...)
        #[arg(short, long)]
        signature: Option<String>,
    },
    /// Delete a publication
    Delete {
        id: u64,
    },
}

#[derive(Subcommand)]
enum SyncAction {
    /// Run one sync cycle over all followed nodes
    Run {
        /// Only sync this peer, ignoring cooldown
        #[arg(short, long)]
        peer: Option<String>,
    },
    /// Keep syncing on an interval
    Watch {
        /// Seconds between cycles
        #[arg(short, long, default_value = "300")]
        interval: u64,
    },
    /// Show per-peer sync state
    Status,
}

#[derive(Subcommand)]
enum ProfileAction {
    /// Show this node's profile
    Show,
    /// Change profile fields and push them to followers
    Set {
        #[arg(short, long)]
        url: Option<String>,

        #[arg(short, long)]
        title: Option<String>,

        #[arg(short, long)]
        description: Option<String>,
    },
}

fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Get the default data directory (~/.pubnode)
fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".pubnode")
}

fn parse_address(s: &str) -> Result<Address> {
    Address::parse(s).map_err(|e| anyhow::anyhow!("Invalid address '{}': {}", s, e))
}

fn format_timestamp(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}

fn print_publication(publication: &Publication) {
    let status = if publication.is_signed() { "signed" } else { "draft" };
    println!(
        "  {} {} [{}] {}",
        publication.id,
        publication.content_hash,
        status,
        format_timestamp(publication.created_at)
    );
    if let Some(description) = &publication.description {
        println!("      {}", description);
    }
}

fn print_cycle(report: &CycleReport) {
    println!("Sync cycle:");
    println!("  Peers: {}", report.peers);
    println!("  Succeeded: {}", report.succeeded_peers);
    println!("  Failed: {}", report.failed_peers);
    println!("  In cooldown: {}", report.cooldown_peers);
    println!(
        "  Publications: {} synced, {} skipped, {} failed",
        report.synced, report.skipped, report.failed
    );
    for error in &report.errors {
        println!(
            "  ! {} {}: {} ({})",
            error.peer,
            error.error.content_hash.as_deref().unwrap_or("-"),
            error.error.message,
            error.error.code
        );
    }
    if report.truncated_errors > 0 {
        println!("  ... {} more errors", report.truncated_errors);
    }
}

/// Wait until the replication worker reports on one publication
async fn wait_for_fanout(events: &mut broadcast::Receiver<FederationEvent>) {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(FederationEvent::ReplicationCompleted {
                    delivered, failed, ..
                }) => {
                    println!("  Pushed to {} followers ({} failed)", delivered, failed);
                    return;
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    };
    if tokio::time::timeout(FANOUT_WAIT, wait).await.is_err() {
        println!("  Push still running; followers will catch up on their next sync");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let data_dir = cli.data_dir.unwrap_or_else(default_data_dir);

    if let Commands::Init {
        url,
        title,
        description,
    } = cli.command
    {
        let mut config = NodeConfig::default();
        config.url = url;
        if let Some(title) = title {
            config.title = title;
        }
        if let Some(description) = description {
            config.description = description;
        }
        let node = PubNode::init_http(&data_dir, config).await?;
        println!("Initialized node");
        println!("  Address: {}", node.address());
        println!("  URL: {}", node.config().url);
        println!("  Data directory: {}", node.data_dir().display());
        return Ok(());
    }

    let node = PubNode::open_http(&data_dir).await?;

    match cli.command {
        Commands::Init { .. } => unreachable!("handled above"),

        Commands::Info => {
            let me = node.self_node()?;
            println!("pubnode v{}", env!("CARGO_PKG_VERSION"));
            println!();
            println!("Node:");
            println!("  Address: {}", me.address);
            println!("  URL: {}", me.url);
            println!("  Title: {}", me.title);
            if !me.description.is_empty() {
                println!("  Description: {}", me.description);
            }
            println!("  Profile version: {}", me.profile_version);
            println!();
            println!("Data directory: {}", node.data_dir().display());
            println!("Publications: {}", node.own_publications()?.len());
            println!("Followers: {}", node.followers()?.len());
            println!("Following: {}", node.followees()?.len());
        }

        Commands::Post {
            body,
            file,
            description,
            draft,
        } => {
            let content = match (body, file) {
                (_, Some(path)) => {
                    let source = FileSource::new(&path)?;
                    node.create_content(pubnode_core::CreateContent::file(source))
                        .await?
                }
                (Some(body), None) => {
                    node.create_content(pubnode_core::CreateContent::post(body))
                        .await?
                }
                (None, None) => anyhow::bail!("Provide a post body or --file"),
            };
            let publication = node.create_draft(&content.content_hash, description)?;

            if draft {
                println!("Stored draft");
                print_publication(&publication);
                return Ok(());
            }

            let mut events = node.subscribe();
            let publication = node.sign_with_node_key(publication.id)?;
            println!("Published");
            print_publication(&publication);
            if !node.followers()?.is_empty() {
                wait_for_fanout(&mut events).await;
            }
        }

        Commands::Publications { action } => match action {
            PublicationAction::List => {
                let publications = node.own_publications()?;
                if publications.is_empty() {
                    println!("No publications.");
                } else {
                    println!("Publications ({}):", publications.len());
                    println!();
                    for publication in &publications {
                        print_publication(publication);
                    }
                }
            }

            PublicationAction::Document { id } => {
                let document = node.signing_document(id)?;
                println!("{}", serde_json::to_string_pretty(&document)?);
            }

            PublicationAction::Sign { id, signature } => {
                let mut events = node.subscribe();
                let publication = match signature {
                    Some(signature) => node.sign_publication(id, &signature)?,
                    None => node.sign_with_node_key(id)?,
                };
                println!("Signed publication {}", publication.id);
                print_publication(&publication);
                if !node.followers()?.is_empty() {
                    wait_for_fanout(&mut events).await;
                }
            }

            PublicationAction::Delete { id } => {
                let publication = node.delete_publication(id)?;
                println!("Deleted publication {}", publication.id);
            }
        },

        Commands::Follow { url } => {
            let connection = node.follow(&url).await?;
            println!("Now following {}", connection.followee_address);
        }

        Commands::Unfollow { address } => {
            let address = parse_address(&address)?;
            node.unfollow(&address).await?;
            println!("Unfollowed {}", address);
        }

        Commands::Connections => {
            let describe = |address: &Address| -> String {
                match node.storage().load_node(address) {
                    Ok(Some(peer)) => format!("{} {} ({})", address, peer.title, peer.url),
                    _ => address.to_string(),
                }
            };

            let followers = node.followers()?;
            println!("Followers ({}):", followers.len());
            for address in &followers {
                println!("  {}", describe(address));
            }
            println!();
            let followees = node.followees()?;
            println!("Following ({}):", followees.len());
            for address in &followees {
                println!("  {}", describe(address));
            }
        }

        Commands::Sync { action } => match action {
            SyncAction::Run { peer: None } => {
                let report = node.sync_cycle().await?;
                print_cycle(&report);
            }

            SyncAction::Run { peer: Some(peer) } => {
                let address = parse_address(&peer)?;
                let result = node.sync_peer(&address).await;
                match result.status {
                    PeerRunStatus::Ran(report) => {
                        println!("Synced {}: {:?}", address, report.outcome);
                        println!(
                            "  Publications: {} synced, {} skipped, {} failed",
                            report.synced, report.skipped, report.failed
                        );
                        for error in report.page_error.iter().chain(report.errors.iter()) {
                            println!("  ! {}: {}", error.code, error.message);
                        }
                    }
                    PeerRunStatus::Cooldown => println!("Peer {} is in cooldown", address),
                    PeerRunStatus::Aborted(reason) => {
                        anyhow::bail!("Sync of {} aborted: {}", address, reason)
                    }
                }
            }

            SyncAction::Watch { interval } => {
                println!("Syncing every {}s (Ctrl+C to stop)", interval);
                tokio::select! {
                    _ = node.scheduler().run_forever(Duration::from_secs(interval)) => {}
                    _ = tokio::signal::ctrl_c() => println!("Stopped"),
                }
            }

            SyncAction::Status => {
                let status = node.sync_status()?;
                if status.is_empty() {
                    println!("Not following any nodes.");
                } else {
                    println!("Sync status ({}):", status.len());
                    println!();
                    for (peer, state) in status {
                        println!("  {}", peer);
                        println!(
                            "    Caught up to: {}",
                            state
                                .last_success_timestamp
                                .map(format_timestamp)
                                .unwrap_or_else(|| "never".into())
                        );
                        println!("    Consecutive failures: {}", state.consecutive_failure_count);
                        if let Some(error) = state.last_error {
                            println!("    Last error: {}", error);
                        }
                        println!(
                            "    Totals: {} runs, {} synced, {} skipped, {} failed",
                            state.total_runs,
                            state.total_synced,
                            state.total_skipped,
                            state.total_failed
                        );
                    }
                }
            }
        },

        Commands::Profile { action } => match action {
            ProfileAction::Show => {
                let me = node.self_node()?;
                println!("Profile:");
                println!("  Address: {}", me.address);
                println!("  URL: {}", me.url);
                println!("  Title: {}", me.title);
                println!("  Description: {}", me.description);
                println!("  Version: {}", me.profile_version);
            }

            ProfileAction::Set {
                url,
                title,
                description,
            } => {
                if url.is_none() && title.is_none() && description.is_none() {
                    anyhow::bail!("Nothing to change; pass --url, --title or --description");
                }
                let report = node
                    .update_profile(ProfileChanges {
                        url,
                        title,
                        description,
                    })
                    .await?;
                println!("Profile updated to version {}", report.profile_version);
                println!(
                    "  Pushed to {} followers ({} failed)",
                    report.delivered, report.failed
                );
            }
        },

        Commands::Cleanup => {
            let report = node.cleanup_orphans()?;
            println!("Cleanup:");
            println!("  Scanned: {}", report.scanned);
            println!("  Deleted: {}", report.deleted);
            println!("  Freed: {} bytes", report.freed_bytes);
            for error in &report.errors {
                println!("  ! {}: {}", error.content_hash, error.message);
            }
        }
    }

    Ok(())
}
