//! Command-line configuration.

use clap::Parser;
use replica_core::{PeerId, PeerIdError, SyncConfig};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Parser, Debug, Clone)]
#[command(name = "replica-daemon")]
#[command(about = "Headless peer for a shared replicated workspace")]
pub struct Args {
    /// Directory holding the local cache
    #[arg(short, long)]
    pub cache: PathBuf,

    /// Address to accept peers on, e.g. 0.0.0.0:8080
    #[arg(short, long)]
    pub listen: Option<String>,

    /// Peer URL to dial (repeatable), e.g. ws://10.0.0.2:8080
    #[arg(long)]
    pub connect: Vec<String>,

    /// Peer ID (generated if not provided)
    #[arg(long)]
    pub peer_id: Option<String>,

    /// Name shown on outgoing chat messages
    #[arg(long, default_value = "anonymous")]
    pub name: String,

    /// Quiet period before an edit is broadcast
    #[arg(long, default_value_t = 500)]
    pub debounce_ms: u64,

    /// Wait before sending a new peer the tree
    #[arg(long, default_value_t = 1000)]
    pub snapshot_delay_ms: u64,

    /// Enable verbose logging
    #[arg(long)]
    pub verbose: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("--debounce-ms must be greater than zero")]
    ZeroDebounce,

    #[error("invalid --peer-id: {0}")]
    PeerId(#[from] PeerIdError),

    #[error("--name must not be blank")]
    BlankName,

    #[error("invalid --connect URL {0:?}: expected ws:// or wss://")]
    ConnectUrl(String),
}

/// Validated settings for one peer.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub peer_id: PeerId,
    pub author: String,
    pub cache_dir: PathBuf,
    pub listen: Option<String>,
    pub connect: Vec<String>,
    pub sync: SyncConfig,
}

impl SessionConfig {
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        if args.debounce_ms == 0 {
            return Err(ConfigError::ZeroDebounce);
        }
        let author = args.name.trim();
        if author.is_empty() {
            return Err(ConfigError::BlankName);
        }
        if let Some(url) = args
            .connect
            .iter()
            .find(|url| !url.starts_with("ws://") && !url.starts_with("wss://"))
        {
            return Err(ConfigError::ConnectUrl(url.clone()));
        }

        let peer_id = match &args.peer_id {
            Some(id) => id.parse()?,
            None => PeerId::generate(),
        };

        Ok(Self {
            peer_id,
            author: author.to_string(),
            cache_dir: args.cache.clone(),
            listen: args.listen.clone(),
            connect: args.connect.clone(),
            sync: SyncConfig {
                debounce_window: Duration::from_millis(args.debounce_ms),
                snapshot_delay: Duration::from_millis(args.snapshot_delay_ms),
            },
        })
    }
}
