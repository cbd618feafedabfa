//! Configuration for canvasd (spec §4.9)

use clap::Parser;
use std::path::PathBuf;

/// canvasd - Tile Canvas daemon
#[derive(Parser, Debug, Clone)]
#[command(name = "canvasd")]
#[command(about = "Tile canvas event log and discovery daemon")]
pub struct Config {
    /// Root directory for object store, tile manifests, and snapshots
    #[arg(long, env = "CANVASD_ROOT_DIR", default_value = "./data/canvasd")]
    pub root_dir: PathBuf,

    /// Flush a tile's open segment buffer once its canonical byte size
    /// reaches this many bytes
    #[arg(long, env = "CANVASD_FLUSH_BYTES", default_value = "262144")]
    pub flush_bytes: usize,

    /// Flush a tile's open segment buffer once this many milliseconds have
    /// elapsed since its first buffered event
    #[arg(long, env = "CANVASD_FLUSH_MS", default_value = "5000")]
    pub flush_ms: u64,

    /// Path to persist the discovery graph snapshot to (disabled if unset)
    #[arg(long, env = "CANVASD_PERSIST_PATH")]
    pub persist_path: Option<PathBuf>,

    /// Drop peer records older than this many milliseconds
    #[arg(long, env = "CANVASD_PEER_TTL_MS", default_value = "120000")]
    pub peer_ttl_ms: i64,

    /// Drop tile tip records older than this many milliseconds
    #[arg(long, env = "CANVASD_TILE_TTL_MS", default_value = "300000")]
    pub tile_ttl_ms: i64,

    /// Maximum tracked peers before oldest-10% eviction
    #[arg(long, env = "CANVASD_MAX_PEERS", default_value = "512")]
    pub max_peers: usize,

    /// Maximum tracked tiles before oldest-10% eviction
    #[arg(long, env = "CANVASD_MAX_TILES", default_value = "4096")]
    pub max_tiles: usize,

    /// Maximum peers retained per tile before top-N-by-score eviction
    #[arg(long, env = "CANVASD_MAX_PEERS_PER_TILE", default_value = "32")]
    pub max_peers_per_tile: usize,

    /// This node's peer id, used to drop self-originated tip adverts
    #[arg(long, env = "CANVASD_LOCAL_PEER_ID")]
    pub local_peer_id: String,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Log format (json or pretty)
    #[arg(long, default_value = "pretty")]
    pub log_format: String,
}

impl Config {
    /// Turn structurally-legal-but-semantically-wrong configuration into an
    /// error before the daemon starts.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.flush_bytes == 0 {
            anyhow::bail!("flush-bytes must be greater than zero");
        }
        if self.flush_ms == 0 {
            anyhow::bail!("flush-ms must be greater than zero");
        }
        if self.local_peer_id.trim().is_empty() {
            anyhow::bail!("local-peer-id must not be empty");
        }
        if self.max_peers == 0 || self.max_tiles == 0 || self.max_peers_per_tile == 0 {
            anyhow::bail!("max-peers, max-tiles, and max-peers-per-tile must all be greater than zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Config {
        Config {
            root_dir: PathBuf::from("./data/canvasd"),
            flush_bytes: 262_144,
            flush_ms: 5000,
            persist_path: None,
            peer_ttl_ms: 120_000,
            tile_ttl_ms: 300_000,
            max_peers: 512,
            max_tiles: 4096,
            max_peers_per_tile: 32,
            local_peer_id: "node-1".to_string(),
            verbose: false,
            log_format: "pretty".to_string(),
        }
    }

    #[test]
    fn accepts_well_formed_config() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn rejects_zero_flush_bytes() {
        let mut config = base();
        config.flush_bytes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_empty_local_peer_id() {
        let mut config = base();
        config.local_peer_id = "  ".to_string();
        assert!(config.validate().is_err());
    }
}
