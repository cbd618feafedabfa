//! Daemon shell (spec §4.9): owns a Tile Store and a Discovery Graph, runs
//! their periodic maintenance tasks, and tears them down in order on
//! shutdown.

use crate::config::Config;
use std::sync::Arc;
use std::time::Duration;
use tilecanvas_discovery::{DiscoveryConfig, DiscoveryGraph};
use tilecanvas_store::{TileStore, TileStoreConfig};
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info};

pub struct Daemon {
    store: Arc<TileStore>,
    discovery: Arc<DiscoveryGraph>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Daemon {
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        let store = Arc::new(TileStore::new(TileStoreConfig {
            root_dir: config.root_dir.clone(),
            flush_bytes: config.flush_bytes,
            flush_ms: config.flush_ms,
        }));

        let discovery = Arc::new(DiscoveryGraph::new(DiscoveryConfig {
            persist_path: config.persist_path.clone(),
            peer_ttl_ms: config.peer_ttl_ms,
            tile_ttl_ms: config.tile_ttl_ms,
            max_peers: config.max_peers,
            max_tiles: config.max_tiles,
            max_peers_per_tile: config.max_peers_per_tile,
        }));
        discovery.load().await?;

        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Daemon { store, discovery, shutdown_tx })
    }

    pub fn store(&self) -> Arc<TileStore> {
        self.store.clone()
    }

    pub fn discovery(&self) -> Arc<DiscoveryGraph> {
        self.discovery.clone()
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// A cloneable handle that can trigger shutdown from outside `run()`,
    /// e.g. a signal handler spawned as its own task.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Spawn the background tasks and block until shutdown is signaled
    /// (via `ctrl_c` in `main`, or an explicit `shutdown()` call).
    pub async fn run(&self) -> anyhow::Result<()> {
        info!("starting canvasd");

        let prune_handle = self.spawn_prune_task();
        let persist_handle = self.spawn_persist_task();
        let flush_handle = self.spawn_flush_task();

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        shutdown_rx.recv().await.ok();
        info!("shutdown signal received");

        prune_handle.abort();
        persist_handle.abort();
        flush_handle.abort();

        self.store.close().await?;
        self.discovery.save().await?;
        self.discovery.stop();

        info!("canvasd stopped");
        Ok(())
    }

    fn spawn_prune_task(&self) -> tokio::task::JoinHandle<()> {
        let discovery = self.discovery.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(2));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        discovery.prune();
                        debug!("discovery prune tick");
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        })
    }

    fn spawn_persist_task(&self) -> tokio::task::JoinHandle<()> {
        let discovery = self.discovery.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(3));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = discovery.save().await {
                            tracing::warn!(%err, "discovery persist tick failed");
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        })
    }

    fn spawn_flush_task(&self) -> tokio::task::JoinHandle<()> {
        let store = self.store.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(1000));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = store.flush_idle().await {
                            tracing::warn!(%err, "tile store idle-flush sweep failed");
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(root: &std::path::Path) -> Config {
        Config {
            root_dir: root.to_path_buf(),
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

    #[tokio::test]
    async fn daemon_starts_and_shuts_down_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let daemon = Daemon::new(&config).await.unwrap();

        let shutdown_trigger = daemon.shutdown_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = shutdown_trigger.send(());
        });

        daemon.run().await.unwrap();
    }
}
