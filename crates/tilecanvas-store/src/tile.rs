//! Tile Store (spec §4.5): per-(space, tile) segment log, manifest, tip
//! index, and advisory snapshots, backed by the Object Store (§4.4).

use crate::error::{Result, StoreError};
use crate::objects::{write_atomic, ObjectStore};
use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tilecanvas_core::canonical::canonical_bytes;
use tilecanvas_core::event::validate_batch;
use tilecanvas_core::hashing::{hash_json, GENESIS};
use tilecanvas_core::normalize::normalize_event;
use tilecanvas_core::{HashRef, ManifestEntry, Segment, SegmentBody, TileTipIndex, WorldEvent};
use tokio::fs;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

/// Tile Store tuning, mirroring the `{rootDir, flushBytes, flushMs}`
/// configuration contract (spec §6).
#[derive(Clone, Debug)]
pub struct TileStoreConfig {
    pub root_dir: PathBuf,
    pub flush_bytes: usize,
    pub flush_ms: u64,
}

impl Default for TileStoreConfig {
    fn default() -> Self {
        TileStoreConfig { root_dir: PathBuf::from("."), flush_bytes: 262_144, flush_ms: 5_000 }
    }
}

/// Result of a successful append.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppendOutcome {
    pub ok: bool,
    pub appended: usize,
}

struct TileBuffer {
    events: Vec<WorldEvent>,
    first_buffered_at: Option<Instant>,
}

impl TileBuffer {
    fn new() -> Self {
        TileBuffer { events: Vec::new(), first_buffered_at: None }
    }
}

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

/// The Tile Store: owns the Object Store and the per-tile append pipeline.
pub struct TileStore {
    root: PathBuf,
    objects: ObjectStore,
    config: TileStoreConfig,
    tiles: SyncMutex<HashMap<(String, String), Arc<AsyncMutex<TileBuffer>>>>,
}

impl TileStore {
    pub fn new(config: TileStoreConfig) -> Self {
        let objects = ObjectStore::new(&config.root_dir);
        TileStore { root: config.root_dir.clone(), objects, config, tiles: SyncMutex::new(HashMap::new()) }
    }

    fn tile_dir(&self, space: &str, tile: &str) -> PathBuf {
        self.root.join("spaces").join(space).join("tiles").join(tile)
    }

    fn index_path(&self, space: &str, tile: &str) -> PathBuf {
        self.tile_dir(space, tile).join("index.json")
    }

    fn manifest_path(&self, space: &str, tile: &str) -> PathBuf {
        self.tile_dir(space, tile).join("manifest.json")
    }

    fn snapshot_path(&self, space: &str, tile: &str, event_id: &str) -> PathBuf {
        self.tile_dir(space, tile).join("snapshots").join(event_id)
    }

    fn buffer_handle(&self, space: &str, tile: &str) -> Arc<AsyncMutex<TileBuffer>> {
        let key = (space.to_string(), tile.to_string());
        let mut tiles = self.tiles.lock();
        tiles.entry(key).or_insert_with(|| Arc::new(AsyncMutex::new(TileBuffer::new()))).clone()
    }

    async fn read_index(&self, space: &str, tile: &str) -> Result<TileTipIndex> {
        let path = self.index_path(space, tile);
        match fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Ok(TileTipIndex { tip: GENESIS.to_string(), snapshot: None, updated_at_ms: now_ms() })
            }
            Err(err) => Err(StoreError::IoFailure(err)),
        }
    }

    async fn write_index(&self, space: &str, tile: &str, index: &TileTipIndex) -> Result<()> {
        let dir = self.tile_dir(space, tile);
        fs::create_dir_all(&dir).await?;
        let path = self.index_path(space, tile);
        let bytes = canonical_bytes(index)?;
        let tmp = dir.join(format!(".tmp-index-{}", std::process::id()));
        write_atomic(&tmp, &path, &bytes).await?;
        Ok(())
    }

    async fn read_manifest(&self, space: &str, tile: &str) -> Result<Vec<ManifestEntry>> {
        let path = self.manifest_path(space, tile);
        match fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(StoreError::IoFailure(err)),
        }
    }

    async fn write_manifest(&self, space: &str, tile: &str, manifest: &[ManifestEntry]) -> Result<()> {
        let dir = self.tile_dir(space, tile);
        fs::create_dir_all(&dir).await?;
        let path = self.manifest_path(space, tile);
        let bytes = canonical_bytes(manifest)?;
        let tmp = dir.join(format!(".tmp-manifest-{}", std::process::id()));
        write_atomic(&tmp, &path, &bytes).await?;
        Ok(())
    }

    /// Validate and append a batch of events to `(space, tile)`. All-or-nothing.
    pub async fn append_tile_events(
        &self,
        space: &str,
        tile: &str,
        events: Vec<WorldEvent>,
    ) -> Result<AppendOutcome> {
        validate_batch(&events)?;
        for event in &events {
            if event.space_id != space || event.tile != tile {
                return Err(StoreError::Core(tilecanvas_core::Error::InvalidEvent {
                    path: "events[].space_id/tile".to_string(),
                    reason: "event does not belong to the targeted (space, tile)".to_string(),
                }));
            }
        }
        let normalized: Vec<WorldEvent> = events.into_iter().map(normalize_event).collect();
        let appended = normalized.len();

        let handle = self.buffer_handle(space, tile);
        let mut buffer = handle.lock().await;
        if buffer.first_buffered_at.is_none() && !normalized.is_empty() {
            buffer.first_buffered_at = Some(Instant::now());
        }
        buffer.events.extend(normalized);

        if self.should_flush(&buffer)? {
            self.flush_locked(space, tile, &mut buffer).await?;
        }
        Ok(AppendOutcome { ok: true, appended })
    }

    fn should_flush(&self, buffer: &TileBuffer) -> Result<bool> {
        if buffer.events.is_empty() {
            return Ok(false);
        }
        let body = SegmentBody { events: buffer.events.clone() };
        let size = canonical_bytes(&body)?.len();
        if size >= self.config.flush_bytes {
            return Ok(true);
        }
        if let Some(started) = buffer.first_buffered_at {
            if started.elapsed() >= Duration::from_millis(self.config.flush_ms) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Called periodically by the daemon's idle-flush sweep (spec §4.9): flush
    /// any tile whose buffer has been open longer than `flush_ms`, even with
    /// no new incoming events.
    pub async fn flush_idle(&self) -> Result<()> {
        let handles: Vec<((String, String), Arc<AsyncMutex<TileBuffer>>)> = {
            let tiles = self.tiles.lock();
            tiles.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        for ((space, tile), handle) in handles {
            let mut buffer = handle.lock().await;
            if self.should_flush(&buffer)? {
                self.flush_locked(&space, &tile, &mut buffer).await?;
            }
        }
        Ok(())
    }

    async fn flush_locked(&self, space: &str, tile: &str, buffer: &mut TileBuffer) -> Result<()> {
        if buffer.events.is_empty() {
            return Ok(());
        }
        let events = std::mem::take(&mut buffer.events);
        buffer.first_buffered_at = None;

        let first_event_id = events.first().expect("non-empty").event_id.clone();
        let last_event_id = events.last().expect("non-empty").event_id.clone();
        let event_count = events.len();

        let body = SegmentBody { events };
        let bytes = canonical_bytes(&body)?;
        let segment_hash = self.objects.put(&bytes).await?;

        let mut manifest = self.read_manifest(space, tile).await?;
        manifest.push(ManifestEntry {
            segment_hash: segment_hash.clone(),
            first_event_id,
            last_event_id,
            event_count,
        });
        self.write_manifest(space, tile, &manifest).await?;

        let index = self.read_index(space, tile).await?;
        let new_index = TileTipIndex {
            tip: segment_hash.as_str().to_string(),
            snapshot: index.snapshot,
            updated_at_ms: now_ms(),
        };
        self.write_index(space, tile, &new_index).await?;
        debug!(space, tile, %segment_hash, "flushed segment");
        Ok(())
    }

    /// Current tip index, or `None` if the tile has never been written to.
    pub async fn get_tile_tip(&self, space: &str, tile: &str) -> Result<Option<TileTipIndex>> {
        let index = self.read_index(space, tile).await?;
        if index.tip == GENESIS {
            return Ok(None);
        }
        Ok(Some(index))
    }

    /// Walk the tip-to-root segment chain, stopping at `max` segments or at
    /// the (exclusive) segment containing `after_event`.
    pub async fn get_segments_since(
        &self,
        space: &str,
        tile: &str,
        after_event: Option<&str>,
        max: usize,
    ) -> Result<Vec<Segment>> {
        let manifest = self.read_manifest(space, tile).await?;
        let mut result = Vec::new();
        for (idx, entry) in manifest.iter().enumerate().rev() {
            if result.len() >= max {
                break;
            }
            let bytes = match self.objects.get(&entry.segment_hash).await {
                Ok(bytes) => bytes,
                Err(StoreError::NotFound(_)) | Err(StoreError::IntegrityError { .. }) => {
                    warn!(space, tile, segment_hash = %entry.segment_hash, "skipping unreadable segment");
                    continue;
                }
                Err(other) => return Err(other),
            };
            let body: SegmentBody = serde_json::from_slice(&bytes)?;
            let contains_boundary = after_event
                .map(|needle| body.events.iter().any(|e| e.event_id == needle))
                .unwrap_or(false);
            if contains_boundary {
                break;
            }
            let prev = if idx == 0 { None } else { Some(manifest[idx - 1].segment_hash.clone()) };
            let created_at_ms = self.segment_mtime_ms(&entry.segment_hash).await.unwrap_or(0);
            result.push(Segment { hash: entry.segment_hash.clone(), prev, events: body.events, created_at_ms });
        }
        Ok(result)
    }

    async fn segment_mtime_ms(&self, hash_ref: &HashRef) -> Option<i64> {
        let path = self.objects.path_for(hash_ref);
        let meta = fs::metadata(path).await.ok()?;
        let modified = meta.modified().ok()?;
        let ms = modified.duration_since(UNIX_EPOCH).ok()?.as_millis();
        Some(ms as i64)
    }

    /// Read one object's bytes through the underlying Object Store.
    pub async fn get_object(&self, hash_ref: &HashRef) -> Result<Vec<u8>> {
        self.objects.get(hash_ref).await
    }

    /// Materialize the tile's current state and store it as an advisory
    /// snapshot at the current tip, updating the tip index's `snapshot` field.
    pub async fn produce_snapshot(&self, space: &str, tile: &str) -> Result<Option<HashRef>> {
        let index = self.read_index(space, tile).await?;
        if index.tip == GENESIS {
            return Ok(None);
        }
        let segments = self.get_segments_since(space, tile, None, usize::MAX).await?;
        let mut ordered = segments;
        ordered.reverse();
        let state = tilecanvas_fold::fold_segments(tile, None, &ordered);
        let at_event = ordered
            .last()
            .and_then(|s| s.events.last())
            .map(|e| e.event_id.clone())
            .unwrap_or_default();
        let snapshot = tilecanvas_core::Snapshot { at_event: at_event.clone(), state };
        let bytes = canonical_bytes(&snapshot)?;
        let hash_ref = hash_json(&snapshot)?;
        let path = self.snapshot_path(space, tile, &at_event);
        let parent = path.parent().expect("snapshot path has a parent");
        fs::create_dir_all(parent).await?;
        let tmp = parent.join(format!(".tmp-snapshot-{}", std::process::id()));
        write_atomic(&tmp, &path, &bytes).await?;

        let new_index =
            TileTipIndex { tip: index.tip, snapshot: Some(hash_ref.clone()), updated_at_ms: now_ms() };
        self.write_index(space, tile, &new_index).await?;
        Ok(Some(hash_ref))
    }

    /// Flush every open buffer. Must complete before the store is dropped.
    pub async fn close(&self) -> Result<()> {
        let handles: Vec<((String, String), Arc<AsyncMutex<TileBuffer>>)> = {
            let tiles = self.tiles.lock();
            tiles.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        for ((space, tile), handle) in handles {
            let mut buffer = handle.lock().await;
            self.flush_locked(&space, &tile, &mut buffer).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilecanvas_core::{Authority, Boundary, Layer, Operation, Policy, Realm, Scope};

    fn scope() -> Scope {
        Scope { realm: Realm::Team, authority: Authority::Source, boundary: Boundary::Interior, policy: Policy::Public }
    }

    fn create_event(id: &str, ts: i64, space: &str, tile: &str, node: &str) -> WorldEvent {
        WorldEvent {
            event_id: id.into(),
            timestamp: ts,
            space_id: space.into(),
            tile: tile.into(),
            layer_id: Layer::Layout,
            actor_id: "actor-1".into(),
            scope: scope(),
            preserves_invariants: vec![],
            previous_events: vec![],
            operation: Operation::CreateNode {
                node_id: node.into(),
                kind: None,
                transform: serde_json::Value::Null,
                properties: serde_json::Map::new(),
            },
        }
    }

    fn store(root: &Path) -> TileStore {
        TileStore::new(TileStoreConfig { root_dir: root.to_path_buf(), flush_bytes: 1, flush_ms: 5_000 })
    }

    #[tokio::test]
    async fn append_flushes_immediately_under_tiny_flush_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let outcome = store
            .append_tile_events("demo", "z0/x0/y0", vec![create_event("01A", 1000, "demo", "z0/x0/y0", "n1")])
            .await
            .unwrap();
        assert_eq!(outcome.appended, 1);
        let tip = store.get_tile_tip("demo", "z0/x0/y0").await.unwrap();
        assert!(tip.is_some());
    }

    #[tokio::test]
    async fn rejects_events_for_the_wrong_tile() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let err = store
            .append_tile_events("demo", "z0/x0/y0", vec![create_event("01A", 1000, "demo", "other-tile", "n1")])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Core(_)));
    }

    #[tokio::test]
    async fn segments_since_walks_tip_to_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store
            .append_tile_events("demo", "z0/x0/y0", vec![create_event("01A", 1000, "demo", "z0/x0/y0", "n1")])
            .await
            .unwrap();
        store
            .append_tile_events("demo", "z0/x0/y0", vec![create_event("01B", 2000, "demo", "z0/x0/y0", "n2")])
            .await
            .unwrap();
        let segments = store.get_segments_since("demo", "z0/x0/y0", None, 64).await.unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].events[0].event_id, "01B");
        assert_eq!(segments[1].events[0].event_id, "01A");
        assert!(segments[0].prev.is_some());
        assert!(segments[1].prev.is_none());
    }

    #[tokio::test]
    async fn snapshot_round_trips_through_the_fold() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store
            .append_tile_events("demo", "z0/x0/y0", vec![create_event("01A", 1000, "demo", "z0/x0/y0", "n1")])
            .await
            .unwrap();
        let snapshot_ref = store.produce_snapshot("demo", "z0/x0/y0").await.unwrap();
        assert!(snapshot_ref.is_some());
        let tip = store.get_tile_tip("demo", "z0/x0/y0").await.unwrap().unwrap();
        assert_eq!(tip.snapshot, snapshot_ref);
    }

    #[tokio::test]
    async fn close_flushes_buffers_started_under_a_large_flush_bytes_budget() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            TileStore::new(TileStoreConfig { root_dir: dir.path().to_path_buf(), flush_bytes: 1_000_000, flush_ms: 60_000 });
        store
            .append_tile_events("demo", "z0/x0/y0", vec![create_event("01A", 1000, "demo", "z0/x0/y0", "n1")])
            .await
            .unwrap();
        assert!(store.get_tile_tip("demo", "z0/x0/y0").await.unwrap().is_none());
        store.close().await.unwrap();
        assert!(store.get_tile_tip("demo", "z0/x0/y0").await.unwrap().is_some());
    }
}
