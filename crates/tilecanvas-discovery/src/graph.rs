//! Discovery Graph (spec §4.7): peer/tile-tip maps, confidence scoring,
//! capacity-capped eviction, TTL pruning, and canonical-JSON persistence.

use crate::error::Result;
use crate::types::{Medium, PeerRecord, TileTipRecord, TipAdvert};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tilecanvas_core::canonical::canonical_bytes;
use tokio::fs;
use tracing::debug;

const PERSISTENCE_VERSION: u32 = 1;

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

fn clamp01(x: f64) -> f64 {
    x.max(0.0).min(1.0)
}

/// Tuning for one Discovery Graph instance (spec §6 configuration contract).
#[derive(Clone, Debug)]
pub struct DiscoveryConfig {
    pub persist_path: Option<PathBuf>,
    pub peer_ttl_ms: i64,
    pub tile_ttl_ms: i64,
    pub max_peers: usize,
    pub max_tiles: usize,
    pub max_peers_per_tile: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        DiscoveryConfig {
            persist_path: None,
            peer_ttl_ms: 120_000,
            tile_ttl_ms: 300_000,
            max_peers: 512,
            max_tiles: 4096,
            max_peers_per_tile: 32,
        }
    }
}

type TileKey = (String, String);

#[derive(Default)]
struct Inner {
    peers: HashMap<String, PeerRecord>,
    tiles: HashMap<TileKey, HashMap<String, TileTipRecord>>,
}

pub struct DiscoveryGraph {
    config: DiscoveryConfig,
    inner: RwLock<Inner>,
}

#[derive(Serialize, Deserialize)]
struct PersistedGraph {
    v: u32,
    saved_at: i64,
    peers: Vec<PeerRecord>,
    tiles: Vec<PersistedTileEntry>,
}

#[derive(Serialize, Deserialize)]
struct PersistedTileEntry {
    space_id: String,
    tile_id: String,
    records: Vec<TileTipRecord>,
}

impl DiscoveryGraph {
    pub fn new(config: DiscoveryConfig) -> Self {
        DiscoveryGraph { config, inner: RwLock::new(Inner::default()) }
    }

    /// Confidence scoring per spec §4.7.
    fn compute_confidence(advert: &TipAdvert) -> f64 {
        let mut c = 0.5;
        if let Some(rssi) = &advert.rssi_hint {
            c = match (rssi.medium, rssi.rssi, rssi.snr) {
                (Medium::Ble, Some(r), _) if (-100.0..=-30.0).contains(&r) => {
                    0.2 + clamp01((r + 100.0) / 70.0) * 0.7
                }
                (Medium::Wifi, Some(r), _) => 0.2 + clamp01((r + 100.0) / 60.0) * 0.7,
                (Medium::Lora, _, Some(snr)) => 0.2 + clamp01((snr + 20.0) / 30.0) * 0.7,
                _ => c,
            };
        }
        if let Some(geo) = &advert.geo_hint {
            if let Some(radius_m) = geo.radius_m {
                c = clamp01(c + 0.15 * (1.0 - clamp01(radius_m / 2000.0)));
            }
        }
        c
    }

    /// Ingest one tip advertisement, updating the peer and per-tile maps.
    pub fn ingest_tip(&self, advert: TipAdvert) -> Result<()> {
        let now = now_ms();
        let confidence = Self::compute_confidence(&advert);

        let mut inner = self.inner.write();
        let peer = inner.peers.entry(advert.peer_id.clone()).or_insert_with(|| PeerRecord {
            peer_id: advert.peer_id.clone(),
            last_seen_ms: now,
            endpoints: Vec::new(),
            geo_hint: None,
            rssi_hint: None,
        });
        peer.last_seen_ms = now;
        if advert.geo_hint.is_some() {
            peer.geo_hint = advert.geo_hint;
        }
        if advert.rssi_hint.is_some() {
            peer.rssi_hint = advert.rssi_hint;
        }

        let key = (advert.space_id.clone(), advert.tile_id.clone());
        let tile_map = inner.tiles.entry(key).or_default();
        match tile_map.get_mut(&advert.peer_id) {
            Some(existing) => {
                let replace = advert.ts > existing.sender_ts
                    || (advert.ts == existing.sender_ts && advert.tip_event > existing.tip_event);
                if replace {
                    existing.tip_event = advert.tip_event;
                    existing.tip_segment = advert.tip_segment;
                    existing.sender_ts = advert.ts;
                }
                existing.last_seen_ms = now;
                existing.confidence = existing.confidence.max(confidence);
            }
            None => {
                tile_map.insert(
                    advert.peer_id.clone(),
                    TileTipRecord {
                        peer_id: advert.peer_id.clone(),
                        tip_event: advert.tip_event,
                        tip_segment: advert.tip_segment,
                        confidence,
                        last_seen_ms: now,
                        sender_ts: advert.ts,
                    },
                );
            }
        }

        self.enforce_capacity(&mut inner, now);
        Ok(())
    }

    fn enforce_capacity(&self, inner: &mut Inner, now: i64) {
        if inner.peers.len() > self.config.max_peers {
            let evict_count = inner.peers.len() / 10;
            let mut by_age: Vec<(String, i64)> =
                inner.peers.iter().map(|(id, p)| (id.clone(), p.last_seen_ms)).collect();
            by_age.sort_by_key(|(_, last_seen)| *last_seen);
            for (peer_id, _) in by_age.into_iter().take(evict_count.max(1)) {
                inner.peers.remove(&peer_id);
            }
        }

        if inner.tiles.len() > self.config.max_tiles {
            let evict_count = inner.tiles.len() / 10;
            let mut by_age: Vec<(TileKey, i64)> = inner
                .tiles
                .iter()
                .map(|(key, records)| {
                    let best_seen = records.values().map(|r| r.last_seen_ms).max().unwrap_or(0);
                    (key.clone(), best_seen)
                })
                .collect();
            by_age.sort_by_key(|(_, last_seen)| *last_seen);
            for (key, _) in by_age.into_iter().take(evict_count.max(1)) {
                inner.tiles.remove(&key);
            }
        }

        for records in inner.tiles.values_mut() {
            if records.len() > self.config.max_peers_per_tile {
                let mut scored: Vec<(String, f64)> =
                    records.iter().map(|(peer_id, r)| (peer_id.clone(), r.score(now))).collect();
                scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
                let keep: std::collections::HashSet<String> =
                    scored.into_iter().take(self.config.max_peers_per_tile).map(|(id, _)| id).collect();
                records.retain(|peer_id, _| keep.contains(peer_id));
            }
        }
    }

    /// Tip records for `(space, tile)`, sorted by score descending.
    pub fn who_has(&self, space: &str, tile: &str) -> Vec<TileTipRecord> {
        let now = now_ms();
        let inner = self.inner.read();
        let mut records: Vec<TileTipRecord> = inner
            .tiles
            .get(&(space.to_string(), tile.to_string()))
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        records.sort_by(|a, b| b.score(now).partial_cmp(&a.score(now)).unwrap_or(std::cmp::Ordering::Equal));
        records
    }

    pub fn best_tip(&self, space: &str, tile: &str) -> Option<TileTipRecord> {
        self.who_has(space, tile).into_iter().next()
    }

    pub fn tiles_by_peer(&self, peer_id: &str) -> Vec<(String, String, TileTipRecord)> {
        let inner = self.inner.read();
        let mut out = Vec::new();
        for ((space, tile), records) in inner.tiles.iter() {
            if let Some(record) = records.get(peer_id) {
                out.push((space.clone(), tile.clone(), record.clone()));
            }
        }
        out
    }

    pub fn peer(&self, peer_id: &str) -> Option<PeerRecord> {
        self.inner.read().peers.get(peer_id).cloned()
    }

    /// Drop expired peer/tip records; runs on a periodic tick (~2s per §4.7).
    pub fn prune(&self) {
        let now = now_ms();
        let mut inner = self.inner.write();
        let peer_ttl = self.config.peer_ttl_ms;
        let tile_ttl = self.config.tile_ttl_ms;

        inner.peers.retain(|_, peer| now - peer.last_seen_ms <= peer_ttl);
        let live_peers: std::collections::HashSet<String> = inner.peers.keys().cloned().collect();

        inner.tiles.retain(|_, records| {
            records.retain(|peer_id, record| {
                now - record.last_seen_ms <= tile_ttl && live_peers.contains(peer_id)
            });
            !records.is_empty()
        });
        debug!(peers = inner.peers.len(), tiles = inner.tiles.len(), "pruned discovery graph");
    }

    /// Persist `{v, saved_at, peers, tiles}` as canonical JSON via
    /// temp-file + atomic rename (spec §4.7, every ~3s).
    pub async fn save(&self) -> Result<()> {
        let Some(path) = self.config.persist_path.clone() else {
            return Ok(());
        };
        let persisted = {
            let inner = self.inner.read();
            PersistedGraph {
                v: PERSISTENCE_VERSION,
                saved_at: now_ms(),
                peers: inner.peers.values().cloned().collect(),
                tiles: inner
                    .tiles
                    .iter()
                    .map(|((space_id, tile_id), records)| PersistedTileEntry {
                        space_id: space_id.clone(),
                        tile_id: tile_id.clone(),
                        records: records.values().cloned().collect(),
                    })
                    .collect(),
            }
        };
        let bytes = canonical_bytes(&persisted)?;
        write_atomic(&path, &bytes).await?;
        Ok(())
    }

    /// Load a previously persisted graph. A missing file or a version
    /// mismatch is a silent no-op: the graph starts fresh.
    pub async fn load(&self) -> Result<()> {
        let Some(path) = self.config.persist_path.clone() else {
            return Ok(());
        };
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        let persisted: PersistedGraph = match serde_json::from_slice(&bytes) {
            Ok(p) => p,
            Err(_) => return Ok(()),
        };
        if persisted.v != PERSISTENCE_VERSION {
            debug!(saw = persisted.v, expected = PERSISTENCE_VERSION, "discovery snapshot version mismatch, starting fresh");
            return Ok(());
        }

        let mut inner = self.inner.write();
        inner.peers = persisted.peers.into_iter().map(|p| (p.peer_id.clone(), p)).collect();
        inner.tiles = persisted
            .tiles
            .into_iter()
            .map(|entry| {
                let records = entry.records.into_iter().map(|r| (r.peer_id.clone(), r)).collect();
                ((entry.space_id, entry.tile_id), records)
            })
            .collect();
        Ok(())
    }

    /// Graceful stop; the graph owns no background tasks of its own (the
    /// daemon drives `prune`/`save` on its own timers), so this is a no-op
    /// kept for interface symmetry with the Tile Store.
    pub fn stop(&self) {}
}

async fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<()> {
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).await?;
    let tmp = parent.join(format!(".tmp-discovery-{}", std::process::id()));
    let mut file = fs::File::create(&tmp).await?;
    use tokio::io::AsyncWriteExt;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(&tmp, dest).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GeoHint, RssiHint};
    use tilecanvas_core::HashRef;

    fn seg(hex_byte: u8) -> HashRef {
        HashRef::parse(&format!("sha256:{}", hex::encode([hex_byte; 32]))).unwrap()
    }

    fn advert(peer: &str, ts: i64, tip_event: &str) -> TipAdvert {
        TipAdvert {
            peer_id: peer.into(),
            space_id: "demo".into(),
            tile_id: "z0/x0/y0".into(),
            tip_event: tip_event.into(),
            tip_segment: seg(1),
            ts,
            geo_hint: None,
            rssi_hint: None,
        }
    }

    #[test]
    fn later_timestamp_replaces_prior_record() {
        let graph = DiscoveryGraph::new(DiscoveryConfig::default());
        graph.ingest_tip(advert("peer-a", 1000, "01A")).unwrap();
        graph.ingest_tip(advert("peer-a", 2000, "01B")).unwrap();
        let record = graph.best_tip("demo", "z0/x0/y0").unwrap();
        assert_eq!(record.tip_event, "01B");
    }

    #[test]
    fn stale_timestamp_keeps_prior_tip_but_refreshes_confidence() {
        let graph = DiscoveryGraph::new(DiscoveryConfig::default());
        graph.ingest_tip(advert("peer-a", 2000, "01B")).unwrap();
        graph.ingest_tip(advert("peer-a", 1000, "01A")).unwrap();
        let record = graph.best_tip("demo", "z0/x0/y0").unwrap();
        assert_eq!(record.tip_event, "01B");
    }

    #[test]
    fn wifi_rssi_near_zero_yields_high_confidence() {
        let mut a = advert("peer-a", 1000, "01A");
        a.rssi_hint = Some(RssiHint { medium: Medium::Wifi, rssi: Some(-30.0), snr: None });
        let c = DiscoveryGraph::compute_confidence(&a);
        assert!(c > 0.8, "expected high confidence, got {c}");
    }

    #[test]
    fn tight_geo_radius_boosts_confidence() {
        let mut a = advert("peer-a", 1000, "01A");
        a.geo_hint = Some(GeoHint { lat: None, lon: None, radius_m: Some(10.0) });
        let c = DiscoveryGraph::compute_confidence(&a);
        assert!(c > 0.5);
    }

    #[test]
    fn max_peers_per_tile_keeps_top_scoring() {
        let config = DiscoveryConfig { max_peers_per_tile: 2, ..DiscoveryConfig::default() };
        let graph = DiscoveryGraph::new(config);
        for i in 0..5 {
            let mut a = advert(&format!("peer-{i}"), 1000 + i as i64, "01A");
            a.rssi_hint = Some(RssiHint { medium: Medium::Wifi, rssi: Some(-30.0 - i as f64), snr: None });
            graph.ingest_tip(a).unwrap();
        }
        assert_eq!(graph.who_has("demo", "z0/x0/y0").len(), 2);
    }

    #[test]
    fn prune_drops_expired_peers_and_tips() {
        let config = DiscoveryConfig { peer_ttl_ms: 0, tile_ttl_ms: 0, ..DiscoveryConfig::default() };
        let graph = DiscoveryGraph::new(config);
        graph.ingest_tip(advert("peer-a", 1000, "01A")).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        graph.prune();
        assert!(graph.peer("peer-a").is_none());
        assert!(graph.who_has("demo", "z0/x0/y0").is_empty());
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("discovery.json");
        let config = DiscoveryConfig { persist_path: Some(path.clone()), ..DiscoveryConfig::default() };
        let graph = DiscoveryGraph::new(config.clone());
        graph.ingest_tip(advert("peer-a", 1000, "01A")).unwrap();
        graph.save().await.unwrap();

        let reloaded = DiscoveryGraph::new(config);
        reloaded.load().await.unwrap();
        assert!(reloaded.peer("peer-a").is_some());
        assert_eq!(reloaded.best_tip("demo", "z0/x0/y0").unwrap().tip_event, "01A");
    }
}
