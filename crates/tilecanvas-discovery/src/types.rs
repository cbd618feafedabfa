//! Discovery Graph types (spec §3, §4.7)

use serde::{Deserialize, Serialize};
use tilecanvas_core::HashRef;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Medium {
    Ble,
    Wifi,
    Lora,
}

/// Signal-quality hint carried on a peer record or a tip advert.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct RssiHint {
    pub medium: Medium,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rssi: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snr: Option<f64>,
}

/// Advisory location hint; only `radius_m` affects confidence scoring.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct GeoHint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius_m: Option<f64>,
}

/// `{peer_id, last_seen_ms, endpoints?, geo_hint?, rssi_hint?}`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PeerRecord {
    pub peer_id: String,
    pub last_seen_ms: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo_hint: Option<GeoHint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rssi_hint: Option<RssiHint>,
}

/// The wire shape of a tip advertisement (spec §4.8 ingress validates this).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TipAdvert {
    pub peer_id: String,
    pub space_id: String,
    pub tile_id: String,
    pub tip_event: String,
    pub tip_segment: HashRef,
    pub ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo_hint: Option<GeoHint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rssi_hint: Option<RssiHint>,
}

/// A peer's best-known tip for one `(space, tile)`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TileTipRecord {
    pub peer_id: String,
    pub tip_event: String,
    pub tip_segment: HashRef,
    pub confidence: f64,
    pub last_seen_ms: i64,
    pub sender_ts: i64,
}

impl TileTipRecord {
    /// `score = 0.7 * confidence + 0.3 * max(0, 1 - age_ms / 60000)`.
    pub fn score(&self, now_ms: i64) -> f64 {
        let age_ms = (now_ms - self.last_seen_ms).max(0) as f64;
        0.7 * self.confidence + 0.3 * (1.0 - age_ms / 60_000.0).max(0.0)
    }
}
