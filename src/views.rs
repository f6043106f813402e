//! Derived read-only views over a [`Snapshot`], one per dashboard panel.

use serde::Serialize;

use crate::event::split_key;
use crate::roster::RosterPlayer;
use crate::signal::Status;
use crate::state::{AlertRecord, CalibrationCounters, SeriesPoint, Snapshot};

const RADAR_WINDOW: usize = 30;
const RADAR_TOP: usize = 4;
const RADAR_MIN_DWELL_SECS: f64 = 10.0;
pub const HEATMAP_SLOTS: usize = 30;
const HEATMAP_WINDOW_MS: i64 = 60_000;
const TICKER_WINDOW: usize = 30;
const TICKER_LOOKBACK: usize = 10;
const TICKER_TOP: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RadarItem {
    pub key: String,
    pub label: &'static str,
    pub significance: f64,
    pub dwell_secs: f64,
    pub dwell: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickerRow {
    pub key: String,
    pub player_id: String,
    pub stat: String,
    pub confidence: f64,
    pub delta: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolatilityRow {
    pub key: String,
    pub label: String,
    pub confidence: u8,
    pub status: Status,
}

pub fn calibration_pct(counters: &CalibrationCounters) -> u8 {
    if counters.total == 0 {
        return 0;
    }
    ((counters.hits as f64 / counters.total as f64) * 100.0).round() as u8
}

fn tail(points: &[SeriesPoint], n: usize) -> &[SeriesPoint] {
    &points[points.len().saturating_sub(n)..]
}

/// Strongest current anomalies: blends |z| with recent EWMA travel.
pub fn anomaly_radar(snapshot: &Snapshot) -> Vec<RadarItem> {
    let empty = Vec::new();
    let mut items: Vec<RadarItem> = snapshot
        .latest
        .iter()
        .map(|(key, msg)| {
            let series = tail(snapshot.series.get(key).unwrap_or(&empty), RADAR_WINDOW);
            let dv = match (series.first(), series.last()) {
                (Some(first), Some(last)) if series.len() >= 2 => (last.m - first.m).abs(),
                _ => 0.0,
            };
            let significance = ((msg.z.abs() / 3.0 + dv / 5.0) / 2.0).clamp(0.0, 1.0);
            let dwell_secs = (series.len() as f64 * 0.3).min(60.0);
            let label = if msg.z.abs() > 1.8 {
                if msg.z > 0.0 {
                    "Momentum surge"
                } else {
                    "Momentum drop"
                }
            } else {
                "Stability shift"
            };
            RadarItem {
                key: key.clone(),
                label,
                significance,
                dwell_secs,
                dwell: dwell_secs >= RADAR_MIN_DWELL_SECS,
            }
        })
        .collect();
    items.sort_by(|a, b| {
        b.significance
            .total_cmp(&a.significance)
            .then_with(|| a.key.cmp(&b.key))
    });
    items.truncate(RADAR_TOP);
    items
}

/// Alert counts over the last minute, oldest slot first.
pub fn momentum_heatmap(alerts: &[AlertRecord], now_ms: i64) -> [u32; HEATMAP_SLOTS] {
    let mut slots = [0u32; HEATMAP_SLOTS];
    let last = (HEATMAP_SLOTS - 1) as f64;
    for alert in alerts {
        let dt = now_ms - alert.ts;
        if dt > HEATMAP_WINDOW_MS {
            continue;
        }
        let slot = ((1.0 - dt as f64 / HEATMAP_WINDOW_MS as f64) * last).floor();
        let slot = slot.clamp(0.0, last) as usize;
        slots[slot] += 1;
    }
    slots
}

/// Highest-confidence keys, optionally restricted to one stat.
pub fn confidence_ticker(snapshot: &Snapshot, stat: Option<&str>) -> Vec<TickerRow> {
    let empty = Vec::new();
    let mut rows: Vec<TickerRow> = snapshot
        .latest
        .iter()
        .filter(|(key, _)| stat.is_none_or(|s| split_key(key).1 == s))
        .map(|(key, msg)| {
            let series = tail(snapshot.series.get(key).unwrap_or(&empty), TICKER_WINDOW);
            let delta = match series.last() {
                Some(recent) => {
                    let past = &series[series.len().saturating_sub(TICKER_LOOKBACK)];
                    recent.m - past.m
                }
                None => 0.0,
            };
            let (player_id, stat) = split_key(key);
            TickerRow {
                key: key.clone(),
                player_id: player_id.to_string(),
                stat: stat.to_string(),
                confidence: msg.confidence,
                delta,
            }
        })
        .collect();
    rows.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a.key.cmp(&b.key))
    });
    rows.truncate(TICKER_TOP);
    rows
}

/// One row per roster player (first `pool`) on the `points` line.
pub fn volatility_board(
    snapshot: &Snapshot,
    roster: &[RosterPlayer],
    pool: usize,
) -> Vec<VolatilityRow> {
    roster
        .iter()
        .take(pool)
        .map(|p| {
            let key = format!("{}:points", p.id);
            let msg = snapshot.latest.get(&key);
            VolatilityRow {
                label: p.display_name(),
                confidence: msg.map(|m| m.confidence.round() as u8).unwrap_or(0),
                status: msg.map(|m| m.status).unwrap_or(Status::Normal),
                key,
            }
        })
        .collect()
}
