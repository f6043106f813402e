//! Offline replay of recorded ingress: same engine, same aggregator, record
//! timestamps as the clock.

use std::collections::BTreeMap;
use std::io::BufRead;

use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, warn};

use crate::dispatch::shard_for;
use crate::event::{Observation, ObservationError, parse_event_json, split_key};
use crate::signal::{InsightMessage, Moments, SignalEngine};
use crate::state::{AlertRecord, CalibrationCounters, Controls, DeskState, Delta, apply_delta_at};
use crate::views::{self, RadarItem};

#[derive(Debug, Default)]
pub struct ReplayInput {
    pub records: Vec<Observation>,
    /// Line number (1-based) and reason for every line that did not parse.
    pub malformed: Vec<(usize, ObservationError)>,
}

/// Reads JSONL ingress records. Blank lines are skipped; malformed lines
/// are collected, not fatal.
pub fn read_records(reader: impl BufRead) -> Result<ReplayInput> {
    let mut input = ReplayInput::default();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", idx + 1))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_event_json(line) {
            Ok(obs) => input.records.push(obs),
            Err(err) => {
                warn!(line = idx + 1, error = %err, "skipping malformed record");
                input.malformed.push((idx + 1, err));
            }
        }
    }
    Ok(input)
}

pub struct ReplayOutcome {
    pub state: DeskState,
    pub engines: Vec<SignalEngine>,
    pub accepted: u64,
    pub rejected: u64,
}

/// Runs every partition through its own engine in parallel, then feeds the
/// insights to one aggregator in original arrival order.
pub fn replay(
    records: Vec<Observation>,
    shards: usize,
    risk_scoring: bool,
    controls: Controls,
) -> ReplayOutcome {
    let shards = shards.max(1);
    let mut partitions: Vec<Vec<(usize, Observation)>> = vec![Vec::new(); shards];
    for (idx, obs) in records.into_iter().enumerate() {
        partitions[shard_for(&obs.key(), shards)].push((idx, obs));
    }

    let results: Vec<(SignalEngine, Vec<(usize, Result<InsightMessage, ObservationError>)>)> =
        partitions
            .into_par_iter()
            .map(|part| {
                let mut engine = if risk_scoring {
                    SignalEngine::new()
                } else {
                    SignalEngine::without_risk_scoring()
                };
                let out = part
                    .into_iter()
                    .map(|(idx, obs)| (idx, engine.observe(&obs)))
                    .collect();
                (engine, out)
            })
            .collect();

    let mut engines = Vec::with_capacity(shards);
    let mut merged = Vec::new();
    for (engine, out) in results {
        engines.push(engine);
        merged.extend(out);
    }
    merged.sort_by_key(|(idx, _)| *idx);

    let mut state = DeskState::with_controls(controls);
    let (mut accepted, mut rejected) = (0u64, 0u64);
    for (idx, result) in merged {
        match result {
            Ok(msg) => {
                accepted += 1;
                let now = msg.ts;
                apply_delta_at(&mut state, Delta::Insight(msg), now);
            }
            Err(err) => {
                rejected += 1;
                debug!(record = idx, error = %err, "observation rejected");
            }
        }
    }

    ReplayOutcome {
        state,
        engines,
        accepted,
        rejected,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatSummary {
    pub keys: usize,
    pub count: u64,
    pub mean: f64,
    pub std_dev: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplaySummary {
    pub records: usize,
    pub accepted: u64,
    pub rejected: u64,
    pub keys: usize,
    pub suppressed: u64,
    pub calibration: CalibrationCounters,
    pub calibration_pct: u8,
    pub alerts: usize,
    pub recent_alerts: Vec<AlertRecord>,
    pub radar: Vec<RadarItem>,
    pub stats: BTreeMap<String, StatSummary>,
}

/// Pools every key's moments per stat via the pairwise merge.
pub fn per_stat_moments(engines: &[SignalEngine]) -> BTreeMap<String, (usize, Moments)> {
    let mut pooled: BTreeMap<String, (usize, Moments)> = BTreeMap::new();
    for engine in engines {
        for (key, state) in engine.states() {
            let (_, stat) = split_key(key);
            let entry = pooled.entry(stat.to_string()).or_default();
            entry.0 += 1;
            entry.1 = entry.1.merge(&state.moments);
        }
    }
    pooled
}

pub fn summarize(outcome: &ReplayOutcome, malformed: usize) -> ReplaySummary {
    let snapshot = outcome.state.snapshot();
    let stats = per_stat_moments(&outcome.engines)
        .into_iter()
        .map(|(stat, (keys, m))| {
            (
                stat,
                StatSummary {
                    keys,
                    count: m.count,
                    mean: m.mean,
                    std_dev: m.variance().sqrt(),
                },
            )
        })
        .collect();

    ReplaySummary {
        records: outcome.accepted as usize + outcome.rejected as usize + malformed,
        accepted: outcome.accepted,
        rejected: outcome.rejected + malformed as u64,
        keys: outcome.engines.iter().map(SignalEngine::len).sum(),
        suppressed: outcome.state.suppressed,
        calibration: snapshot.calibration,
        calibration_pct: views::calibration_pct(&snapshot.calibration),
        alerts: snapshot.recent_alerts.len(),
        radar: views::anomaly_radar(&snapshot),
        recent_alerts: snapshot.recent_alerts,
        stats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_lines_are_collected() {
        let raw = concat!(
            r#"{"ts":1,"player_id":"A","stat":"points","value":10,"projection":12}"#,
            "\n\n",
            "not json\n",
            r#"{"ts":2,"player_id":"A","stat":"points","value":"x","projection":12}"#,
            "\n",
        );
        let input = read_records(raw.as_bytes()).expect("readable");
        assert_eq!(input.records.len(), 1);
        let lines: Vec<usize> = input.malformed.iter().map(|(line, _)| *line).collect();
        assert_eq!(lines, vec![3, 4]);
    }
}
