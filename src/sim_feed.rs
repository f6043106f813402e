use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::dispatch::DispatchHandle;
use crate::event::Observation;
use crate::state::{Delta, FeedStatus};

#[derive(Debug, Clone)]
struct SimLine {
    player_id: String,
    stat: String,
    level: f64,
    projection: f64,
    surge_left: u32,
}

/// Synthetic stat feed: each player/stat line wanders around its projection
/// with occasional multi-tick surges.
#[derive(Debug)]
pub struct SimFeed {
    lines: Vec<SimLine>,
    rng: StdRng,
}

impl SimFeed {
    pub fn new(player_ids: &[String], stats: &[String], seed: Option<u64>) -> Self {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut lines = Vec::new();
        for player_id in player_ids {
            for stat in stats {
                let (lo, hi) = projection_range(stat);
                let projection = rng.gen_range(lo..hi);
                lines.push(SimLine {
                    player_id: player_id.clone(),
                    stat: stat.clone(),
                    level: projection + rng.gen_range(-2.0..2.0),
                    projection,
                    surge_left: 0,
                });
            }
        }
        Self { lines, rng }
    }

    /// Placeholder ids for when no roster is available.
    pub fn placeholder_ids(pool: usize, seed: Option<u64>) -> Vec<String> {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed ^ 0x5eed),
            None => StdRng::from_entropy(),
        };
        let mut ids: Vec<String> = Vec::with_capacity(pool);
        while ids.len() < pool {
            let id = format!("p_{}", rng.gen_range(0..9999));
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn next_observation(&mut self, ts: i64) -> Option<Observation> {
        if self.lines.is_empty() {
            return None;
        }
        let idx = self.rng.gen_range(0..self.lines.len());
        let rng = &mut self.rng;
        let line = &mut self.lines[idx];

        line.level += rng.gen_range(-0.4..0.4) + (line.projection - line.level) * 0.05;
        if line.surge_left == 0 && rng.gen_bool(0.03) {
            line.surge_left = rng.gen_range(3..8);
        }
        let surge = if line.surge_left > 0 {
            line.surge_left -= 1;
            rng.gen_range(4.0..9.0)
        } else {
            0.0
        };
        let value = (line.level + rng.gen_range(-1.5..1.5) + surge).max(0.0);

        Some(Observation::new(
            ts,
            line.player_id.clone(),
            line.stat.clone(),
            (value * 10.0).round() / 10.0,
            (line.projection * 10.0).round() / 10.0,
        ))
    }
}

fn projection_range(stat: &str) -> (f64, f64) {
    match stat {
        "points" => (15.0, 30.0),
        "rebounds" => (4.0, 12.0),
        "assists" => (3.0, 10.0),
        "3pt" => (1.0, 5.0),
        _ => (5.0, 25.0),
    }
}

/// Emits one observation per `interval` until `stop` is set or
/// `max_events` (when non-zero) is reached.
pub fn spawn_sim_feed(
    mut feed: SimFeed,
    handle: DispatchHandle,
    stop: Arc<AtomicBool>,
    interval: Duration,
    max_events: u64,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let outbox = handle.outbox().clone();
        outbox.push(Delta::FeedStatus(FeedStatus::Connected));
        let mut sent = 0u64;
        while !stop.load(Ordering::Relaxed) {
            if max_events > 0 && sent >= max_events {
                break;
            }
            thread::sleep(interval);
            let ts = chrono::Utc::now().timestamp_millis();
            let Some(obs) = feed.next_observation(ts) else {
                break;
            };
            if handle.submit(obs).is_err() {
                break;
            }
            sent += 1;
        }
        info!(sent, "simulated feed finished");
        outbox.push(Delta::FeedStatus(FeedStatus::Finished));
    })
}
