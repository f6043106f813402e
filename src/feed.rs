use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::warn;

use crate::config::{FeedSource, Settings};
use crate::dispatch::DispatchHandle;
use crate::roster::{self, RosterPlayer};
use crate::sim_feed::{SimFeed, spawn_sim_feed};
use crate::state::Delta;
use crate::stream_feed::spawn_stream_feed;

/// Loads the roster (best effort) and starts the configured transport.
/// The returned thread exits once the transport does.
pub fn spawn_provider(
    settings: Settings,
    handle: DispatchHandle,
    stop: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let outbox = handle.outbox().clone();
        let players = match roster::fetch_roster(&settings.pulse_api_url, &settings.pulse_league) {
            Ok(players) => players,
            Err(err) => {
                warn!(error = %err, "roster lookup failed");
                outbox.push(Delta::Log(format!(
                    "[WARN] Roster unavailable, showing raw ids: {err}"
                )));
                Vec::new()
            }
        };
        if !players.is_empty() {
            outbox.push(Delta::SetRoster(players.clone()));
        }

        let transport = match settings.feed_source {
            FeedSource::Sim => {
                let ids = sim_pool_ids(&players, settings.sim_pool, settings.sim_seed);
                let feed = SimFeed::new(&ids, &settings.sim_stats, settings.sim_seed);
                outbox.push(Delta::Log(format!(
                    "[INFO] Simulated feed: {} players every {}ms",
                    ids.len(),
                    settings.sim_interval_ms
                )));
                spawn_sim_feed(
                    feed,
                    handle,
                    stop,
                    Duration::from_millis(settings.sim_interval_ms),
                    settings.sim_max_events,
                )
            }
            FeedSource::Sse => {
                outbox.push(Delta::Log(format!(
                    "[INFO] Streaming from {}",
                    settings.stream_url
                )));
                spawn_stream_feed(
                    settings.stream_url.clone(),
                    handle,
                    stop,
                    Duration::from_millis(settings.reconnect_backoff_ms),
                )
            }
        };
        let _ = transport.join();
    })
}

/// First `pool` roster ids, or generated placeholders when the roster is empty.
pub fn sim_pool_ids(players: &[RosterPlayer], pool: usize, seed: Option<u64>) -> Vec<String> {
    if players.is_empty() {
        return SimFeed::placeholder_ids(pool, seed);
    }
    players.iter().take(pool).map(|p| p.id.clone()).collect()
}
