use std::env;

use crate::dispatch::DispatchConfig;
use crate::state::{Controls, DEFAULT_COOLDOWN_MS, DEFAULT_RISK};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedSource {
    Sim,
    Sse,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub feed_source: FeedSource,
    pub stream_url: String,
    pub pulse_api_url: String,
    pub pulse_league: String,
    pub workers: usize,
    pub ingress_queue: usize,
    pub outbox_capacity: usize,
    pub risk: u8,
    pub cooldowns: bool,
    pub cooldown_ms: i64,
    pub risk_scoring: bool,
    pub sim_interval_ms: u64,
    pub sim_pool: usize,
    pub sim_max_events: u64,
    pub sim_seed: Option<u64>,
    pub sim_stats: Vec<String>,
    pub key_idle_evict_secs: u64,
    pub reconnect_backoff_ms: u64,
    pub log_file: String,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key).and_then(|val| {
                let val = val.trim().to_string();
                if val.is_empty() { None } else { Some(val) }
            })
        };
        let num = |key: &str, default: u64, min: u64, max: u64| {
            get(key)
                .and_then(|val| val.parse::<u64>().ok())
                .unwrap_or(default)
                .clamp(min, max)
        };
        let flag = |key: &str, default: bool| get(key).map(|val| parse_bool(&val)).unwrap_or(default);

        let feed_source = match get("FEED_SOURCE").map(|v| v.to_lowercase()).as_deref() {
            Some("sse") | Some("stream") => FeedSource::Sse,
            _ => FeedSource::Sim,
        };
        let sim_stats = get("SIM_STATS")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|stats| !stats.is_empty())
            .unwrap_or_else(|| vec!["points".to_string()]);

        Self {
            feed_source,
            stream_url: get("STREAM_URL")
                .unwrap_or_else(|| "http://localhost:3000/api/stream".to_string()),
            pulse_api_url: get("PULSE_API_URL")
                .unwrap_or_else(|| "http://localhost:1339".to_string()),
            pulse_league: get("PULSE_LEAGUE").unwrap_or_else(|| "NFL".to_string()),
            workers: num("SIGNAL_WORKERS", 4, 1, 32) as usize,
            ingress_queue: num("INGRESS_QUEUE", 1024, 16, 65_536) as usize,
            outbox_capacity: num("OUTBOX_CAPACITY", 4096, 64, 1_000_000) as usize,
            risk: num("RISK_DIAL", DEFAULT_RISK as u64, 0, 100) as u8,
            cooldowns: flag("COOLDOWNS", true),
            cooldown_ms: num("COOLDOWN_MS", DEFAULT_COOLDOWN_MS as u64, 0, 600_000) as i64,
            risk_scoring: flag("RISK_SCORING", true),
            sim_interval_ms: num("SIM_INTERVAL_MS", 400, 10, 10_000),
            sim_pool: num("SIM_POOL", 12, 1, 200) as usize,
            sim_max_events: num("SIM_MAX_EVENTS", 0, 0, u64::MAX),
            sim_seed: get("SIM_SEED").and_then(|val| val.parse::<u64>().ok()),
            sim_stats,
            key_idle_evict_secs: num("KEY_IDLE_EVICT_SECS", 0, 0, 86_400),
            reconnect_backoff_ms: num("RECONNECT_BACKOFF_MS", 1000, 100, 60_000),
            log_file: get("SIGNALDESK_LOG_FILE").unwrap_or_else(|| "signaldesk.log".to_string()),
        }
    }

    pub fn controls(&self) -> Controls {
        Controls {
            risk: self.risk,
            cooldowns: self.cooldowns,
            cooldown_ms: self.cooldown_ms,
        }
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            workers: self.workers,
            ingress_capacity: self.ingress_queue,
            evict_idle_ms: (self.key_idle_evict_secs > 0)
                .then(|| self.key_idle_evict_secs as i64 * 1000),
            risk_scoring: self.risk_scoring,
        }
    }
}

fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
