use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::roster::RosterPlayer;
use crate::signal::{InsightMessage, Status};

pub const SERIES_CAPACITY: usize = 60;
pub const ALERT_LOG_CAPACITY: usize = 20;
pub const DEFAULT_RISK: u8 = 40;
pub const DEFAULT_COOLDOWN_MS: i64 = 2000;
/// `|value - projection|` below this counts as a calibration hit.
pub const HIT_TOLERANCE: f64 = 5.0;
const MAX_LOGS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub t: i64,
    pub v: f64,
    pub m: f64,
    pub p: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub key: String,
    pub ts: i64,
    pub insight: String,
    pub confidence: f64,
    pub value: Option<f64>,
    pub projection: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationCounters {
    pub total: u64,
    pub hits: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Controls {
    pub risk: u8,
    pub cooldowns: bool,
    pub cooldown_ms: i64,
}

impl Default for Controls {
    fn default() -> Self {
        Self {
            risk: DEFAULT_RISK,
            cooldowns: true,
            cooldown_ms: DEFAULT_COOLDOWN_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedStatus {
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Finished,
}

#[derive(Debug, Clone)]
pub enum Delta {
    Insight(InsightMessage),
    Log(String),
    SetRoster(Vec<RosterPlayer>),
    SetRisk(u8),
    SetCooldowns(bool),
    FeedStatus(FeedStatus),
}

/// Read-only view handed to consumers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub latest: HashMap<String, InsightMessage>,
    pub series: HashMap<String, Vec<SeriesPoint>>,
    pub calibration: CalibrationCounters,
    pub recent_alerts: Vec<AlertRecord>,
}

#[derive(Debug, Clone)]
pub struct DeskState {
    pub controls: Controls,
    pub latest: HashMap<String, InsightMessage>,
    pub series: HashMap<String, VecDeque<SeriesPoint>>,
    pub calibration: CalibrationCounters,
    pub recent_alerts: VecDeque<AlertRecord>,
    pub last_fired: HashMap<String, i64>,
    pub roster: Vec<RosterPlayer>,
    pub labels: HashMap<String, String>,
    pub feed_status: FeedStatus,
    pub suppressed: u64,
    pub logs: VecDeque<String>,
}

impl Default for DeskState {
    fn default() -> Self {
        Self::new()
    }
}

impl DeskState {
    pub fn new() -> Self {
        Self::with_controls(Controls::default())
    }

    pub fn with_controls(controls: Controls) -> Self {
        Self {
            controls,
            latest: HashMap::new(),
            series: HashMap::new(),
            calibration: CalibrationCounters::default(),
            recent_alerts: VecDeque::new(),
            last_fired: HashMap::new(),
            roster: Vec::new(),
            labels: HashMap::new(),
            feed_status: FeedStatus::Idle,
            suppressed: 0,
            logs: VecDeque::new(),
        }
    }

    pub fn push_log(&mut self, msg: impl Into<String>) {
        self.logs.push_back(msg.into());
        while self.logs.len() > MAX_LOGS {
            self.logs.pop_front();
        }
    }

    pub fn set_risk(&mut self, risk: u8) {
        self.controls.risk = risk.min(100);
    }

    /// Label for a player id: roster name when known, raw id otherwise.
    pub fn label_for<'a>(&'a self, player_id: &'a str) -> &'a str {
        self.labels
            .get(player_id)
            .map(String::as_str)
            .unwrap_or(player_id)
    }

    /// Keys ordered for display: alerts first, then by confidence.
    pub fn ranked_keys(&self) -> Vec<&String> {
        let mut keys: Vec<&String> = self.latest.keys().collect();
        keys.sort_by(|a, b| {
            let (ma, mb) = (&self.latest[*a], &self.latest[*b]);
            status_rank(mb.status)
                .cmp(&status_rank(ma.status))
                .then(mb.confidence.total_cmp(&ma.confidence))
                .then(a.cmp(b))
        });
        keys
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            latest: self.latest.clone(),
            series: self
                .series
                .iter()
                .map(|(k, v)| (k.clone(), v.iter().copied().collect()))
                .collect(),
            calibration: self.calibration,
            recent_alerts: self.recent_alerts.iter().cloned().collect(),
        }
    }

    /// Presentation pipeline for one insight; returns `false` when the
    /// cooldown suppressed it.
    fn accept_insight(&mut self, msg: InsightMessage, now_ms: i64) -> bool {
        if self.controls.cooldowns {
            // A clock that stepped backwards (out-of-order replay input) is
            // outside the window rather than inside it.
            let last = self.last_fired.get(&msg.key).copied().unwrap_or(i64::MIN);
            let elapsed = now_ms.saturating_sub(last);
            if (0..self.controls.cooldown_ms).contains(&elapsed) {
                self.suppressed += 1;
                return false;
            }
            self.last_fired.insert(msg.key.clone(), now_ms);
        }

        let mut msg = msg;
        msg.status = remap_status(msg.status, self.controls.risk);

        let series = self.series.entry(msg.key.clone()).or_default();
        series.push_back(SeriesPoint {
            t: now_ms,
            v: msg.value,
            m: msg.ewma,
            p: msg.projection,
        });
        while series.len() > SERIES_CAPACITY {
            series.pop_front();
        }

        self.calibration.total += 1;
        if (msg.value - msg.projection).abs() < HIT_TOLERANCE {
            self.calibration.hits += 1;
        }

        if msg.status == Status::Alert {
            self.recent_alerts.push_front(AlertRecord {
                key: msg.key.clone(),
                ts: now_ms,
                insight: msg.insight.clone(),
                confidence: msg.confidence,
                value: Some(msg.value),
                projection: Some(msg.projection),
            });
            self.recent_alerts.truncate(ALERT_LOG_CAPACITY);
        }

        self.latest.insert(msg.key.clone(), msg);
        true
    }
}

fn status_rank(status: Status) -> u8 {
    match status {
        Status::Alert => 2,
        Status::Warning => 1,
        Status::Normal => 0,
    }
}

/// Risk dial: above 60 promotes warnings, below 30 demotes them.
pub fn remap_status(status: Status, risk: u8) -> Status {
    match status {
        Status::Warning if risk > 60 => Status::Alert,
        Status::Warning if risk < 30 => Status::Normal,
        other => other,
    }
}

pub fn apply_delta(state: &mut DeskState, delta: Delta) {
    apply_delta_at(state, delta, chrono::Utc::now().timestamp_millis());
}

pub fn apply_delta_at(state: &mut DeskState, delta: Delta, now_ms: i64) {
    match delta {
        Delta::Insight(msg) => {
            state.accept_insight(msg, now_ms);
        }
        Delta::Log(line) => state.push_log(line),
        Delta::SetRoster(players) => {
            state.labels = players
                .iter()
                .map(|p| (p.id.clone(), p.display_name()))
                .collect();
            state.push_log(format!("[INFO] Roster loaded: {} players", players.len()));
            state.roster = players;
        }
        Delta::SetRisk(risk) => state.set_risk(risk),
        Delta::SetCooldowns(enabled) => state.controls.cooldowns = enabled,
        Delta::FeedStatus(status) => {
            if status != state.feed_status {
                state.push_log(format!("[INFO] Feed {status:?}"));
            }
            state.feed_status = status;
        }
    }
}
