use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::event::{Observation, ObservationError};

pub const EWMA_ALPHA: f64 = 0.25;
pub const CUSUM_DRIFT: f64 = 0.25;
pub const CUSUM_THRESHOLD: f64 = 3.5;
pub const VARIANCE_FLOOR: f64 = 1e-3;
pub const STD_FLOOR: f64 = 1e-2;

// Confidence shape: disagreement is scaled by 5 stat units, volatility decays at 0.2/std.
const DISAGREEMENT_SCALE: f64 = 5.0;
const VOLATILITY_DECAY: f64 = 0.2;

const SURGE_Z: f64 = 1.8;
const STABLE_EDGE_CONFIDENCE: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Normal,
    Warning,
    Alert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn of(delta: f64) -> Self {
        if delta >= 0.0 {
            Direction::Up
        } else {
            Direction::Down
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reason {
    pub feature: String,
    pub direction: Direction,
    pub magnitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightMessage {
    pub key: String,
    pub ts: i64,
    pub insight: String,
    pub confidence: f64,
    pub status: Status,
    pub z: f64,
    pub ewma: f64,
    pub value: f64,
    pub projection: f64,
    pub reasons: Vec<Reason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<f64>,
    /// Set on the tick the CUSUM detector crossed its threshold.
    #[serde(default)]
    pub drift: bool,
}

/// Welford running moments: count, mean and the sum of squared deviations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Moments {
    pub count: u64,
    pub mean: f64,
    pub m2: f64,
}

impl Moments {
    pub fn push(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    pub fn from_values(values: &[f64]) -> Self {
        let mut moments = Moments::default();
        for &x in values {
            moments.push(x);
        }
        moments
    }

    /// Combines two disjoint sample sets (Chan et al. pairwise update).
    pub fn merge(&self, other: &Moments) -> Moments {
        if self.count == 0 {
            return *other;
        }
        if other.count == 0 {
            return *self;
        }
        let count = self.count + other.count;
        let (na, nb, n) = (self.count as f64, other.count as f64, count as f64);
        let delta = other.mean - self.mean;
        Moments {
            count,
            mean: self.mean + delta * nb / n,
            m2: self.m2 + other.m2 + delta * delta * na * nb / n,
        }
    }

    pub fn variance(&self) -> f64 {
        if self.count > 1 {
            self.m2 / (self.count - 1) as f64
        } else {
            0.0
        }
    }

    /// Sample standard deviation with both floors applied; never zero.
    pub fn std_dev(&self) -> f64 {
        self.variance().max(VARIANCE_FLOOR).sqrt().max(STD_FLOOR)
    }
}

/// Per-key state. Only ever advanced one observation at a time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunningState {
    pub moments: Moments,
    pub ewma: f64,
    pub cusum: f64,
    pub last_seen: i64,
}

impl RunningState {
    fn fresh(x: f64, ts: i64) -> Self {
        Self {
            moments: Moments::default(),
            ewma: x,
            cusum: 0.0,
            last_seen: ts,
        }
    }

    pub fn count(&self) -> u64 {
        self.moments.count
    }

    pub fn mean(&self) -> f64 {
        self.moments.mean
    }

    pub fn m2(&self) -> f64 {
        self.moments.m2
    }

    pub fn variance(&self) -> f64 {
        self.moments.variance()
    }

    pub fn std_dev(&self) -> f64 {
        self.moments.std_dev()
    }

    /// Returns `true` when the CUSUM detector fired on this tick.
    fn advance(&mut self, x: f64, ts: i64) -> bool {
        let first = self.moments.count == 0;
        self.moments.push(x);
        self.ewma = if first {
            x
        } else {
            EWMA_ALPHA * x + (1.0 - EWMA_ALPHA) * self.ewma
        };

        let s = (self.cusum + (x - self.moments.mean - CUSUM_DRIFT)).max(0.0);
        let fired = s > CUSUM_THRESHOLD;
        self.cusum = if fired { 0.0 } else { s };
        self.last_seen = ts;
        fired
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusThresholds {
    pub alert_z: f64,
    pub alert_confidence: f64,
    pub alert_risk: f64,
    pub warning_z: f64,
    pub warning_confidence: f64,
    pub warning_risk: f64,
}

impl StatusThresholds {
    pub const WITH_RISK: StatusThresholds = StatusThresholds {
        alert_z: 2.2,
        alert_confidence: 75.0,
        alert_risk: 70.0,
        warning_z: 1.2,
        warning_confidence: 45.0,
        warning_risk: 45.0,
    };

    pub const WITHOUT_RISK: StatusThresholds = StatusThresholds {
        alert_z: 2.0,
        alert_confidence: 70.0,
        alert_risk: f64::INFINITY,
        warning_z: 1.0,
        warning_confidence: 40.0,
        warning_risk: f64::INFINITY,
    };

    pub fn classify(&self, z: f64, confidence: f64, risk: Option<f64>) -> Status {
        let risk = risk.unwrap_or(f64::NEG_INFINITY);
        if z > self.alert_z || confidence > self.alert_confidence || risk > self.alert_risk {
            Status::Alert
        } else if z > self.warning_z
            || confidence > self.warning_confidence
            || risk > self.warning_risk
        {
            Status::Warning
        } else {
            Status::Normal
        }
    }
}

pub fn confidence_score(value: f64, projection: f64, std: f64) -> f64 {
    let disagreement = (value - projection).abs();
    let base = 100.0
        * (-0.5 * disagreement / DISAGREEMENT_SCALE).exp()
        * (-VOLATILITY_DECAY * std).exp();
    finite_or_zero(base).clamp(0.0, 100.0)
}

pub fn risk_score(z: f64, std: f64, cusum: f64) -> f64 {
    let raw = (z.abs() * 15.0 + std * 30.0 + (cusum * 8.0).min(20.0)).round();
    if raw.is_nan() {
        return 0.0;
    }
    raw.clamp(0.0, 100.0)
}

pub fn insight_text(z: f64, confidence: f64) -> &'static str {
    if z > SURGE_Z {
        "Momentum surge detected"
    } else if z < -SURGE_Z {
        "Momentum drop detected"
    } else if confidence > STABLE_EDGE_CONFIDENCE {
        "Stable edge"
    } else {
        "Stable"
    }
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() { v } else { 0.0 }
}

/// Owns every `RunningState` for one partition of keys.
#[derive(Debug, Clone)]
pub struct SignalEngine {
    states: HashMap<String, RunningState>,
    risk_scoring: bool,
}

impl Default for SignalEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalEngine {
    pub fn new() -> Self {
        Self {
            states: HashMap::new(),
            risk_scoring: true,
        }
    }

    pub fn without_risk_scoring() -> Self {
        Self {
            states: HashMap::new(),
            risk_scoring: false,
        }
    }

    pub fn thresholds(&self) -> StatusThresholds {
        if self.risk_scoring {
            StatusThresholds::WITH_RISK
        } else {
            StatusThresholds::WITHOUT_RISK
        }
    }

    /// Validates, advances the key's state and builds its insight. A rejected
    /// observation leaves every state untouched.
    pub fn observe(&mut self, obs: &Observation) -> Result<InsightMessage, ObservationError> {
        obs.validate()?;
        let key = obs.key();
        let x = obs.value;

        let state = self
            .states
            .entry(key.clone())
            .or_insert_with(|| RunningState::fresh(x, obs.ts));
        let fired = state.advance(x, obs.ts);
        let state = *state;

        Ok(self.build_insight(key, obs, &state, fired))
    }

    fn build_insight(
        &self,
        key: String,
        obs: &Observation,
        state: &RunningState,
        drift: bool,
    ) -> InsightMessage {
        let x = obs.value;
        let std = state.std_dev();
        let z = finite_or_zero((x - state.mean()) / std);
        let confidence = confidence_score(x, obs.projection, std);
        let risk = self
            .risk_scoring
            .then(|| risk_score(z, std, state.cusum));
        let status = self.thresholds().classify(z, confidence, risk);
        let ewma_delta = finite_or_zero(x - state.ewma);

        InsightMessage {
            key,
            ts: obs.ts,
            insight: insight_text(z, confidence).to_string(),
            confidence,
            status,
            z,
            ewma: state.ewma,
            value: x,
            projection: obs.projection,
            reasons: vec![
                Reason {
                    feature: "z_score".to_string(),
                    direction: Direction::of(z),
                    magnitude: z.abs(),
                },
                Reason {
                    feature: "ewma_delta".to_string(),
                    direction: Direction::of(ewma_delta),
                    magnitude: ewma_delta.abs(),
                },
            ],
            risk,
            drift,
        }
    }

    /// Feeds a slice in order. Yields exactly what the same observations
    /// passed one at a time to [`observe`](Self::observe) would.
    pub fn observe_batch(
        &mut self,
        batch: &[Observation],
    ) -> Vec<Result<InsightMessage, ObservationError>> {
        batch.iter().map(|obs| self.observe(obs)).collect()
    }

    pub fn state(&self, key: &str) -> Option<&RunningState> {
        self.states.get(key)
    }

    pub fn states(&self) -> impl Iterator<Item = (&String, &RunningState)> {
        self.states.iter()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Drops keys whose last observation is more than `max_idle_ms` older than
    /// `now_ms`. Returns how many were removed.
    pub fn evict_idle(&mut self, now_ms: i64, max_idle_ms: i64) -> usize {
        let before = self.states.len();
        self.states
            .retain(|_, state| now_ms.saturating_sub(state.last_seen) <= max_idle_ms);
        before - self.states.len()
    }
}
