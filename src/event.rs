use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Largest magnitude accepted for `value`/`projection`. Keeps the Welford
/// sums finite for any realistic stat line.
pub const MAX_ABS_VALUE: f64 = 1e12;

/// One ingress fact: `{ts, player_id, stat, value, projection}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub ts: i64,
    pub player_id: String,
    pub stat: String,
    pub value: f64,
    pub projection: f64,
}

impl Observation {
    pub fn new(
        ts: i64,
        player_id: impl Into<String>,
        stat: impl Into<String>,
        value: f64,
        projection: f64,
    ) -> Self {
        Self {
            ts,
            player_id: player_id.into(),
            stat: stat.into(),
            value,
            projection,
        }
    }

    pub fn key(&self) -> String {
        entity_stat_key(&self.player_id, &self.stat)
    }

    pub fn validate(&self) -> Result<(), ObservationError> {
        if self.player_id.trim().is_empty() {
            return Err(ObservationError::EmptyField("player_id"));
        }
        if self.player_id.contains(':') {
            return Err(ObservationError::KeySeparator("player_id"));
        }
        if self.stat.trim().is_empty() {
            return Err(ObservationError::EmptyField("stat"));
        }
        check_number("value", self.value)?;
        check_number("projection", self.projection)?;
        Ok(())
    }
}

pub fn entity_stat_key(entity_id: &str, stat: &str) -> String {
    format!("{entity_id}:{stat}")
}

/// Splits `"P1:points"` back into `("P1", "points")`. Entity ids may not
/// contain a colon, so the first one is the separator.
pub fn split_key(key: &str) -> (&str, &str) {
    key.split_once(':').unwrap_or((key, ""))
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObservationError {
    Json(String),
    NotAnObject,
    MissingField(&'static str),
    NonNumeric { field: &'static str, raw: String },
    NonFinite(&'static str),
    OutOfRange { field: &'static str, value: f64 },
    EmptyField(&'static str),
    KeySeparator(&'static str),
}

impl fmt::Display for ObservationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObservationError::Json(err) => write!(f, "invalid json: {err}"),
            ObservationError::NotAnObject => write!(f, "record is not a json object"),
            ObservationError::MissingField(field) => write!(f, "missing field `{field}`"),
            ObservationError::NonNumeric { field, raw } => {
                write!(f, "field `{field}` is not numeric: {raw}")
            }
            ObservationError::NonFinite(field) => write!(f, "field `{field}` is not finite"),
            ObservationError::OutOfRange { field, value } => {
                write!(f, "field `{field}` out of range: {value}")
            }
            ObservationError::EmptyField(field) => write!(f, "field `{field}` is empty"),
            ObservationError::KeySeparator(field) => write!(f, "field `{field}` contains ':'"),
        }
    }
}

impl std::error::Error for ObservationError {}

pub fn parse_event_json(raw: &str) -> Result<Observation, ObservationError> {
    let value: Value =
        serde_json::from_str(raw.trim()).map_err(|err| ObservationError::Json(err.to_string()))?;
    observation_from_value(&value)
}

pub fn observation_from_value(value: &Value) -> Result<Observation, ObservationError> {
    let obj = value.as_object().ok_or(ObservationError::NotAnObject)?;

    let ts = match obj.get("ts") {
        None | Some(Value::Null) => return Err(ObservationError::MissingField("ts")),
        Some(raw) => {
            let ts = number_field("ts", raw)?;
            ts.round() as i64
        }
    };
    let player_id = id_field("player_id", obj.get("player_id"))?;
    let stat = id_field("stat", obj.get("stat"))?;
    let value = required_number("value", obj.get("value"))?;
    let projection = required_number("projection", obj.get("projection"))?;

    let observation = Observation {
        ts,
        player_id,
        stat,
        value,
        projection,
    };
    observation.validate()?;
    Ok(observation)
}

fn required_number(field: &'static str, raw: Option<&Value>) -> Result<f64, ObservationError> {
    match raw {
        None | Some(Value::Null) => Err(ObservationError::MissingField(field)),
        Some(raw) => number_field(field, raw),
    }
}

fn number_field(field: &'static str, raw: &Value) -> Result<f64, ObservationError> {
    let Some(n) = raw.as_f64() else {
        return Err(ObservationError::NonNumeric {
            field,
            raw: raw.to_string(),
        });
    };
    check_number(field, n)?;
    Ok(n)
}

fn check_number(field: &'static str, n: f64) -> Result<(), ObservationError> {
    if !n.is_finite() {
        return Err(ObservationError::NonFinite(field));
    }
    if n.abs() > MAX_ABS_VALUE {
        return Err(ObservationError::OutOfRange { field, value: n });
    }
    Ok(())
}

// Ids arrive as strings or bare numbers depending on the upstream feed.
fn id_field(field: &'static str, raw: Option<&Value>) -> Result<String, ObservationError> {
    let id = match raw {
        None | Some(Value::Null) => return Err(ObservationError::MissingField(field)),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => {
            return Err(ObservationError::NonNumeric {
                field,
                raw: other.to_string(),
            });
        }
    };
    if id.is_empty() {
        return Err(ObservationError::EmptyField(field));
    }
    Ok(id)
}
