use anyhow::{Context, Result};
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::http_client::http_client;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterPlayer {
    pub id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub position: Option<String>,
    pub team_id: Option<String>,
}

impl RosterPlayer {
    pub fn display_name(&self) -> String {
        let name = format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or(""),
            self.last_name.as_deref().unwrap_or("")
        );
        let name = name.trim();
        if name.is_empty() {
            self.id.clone()
        } else {
            name.to_string()
        }
    }
}

pub fn roster_url(base: &str, league: &str) -> String {
    format!(
        "{}/v1/leagues/{}/players",
        base.trim_end_matches('/'),
        league.trim()
    )
}

pub fn fetch_roster(base: &str, league: &str) -> Result<Vec<RosterPlayer>> {
    let client = http_client()?;
    let url = roster_url(base, league);
    let resp = client
        .get(&url)
        .header(ACCEPT, "application/json")
        .send()
        .with_context(|| format!("roster request failed: {url}"))?;
    let status = resp.status();
    let body = resp.text().context("failed reading roster body")?;
    if !status.is_success() {
        return Err(anyhow::anyhow!("http {status}: {body}"));
    }
    parse_roster_json(&body)
}

pub fn parse_roster_json(raw: &str) -> Result<Vec<RosterPlayer>> {
    let value: Value = serde_json::from_str(raw).context("invalid roster json")?;
    let items = match value {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items,
        // Some deployments wrap the list as `{ "data": [...] }`.
        Value::Object(mut obj) => match obj.remove("data") {
            Some(Value::Array(items)) => items,
            _ => return Err(anyhow::anyhow!("roster json has no player list")),
        },
        _ => return Err(anyhow::anyhow!("roster json is not a list")),
    };

    Ok(items.iter().filter_map(player_from_value).collect())
}

fn player_from_value(value: &Value) -> Option<RosterPlayer> {
    let obj = value.as_object()?;
    let id = loose_string(obj.get("id"))?;
    Some(RosterPlayer {
        id,
        first_name: loose_string(obj.get("first_name")),
        last_name: loose_string(obj.get("last_name")),
        position: loose_string(obj.get("position")),
        team_id: loose_string(obj.get("team_id")),
    })
}

fn loose_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
