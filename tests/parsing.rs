use std::fs;
use std::path::PathBuf;

use signaldesk::event::{ObservationError, parse_event_json};
use signaldesk::roster::parse_roster_json;

fn read_fixture(name: &str) -> String {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path.push(name);
    fs::read_to_string(path).expect("fixture file should be readable")
}

#[test]
fn parses_replay_fixture_records() {
    let raw = read_fixture("replay_session.jsonl");
    let (ok, bad): (Vec<_>, Vec<_>) = raw
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_event_json)
        .partition(Result::is_ok);
    assert!(ok.len() > 150);
    assert_eq!(bad.len(), 2);
}

#[test]
fn missing_fields_are_named() {
    let err = parse_event_json(r#"{"player_id":"P1","stat":"points","value":1,"projection":2}"#)
        .expect_err("ts is required");
    assert_eq!(err, ObservationError::MissingField("ts"));

    let err = parse_event_json(r#"{"ts":1,"player_id":"P1","stat":"points","value":1}"#)
        .expect_err("projection is required");
    assert_eq!(err, ObservationError::MissingField("projection"));

    let err = parse_event_json(r#"{"ts":1,"player_id":" ","stat":"points","value":1,"projection":2}"#)
        .expect_err("blank id");
    assert_eq!(err, ObservationError::EmptyField("player_id"));
}

#[test]
fn non_objects_and_bad_json_are_rejected() {
    assert_eq!(parse_event_json("[1,2,3]"), Err(ObservationError::NotAnObject));
    assert!(matches!(parse_event_json("{"), Err(ObservationError::Json(_))));
    assert!(matches!(
        parse_event_json(r#"{"ts":1,"player_id":"P1","stat":"points","value":true,"projection":2}"#),
        Err(ObservationError::NonNumeric { field: "value", .. })
    ));
    assert!(matches!(
        parse_event_json(r#"{"ts":1,"player_id":"a:b","stat":"points","value":1,"projection":2}"#),
        Err(ObservationError::KeySeparator("player_id"))
    ));
}

#[test]
fn parses_wrapped_roster_fixture() {
    let raw = read_fixture("roster_players.json");
    let players = parse_roster_json(&raw).expect("fixture should parse");
    assert_eq!(players.len(), 3);
    assert_eq!(players[0].id, "1001");
    assert_eq!(players[0].team_id.as_deref(), Some("7"));
    assert_eq!(players[0].display_name(), "Jalen Hart");
    assert_eq!(players[1].display_name(), "Marcus");
    assert_eq!(players[2].display_name(), "1003");
}

#[test]
fn roster_accepts_bare_array_and_null() {
    let players =
        parse_roster_json(r#"[{"id":"x1","first_name":"Lee"},{"first_name":"no id"}]"#)
            .expect("array should parse");
    assert_eq!(players.len(), 1);
    assert!(parse_roster_json("null").expect("null should parse").is_empty());
    assert!(parse_roster_json(r#"{"players":[]}"#).is_err());
}
