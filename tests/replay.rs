use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use signaldesk::replay::{ReplayInput, read_records, replay, summarize};
use signaldesk::state::Controls;

fn fixture() -> ReplayInput {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests/fixtures/replay_session.jsonl");
    let file = File::open(path).expect("fixture file should be readable");
    read_records(BufReader::new(file)).expect("fixture should read")
}

#[test]
fn replay_summary_accounts_for_every_line() {
    let input = fixture();
    let records = input.records.len();
    let malformed = input.malformed.len();
    assert_eq!(malformed, 2);

    let outcome = replay(input.records, 4, true, Controls::default());
    let summary = summarize(&outcome, malformed);
    assert_eq!(summary.records, records + malformed);
    assert_eq!(summary.accepted as usize, records);
    assert_eq!(summary.rejected, 2);
    assert_eq!(summary.keys, 4);
    assert_eq!(
        summary.calibration.total + summary.suppressed,
        summary.accepted
    );
    assert!(summary.alerts <= 20);
    assert_eq!(summary.stats["points"].keys, 3);
    assert_eq!(summary.stats["assists"].keys, 1);
    let json = serde_json::to_string(&summary).expect("summary serializes");
    assert!(json.contains("\"calibration_pct\""));
}

#[test]
fn shard_count_does_not_change_results() {
    let single = replay(fixture().records, 1, true, Controls::default());
    let sharded = replay(fixture().records, 8, true, Controls::default());

    assert_eq!(single.state.latest, sharded.state.latest);
    assert_eq!(single.state.calibration, sharded.state.calibration);
    assert_eq!(single.state.suppressed, sharded.state.suppressed);
    assert_eq!(single.state.recent_alerts, sharded.state.recent_alerts);
}

#[test]
fn pooled_stat_moments_match_a_single_pass() {
    let input = fixture();
    let points: Vec<f64> = input
        .records
        .iter()
        .filter(|o| o.stat == "points")
        .map(|o| o.value)
        .collect();
    let outcome = replay(input.records, 3, true, Controls::default());
    let summary = summarize(&outcome, 0);

    let n = points.len() as f64;
    let mean = points.iter().sum::<f64>() / n;
    let var = points.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let pooled = &summary.stats["points"];
    assert_eq!(pooled.count as usize, points.len());
    assert!((pooled.mean - mean).abs() < 1e-9);
    assert!((pooled.std_dev - var.sqrt()).abs() < 1e-9);
}
