use signaldesk::roster::RosterPlayer;
use signaldesk::signal::{Direction, InsightMessage, Reason, Status};
use signaldesk::state::{
    ALERT_LOG_CAPACITY, Controls, DeskState, Delta, FeedStatus, SERIES_CAPACITY, Snapshot,
    apply_delta_at,
};

fn insight(key: &str, status: Status, value: f64, projection: f64) -> InsightMessage {
    InsightMessage {
        key: key.to_string(),
        ts: 0,
        insight: "Stable".to_string(),
        confidence: 50.0,
        status,
        z: 0.5,
        ewma: value,
        value,
        projection,
        reasons: vec![
            Reason {
                feature: "z_score".to_string(),
                direction: Direction::Up,
                magnitude: 0.5,
            },
            Reason {
                feature: "ewma_delta".to_string(),
                direction: Direction::Up,
                magnitude: 0.0,
            },
        ],
        risk: Some(30.0),
        drift: false,
    }
}

fn no_cooldowns(risk: u8) -> DeskState {
    DeskState::with_controls(Controls {
        risk,
        cooldowns: false,
        ..Controls::default()
    })
}

#[test]
fn cooldown_suppresses_updates_inside_window() {
    let mut state = DeskState::new();
    assert!(state.controls.cooldowns);

    apply_delta_at(&mut state, Delta::Insight(insight("A:points", Status::Normal, 10.0, 10.0)), 1_000);
    apply_delta_at(&mut state, Delta::Insight(insight("A:points", Status::Normal, 11.0, 10.0)), 2_500);
    assert_eq!(state.latest["A:points"].value, 10.0);
    assert_eq!(state.suppressed, 1);
    assert_eq!(state.calibration.total, 1);
    assert_eq!(state.series["A:points"].len(), 1);

    // Other keys are throttled independently.
    apply_delta_at(&mut state, Delta::Insight(insight("B:points", Status::Normal, 3.0, 3.0)), 2_600);
    assert!(state.latest.contains_key("B:points"));

    apply_delta_at(&mut state, Delta::Insight(insight("A:points", Status::Normal, 12.0, 10.0)), 3_000);
    assert_eq!(state.latest["A:points"].value, 12.0);
    assert_eq!(state.calibration.total, 3);
}

#[test]
fn disabling_cooldowns_accepts_everything() {
    let mut state = DeskState::new();
    apply_delta_at(&mut state, Delta::SetCooldowns(false), 0);
    for (i, t) in [0, 10, 20].into_iter().enumerate() {
        apply_delta_at(
            &mut state,
            Delta::Insight(insight("A:points", Status::Normal, i as f64, 0.0)),
            t,
        );
    }
    assert_eq!(state.suppressed, 0);
    assert_eq!(state.series["A:points"].len(), 3);
}

#[test]
fn risk_dial_reclassifies_warnings_before_bookkeeping() {
    let mut hot = no_cooldowns(80);
    apply_delta_at(&mut hot, Delta::Insight(insight("A:points", Status::Warning, 1.0, 1.0)), 0);
    assert_eq!(hot.latest["A:points"].status, Status::Alert);
    assert_eq!(hot.recent_alerts.len(), 1);

    let mut cold = no_cooldowns(10);
    apply_delta_at(&mut cold, Delta::Insight(insight("A:points", Status::Warning, 1.0, 1.0)), 0);
    assert_eq!(cold.latest["A:points"].status, Status::Normal);
    assert!(cold.recent_alerts.is_empty());

    let mut neutral = no_cooldowns(45);
    apply_delta_at(&mut neutral, Delta::Insight(insight("A:points", Status::Warning, 1.0, 1.0)), 0);
    assert_eq!(neutral.latest["A:points"].status, Status::Warning);
    assert!(neutral.recent_alerts.is_empty());
}

#[test]
fn set_risk_takes_effect_on_next_message() {
    let mut state = no_cooldowns(40);
    apply_delta_at(&mut state, Delta::SetRisk(200), 0);
    assert_eq!(state.controls.risk, 100);
    apply_delta_at(&mut state, Delta::Insight(insight("A:points", Status::Warning, 1.0, 1.0)), 0);
    assert_eq!(state.latest["A:points"].status, Status::Alert);
}

#[test]
fn series_buffer_keeps_latest_sixty_points() {
    let mut state = no_cooldowns(40);
    for i in 0..100 {
        apply_delta_at(
            &mut state,
            Delta::Insight(insight("A:points", Status::Normal, i as f64, 50.0)),
            i * 10,
        );
    }
    let series = &state.series["A:points"];
    assert_eq!(series.len(), SERIES_CAPACITY);
    assert_eq!(series.front().map(|p| p.v), Some(40.0));
    assert_eq!(series.back().map(|p| (p.t, p.v, p.p)), Some((990, 99.0, 50.0)));
}

#[test]
fn alert_log_is_bounded_and_newest_first() {
    let mut state = no_cooldowns(40);
    for i in 0..25 {
        apply_delta_at(
            &mut state,
            Delta::Insight(insight(&format!("P{i}:points"), Status::Alert, 1.0, 1.0)),
            i * 100,
        );
    }
    assert_eq!(state.recent_alerts.len(), ALERT_LOG_CAPACITY);
    assert_eq!(state.recent_alerts.front().map(|a| a.key.as_str()), Some("P24:points"));
    assert_eq!(state.recent_alerts.back().map(|a| a.key.as_str()), Some("P5:points"));
    assert_eq!(state.recent_alerts.front().map(|a| a.ts), Some(2_400));
}

#[test]
fn calibration_counts_near_misses_strictly() {
    let mut state = no_cooldowns(40);
    for i in 0..10 {
        apply_delta_at(
            &mut state,
            Delta::Insight(insight("A:points", Status::Normal, 20.0 + i as f64 * 0.4, 20.0)),
            i,
        );
    }
    assert_eq!((state.calibration.total, state.calibration.hits), (10, 10));

    let mut state = no_cooldowns(40);
    for i in 0..9 {
        apply_delta_at(&mut state, Delta::Insight(insight("A:points", Status::Normal, 21.0, 20.0)), i);
    }
    // Exactly 5 away is not a hit.
    apply_delta_at(&mut state, Delta::Insight(insight("A:points", Status::Normal, 25.0, 20.0)), 9);
    assert_eq!((state.calibration.total, state.calibration.hits), (10, 9));
}

#[test]
fn snapshot_is_an_owned_serializable_copy() {
    let mut state = no_cooldowns(40);
    apply_delta_at(&mut state, Delta::Insight(insight("A:points", Status::Alert, 30.0, 20.0)), 5);
    let snapshot = state.snapshot();

    apply_delta_at(&mut state, Delta::Insight(insight("A:points", Status::Normal, 31.0, 20.0)), 6);
    assert_eq!(snapshot.series["A:points"].len(), 1);
    assert_eq!(snapshot.recent_alerts.len(), 1);

    let json = serde_json::to_string(&snapshot).expect("serializes");
    let back: Snapshot = serde_json::from_str(&json).expect("deserializes");
    assert_eq!(back.latest["A:points"], snapshot.latest["A:points"]);
    assert_eq!(back.calibration, snapshot.calibration);
    assert_eq!(back.recent_alerts[0].insight, "Stable");
}

#[test]
fn roster_labels_and_ranking() {
    let mut state = no_cooldowns(40);
    apply_delta_at(
        &mut state,
        Delta::SetRoster(vec![RosterPlayer {
            id: "7".to_string(),
            first_name: Some("Ada".to_string()),
            last_name: Some("Stone".to_string()),
            position: None,
            team_id: None,
        }]),
        0,
    );
    assert_eq!(state.label_for("7"), "Ada Stone");
    assert_eq!(state.label_for("8"), "8");

    apply_delta_at(&mut state, Delta::Insight(insight("7:points", Status::Normal, 1.0, 1.0)), 0);
    apply_delta_at(&mut state, Delta::Insight(insight("8:points", Status::Alert, 1.0, 1.0)), 0);
    let ranked: Vec<&str> = state.ranked_keys().iter().map(|k| k.as_str()).collect();
    assert_eq!(ranked, vec!["8:points", "7:points"]);
}

#[test]
fn feed_status_and_logs_flow_through_deltas() {
    let mut state = DeskState::new();
    apply_delta_at(&mut state, Delta::FeedStatus(FeedStatus::Connected), 0);
    apply_delta_at(&mut state, Delta::Log("[WARN] Dropped record".to_string()), 0);
    assert_eq!(state.feed_status, FeedStatus::Connected);
    assert_eq!(state.logs.back().map(String::as_str), Some("[WARN] Dropped record"));
}

#[test]
fn clock_stepping_backwards_does_not_stall_a_key() {
    let mut state = DeskState::new();
    apply_delta_at(&mut state, Delta::Insight(insight("A:points", Status::Normal, 10.0, 10.0)), 10_000);
    apply_delta_at(&mut state, Delta::Insight(insight("A:points", Status::Normal, 11.0, 10.0)), 5_000);
    assert_eq!(state.latest["A:points"].value, 11.0);
    assert_eq!(state.suppressed, 0);

    // The window restarts from the earlier timestamp.
    apply_delta_at(&mut state, Delta::Insight(insight("A:points", Status::Normal, 12.0, 10.0)), 6_000);
    assert_eq!(state.latest["A:points"].value, 11.0);
    assert_eq!(state.suppressed, 1);
}
