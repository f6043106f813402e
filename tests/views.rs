use signaldesk::roster::RosterPlayer;
use signaldesk::signal::{Direction, InsightMessage, Reason, Status};
use signaldesk::state::{AlertRecord, Controls, DeskState, Delta, apply_delta_at};
use signaldesk::views::{
    HEATMAP_SLOTS, anomaly_radar, confidence_ticker, momentum_heatmap, volatility_board,
};

fn insight(key: &str, z: f64, confidence: f64, ewma: f64, status: Status) -> InsightMessage {
    InsightMessage {
        key: key.to_string(),
        ts: 0,
        insight: "Stable".to_string(),
        confidence,
        status,
        z,
        ewma,
        value: ewma,
        projection: ewma,
        reasons: vec![Reason {
            feature: "z_score".to_string(),
            direction: Direction::of(z),
            magnitude: z.abs(),
        }],
        risk: None,
        drift: false,
    }
}

fn desk() -> DeskState {
    DeskState::with_controls(Controls {
        cooldowns: false,
        ..Controls::default()
    })
}

fn alert_at(ts: i64) -> AlertRecord {
    AlertRecord {
        key: "A:points".to_string(),
        ts,
        insight: "Momentum surge detected".to_string(),
        confidence: 80.0,
        value: None,
        projection: None,
    }
}

#[test]
fn radar_ranks_by_significance_and_keeps_top_four() {
    let mut state = desk();
    let zs = [0.3, 2.7, -2.4, 0.0, 1.2, -0.6];
    for (i, z) in zs.iter().enumerate() {
        let key = format!("P{i}:points");
        apply_delta_at(&mut state, Delta::Insight(insight(&key, *z, 50.0, 10.0, Status::Normal)), 0);
    }
    let radar = anomaly_radar(&state.snapshot());
    assert_eq!(radar.len(), 4);
    assert_eq!(radar[0].key, "P1:points");
    assert_eq!(radar[0].label, "Momentum surge");
    assert_eq!(radar[1].label, "Momentum drop");
    assert_eq!(radar[2].label, "Stability shift");
    assert!(radar.windows(2).all(|w| w[0].significance >= w[1].significance));
    assert!(!radar[0].dwell);
}

#[test]
fn radar_includes_ewma_travel_and_dwell() {
    let mut state = desk();
    for i in 0..40 {
        let ewma = 10.0 + i as f64 * 0.5;
        apply_delta_at(
            &mut state,
            Delta::Insight(insight("A:points", 0.0, 50.0, ewma, Status::Normal)),
            i,
        );
    }
    let radar = anomaly_radar(&state.snapshot());
    // Last 30 points span 14.5 of ewma travel, which saturates.
    assert_eq!(radar[0].significance, 1.0);
    assert!((radar[0].dwell_secs - 9.0).abs() < 1e-9);
    assert!(!radar[0].dwell);
}

#[test]
fn heatmap_buckets_last_minute() {
    let now = 100_000;
    let alerts = vec![alert_at(now), alert_at(now - 30_000), alert_at(now - 60_000), alert_at(now - 61_000)];
    let slots = momentum_heatmap(&alerts, now);
    assert_eq!(slots.len(), HEATMAP_SLOTS);
    assert_eq!(slots[HEATMAP_SLOTS - 1], 1);
    assert_eq!(slots[14], 1);
    assert_eq!(slots[0], 1);
    assert_eq!(slots.iter().sum::<u32>(), 3);
}

#[test]
fn ticker_filters_by_stat_and_sorts() {
    let mut state = desk();
    apply_delta_at(&mut state, Delta::Insight(insight("A:points", 0.0, 40.0, 1.0, Status::Normal)), 0);
    apply_delta_at(&mut state, Delta::Insight(insight("B:points", 0.0, 90.0, 1.0, Status::Normal)), 0);
    apply_delta_at(&mut state, Delta::Insight(insight("B:assists", 0.0, 99.0, 1.0, Status::Normal)), 0);
    for i in 1..12 {
        apply_delta_at(
            &mut state,
            Delta::Insight(insight("A:points", 0.0, 40.0, 1.0 + i as f64, Status::Normal)),
            i,
        );
    }

    let snapshot = state.snapshot();
    let points = confidence_ticker(&snapshot, Some("points"));
    let keys: Vec<&str> = points.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, vec!["B:points", "A:points"]);
    // 12 points for A: last ewma 12, ten back is ewma 3.
    assert_eq!(points[1].delta, 9.0);
    assert_eq!(points[0].delta, 0.0);
    assert_eq!(confidence_ticker(&snapshot, None).len(), 3);
}

#[test]
fn volatility_board_follows_roster_order() {
    let mut state = desk();
    apply_delta_at(&mut state, Delta::Insight(insight("2:points", 0.0, 66.6, 1.0, Status::Alert)), 0);
    let roster: Vec<RosterPlayer> = ["1", "2", "3"]
        .iter()
        .map(|id| RosterPlayer {
            id: id.to_string(),
            first_name: Some(format!("First{id}")),
            last_name: None,
            position: None,
            team_id: None,
        })
        .collect();

    let board = volatility_board(&state.snapshot(), &roster, 2);
    assert_eq!(board.len(), 2);
    assert_eq!(board[0].label, "First1");
    assert_eq!(board[0].confidence, 0);
    assert_eq!(board[0].status, Status::Normal);
    assert_eq!(board[1].key, "2:points");
    assert_eq!(board[1].confidence, 67);
    assert_eq!(board[1].status, Status::Alert);
}
