mod support;

use chrono::{Duration, Utc};
use envmon::analytics;
use envmon::pipeline;
use envmon::state::{Reading, ReadingKind, SharedState};

async fn seed(state: &SharedState, kind: ReadingKind, value: f64, minutes_ago: i64) {
    state
        .record_reading(Reading {
            kind,
            value,
            timestamp: Utc::now() - Duration::minutes(minutes_ago),
        })
        .await;
}

#[tokio::test]
async fn range_series_honors_the_label_window() {
    let state = SharedState::new(100);
    for minutes_ago in [45i64, 18, 9, 4, 1] {
        seed(&state, ReadingKind::Temperature, minutes_ago as f64, minutes_ago).await;
    }

    let now = Utc::now();
    let ten = analytics::range_series(&state, ReadingKind::Temperature, "10m", 500, now).await;
    assert_eq!(ten.values, vec![9.0, 4.0, 1.0]);

    let twenty = analytics::range_series(&state, ReadingKind::Temperature, "20m", 500, now).await;
    assert_eq!(twenty.values, vec![18.0, 9.0, 4.0, 1.0]);

    // Unknown labels fall back to the 20-minute window.
    let unknown = analytics::range_series(&state, ReadingKind::Temperature, "90m", 500, now).await;
    assert_eq!(unknown.values, twenty.values);

    let hour = analytics::range_series(&state, ReadingKind::Temperature, "1h", 500, now).await;
    assert_eq!(hour.values.len(), 5);
    assert_eq!(hour.labels.len(), 5);
}

#[tokio::test]
async fn stats_compare_adjacent_five_minute_windows() {
    let state = SharedState::new(100);

    // Previous window (5-10 minutes ago) averages 40; current averages 44.
    seed(&state, ReadingKind::Temperature, 39.0, 8).await;
    seed(&state, ReadingKind::Temperature, 41.0, 6).await;
    seed(&state, ReadingKind::Temperature, 43.0, 3).await;
    seed(&state, ReadingKind::Temperature, 45.0, 1).await;

    let stats = analytics::stats(&state, Utc::now()).await;
    assert!((stats.avg_temp - 44.0).abs() < 1e-9);
    assert!((stats.temp_trend - 10.0).abs() < 1e-9);

    // No humidity data: averages and trend report zero, not an error.
    assert!(stats.avg_humidity.abs() < 1e-9);
    assert!(stats.humidity_trend.abs() < 1e-9);
    assert!(stats.uptime >= 0.0 && stats.uptime <= 100.0);
}

#[tokio::test]
async fn trend_is_zero_without_a_previous_window() {
    let state = SharedState::new(100);
    seed(&state, ReadingKind::Temperature, 44.0, 2).await;

    let stats = analytics::stats(&state, Utc::now()).await;
    assert!((stats.avg_temp - 44.0).abs() < 1e-9);
    assert!(stats.temp_trend.abs() < 1e-9, "zero denominator guards to 0");
}

#[tokio::test]
async fn distribution_reports_creation_counts_by_kind() {
    let ctx = support::degraded_ctx(34.5, 60, 100);

    pipeline::raise_manual_alert(&ctx, Some(40.0), None, None).await;
    pipeline::raise_system_alert(&ctx, "Telemetry source connected").await;
    pipeline::raise_system_alert(&ctx, "Telemetry source disconnected: timeout").await;

    let distribution = analytics::distribution(&ctx.state).await;
    assert_eq!(distribution.temperature_alerts, 1);
    assert_eq!(distribution.humidity_alerts, 0);
    assert_eq!(distribution.system_alerts, 2);

    // Resolution does not decrement creation counters.
    let open = ctx.state.open_alerts().await;
    ctx.state
        .resolve_alert(&open[0].id, Utc::now())
        .await
        .expect("resolve");
    let after = analytics::distribution(&ctx.state).await;
    assert_eq!(after.temperature_alerts + after.system_alerts, 3);

    let stats = analytics::stats(&ctx.state, Utc::now()).await;
    assert_eq!(stats.total_alerts, 3);
}
