mod support;

use chrono::{Duration, TimeZone, Utc};
use envmon::alerts::{AlertKind, ResolveError, ResolvedFilter};
use envmon::pipeline;
use envmon::source::SourceMessage;

fn message(temperature: f64, at: chrono::DateTime<Utc>) -> SourceMessage {
    SourceMessage {
        temperature: Some(temperature),
        humidity: None,
        device_id: Some("grill-1".to_string()),
        emergency: false,
        received_at: at,
    }
}

#[tokio::test]
async fn cooldown_debounces_threshold_alerts() {
    let ctx = support::degraded_ctx(34.5, 60, 100);
    let base = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

    // 35.0 at t=0 fires; 36.0 at t=10s is inside the window; 34.0 at t=70s
    // is under threshold; 40.0 at t=75s fires again.
    pipeline::ingest(&ctx, message(35.0, base)).await;
    pipeline::ingest(&ctx, message(36.0, base + Duration::seconds(10))).await;
    pipeline::ingest(&ctx, message(34.0, base + Duration::seconds(70))).await;
    pipeline::ingest(&ctx, message(40.0, base + Duration::seconds(75))).await;

    let alerts = ctx.state.open_alerts().await;
    assert_eq!(alerts.len(), 2, "expected exactly two alerts");
    assert!((alerts[0].value.unwrap() - 35.0).abs() < 1e-9);
    assert!((alerts[1].value.unwrap() - 40.0).abs() < 1e-9);
    assert_eq!(alerts[0].message, "Emergency: Temperature exceeds 34.5°C!");
    assert_eq!(alerts[0].device_id.as_deref(), Some("grill-1"));

    let counters = ctx.state.alert_counters().await;
    assert_eq!(counters.temperature, 2);
    assert_eq!(counters.total(), 2);
}

#[tokio::test]
async fn over_threshold_readings_are_flagged_even_when_debounced() {
    let ctx = support::degraded_ctx(34.5, 60, 100);
    let base = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

    pipeline::ingest(&ctx, message(35.0, base)).await;
    let absorbed = pipeline::ingest(&ctx, message(36.0, base + Duration::seconds(10))).await;

    // No second alert, but the stored record still marks the exceedance.
    assert_eq!(ctx.state.open_alerts().await.len(), 1);
    assert!(absorbed.emergency);
}

#[tokio::test]
async fn resolve_flips_exactly_once() {
    let ctx = support::degraded_ctx(50.0, 60, 100);
    let alert = pipeline::raise_manual_alert(&ctx, Some(61.0), None, None).await;

    let first_resolved_at = Utc::now();
    let resolved = ctx
        .state
        .resolve_alert(&alert.id, first_resolved_at)
        .await
        .expect("first resolve");
    assert!(resolved.resolved);
    assert_eq!(resolved.resolved_at, Some(first_resolved_at));

    // Second attempt fails and leaves the original stamp untouched.
    let second = ctx
        .state
        .resolve_alert(&alert.id, first_resolved_at + Duration::seconds(30))
        .await;
    assert_eq!(second.unwrap_err(), ResolveError::AlreadyResolved);

    let ledger = ctx.state.alerts_filtered(ResolvedFilter::Resolved).await;
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].resolved_at, Some(first_resolved_at));

    assert_eq!(
        ctx.state
            .resolve_alert("no-such-id", Utc::now())
            .await
            .unwrap_err(),
        ResolveError::NotFound
    );
}

#[tokio::test]
async fn system_alerts_bypass_the_cooldown_gate() {
    let ctx = support::degraded_ctx(34.5, 60, 100);
    let base = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

    pipeline::raise_system_alert(&ctx, "Telemetry source disconnected: timeout").await;
    pipeline::raise_system_alert(&ctx, "Telemetry source connected").await;

    // The gate never fired, so a threshold alert is still available.
    pipeline::ingest(&ctx, message(40.0, base)).await;

    let counters = ctx.state.alert_counters().await;
    assert_eq!(counters.system, 2);
    assert_eq!(counters.temperature, 1);

    let alerts = ctx.state.open_alerts().await;
    assert_eq!(alerts.len(), 3);
    assert_eq!(alerts[0].kind, AlertKind::System);
    assert!(alerts[0].value.is_none());
}

#[tokio::test]
async fn manual_alerts_do_not_advance_the_gate() {
    let ctx = support::degraded_ctx(34.5, 60, 100);
    let base = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

    let manual = pipeline::raise_manual_alert(
        &ctx,
        Some(50.0),
        Some("Manual override".to_string()),
        Some("grill-1".to_string()),
    )
    .await;
    assert_eq!(manual.message, "Manual override");

    // A threshold exceedance right after still raises its own alert.
    pipeline::ingest(&ctx, message(40.0, base)).await;

    let counters = ctx.state.alert_counters().await;
    assert_eq!(counters.temperature, 2);
}

#[tokio::test]
async fn humidity_never_raises_threshold_alerts() {
    let ctx = support::degraded_ctx(34.5, 60, 100);

    pipeline::ingest(
        &ctx,
        SourceMessage {
            temperature: None,
            humidity: Some(99.0),
            device_id: None,
            emergency: false,
            received_at: Utc::now(),
        },
    )
    .await;

    let counters = ctx.state.alert_counters().await;
    assert_eq!(counters.total(), 0);
    assert!(ctx.state.open_alerts().await.is_empty());
}
