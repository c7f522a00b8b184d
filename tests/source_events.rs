mod support;

use std::time::Duration;

use envmon::alerts::{Alert, AlertKind};
use envmon::app::AppContext;
use envmon::source::{self, SourceEvent};
use envmon::state::ReadingKind;

/// The consumer drains the channel on its own task, so assertions poll the
/// state with a bounded wait instead of racing the send.
async fn wait_for_open_alerts(ctx: &AppContext, expected: usize) -> Vec<Alert> {
    for _ in 0..200 {
        let open = ctx.state.open_alerts().await;
        if open.len() >= expected {
            return open;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("expected {expected} open alerts before timeout");
}

async fn wait_for_history(ctx: &AppContext, kind: ReadingKind, expected: usize) {
    for _ in 0..200 {
        if ctx.state.history_len(kind).await >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("expected {expected} readings before timeout");
}

#[tokio::test]
async fn malformed_payloads_raise_a_system_alert_and_count() {
    let ctx = support::degraded_ctx(50.0, 60, 16);
    let (handles, events) = source::spawn_tasks(ctx.clone());

    events
        .send(SourceEvent::Payload(b"not json".to_vec()))
        .await
        .expect("send");

    let open = wait_for_open_alerts(&ctx, 1).await;
    assert_eq!(open[0].kind, AlertKind::System);
    assert!(open[0].message.contains("malformed"));
    assert_eq!(ctx.state.alert_counters().await.system, 1);
    assert_eq!(ctx.state.history_len(ReadingKind::Temperature).await, 0);

    let text = ctx.metrics.encode().expect("encode");
    assert!(
        text.contains("envmon_malformed_payloads_total"),
        "dropped payload must be counted: {text}"
    );

    for handle in handles {
        handle.abort();
    }
}

#[tokio::test]
async fn connection_changes_raise_system_alerts() {
    let ctx = support::degraded_ctx(50.0, 60, 16);
    let (handles, events) = source::spawn_tasks(ctx.clone());

    events.send(SourceEvent::Connected).await.expect("send");
    events
        .send(SourceEvent::Disconnected("socket timeout".to_string()))
        .await
        .expect("send");

    let open = wait_for_open_alerts(&ctx, 2).await;
    assert!(open.iter().all(|alert| alert.kind == AlertKind::System));
    assert!(open[0].message.contains("connected"));
    assert!(open[1].message.contains("disconnected: socket timeout"));
    assert_eq!(ctx.state.alert_counters().await.system, 2);

    for handle in handles {
        handle.abort();
    }
}

#[tokio::test]
async fn channel_payloads_flow_through_the_pipeline() {
    let ctx = support::degraded_ctx(50.0, 60, 16);
    let (handles, events) = source::spawn_tasks(ctx.clone());

    events
        .send(SourceEvent::Payload(
            br#"{"temperature": 36.5, "humidity": 61.0, "device_id": "grill-1"}"#.to_vec(),
        ))
        .await
        .expect("send");

    wait_for_history(&ctx, ReadingKind::Temperature, 1).await;
    wait_for_history(&ctx, ReadingKind::Humidity, 1).await;

    let latest = ctx
        .state
        .latest(ReadingKind::Temperature)
        .await
        .expect("reading");
    assert!((latest.value - 36.5).abs() < 1e-9);
    assert!(ctx.state.open_alerts().await.is_empty());

    for handle in handles {
        handle.abort();
    }
}
