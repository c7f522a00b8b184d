mod support;

use chrono::{Duration, TimeZone, Utc};
use envmon::pipeline;
use envmon::source::SourceMessage;
use envmon::state::{HistoryBuffer, Reading, ReadingKind};

fn reading(value: f64, at: chrono::DateTime<Utc>) -> Reading {
    Reading {
        kind: ReadingKind::Temperature,
        value,
        timestamp: at,
    }
}

#[test]
fn capacity_bound_holds_for_any_append_sequence() {
    let base = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let mut buffer = HistoryBuffer::new(10);

    for i in 0..100 {
        buffer.push(reading(i as f64, base + Duration::seconds(i)));
        assert!(buffer.len() <= 10, "capacity exceeded at append {i}");
    }

    // Eviction is strictly oldest-first: only the last ten survive.
    let values: Vec<f64> = buffer.to_vec().iter().map(|r| r.value).collect();
    let expected: Vec<f64> = (90..100).map(|i| i as f64).collect();
    assert_eq!(values, expected);
}

#[tokio::test]
async fn pipeline_ingest_evicts_through_the_same_buffer() {
    // Capacity 3: appending A,B,C,D leaves exactly [B,C,D].
    let ctx = support::degraded_ctx(100.0, 60, 3);
    let base = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

    for (offset, value) in [(0, 1.0), (10, 2.0), (20, 3.0), (30, 4.0)] {
        pipeline::ingest(
            &ctx,
            SourceMessage {
                temperature: Some(value),
                humidity: None,
                device_id: None,
                emergency: false,
                received_at: base + Duration::seconds(offset),
            },
        )
        .await;
    }

    assert_eq!(ctx.state.history_len(ReadingKind::Temperature).await, 3);
    let survivors: Vec<f64> = ctx
        .state
        .readings_since(ReadingKind::Temperature, base)
        .await
        .iter()
        .map(|r| r.value)
        .collect();
    assert_eq!(survivors, vec![2.0, 3.0, 4.0]);
}

#[tokio::test]
async fn since_query_is_restartable_and_non_mutating() {
    let ctx = support::degraded_ctx(100.0, 60, 100);
    let now = Utc::now();
    for minutes_ago in [30i64, 12, 8, 2] {
        ctx.state
            .record_reading(reading(
                minutes_ago as f64,
                now - Duration::minutes(minutes_ago),
            ))
            .await;
    }

    let cutoff = now - Duration::minutes(10);
    let first = ctx
        .state
        .readings_since(ReadingKind::Temperature, cutoff)
        .await;
    let second = ctx
        .state
        .readings_since(ReadingKind::Temperature, cutoff)
        .await;

    let values: Vec<f64> = first.iter().map(|r| r.value).collect();
    assert_eq!(values, vec![8.0, 2.0]);
    assert_eq!(first.len(), second.len(), "query must not consume the buffer");
    assert_eq!(ctx.state.history_len(ReadingKind::Temperature).await, 4);
}
