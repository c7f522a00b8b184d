use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::app::AppContext;
use crate::source::{SYNTHETIC_LOOP, SourceEvent};

/// Spawns the synthetic telemetry producer: a stand-in device emitting one
/// JSON payload per interval through the same channel a real transport would.
/// Values land in [30, 55)°C and [40, 80)%, so temperatures over the default
/// threshold produce real alerts end to end.
pub fn spawn(ctx: AppContext, tx: mpsc::Sender<SourceEvent>) -> JoinHandle<()> {
    let interval = ctx.config.source.synthetic_interval;
    super::spawn_loop(
        ctx,
        SYNTHETIC_LOOP,
        interval,
        Duration::from_millis(200),
        move |ctx| {
            let tx = tx.clone();
            Box::pin(async move { emit_once(&ctx, &tx).await })
        },
    )
}

async fn emit_once(ctx: &AppContext, tx: &mpsc::Sender<SourceEvent>) -> Result<()> {
    let temperature = round_tenth(30.0 + rand::random::<f64>() * 25.0);
    let humidity = round_tenth(40.0 + rand::random::<f64>() * 40.0);

    let payload = serde_json::json!({
        "temperature": temperature,
        "humidity": humidity,
        "device_id": ctx.config.source.device_id,
    });

    tx.send(SourceEvent::Payload(serde_json::to_vec(&payload)?))
        .await
        .context("telemetry source channel closed")?;

    debug!(temperature, humidity, "generated synthetic reading");
    Ok(())
}

// The firmware reports one decimal place; the generator matches it.
fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{SOURCE_CHANNEL_CAP, decode_payload};
    use chrono::Utc;

    #[test]
    fn rounding_keeps_one_decimal() {
        assert!((round_tenth(36.55) - 36.6).abs() < 1e-9);
        assert!((round_tenth(36.449) - 36.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn generated_payloads_decode_as_canonical_messages() {
        let payload = serde_json::json!({
            "temperature": round_tenth(42.0),
            "humidity": round_tenth(61.3),
            "device_id": "mock_device",
        });
        let bytes = serde_json::to_vec(&payload).expect("encode");

        let (tx, mut rx) = mpsc::channel(SOURCE_CHANNEL_CAP);
        tx.send(SourceEvent::Payload(bytes)).await.expect("send");

        match rx.recv().await.expect("event") {
            SourceEvent::Payload(bytes) => {
                let msg = decode_payload(&bytes, Utc::now()).expect("decode");
                assert_eq!(msg.device_id.as_deref(), Some("mock_device"));
                assert!(msg.temperature.is_some());
                assert!(msg.humidity.is_some());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
