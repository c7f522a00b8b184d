use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::app::AppContext;
use crate::pipeline;

mod synthetic;

pub const SYNTHETIC_LOOP: &str = "synthetic";

/// Inbound events slack before a producer starts waiting on the channel.
const SOURCE_CHANNEL_CAP: usize = 64;

/// One transport-level event from a telemetry source. Producers are
/// transport-specific; the consumer below is shared.
#[derive(Debug)]
pub enum SourceEvent {
    /// A raw message payload to decode and ingest.
    Payload(Vec<u8>),
    Connected,
    Disconnected(String),
}

/// Canonical telemetry message produced by the translation boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceMessage {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub device_id: Option<String>,
    /// Client-flagged emergency hint, mirrored into the stored record.
    pub emergency: bool,
    pub received_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct WirePayload {
    temperature: Option<f64>,
    humidity: Option<f64>,
    device_id: Option<String>,
    #[serde(default)]
    emergency: bool,
}

/// Pure translation boundary: one transport payload to one canonical
/// message. Rejects unparseable JSON, payloads with no readings, and
/// non-finite values; performs no threshold logic and no persistence.
pub fn decode_payload(payload: &[u8], received_at: DateTime<Utc>) -> Result<SourceMessage> {
    let wire: WirePayload = serde_json::from_slice(payload)?;

    if wire.temperature.is_none() && wire.humidity.is_none() {
        bail!("payload carries neither temperature nor humidity");
    }
    for value in [wire.temperature, wire.humidity].into_iter().flatten() {
        if !value.is_finite() {
            bail!("payload carries a non-finite reading value");
        }
    }

    Ok(SourceMessage {
        temperature: wire.temperature,
        humidity: wire.humidity,
        device_id: wire.device_id,
        emergency: wire.emergency,
        received_at,
    })
}

/// Spawn the source consumer and any configured producers. The returned
/// handles are aborted at shutdown; the returned sender is the injection
/// point for transport producers, and the channel stays open (keeping the
/// consumer alive) for as long as the caller holds it.
pub fn spawn_tasks(ctx: AppContext) -> (Vec<JoinHandle<()>>, mpsc::Sender<SourceEvent>) {
    let (tx, rx) = mpsc::channel(SOURCE_CHANNEL_CAP);

    let mut handles = vec![spawn_consumer(ctx.clone(), rx)];
    if ctx.config.source.synthetic {
        handles.push(synthetic::spawn(ctx, tx.clone()));
    } else {
        info!("no telemetry producer configured; ingesting over HTTP and the source channel");
    }
    (handles, tx)
}

/// Sequential consumer: one task drains the channel, so readings are
/// processed and broadcast in arrival order.
fn spawn_consumer(ctx: AppContext, mut rx: mpsc::Receiver<SourceEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            handle_event(&ctx, event).await;
        }
        info!("telemetry source channel closed");
    })
}

async fn handle_event(ctx: &AppContext, event: SourceEvent) {
    match event {
        SourceEvent::Payload(payload) => match decode_payload(&payload, Utc::now()) {
            Ok(msg) => {
                let record = pipeline::ingest(ctx, msg).await;
                let store = ctx.store.clone();
                tokio::spawn(async move {
                    store.save_observation(record).await;
                });
            }
            Err(err) => {
                warn!(error = ?err, "dropping malformed telemetry payload");
                ctx.metrics.inc_malformed(ctx.station_name());
                pipeline::raise_system_alert(
                    ctx,
                    format!("Dropped malformed telemetry payload: {err}"),
                )
                .await;
            }
        },
        SourceEvent::Connected => {
            info!("telemetry source connected");
            pipeline::raise_system_alert(ctx, "Telemetry source connected").await;
        }
        SourceEvent::Disconnected(reason) => {
            warn!(reason = %reason, "telemetry source disconnected");
            pipeline::raise_system_alert(
                ctx,
                format!("Telemetry source disconnected: {reason}"),
            )
            .await;
        }
    }
}

type LoopFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Fixed-interval loop harness for producer tasks: immediate first tick,
/// per-iteration duration observation, budget warning, loop-health records.
pub(crate) fn spawn_loop<F>(
    ctx: AppContext,
    loop_name: &'static str,
    interval: Duration,
    budget: Duration,
    mut poll_fn: F,
) -> JoinHandle<()>
where
    F: FnMut(AppContext) -> LoopFuture + Send + 'static,
{
    tokio::spawn(async move {
        info!(
            loop_name,
            interval = ?interval,
            budget = ?budget,
            "starting source loop"
        );

        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(err) = poll_once(ctx.clone(), loop_name, budget, &mut poll_fn).await {
                error!(loop_name, error = ?err, "source loop iteration failed");
            }
        }
    })
}

async fn poll_once<F>(
    ctx: AppContext,
    loop_name: &'static str,
    budget: Duration,
    poll_fn: &mut F,
) -> Result<()>
where
    F: FnMut(AppContext) -> LoopFuture + Send,
{
    let start = Instant::now();
    match poll_fn(ctx.clone()).await {
        Ok(_) => {
            let elapsed = start.elapsed();
            ctx.metrics.observe_duration(loop_name, elapsed);
            if elapsed > budget {
                warn!(
                    loop_name,
                    elapsed = ?elapsed,
                    budget = ?budget,
                    "loop exceeded budget"
                );
            }
            ctx.metrics.record_success(loop_name, true);
            ctx.state.record_loop_success(loop_name).await;
            Ok(())
        }
        Err(err) => {
            ctx.metrics.record_success(loop_name, false);
            ctx.metrics.inc_error(loop_name);
            ctx.state
                .record_loop_failure(loop_name, err.to_string())
                .await;
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_accepts_partial_readings() {
        let now = Utc::now();
        let msg = decode_payload(br#"{"temperature": 36.5, "device_id": "grill-1"}"#, now)
            .expect("decode");
        assert_eq!(msg.temperature, Some(36.5));
        assert_eq!(msg.humidity, None);
        assert_eq!(msg.device_id.as_deref(), Some("grill-1"));
        assert!(!msg.emergency);
        assert_eq!(msg.received_at, now);
    }

    #[test]
    fn decode_rejects_garbage_and_empty_payloads() {
        let now = Utc::now();
        assert!(decode_payload(b"not json", now).is_err());
        assert!(decode_payload(br#"{"device_id": "grill-1"}"#, now).is_err());
        assert!(decode_payload(b"{}", now).is_err());
    }

    #[test]
    fn decode_rejects_non_finite_values() {
        let now = Utc::now();
        // 1e999 overflows f64; rejected either at parse or at the finite check.
        assert!(decode_payload(br#"{"temperature": 1e999}"#, now).is_err());
    }

    #[test]
    fn decode_carries_the_emergency_hint() {
        let now = Utc::now();
        let msg = decode_payload(br#"{"temperature": 60.0, "emergency": true}"#, now)
            .expect("decode");
        assert!(msg.emergency);
    }
}
