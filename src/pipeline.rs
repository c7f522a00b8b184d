use chrono::Utc;
use tracing::{debug, instrument};

use crate::alerts::Alert;
use crate::app::AppContext;
use crate::hub::BroadcastEvent;
use crate::source::SourceMessage;
use crate::state::{ObservationRecord, Reading, ReadingKind};

/// Device label used when a message carries none, matching the firmware's
/// fallback identity.
pub const DEFAULT_DEVICE_ID: &str = "default_device";

/// Processes one canonical telemetry message: appends readings to the history
/// buffers, evaluates the threshold gate, records counters and metrics, and
/// publishes hub events. This is the single logical writer of the time-series
/// state; both the source consumer and the HTTP submit handler funnel through
/// it. Durable persistence of the returned record is the caller's concern.
///
/// All timestamps derive from `msg.received_at` so arrival order and the
/// debounce window are decided by the adapter, not by lock acquisition order.
#[instrument(skip_all, fields(device = msg.device_id.as_deref().unwrap_or(DEFAULT_DEVICE_ID)))]
pub async fn ingest(ctx: &AppContext, msg: SourceMessage) -> ObservationRecord {
    let now = msg.received_at;
    let station = ctx.station_name().to_string();
    let device_id = msg
        .device_id
        .clone()
        .unwrap_or_else(|| DEFAULT_DEVICE_ID.to_string());

    if let Some(value) = msg.temperature {
        let reading = Reading {
            kind: ReadingKind::Temperature,
            value,
            timestamp: now,
        };
        ctx.state.record_reading(reading).await;
        ctx.metrics.inc_reading(&station, ReadingKind::Temperature);
        publish(ctx, &station, BroadcastEvent::reading(reading));
    }

    if let Some(value) = msg.humidity {
        let reading = Reading {
            kind: ReadingKind::Humidity,
            value,
            timestamp: now,
        };
        ctx.state.record_reading(reading).await;
        ctx.metrics.inc_reading(&station, ReadingKind::Humidity);
        publish(ctx, &station, BroadcastEvent::reading(reading));
    }

    // Threshold evaluation applies to temperature only; humidity readings
    // never raise alerts (observed device behavior, preserved literally).
    let mut over_threshold = false;
    if let Some(value) = msg.temperature {
        let mut gate = ctx.gate.lock().await;
        over_threshold = gate.is_exceeded(value);
        if gate.evaluate(value, now) {
            let alert =
                Alert::threshold_exceeded(value, gate.threshold(), Some(device_id.clone()), now);
            drop(gate);
            debug!(value, "temperature threshold exceeded; raising alert");
            ctx.state.record_alert(alert.clone()).await;
            ctx.metrics.inc_alert(&station, alert.kind);
            publish(ctx, &station, BroadcastEvent::EmergencyAlert(alert.clone()));
            shadow_save_alert(ctx, alert);
        }
    }

    let record = ObservationRecord {
        temperature: msg.temperature,
        humidity: msg.humidity,
        emergency: msg.emergency || over_threshold,
        device_id,
        created_at: now,
    };
    ctx.state.record_observation(record.clone()).await;
    record
}

/// Raises a system alert outside the threshold/cooldown path: connectivity
/// transitions and malformed payloads. Always increments the system counter.
pub async fn raise_system_alert(ctx: &AppContext, message: impl Into<String>) -> Alert {
    let alert = Alert::system(message, Utc::now());
    let station = ctx.station_name().to_string();
    ctx.state.record_alert(alert.clone()).await;
    ctx.metrics.inc_alert(&station, alert.kind);
    publish(ctx, &station, BroadcastEvent::EmergencyAlert(alert.clone()));
    shadow_save_alert(ctx, alert.clone());
    alert
}

/// Creates a client-submitted emergency unconditionally. Does not advance the
/// gate's cooldown window, so a manual alert cannot suppress a later
/// threshold alert. The caller awaits its own shadow save to surface any
/// degradation notice.
pub async fn raise_manual_alert(
    ctx: &AppContext,
    temperature: Option<f64>,
    message: Option<String>,
    device_id: Option<String>,
) -> Alert {
    let threshold = ctx.config.ingest.temperature_threshold;
    let device_id = device_id.or_else(|| Some(DEFAULT_DEVICE_ID.to_string()));
    let alert = Alert::manual(temperature, threshold, message, device_id, Utc::now());
    let station = ctx.station_name().to_string();
    ctx.state.record_alert(alert.clone()).await;
    ctx.metrics.inc_alert(&station, alert.kind);
    publish(ctx, &station, BroadcastEvent::EmergencyAlert(alert.clone()));
    alert
}

fn publish(ctx: &AppContext, station: &str, event: BroadcastEvent) {
    let name = event.name();
    ctx.hub.publish(event);
    ctx.metrics.inc_event(station, name);
}

/// Fire-and-forget durable copy; the in-memory ledger stays authoritative.
fn shadow_save_alert(ctx: &AppContext, alert: Alert) {
    let store = ctx.store.clone();
    tokio::spawn(async move {
        store.save_alert(alert).await;
    });
}
