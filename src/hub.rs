use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::alerts::Alert;
use crate::state::{Reading, ReadingKind, SessionRecord, SharedState};

/// Events in flight per observer before a slow one starts lagging.
const HUB_CHANNEL_CAP: usize = 256;

/// Payload for per-kind reading updates.
#[derive(Debug, Clone, Serialize)]
pub struct ReadingUpdate {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl From<Reading> for ReadingUpdate {
    fn from(reading: Reading) -> Self {
        Self {
            value: reading.value,
            timestamp: reading.timestamp,
        }
    }
}

/// One live event on the observer wire, serialized as
/// `{ "event": "<name>", "data": <payload> }`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum BroadcastEvent {
    TemperatureUpdate(ReadingUpdate),
    HumidityUpdate(ReadingUpdate),
    EmergencyAlert(Alert),
    AlertResolved { id: String },
    SessionUpdate(SessionRecord),
    ActiveEmergencies(Vec<Alert>),
}

impl BroadcastEvent {
    pub fn reading(reading: Reading) -> Self {
        match reading.kind {
            ReadingKind::Temperature => BroadcastEvent::TemperatureUpdate(reading.into()),
            ReadingKind::Humidity => BroadcastEvent::HumidityUpdate(reading.into()),
        }
    }

    /// Wire name, used as the metrics label for published events.
    pub fn name(&self) -> &'static str {
        match self {
            BroadcastEvent::TemperatureUpdate(_) => "temperature-update",
            BroadcastEvent::HumidityUpdate(_) => "humidity-update",
            BroadcastEvent::EmergencyAlert(_) => "emergency-alert",
            BroadcastEvent::AlertResolved { .. } => "alert-resolved",
            BroadcastEvent::SessionUpdate(_) => "session-update",
            BroadcastEvent::ActiveEmergencies(_) => "active-emergencies",
        }
    }
}

/// Fan-out hub for connected observers. Membership is the broadcast
/// channel's receiver set: `subscribe` joins, dropping the receiver leaves.
/// Publishing with no observers is a silent no-op.
#[derive(Clone)]
pub struct Hub {
    sender: broadcast::Sender<BroadcastEvent>,
}

impl Hub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(HUB_CHANNEL_CAP);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.sender.subscribe()
    }

    /// Delivers the event to every currently connected observer. Returns the
    /// number of observers that received it.
    pub fn publish(&self, event: BroadcastEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn observer_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

/// Initial-state frames for a new observer: the open alerts, then the latest
/// reading per kind when present. The caller must subscribe *before* building
/// the snapshot so no live event can fall between snapshot and relay.
pub async fn snapshot_events(state: &SharedState) -> Vec<BroadcastEvent> {
    let mut events = vec![BroadcastEvent::ActiveEmergencies(state.open_alerts().await)];
    if let Some(reading) = state.latest(ReadingKind::Temperature).await {
        events.push(BroadcastEvent::reading(reading));
    }
    if let Some(reading) = state.latest(ReadingKind::Humidity).await {
        events.push(BroadcastEvent::reading(reading));
    }
    events
}
