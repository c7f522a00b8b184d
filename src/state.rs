use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::alerts::{Alert, AlertKind, ResolveError, ResolvedFilter};

/// How many recent sessions stay in memory for degraded queries.
const RECENT_SESSION_LIMIT: usize = 256;

/// Which sensor channel a reading belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingKind {
    Temperature,
    Humidity,
}

impl ReadingKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ReadingKind::Temperature => "temperature",
            ReadingKind::Humidity => "humidity",
        }
    }

    /// Parses the path-parameter form used by the series endpoint.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "temperature" => Some(ReadingKind::Temperature),
            "humidity" => Some(ReadingKind::Humidity),
            _ => None,
        }
    }
}

/// One timestamped sensor value. Immutable once created.
#[derive(Debug, Clone, Copy)]
pub struct Reading {
    pub kind: ReadingKind,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Bounded FIFO history for one reading kind. Insertion order is assumed to
/// be chronological; the buffer does not enforce it.
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    points: VecDeque<Reading>,
    capacity: usize,
}

impl HistoryBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            points: VecDeque::new(),
            capacity,
        }
    }

    /// Appends at the tail, evicting from the head once over capacity.
    pub fn push(&mut self, reading: Reading) {
        self.points.push_back(reading);
        while self.points.len() > self.capacity {
            self.points.pop_front();
        }
    }

    pub fn latest(&self) -> Option<Reading> {
        self.points.back().copied()
    }

    /// Readings with `timestamp >= cutoff`, oldest first.
    pub fn since(&self, cutoff: DateTime<Utc>) -> Vec<Reading> {
        self.points
            .iter()
            .filter(|reading| reading.timestamp >= cutoff)
            .copied()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn to_vec(&self) -> Vec<Reading> {
        self.points.iter().copied().collect()
    }
}

/// Monotonic per-kind alert creation counts. Independent of resolution.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct AlertCounters {
    pub temperature: u64,
    pub humidity: u64,
    pub system: u64,
}

impl AlertCounters {
    pub fn increment(&mut self, kind: AlertKind) {
        match kind {
            AlertKind::Temperature => self.temperature += 1,
            AlertKind::Humidity => self.humidity += 1,
            AlertKind::System => self.system += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.temperature + self.humidity + self.system
    }
}

/// One device-reported session, persisted for daily aggregation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub duration: f64,
    pub max_temperature: f64,
    pub device_id: String,
    pub date: DateTime<Utc>,
}

/// Combined per-message record mirrored to the durable store and served by
/// the reading-list endpoint. `emergency` reflects threshold exceedance (or
/// a client flag), independent of alert debouncing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationRecord {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub emergency: bool,
    pub device_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct LoopHealth {
    pub name: String,
    pub last_success_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

impl LoopHealth {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            last_success_at: None,
            consecutive_failures: 0,
            last_error: None,
        }
    }
}

#[derive(Default)]
struct AlertLedger {
    alerts: Vec<Alert>,
    counters: AlertCounters,
}

struct SharedStateInner {
    temperature: RwLock<HistoryBuffer>,
    humidity: RwLock<HistoryBuffer>,
    alerts: RwLock<AlertLedger>,
    sessions: RwLock<VecDeque<SessionRecord>>,
    latest_observation: RwLock<Option<ObservationRecord>>,
    loop_health: RwLock<HashMap<String, LoopHealth>>,
    started_at: DateTime<Utc>,
}

/// Shared state container for the HTTP layer, the ingest path, and the
/// source loops. All process-wide mutable state lives here; every mutation
/// is one lock-guarded step, so concurrent readers always observe a
/// consistent buffer.
#[derive(Clone)]
pub struct SharedState {
    inner: Arc<SharedStateInner>,
}

impl SharedState {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            inner: Arc::new(SharedStateInner {
                temperature: RwLock::new(HistoryBuffer::new(history_capacity)),
                humidity: RwLock::new(HistoryBuffer::new(history_capacity)),
                alerts: RwLock::new(AlertLedger::default()),
                sessions: RwLock::new(VecDeque::new()),
                latest_observation: RwLock::new(None),
                loop_health: RwLock::new(HashMap::new()),
                started_at: Utc::now(),
            }),
        }
    }

    fn buffer(&self, kind: ReadingKind) -> &RwLock<HistoryBuffer> {
        match kind {
            ReadingKind::Temperature => &self.inner.temperature,
            ReadingKind::Humidity => &self.inner.humidity,
        }
    }

    /// Append one reading to its kind's buffer, evicting the oldest entries
    /// once capacity is exceeded.
    pub async fn record_reading(&self, reading: Reading) {
        self.buffer(reading.kind).write().await.push(reading);
    }

    pub async fn latest(&self, kind: ReadingKind) -> Option<Reading> {
        self.buffer(kind).read().await.latest()
    }

    pub async fn readings_since(
        &self,
        kind: ReadingKind,
        cutoff: DateTime<Utc>,
    ) -> Vec<Reading> {
        self.buffer(kind).read().await.since(cutoff)
    }

    pub async fn history_len(&self, kind: ReadingKind) -> usize {
        self.buffer(kind).read().await.len()
    }

    pub async fn record_observation(&self, record: ObservationRecord) {
        *self.inner.latest_observation.write().await = Some(record);
    }

    pub async fn latest_observation(&self) -> Option<ObservationRecord> {
        self.inner.latest_observation.read().await.clone()
    }

    /// Adds a new alert and bumps its kind counter in one atomic step.
    pub async fn record_alert(&self, alert: Alert) {
        let mut guard = self.inner.alerts.write().await;
        guard.counters.increment(alert.kind);
        guard.alerts.push(alert);
    }

    /// Flips an OPEN alert to RESOLVED exactly once. The second attempt (or
    /// an unknown id) is rejected without touching the ledger.
    pub async fn resolve_alert(
        &self,
        id: &str,
        resolved_at: DateTime<Utc>,
    ) -> Result<Alert, ResolveError> {
        let mut guard = self.inner.alerts.write().await;
        let alert = guard
            .alerts
            .iter_mut()
            .find(|alert| alert.id == id)
            .ok_or(ResolveError::NotFound)?;

        if alert.resolved {
            return Err(ResolveError::AlreadyResolved);
        }

        alert.resolved = true;
        alert.resolved_at = Some(resolved_at);
        Ok(alert.clone())
    }

    pub async fn open_alerts(&self) -> Vec<Alert> {
        self.inner
            .alerts
            .read()
            .await
            .alerts
            .iter()
            .filter(|alert| !alert.resolved)
            .cloned()
            .collect()
    }

    pub async fn alerts_filtered(&self, filter: ResolvedFilter) -> Vec<Alert> {
        self.inner
            .alerts
            .read()
            .await
            .alerts
            .iter()
            .filter(|alert| filter.matches(alert.resolved))
            .cloned()
            .collect()
    }

    pub async fn alert_counters(&self) -> AlertCounters {
        self.inner.alerts.read().await.counters
    }

    pub async fn record_session(&self, session: SessionRecord) {
        let mut guard = self.inner.sessions.write().await;
        guard.push_back(session);
        while guard.len() > RECENT_SESSION_LIMIT {
            guard.pop_front();
        }
    }

    /// Recent sessions, oldest first.
    pub async fn recent_sessions(&self) -> Vec<SessionRecord> {
        self.inner.sessions.read().await.iter().cloned().collect()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    pub async fn record_loop_success(&self, loop_name: &str) {
        let mut guard = self.inner.loop_health.write().await;
        let entry = guard
            .entry(loop_name.to_string())
            .or_insert_with(|| LoopHealth::new(loop_name));
        entry.last_success_at = Some(Utc::now());
        entry.consecutive_failures = 0;
        entry.last_error = None;
    }

    pub async fn record_loop_failure(&self, loop_name: &str, error: String) {
        let mut guard = self.inner.loop_health.write().await;
        let entry = guard
            .entry(loop_name.to_string())
            .or_insert_with(|| LoopHealth::new(loop_name));
        entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
        entry.last_error = Some(error);
    }

    pub async fn loop_health(&self) -> Vec<LoopHealth> {
        self.inner
            .loop_health
            .read()
            .await
            .values()
            .cloned()
            .collect()
    }

    pub async fn is_ready(&self, loop_names: &[&str], max_staleness: Duration) -> bool {
        let health = self.inner.loop_health.read().await;
        let now = Utc::now();
        let staleness = chrono::Duration::from_std(max_staleness)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));

        loop_names.iter().all(|name| {
            if let Some(entry) = health.get(*name) {
                if entry.consecutive_failures > 0 {
                    return false;
                }
                if let Some(last) = entry.last_success_at {
                    return now.signed_duration_since(last) <= staleness;
                }
                false
            } else {
                false
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn reading(value: f64, at: DateTime<Utc>) -> Reading {
        Reading {
            kind: ReadingKind::Temperature,
            value,
            timestamp: at,
        }
    }

    #[test]
    fn history_buffer_evicts_oldest_first() {
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut buffer = HistoryBuffer::new(3);
        for (offset, value) in [(0, 1.0), (10, 2.0), (20, 3.0), (30, 4.0)] {
            buffer.push(reading(value, base + Duration::seconds(offset)));
        }

        assert_eq!(buffer.len(), 3);
        let values: Vec<f64> = buffer.to_vec().iter().map(|r| r.value).collect();
        assert_eq!(values, vec![2.0, 3.0, 4.0]);
        assert!((buffer.latest().expect("latest").value - 4.0).abs() < 1e-9);
    }

    #[test]
    fn history_buffer_since_returns_chronological_tail() {
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut buffer = HistoryBuffer::new(10);
        for offset in [0i64, 60, 120, 180] {
            buffer.push(reading(offset as f64, base + Duration::seconds(offset)));
        }

        let tail = buffer.since(base + Duration::seconds(60));
        let values: Vec<f64> = tail.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![60.0, 120.0, 180.0]);
    }

    #[tokio::test]
    async fn readings_route_to_their_kind_buffer() {
        let state = SharedState::new(8);
        let now = Utc::now();
        state
            .record_reading(Reading {
                kind: ReadingKind::Temperature,
                value: 41.0,
                timestamp: now,
            })
            .await;
        state
            .record_reading(Reading {
                kind: ReadingKind::Humidity,
                value: 55.0,
                timestamp: now,
            })
            .await;

        assert_eq!(state.history_len(ReadingKind::Temperature).await, 1);
        assert_eq!(state.history_len(ReadingKind::Humidity).await, 1);
        let latest = state.latest(ReadingKind::Humidity).await.expect("latest");
        assert!((latest.value - 55.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn session_ring_stays_bounded() {
        let state = SharedState::new(8);
        for i in 0..(RECENT_SESSION_LIMIT + 10) {
            state
                .record_session(SessionRecord {
                    duration: i as f64,
                    max_temperature: 40.0,
                    device_id: "dev".into(),
                    date: Utc::now(),
                })
                .await;
        }

        let sessions = state.recent_sessions().await;
        assert_eq!(sessions.len(), RECENT_SESSION_LIMIT);
        assert!((sessions[0].duration - 10.0).abs() < 1e-9);
    }
}
