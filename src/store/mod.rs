use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Row};
use tracing::warn;

use crate::alerts::{Alert, AlertKind, ResolvedFilter};
use crate::metrics::AppMetrics;
use crate::state::{ObservationRecord, SessionRecord, SharedState};

pub mod postgres;

/// Notice attached to responses served from the in-memory fallback.
pub const DEGRADED_NOTICE: &str = "Using in-memory fallback data due to database unavailability";

/// Result of a gateway operation. Both variants carry a usable value; callers
/// pattern-match (or read `notice()`), never branch on caught errors.
#[derive(Debug)]
pub enum StoreOutcome<T> {
    /// The durable store served the operation.
    Durable(T),
    /// The durable store was unavailable; a locally constructed projection
    /// stands in.
    Fallback(T),
}

impl<T> StoreOutcome<T> {
    pub fn into_inner(self) -> T {
        match self {
            StoreOutcome::Durable(value) | StoreOutcome::Fallback(value) => value,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, StoreOutcome::Fallback(_))
    }

    pub fn notice(&self) -> Option<&'static str> {
        match self {
            StoreOutcome::Durable(_) => None,
            StoreOutcome::Fallback(_) => Some(DEGRADED_NOTICE),
        }
    }

    fn as_label(&self) -> &'static str {
        match self {
            StoreOutcome::Durable(_) => "durable",
            StoreOutcome::Fallback(_) => "fallback",
        }
    }
}

/// One row of the daily session aggregation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyStat {
    pub date: String,
    pub count: i64,
    pub avg_duration: f64,
    pub avg_max_temperature: f64,
    pub total_duration: f64,
}

const INSERT_READING_SQL: &str = r#"
INSERT INTO readings (temperature, humidity, emergency, device_id, created_at)
VALUES ($1, $2, $3, $4, $5)
"#;

const INSERT_ALERT_SQL: &str = r#"
INSERT INTO alerts (id, kind, value, threshold, message, device_id, created_at, resolved, resolved_at)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
"#;

const RESOLVE_ALERT_SQL: &str = r#"
UPDATE alerts SET resolved = TRUE, resolved_at = $2 WHERE id = $1
"#;

const INSERT_SESSION_SQL: &str = r#"
INSERT INTO sessions (duration, max_temperature, device_id, date)
VALUES ($1, $2, $3, $4)
"#;

const LIST_READINGS_SQL: &str = r#"
SELECT temperature, humidity, emergency, device_id, created_at
FROM readings
ORDER BY created_at DESC
LIMIT $1
"#;

const LIST_READINGS_RANGE_SQL: &str = r#"
SELECT temperature, humidity, emergency, device_id, created_at
FROM readings
WHERE created_at >= $2 AND created_at <= $3
ORDER BY created_at DESC
LIMIT $1
"#;

const LIST_ALERTS_SQL: &str = r#"
SELECT id, kind, value, threshold, message, device_id, created_at, resolved, resolved_at
FROM alerts
ORDER BY created_at DESC
"#;

const LIST_ALERTS_FILTERED_SQL: &str = r#"
SELECT id, kind, value, threshold, message, device_id, created_at, resolved, resolved_at
FROM alerts
WHERE resolved = $1
ORDER BY created_at DESC
"#;

const LIST_SESSIONS_SQL: &str = r#"
SELECT duration, max_temperature, device_id, date
FROM sessions
ORDER BY date DESC
"#;

const LIST_SESSIONS_RANGE_SQL: &str = r#"
SELECT duration, max_temperature, device_id, date
FROM sessions
WHERE date >= $1 AND date <= $2
ORDER BY date DESC
"#;

// Buckets by UTC day regardless of the server timezone, matching the
// in-memory projection.
const DAILY_STATS_SQL: &str = r#"
SELECT
    to_char(date AT TIME ZONE 'UTC', 'YYYY-MM-DD') AS day,
    COUNT(*)::bigint AS count,
    AVG(duration) AS avg_duration,
    AVG(max_temperature) AS avg_max_temperature,
    SUM(duration) AS total_duration
FROM sessions
WHERE date >= $1 AND date <= $2
GROUP BY day
ORDER BY day
"#;

/// Best-effort persistence gateway. Owns no primary copy: writes shadow the
/// in-memory state, and reads degrade to projections built from `SharedState`
/// when Postgres is unreachable. No operation here can halt the pipeline.
#[derive(Clone)]
pub struct PersistGateway {
    pool: Option<PgPool>,
    state: SharedState,
    metrics: AppMetrics,
    station: String,
}

impl PersistGateway {
    pub fn new(
        pool: Option<PgPool>,
        state: SharedState,
        metrics: AppMetrics,
        station: String,
    ) -> Self {
        Self {
            pool,
            state,
            metrics,
            station,
        }
    }

    fn record<T>(&self, entity: &'static str, outcome: StoreOutcome<T>) -> StoreOutcome<T> {
        self.metrics
            .inc_store_op(&self.station, entity, outcome.as_label());
        outcome
    }

    pub async fn save_observation(
        &self,
        record: ObservationRecord,
    ) -> StoreOutcome<ObservationRecord> {
        let outcome = match &self.pool {
            Some(pool) => {
                let result = sqlx::query(INSERT_READING_SQL)
                    .bind(record.temperature)
                    .bind(record.humidity)
                    .bind(record.emergency)
                    .bind(&record.device_id)
                    .bind(record.created_at)
                    .execute(pool)
                    .await;
                match result {
                    Ok(_) => StoreOutcome::Durable(record),
                    Err(err) => {
                        warn!(error = ?err, "failed to persist observation; continuing in-memory");
                        StoreOutcome::Fallback(record)
                    }
                }
            }
            None => StoreOutcome::Fallback(record),
        };
        self.record("observation", outcome)
    }

    pub async fn save_alert(&self, alert: Alert) -> StoreOutcome<Alert> {
        let outcome = match &self.pool {
            Some(pool) => {
                let result = sqlx::query(INSERT_ALERT_SQL)
                    .bind(&alert.id)
                    .bind(alert.kind.as_str())
                    .bind(alert.value)
                    .bind(alert.threshold)
                    .bind(&alert.message)
                    .bind(&alert.device_id)
                    .bind(alert.created_at)
                    .bind(alert.resolved)
                    .bind(alert.resolved_at)
                    .execute(pool)
                    .await;
                match result {
                    Ok(_) => StoreOutcome::Durable(alert),
                    Err(err) => {
                        warn!(error = ?err, "failed to persist alert; continuing in-memory");
                        StoreOutcome::Fallback(alert)
                    }
                }
            }
            None => StoreOutcome::Fallback(alert),
        };
        self.record("alert", outcome)
    }

    /// Shadow update for a resolution already applied to the ledger.
    pub async fn mark_alert_resolved(
        &self,
        id: &str,
        resolved_at: DateTime<Utc>,
    ) -> StoreOutcome<()> {
        let outcome = match &self.pool {
            Some(pool) => {
                let result = sqlx::query(RESOLVE_ALERT_SQL)
                    .bind(id)
                    .bind(resolved_at)
                    .execute(pool)
                    .await;
                match result {
                    Ok(_) => StoreOutcome::Durable(()),
                    Err(err) => {
                        warn!(error = ?err, alert_id = %id, "failed to persist alert resolution");
                        StoreOutcome::Fallback(())
                    }
                }
            }
            None => StoreOutcome::Fallback(()),
        };
        self.record("alert", outcome)
    }

    pub async fn save_session(&self, session: SessionRecord) -> StoreOutcome<SessionRecord> {
        let outcome = match &self.pool {
            Some(pool) => {
                let result = sqlx::query(INSERT_SESSION_SQL)
                    .bind(session.duration)
                    .bind(session.max_temperature)
                    .bind(&session.device_id)
                    .bind(session.date)
                    .execute(pool)
                    .await;
                match result {
                    Ok(_) => StoreOutcome::Durable(session),
                    Err(err) => {
                        warn!(error = ?err, "failed to persist session; continuing in-memory");
                        StoreOutcome::Fallback(session)
                    }
                }
            }
            None => StoreOutcome::Fallback(session),
        };
        self.record("session", outcome)
    }

    /// Durable observation records, newest first. The degraded projection is
    /// the latest in-memory observation only.
    pub async fn list_observations(
        &self,
        limit: i64,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> StoreOutcome<Vec<ObservationRecord>> {
        let outcome = match &self.pool {
            Some(pool) => {
                let query = match range {
                    Some((start, end)) => sqlx::query(LIST_READINGS_RANGE_SQL)
                        .bind(limit)
                        .bind(start)
                        .bind(end),
                    None => sqlx::query(LIST_READINGS_SQL).bind(limit),
                };
                match query.fetch_all(pool).await {
                    Ok(rows) => match rows.iter().map(observation_from_row).collect() {
                        Ok(records) => StoreOutcome::Durable(records),
                        Err(err) => {
                            warn!(error = ?err, "failed to decode observation rows");
                            StoreOutcome::Fallback(self.latest_observation_projection().await)
                        }
                    },
                    Err(err) => {
                        warn!(error = ?err, "failed to query observations; serving fallback");
                        StoreOutcome::Fallback(self.latest_observation_projection().await)
                    }
                }
            }
            None => StoreOutcome::Fallback(self.latest_observation_projection().await),
        };
        self.record("observation", outcome)
    }

    pub async fn list_alerts(&self, filter: ResolvedFilter) -> StoreOutcome<Vec<Alert>> {
        let outcome = match &self.pool {
            Some(pool) => {
                let query = match filter {
                    ResolvedFilter::All => sqlx::query(LIST_ALERTS_SQL),
                    ResolvedFilter::Resolved => sqlx::query(LIST_ALERTS_FILTERED_SQL).bind(true),
                    ResolvedFilter::Open => sqlx::query(LIST_ALERTS_FILTERED_SQL).bind(false),
                };
                match query.fetch_all(pool).await {
                    Ok(rows) => match rows.iter().map(alert_from_row).collect() {
                        Ok(alerts) => StoreOutcome::Durable(alerts),
                        Err(err) => {
                            warn!(error = ?err, "failed to decode alert rows");
                            StoreOutcome::Fallback(self.ledger_projection(filter).await)
                        }
                    },
                    Err(err) => {
                        warn!(error = ?err, "failed to query alerts; serving fallback");
                        StoreOutcome::Fallback(self.ledger_projection(filter).await)
                    }
                }
            }
            None => StoreOutcome::Fallback(self.ledger_projection(filter).await),
        };
        self.record("alert", outcome)
    }

    pub async fn list_sessions(
        &self,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> StoreOutcome<Vec<SessionRecord>> {
        let outcome = match &self.pool {
            Some(pool) => {
                let query = match range {
                    Some((start, end)) => {
                        sqlx::query(LIST_SESSIONS_RANGE_SQL).bind(start).bind(end)
                    }
                    None => sqlx::query(LIST_SESSIONS_SQL),
                };
                match query.fetch_all(pool).await {
                    Ok(rows) => match rows.iter().map(session_from_row).collect() {
                        Ok(sessions) => StoreOutcome::Durable(sessions),
                        Err(err) => {
                            warn!(error = ?err, "failed to decode session rows");
                            StoreOutcome::Fallback(self.session_ring_projection(range).await)
                        }
                    },
                    Err(err) => {
                        warn!(error = ?err, "failed to query sessions; serving fallback");
                        StoreOutcome::Fallback(self.session_ring_projection(range).await)
                    }
                }
            }
            None => StoreOutcome::Fallback(self.session_ring_projection(range).await),
        };
        self.record("session", outcome)
    }

    /// Daily session aggregation over `[start, end]`, ascending by day. The
    /// degraded path computes the same shape from the in-memory ring.
    pub async fn daily_stats(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreOutcome<Vec<DailyStat>> {
        let outcome = match &self.pool {
            Some(pool) => {
                let result = sqlx::query(DAILY_STATS_SQL)
                    .bind(start)
                    .bind(end)
                    .fetch_all(pool)
                    .await;
                match result {
                    Ok(rows) => match rows.iter().map(daily_stat_from_row).collect() {
                        Ok(stats) => StoreOutcome::Durable(stats),
                        Err(err) => {
                            warn!(error = ?err, "failed to decode daily stat rows");
                            StoreOutcome::Fallback(self.daily_stats_projection(start, end).await)
                        }
                    },
                    Err(err) => {
                        warn!(error = ?err, "failed to aggregate sessions; serving fallback");
                        StoreOutcome::Fallback(self.daily_stats_projection(start, end).await)
                    }
                }
            }
            None => StoreOutcome::Fallback(self.daily_stats_projection(start, end).await),
        };
        self.record("session", outcome)
    }

    async fn latest_observation_projection(&self) -> Vec<ObservationRecord> {
        self.state.latest_observation().await.into_iter().collect()
    }

    async fn ledger_projection(&self, filter: ResolvedFilter) -> Vec<Alert> {
        let mut alerts = self.state.alerts_filtered(filter).await;
        alerts.reverse();
        alerts
    }

    async fn session_ring_projection(
        &self,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Vec<SessionRecord> {
        let mut sessions = self.state.recent_sessions().await;
        if let Some((start, end)) = range {
            sessions.retain(|session| session.date >= start && session.date <= end);
        }
        sessions.reverse();
        sessions
    }

    async fn daily_stats_projection(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<DailyStat> {
        let sessions = self.state.recent_sessions().await;
        let mut by_day: BTreeMap<String, Vec<&SessionRecord>> = BTreeMap::new();
        for session in &sessions {
            if session.date >= start && session.date <= end {
                by_day
                    .entry(session.date.format("%Y-%m-%d").to_string())
                    .or_default()
                    .push(session);
            }
        }

        by_day
            .into_iter()
            .map(|(date, sessions)| {
                let count = sessions.len() as i64;
                let total_duration: f64 = sessions.iter().map(|s| s.duration).sum();
                let total_max_temp: f64 = sessions.iter().map(|s| s.max_temperature).sum();
                DailyStat {
                    date,
                    count,
                    avg_duration: total_duration / count as f64,
                    avg_max_temperature: total_max_temp / count as f64,
                    total_duration,
                }
            })
            .collect()
    }
}

fn observation_from_row(row: &sqlx::postgres::PgRow) -> Result<ObservationRecord, sqlx::Error> {
    Ok(ObservationRecord {
        temperature: row.try_get("temperature")?,
        humidity: row.try_get("humidity")?,
        emergency: row.try_get("emergency")?,
        device_id: row.try_get("device_id")?,
        created_at: row.try_get("created_at")?,
    })
}

fn alert_from_row(row: &sqlx::postgres::PgRow) -> Result<Alert, sqlx::Error> {
    let kind_raw: String = row.try_get("kind")?;
    let kind = AlertKind::parse(&kind_raw).ok_or_else(|| sqlx::Error::ColumnDecode {
        index: "kind".into(),
        source: format!("unknown alert kind {kind_raw:?}").into(),
    })?;

    Ok(Alert {
        id: row.try_get("id")?,
        kind,
        value: row.try_get("value")?,
        threshold: row.try_get("threshold")?,
        message: row.try_get("message")?,
        device_id: row.try_get("device_id")?,
        created_at: row.try_get("created_at")?,
        resolved: row.try_get("resolved")?,
        resolved_at: row.try_get("resolved_at")?,
    })
}

fn session_from_row(row: &sqlx::postgres::PgRow) -> Result<SessionRecord, sqlx::Error> {
    Ok(SessionRecord {
        duration: row.try_get("duration")?,
        max_temperature: row.try_get("max_temperature")?,
        device_id: row.try_get("device_id")?,
        date: row.try_get("date")?,
    })
}

fn daily_stat_from_row(row: &sqlx::postgres::PgRow) -> Result<DailyStat, sqlx::Error> {
    Ok(DailyStat {
        date: row.try_get("day")?,
        count: row.try_get("count")?,
        avg_duration: row.try_get("avg_duration")?,
        avg_max_temperature: row.try_get("avg_max_temperature")?,
        total_duration: row.try_get("total_duration")?,
    })
}
