use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Alert category. Temperature alerts come from threshold evaluation or the
/// manual emergency endpoint; system alerts from source lifecycle events.
/// Humidity readings never trigger alerts today, but the kind exists so the
/// distribution endpoint always reports all three buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Temperature,
    Humidity,
    System,
}

impl AlertKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertKind::Temperature => "temperature",
            AlertKind::Humidity => "humidity",
            AlertKind::System => "system",
        }
    }

    /// Parses the stored text form written by the persistence gateway.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "temperature" => Some(AlertKind::Temperature),
            "humidity" => Some(AlertKind::Humidity),
            "system" => Some(AlertKind::System),
            _ => None,
        }
    }
}

/// One emergency alert. Created OPEN; the only permitted mutation is the
/// single flip to RESOLVED performed by `SharedState::resolve_alert`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub value: Option<f64>,
    pub threshold: Option<f64>,
    pub message: String,
    pub device_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    /// A threshold-exceedance temperature alert raised by the debounce gate.
    pub fn threshold_exceeded(
        value: f64,
        threshold: f64,
        device_id: Option<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: AlertKind::Temperature,
            value: Some(value),
            threshold: Some(threshold),
            message: format!("Emergency: Temperature exceeds {threshold}°C!"),
            device_id,
            created_at: at,
            resolved: false,
            resolved_at: None,
        }
    }

    /// A connectivity/parse-failure alert raised by the source adapter.
    pub fn system(message: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: AlertKind::System,
            value: None,
            threshold: None,
            message: message.into(),
            device_id: None,
            created_at: at,
            resolved: false,
            resolved_at: None,
        }
    }

    /// A client-submitted emergency. Bypasses the cooldown gate entirely.
    pub fn manual(
        value: Option<f64>,
        threshold: f64,
        message: Option<String>,
        device_id: Option<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: AlertKind::Temperature,
            value,
            threshold: Some(threshold),
            message: message
                .unwrap_or_else(|| format!("Emergency: Temperature exceeds {threshold}°C!")),
            device_id,
            created_at: at,
            resolved: false,
            resolved_at: None,
        }
    }
}

/// Typed resolution failure. Both outcomes leave the ledger untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveError {
    NotFound,
    AlreadyResolved,
}

impl ResolveError {
    pub fn message(self) -> &'static str {
        match self {
            ResolveError::NotFound => "Emergency alert not found",
            ResolveError::AlreadyResolved => "Emergency alert already resolved",
        }
    }
}

/// `?resolved=` query filter for the alert-list endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedFilter {
    All,
    Resolved,
    Open,
}

impl ResolvedFilter {
    pub fn parse(value: &str) -> Self {
        match value {
            "true" => ResolvedFilter::Resolved,
            "false" => ResolvedFilter::Open,
            _ => ResolvedFilter::All,
        }
    }

    pub fn matches(self, resolved: bool) -> bool {
        match self {
            ResolvedFilter::All => true,
            ResolvedFilter::Resolved => resolved,
            ResolvedFilter::Open => !resolved,
        }
    }
}

/// Debounce state for threshold-triggered temperature alerts. The cooldown is
/// global across the pipeline, not per-device. The evaluation instant is a
/// parameter so the debounce property can be tested without wall-clock sleeps.
#[derive(Debug)]
pub struct ThresholdGate {
    threshold: f64,
    cooldown: Duration,
    last_fired: Option<DateTime<Utc>>,
}

impl ThresholdGate {
    pub fn new(threshold: f64, cooldown: StdDuration) -> Self {
        Self {
            threshold,
            cooldown: Duration::from_std(cooldown).unwrap_or_else(|_| Duration::seconds(60)),
            last_fired: None,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn is_exceeded(&self, value: f64) -> bool {
        value > self.threshold
    }

    /// Returns true when a new alert should be created for this reading, and
    /// advances the cooldown window. Readings inside the window are absorbed.
    pub fn evaluate(&mut self, value: f64, at: DateTime<Utc>) -> bool {
        if value <= self.threshold {
            return false;
        }
        if let Some(last) = self.last_fired {
            if at.signed_duration_since(last) < self.cooldown {
                return false;
            }
        }
        self.last_fired = Some(at);
        true
    }
}
