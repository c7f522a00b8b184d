use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::state::{Reading, ReadingKind, SharedState};

/// Maps a dashboard range label to its lookback duration. Unknown labels
/// fall back to 20 minutes rather than erroring.
pub fn range_duration(label: &str) -> Duration {
    match label {
        "3m" => Duration::minutes(3),
        "10m" => Duration::minutes(10),
        "1h" => Duration::hours(1),
        "6h" => Duration::hours(6),
        _ => Duration::minutes(20),
    }
}

#[derive(Debug, Serialize)]
pub struct SeriesResponse {
    pub labels: Vec<String>,
    pub values: Vec<f64>,
    pub downsampled: bool,
}

/// Chart-ready series for one reading kind over a labeled range: aligned
/// `HH:MM:SS` labels and values, oldest first, stride-thinned past
/// `max_points`.
pub async fn range_series(
    state: &SharedState,
    kind: ReadingKind,
    label: &str,
    max_points: usize,
    now: DateTime<Utc>,
) -> SeriesResponse {
    let cutoff = now - range_duration(label);
    let readings = state.readings_since(kind, cutoff).await;
    let (readings, downsampled) = maybe_downsample(readings, max_points);

    let labels = readings
        .iter()
        .map(|reading| reading.timestamp.format("%H:%M:%S").to_string())
        .collect();
    let values = readings.iter().map(|reading| reading.value).collect();

    SeriesResponse {
        labels,
        values,
        downsampled,
    }
}

/// Stride-samples a series down to roughly `max_points` entries.
pub fn maybe_downsample(readings: Vec<Reading>, max_points: usize) -> (Vec<Reading>, bool) {
    if readings.len() <= max_points || max_points == 0 {
        return (readings, false);
    }
    let step = (readings.len() as f64 / max_points as f64).ceil() as usize;
    if step <= 1 {
        return (readings, false);
    }
    let mut sampled = Vec::with_capacity(max_points);
    for (idx, reading) in readings.into_iter().enumerate() {
        if idx % step == 0 {
            sampled.push(reading);
        }
    }
    (sampled, true)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub avg_temp: f64,
    pub avg_humidity: f64,
    pub temp_trend: f64,
    pub humidity_trend: f64,
    pub total_alerts: u64,
    pub uptime: f64,
}

/// Headline analytics: the current five-minute average per kind, the trend
/// against the previous five-minute window, the alert total, and coarse
/// process uptime.
pub async fn stats(state: &SharedState, now: DateTime<Utc>) -> StatsResponse {
    let (avg_temp, temp_trend) = kind_stats(state, ReadingKind::Temperature, now).await;
    let (avg_humidity, humidity_trend) = kind_stats(state, ReadingKind::Humidity, now).await;
    let counters = state.alert_counters().await;

    StatsResponse {
        avg_temp,
        avg_humidity,
        temp_trend,
        humidity_trend,
        total_alerts: counters.total(),
        uptime: uptime_percent(state.started_at(), now),
    }
}

async fn kind_stats(state: &SharedState, kind: ReadingKind, now: DateTime<Utc>) -> (f64, f64) {
    let split = now - Duration::minutes(5);
    let readings = state.readings_since(kind, now - Duration::minutes(10)).await;

    let current: Vec<f64> = readings
        .iter()
        .filter(|reading| reading.timestamp >= split)
        .map(|reading| reading.value)
        .collect();
    let previous: Vec<f64> = readings
        .iter()
        .filter(|reading| reading.timestamp < split)
        .map(|reading| reading.value)
        .collect();

    let current_avg = mean(&current);
    let previous_avg = mean(&previous);
    (current_avg, trend_percent(current_avg, previous_avg))
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Percentage change from `previous` to `current`; 0 on a zero denominator.
pub fn trend_percent(current: f64, previous: f64) -> f64 {
    if previous == 0.0 {
        return 0.0;
    }
    (current - previous) / previous * 100.0
}

/// Percentage of the trailing 24 hours the process has been up, capped at
/// 100. A coarse dashboard figure, not SLA tracking.
pub fn uptime_percent(started_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let elapsed = now.signed_duration_since(started_at).num_seconds().max(0) as f64;
    (elapsed / 86_400.0).min(1.0) * 100.0
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionResponse {
    pub temperature_alerts: u64,
    pub humidity_alerts: u64,
    pub system_alerts: u64,
}

/// Alert creation counts by kind, independent of resolution state.
pub async fn distribution(state: &SharedState) -> DistributionResponse {
    let counters = state.alert_counters().await;
    DistributionResponse {
        temperature_alerts: counters.temperature,
        humidity_alerts: counters.humidity,
        system_alerts: counters.system,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn reading(value: f64, at: DateTime<Utc>) -> Reading {
        Reading {
            kind: ReadingKind::Temperature,
            value,
            timestamp: at,
        }
    }

    #[test]
    fn unknown_range_label_defaults_to_twenty_minutes() {
        assert_eq!(range_duration("10m"), Duration::minutes(10));
        assert_eq!(range_duration("6h"), Duration::hours(6));
        assert_eq!(range_duration("2d"), Duration::minutes(20));
        assert_eq!(range_duration(""), Duration::minutes(20));
    }

    #[test]
    fn trend_guards_zero_denominator() {
        assert!((trend_percent(40.0, 0.0)).abs() < 1e-9);
        assert!((trend_percent(44.0, 40.0) - 10.0).abs() < 1e-9);
        assert!((trend_percent(36.0, 40.0) + 10.0).abs() < 1e-9);
    }

    #[test]
    fn uptime_caps_at_one_hundred_percent() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let six_hours = start + Duration::hours(6);
        assert!((uptime_percent(start, six_hours) - 25.0).abs() < 1e-9);
        let two_days = start + Duration::days(2);
        assert!((uptime_percent(start, two_days) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn downsampling_keeps_stride_samples() {
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let points: Vec<Reading> = (0..100)
            .map(|i| reading(i as f64, base + Duration::seconds(i)))
            .collect();

        let (sampled, downsampled) = maybe_downsample(points.clone(), 40);
        assert!(downsampled);
        assert!(sampled.len() <= 40);
        assert!((sampled[0].value).abs() < 1e-9);

        let (unsampled, downsampled) = maybe_downsample(points, 100);
        assert!(!downsampled);
        assert_eq!(unsampled.len(), 100);
    }

    #[tokio::test]
    async fn series_window_is_chronological_and_bounded() {
        let state = SharedState::new(100);
        let now = Utc::now();
        for minutes_ago in [25i64, 15, 8, 3, 1] {
            state
                .record_reading(reading(
                    minutes_ago as f64,
                    now - Duration::minutes(minutes_ago),
                ))
                .await;
        }

        let series = range_series(&state, ReadingKind::Temperature, "10m", 500, now).await;
        assert_eq!(series.values, vec![8.0, 3.0, 1.0]);
        assert_eq!(series.labels.len(), series.values.len());
        assert!(!series.downsampled);
    }
}
