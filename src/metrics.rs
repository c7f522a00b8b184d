use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

use crate::alerts::AlertKind;
use crate::state::ReadingKind;

/// Metrics registry for the service, scraped by Prometheus at `/metrics`.
#[derive(Clone)]
pub struct AppMetrics {
    registry: Arc<Registry>,
    loops: LoopMetrics,
    ingest: IngestMetrics,
    alerts: AlertMetrics,
    hub: HubMetrics,
    store: StoreMetrics,
}

impl AppMetrics {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new_custom(Some("envmon".into()), None)?);

        let loops = LoopMetrics::register(&registry)?;
        let ingest = IngestMetrics::register(&registry)?;
        let alerts = AlertMetrics::register(&registry)?;
        let hub = HubMetrics::register(&registry)?;
        let store = StoreMetrics::register(&registry)?;

        Ok(Self {
            registry,
            loops,
            ingest,
            alerts,
            hub,
            store,
        })
    }

    /// Observe the execution duration for a background loop.
    pub fn observe_duration(&self, loop_name: &str, duration: Duration) {
        self.loops
            .scrape_duration
            .with_label_values(&[loop_name])
            .observe(duration.as_secs_f64());
    }

    /// Record a success flag for a loop iteration (1=success, 0=failed).
    pub fn record_success(&self, loop_name: &str, success: bool) {
        self.loops
            .last_success
            .with_label_values(&[loop_name])
            .set(if success { 1 } else { 0 });
    }

    /// Increment the error counter for a loop.
    pub fn inc_error(&self, loop_name: &str) {
        self.loops
            .errors_total
            .with_label_values(&[loop_name])
            .inc();
    }

    pub fn inc_reading(&self, station: &str, kind: ReadingKind) {
        self.ingest
            .readings_total
            .with_label_values(&[station, kind.as_str()])
            .inc();
    }

    pub fn inc_malformed(&self, station: &str) {
        self.ingest
            .malformed_total
            .with_label_values(&[station])
            .inc();
    }

    pub fn inc_alert(&self, station: &str, kind: AlertKind) {
        self.alerts
            .alerts_total
            .with_label_values(&[station, kind.as_str()])
            .inc();
    }

    pub fn inc_alert_resolved(&self, station: &str) {
        self.alerts
            .resolved_total
            .with_label_values(&[station])
            .inc();
    }

    pub fn set_observers(&self, station: &str, count: i64) {
        self.hub
            .observers_connected
            .with_label_values(&[station])
            .set(count);
    }

    pub fn inc_event(&self, station: &str, event: &str) {
        self.hub
            .events_total
            .with_label_values(&[station, event])
            .inc();
    }

    /// Record one gateway operation with its outcome, `durable` or `fallback`.
    pub fn inc_store_op(&self, station: &str, entity: &str, outcome: &str) {
        self.store
            .operations_total
            .with_label_values(&[station, entity, outcome])
            .inc();
    }

    /// Encode metrics into Prometheus exposition format.
    pub fn encode(&self) -> Result<String> {
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[derive(Clone)]
struct LoopMetrics {
    scrape_duration: HistogramVec,
    last_success: IntGaugeVec,
    errors_total: IntCounterVec,
}

impl LoopMetrics {
    fn register(registry: &Registry) -> Result<Self> {
        let scrape_duration = HistogramVec::new(
            HistogramOpts::new("scrape_duration_seconds", "Loop execution duration"),
            &["loop"],
        )?;
        registry.register(Box::new(scrape_duration.clone()))?;

        let last_success = IntGaugeVec::new(
            Opts::new(
                "last_scrape_success",
                "Loop success flag (1=success, 0=failure)",
            ),
            &["loop"],
        )?;
        registry.register(Box::new(last_success.clone()))?;

        let errors_total =
            IntCounterVec::new(Opts::new("errors_total", "Total loop errors"), &["loop"])?;
        registry.register(Box::new(errors_total.clone()))?;

        Ok(Self {
            scrape_duration,
            last_success,
            errors_total,
        })
    }
}

#[derive(Clone)]
struct IngestMetrics {
    readings_total: IntCounterVec,
    malformed_total: IntCounterVec,
}

impl IngestMetrics {
    fn register(registry: &Registry) -> Result<Self> {
        let readings_total = IntCounterVec::new(
            Opts::new("readings_ingested_total", "Total readings ingested by kind"),
            &["station", "kind"],
        )?;
        registry.register(Box::new(readings_total.clone()))?;

        let malformed_total = IntCounterVec::new(
            Opts::new(
                "malformed_payloads_total",
                "Total inbound payloads dropped as unparseable",
            ),
            &["station"],
        )?;
        registry.register(Box::new(malformed_total.clone()))?;

        Ok(Self {
            readings_total,
            malformed_total,
        })
    }
}

#[derive(Clone)]
struct AlertMetrics {
    alerts_total: IntCounterVec,
    resolved_total: IntCounterVec,
}

impl AlertMetrics {
    fn register(registry: &Registry) -> Result<Self> {
        let alerts_total = IntCounterVec::new(
            Opts::new("alerts_total", "Total alerts created, grouped by kind"),
            &["station", "kind"],
        )?;
        registry.register(Box::new(alerts_total.clone()))?;

        let resolved_total = IntCounterVec::new(
            Opts::new("alerts_resolved_total", "Total alerts resolved"),
            &["station"],
        )?;
        registry.register(Box::new(resolved_total.clone()))?;

        Ok(Self {
            alerts_total,
            resolved_total,
        })
    }
}

#[derive(Clone)]
struct HubMetrics {
    observers_connected: IntGaugeVec,
    events_total: IntCounterVec,
}

impl HubMetrics {
    fn register(registry: &Registry) -> Result<Self> {
        let observers_connected = IntGaugeVec::new(
            Opts::new("observers_connected", "Currently connected observers"),
            &["station"],
        )?;
        registry.register(Box::new(observers_connected.clone()))?;

        let events_total = IntCounterVec::new(
            Opts::new(
                "events_published_total",
                "Total events published to the broadcast hub",
            ),
            &["station", "event"],
        )?;
        registry.register(Box::new(events_total.clone()))?;

        Ok(Self {
            observers_connected,
            events_total,
        })
    }
}

#[derive(Clone)]
struct StoreMetrics {
    operations_total: IntCounterVec,
}

impl StoreMetrics {
    fn register(registry: &Registry) -> Result<Self> {
        let operations_total = IntCounterVec::new(
            Opts::new(
                "store_operations_total",
                "Persistence gateway operations by entity and outcome",
            ),
            &["station", "entity", "outcome"],
        )?;
        registry.register(Box::new(operations_total.clone()))?;

        Ok(Self { operations_total })
    }
}
