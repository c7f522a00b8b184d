use std::time::Duration;

use envmon::alerts::ThresholdGate;
use envmon::app::AppContext;
use envmon::config::AppConfig;
use envmon::hub::Hub;
use envmon::metrics::AppMetrics;
use envmon::state::SharedState;
use envmon::store::PersistGateway;

/// Builds a full application context with no durable store attached, so
/// every gateway operation takes the degraded path.
pub fn degraded_ctx(threshold: f64, cooldown_secs: u64, capacity: usize) -> AppContext {
    let mut config = AppConfig::default();
    config.ingest.temperature_threshold = threshold;
    config.ingest.alert_cooldown = Duration::from_secs(cooldown_secs);
    config.ingest.history_capacity = capacity;
    config.source.synthetic = false;

    let metrics = AppMetrics::new().expect("metrics");
    let state = SharedState::new(capacity);
    let hub = Hub::new();
    let store = PersistGateway::new(
        None,
        state.clone(),
        metrics.clone(),
        config.station.clone(),
    );
    let gate = ThresholdGate::new(threshold, Duration::from_secs(cooldown_secs));

    AppContext::new(config, store, metrics, state, hub, gate)
}
