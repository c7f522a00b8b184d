use std::sync::Arc;

use tokio::sync::Mutex;

use crate::alerts::ThresholdGate;
use crate::config::AppConfig;
use crate::hub::Hub;
use crate::metrics::AppMetrics;
use crate::state::SharedState;
use crate::store::PersistGateway;

/// Shared application context passed to HTTP handlers and source tasks.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub store: PersistGateway,
    pub metrics: AppMetrics,
    pub state: SharedState,
    pub hub: Hub,
    /// Global debounce gate for threshold-triggered temperature alerts.
    pub gate: Arc<Mutex<ThresholdGate>>,
}

impl AppContext {
    pub fn new(
        config: AppConfig,
        store: PersistGateway,
        metrics: AppMetrics,
        state: SharedState,
        hub: Hub,
        gate: ThresholdGate,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store,
            metrics,
            state,
            hub,
            gate: Arc::new(Mutex::new(gate)),
        }
    }

    pub fn station_name(&self) -> &str {
        &self.config.station
    }
}
