// Internal modules required when compiled as a library for tests.
pub mod alerts;
pub mod analytics;
pub mod app;
pub mod config;
pub mod http;
pub mod hub;
pub mod metrics;
pub mod pipeline;
pub mod source;
pub mod state;
pub mod store;
// Re-export commonly used types for tests
pub use alerts::{Alert, AlertKind, ResolveError, ThresholdGate};
pub use state::{HistoryBuffer, Reading, ReadingKind, SharedState};
