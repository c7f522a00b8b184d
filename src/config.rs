use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::{info, warn};

const DEFAULT_CONFIG_PATH: &str = "/config/envmon.yaml";

/// Top-level configuration for the envmon service.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Station identity label used in logs and metrics.
    #[serde(default = "AppConfig::default_station")]
    pub station: String,
    /// Postgres DSN. Env-only; a value in YAML is rejected.
    #[serde(default)]
    pub dsn: String,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl AppConfig {
    fn default_station() -> String {
        "lab".to_string()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            station: Self::default_station(),
            dsn: String::new(),
            ingest: IngestConfig::default(),
            http: HttpConfig::default(),
            source: SourceConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

/// Threshold, debounce, and history-window settings for the ingestion path.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "IngestConfig::default_temperature_threshold")]
    pub temperature_threshold: f64,
    /// Minimum time between two threshold-triggered alerts (global).
    #[serde(
        default = "IngestConfig::default_alert_cooldown",
        with = "humantime_serde"
    )]
    pub alert_cooldown: Duration,
    /// Per-kind in-memory history capacity (readings).
    #[serde(default = "IngestConfig::default_history_capacity")]
    pub history_capacity: usize,
}

impl IngestConfig {
    const fn default_temperature_threshold() -> f64 {
        50.0
    }

    const fn default_alert_cooldown() -> Duration {
        Duration::from_secs(60)
    }

    const fn default_history_capacity() -> usize {
        1_000
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            temperature_threshold: Self::default_temperature_threshold(),
            alert_cooldown: Self::default_alert_cooldown(),
            history_capacity: Self::default_history_capacity(),
        }
    }
}

/// HTTP listener configuration (bind address).
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "HttpConfig::default_bind")]
    pub bind: String,
}

impl HttpConfig {
    fn default_bind() -> String {
        "0.0.0.0:3000".to_string()
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: Self::default_bind(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Telemetry source configuration. With `synthetic` enabled the built-in
/// generator stands in for a real device transport.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_true")]
    pub synthetic: bool,
    /// Generator cadence. Readiness allows three intervals of loop silence,
    /// floored at 30 seconds.
    #[serde(
        default = "SourceConfig::default_synthetic_interval",
        with = "humantime_serde"
    )]
    pub synthetic_interval: Duration,
    #[serde(default = "SourceConfig::default_device_id")]
    pub device_id: String,
}

impl SourceConfig {
    const fn default_synthetic_interval() -> Duration {
        Duration::from_secs(10)
    }

    fn default_device_id() -> String {
        "mock_device".to_string()
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            synthetic: true,
            synthetic_interval: Self::default_synthetic_interval(),
            device_id: Self::default_device_id(),
        }
    }
}

/// Durable-store session settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "StoreConfig::default_statement_timeout_ms")]
    pub statement_timeout_ms: u64,
}

impl StoreConfig {
    const fn default_statement_timeout_ms() -> u64 {
        3_000
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            statement_timeout_ms: Self::default_statement_timeout_ms(),
        }
    }
}

/// Load configuration from YAML disk file, falling back to defaults + env overrides.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let target_path = if let Some(path) = path {
        path.to_path_buf()
    } else if let Ok(env_path) = env::var("ENVMON_CONFIG") {
        PathBuf::from(env_path)
    } else {
        PathBuf::from(DEFAULT_CONFIG_PATH)
    };

    let mut config = match try_parse_file(&target_path)? {
        Some(cfg) => {
            info!(path = %target_path.display(), "loaded configuration");
            cfg
        }
        None => {
            warn!(path = %target_path.display(), "config file not found; using built-in defaults");
            AppConfig::default()
        }
    };

    enforce_yaml_policy(&config)?;
    apply_env_overrides(&mut config)?;
    Ok(config)
}

fn try_parse_file(path: &Path) -> Result<Option<AppConfig>> {
    match fs::read_to_string(path) {
        Ok(raw) => {
            let cfg = serde_yaml::from_str(&raw)
                .with_context(|| format!("failed to parse YAML config at {}", path.display()))?;
            Ok(Some(cfg))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => {
            Err(err).with_context(|| format!("failed to read config file at {}", path.display()))
        }
    }
}

fn enforce_yaml_policy(config: &AppConfig) -> Result<()> {
    if !config.dsn.trim().is_empty() {
        bail!(
            "Remove `dsn` from envmon YAML config; set the Postgres connection string via the ENVMON_DSN environment variable (see .env.sample)."
        );
    }
    Ok(())
}

fn apply_env_overrides(config: &mut AppConfig) -> Result<()> {
    if let Ok(station) = env::var("ENVMON_STATION") {
        if !station.is_empty() {
            config.station = station;
        }
    }

    if let Ok(raw) = env::var("ENVMON_TEMP_THRESHOLD") {
        config.ingest.temperature_threshold = raw
            .parse()
            .context("ENVMON_TEMP_THRESHOLD must be a number")?;
    }

    if let Ok(raw) = env::var("ENVMON_ALERT_COOLDOWN_SECS") {
        let seconds: u64 = raw
            .parse()
            .context("ENVMON_ALERT_COOLDOWN_SECS must be an integer")?;
        config.ingest.alert_cooldown = Duration::from_secs(seconds);
    }

    if let Ok(raw) = env::var("ENVMON_HISTORY_CAPACITY") {
        config.ingest.history_capacity = raw
            .parse()
            .context("ENVMON_HISTORY_CAPACITY must be an integer")?;
    }

    if let Ok(bind) = env::var("ENVMON_BIND") {
        if !bind.is_empty() {
            config.http.bind = bind;
        }
    }

    if let Ok(raw) = env::var("ENVMON_SYNTHETIC") {
        config.source.synthetic = matches!(raw.as_str(), "1" | "true" | "yes");
    }

    // The DSN is optional: the gateway runs degraded without it. An empty
    // value set explicitly is still a misconfiguration worth failing on.
    match env::var("ENVMON_DSN") {
        Ok(dsn) => {
            if dsn.trim().is_empty() {
                bail!(
                    "Environment variable ENVMON_DSN is set but empty; populate it in your .env file or unset it."
                );
            }
            config.dsn = dsn;
        }
        Err(env::VarError::NotPresent) => {}
        Err(err) => return Err(err.into()),
    };

    Ok(())
}
