mod alerts;
mod analytics;
mod app;
mod config;
mod http;
mod hub;
mod metrics;
mod pipeline;
mod source;
mod state;
mod store;

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use dotenvy::Error as DotenvError;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::alerts::ThresholdGate;
use crate::app::AppContext;
use crate::store::PersistGateway;

#[derive(Debug, Parser)]
#[command(author, version, about = "envmon — temperature/humidity telemetry and alerting service")]
struct Cli {
    /// Path to YAML configuration file. Defaults to env ENVMON_CONFIG or built-in defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env();
    init_tracing();

    let cli = Cli::parse();

    let config = config::load_config(cli.config.as_deref())?;
    let bind_addr: SocketAddr = config
        .http
        .bind
        .parse()
        .context("invalid http.bind address")?;

    let metrics = metrics::AppMetrics::new()?;
    let state = state::SharedState::new(config.ingest.history_capacity);
    let hub = hub::Hub::new();

    // Durable persistence is best-effort: a missing DSN or an unreachable
    // store downgrades the gateway instead of failing startup.
    let pool = if config.dsn.trim().is_empty() {
        warn!("persistence disabled: ENVMON_DSN not set");
        None
    } else {
        match store::postgres::create_pool(&config).await {
            Ok(pool) => match store::postgres::ensure_schema(&pool).await {
                Ok(()) => Some(pool),
                Err(err) => {
                    warn!(error = ?err, "schema bootstrap failed; running degraded");
                    None
                }
            },
            Err(err) => {
                warn!(error = ?err, "durable store unreachable at startup; running degraded");
                None
            }
        }
    };

    let store = PersistGateway::new(pool, state.clone(), metrics.clone(), config.station.clone());
    let gate = ThresholdGate::new(
        config.ingest.temperature_threshold,
        config.ingest.alert_cooldown,
    );

    let ctx = AppContext::new(config, store, metrics, state, hub, gate);

    // The sender is held for the process lifetime so the source channel
    // stays open even when no producer loop is configured.
    let (source_handles, _source_events) = source::spawn_tasks(ctx.clone());
    let router = http::create_router(ctx.clone());

    info!(
        station = ctx.station_name(),
        "envmon listening on {}", bind_addr
    );

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .context("failed to bind HTTP listener")?;

    if let Err(err) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = ?err, "server terminated with error");
    }

    shutdown_sources(source_handles).await;

    Ok(())
}

fn load_env() {
    if let Err(err) = dotenvy::dotenv() {
        match err {
            DotenvError::Io(io_err) if io_err.kind() == ErrorKind::NotFound => {}
            other => eprintln!("warning: failed to load .env file: {other}"),
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("envmon=info,axum::rejection=trace"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
            sigterm.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}

async fn shutdown_sources(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        handle.abort();
    }
}
