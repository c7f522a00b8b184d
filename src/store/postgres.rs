use std::{str::FromStr, time::Duration};

use anyhow::{Context, Result};
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use tracing::info;

use crate::config::AppConfig;

const SCHEMA_SQL: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS readings (
        id          BIGSERIAL PRIMARY KEY,
        temperature DOUBLE PRECISION,
        humidity    DOUBLE PRECISION,
        emergency   BOOLEAN NOT NULL DEFAULT FALSE,
        device_id   TEXT NOT NULL,
        created_at  TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS alerts (
        id          TEXT PRIMARY KEY,
        kind        TEXT NOT NULL,
        value       DOUBLE PRECISION,
        threshold   DOUBLE PRECISION,
        message     TEXT NOT NULL,
        device_id   TEXT,
        created_at  TIMESTAMPTZ NOT NULL,
        resolved    BOOLEAN NOT NULL DEFAULT FALSE,
        resolved_at TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sessions (
        id              BIGSERIAL PRIMARY KEY,
        duration        DOUBLE PRECISION NOT NULL,
        max_temperature DOUBLE PRECISION NOT NULL,
        device_id       TEXT NOT NULL,
        date            TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS readings_created_at_idx ON readings (created_at)",
    "CREATE INDEX IF NOT EXISTS alerts_created_at_idx ON alerts (created_at)",
    "CREATE INDEX IF NOT EXISTS sessions_date_idx ON sessions (date)",
];

/// Build a connection pool for the shadow-write workload. Failures here are
/// not fatal to the process; the caller downgrades to a pool-less gateway.
pub async fn create_pool(config: &AppConfig) -> Result<PgPool> {
    let connect_options = PgConnectOptions::from_str(&config.dsn)
        .context("invalid Postgres DSN supplied")?
        .application_name("envmon")
        .options([(
            "statement_timeout",
            config.store.statement_timeout_ms.to_string(),
        )]);

    let pool = PgPoolOptions::new()
        .max_connections(4)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(connect_options)
        .await
        .context("failed to connect to postgres")?;

    info!(station = %config.station, "connected to durable store");
    Ok(pool)
}

/// Idempotent schema bootstrap, run once at successful connect.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    for statement in SCHEMA_SQL {
        sqlx::query(statement)
            .execute(pool)
            .await
            .context("failed to ensure durable store schema")?;
    }
    Ok(())
}
