use std::collections::HashMap;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::alerts::{ResolveError, ResolvedFilter};
use crate::analytics;
use crate::app::AppContext;
use crate::hub::{self, BroadcastEvent};
use crate::pipeline;
use crate::source::{SYNTHETIC_LOOP, SourceMessage};
use crate::state::{ReadingKind, SessionRecord};

pub fn create_router(ctx: AppContext) -> Router {
    let api = Router::new()
        .route("/temperature", post(post_temperature).get(get_temperature))
        .route("/temperature/emergency", post(post_emergency))
        .route("/session", post(post_session))
        .route("/sessions", get(get_sessions))
        .route("/emergencies", get(get_emergencies))
        .route("/emergencies/:id/resolve", put(put_resolve_emergency))
        .route("/stats/daily", get(get_daily_stats))
        .route("/analytics/series/:kind", get(get_series))
        .route("/analytics/stats", get(get_analytics_stats))
        .route("/analytics/distribution", get(get_distribution));

    Router::new()
        .route("/healthz", get(get_healthz))
        .route("/metrics", get(get_metrics))
        .route("/ws", get(ws_upgrade))
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Uniform `{ message?, data, notice? }` envelope. The notice carries the
/// durable-store degradation hint; its presence never changes the status code.
#[derive(Serialize)]
struct Envelope<T: Serialize> {
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    notice: Option<&'static str>,
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
        .into_response()
}

async fn get_healthz(State(ctx): State<AppContext>) -> StatusCode {
    // With no producer loops configured the service is HTTP-only and ready
    // as soon as it binds.
    let loop_names: &[&str] = if ctx.config.source.synthetic {
        &[SYNTHETIC_LOOP]
    } else {
        &[]
    };
    let staleness = loop_staleness(ctx.config.source.synthetic_interval);

    if ctx.state.is_ready(loop_names, staleness).await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Allowed silence before a producer loop counts as stale: three of its
/// intervals, floored at 30 seconds so sub-10s intervals cannot flap
/// readiness on a single slow iteration.
fn loop_staleness(interval: Duration) -> Duration {
    (interval * 3).max(Duration::from_secs(30))
}

async fn get_metrics(State(ctx): State<AppContext>) -> Response {
    match ctx.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(err) => {
            warn!(error = ?err, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

#[derive(Deserialize)]
struct SubmitReading {
    temperature: Option<f64>,
    humidity: Option<f64>,
    device_id: Option<String>,
    #[serde(default)]
    emergency: bool,
}

async fn post_temperature(
    State(ctx): State<AppContext>,
    Json(body): Json<SubmitReading>,
) -> Response {
    if body.temperature.is_none() && body.humidity.is_none() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Provide at least one of temperature or humidity",
        );
    }
    for value in [body.temperature, body.humidity].into_iter().flatten() {
        if !value.is_finite() {
            return error_response(StatusCode::BAD_REQUEST, "Reading values must be finite");
        }
    }

    let record = pipeline::ingest(
        &ctx,
        SourceMessage {
            temperature: body.temperature,
            humidity: body.humidity,
            device_id: body.device_id,
            emergency: body.emergency,
            received_at: Utc::now(),
        },
    )
    .await;

    // Unlike the source path, the submitter waits for its own shadow write so
    // the degradation notice reaches the caller.
    let outcome = ctx.store.save_observation(record).await;
    let notice = outcome.notice();
    (
        StatusCode::CREATED,
        Json(Envelope {
            message: Some("Temperature data recorded successfully".into()),
            data: outcome.into_inner(),
            notice,
        }),
    )
        .into_response()
}

#[derive(Deserialize)]
struct SubmitEmergency {
    temperature: Option<f64>,
    message: Option<String>,
    device_id: Option<String>,
}

async fn post_emergency(
    State(ctx): State<AppContext>,
    Json(body): Json<SubmitEmergency>,
) -> Response {
    let alert =
        pipeline::raise_manual_alert(&ctx, body.temperature, body.message, body.device_id).await;

    let outcome = ctx.store.save_alert(alert).await;
    let notice = outcome.notice();
    (
        StatusCode::CREATED,
        Json(Envelope {
            message: Some("Emergency alert recorded successfully".into()),
            data: outcome.into_inner(),
            notice,
        }),
    )
        .into_response()
}

#[derive(Deserialize)]
struct SubmitSession {
    duration_seconds: f64,
    max_temperature: f64,
    device_id: Option<String>,
}

async fn post_session(State(ctx): State<AppContext>, Json(body): Json<SubmitSession>) -> Response {
    let session = SessionRecord {
        duration: body.duration_seconds,
        max_temperature: body.max_temperature,
        device_id: body
            .device_id
            .unwrap_or_else(|| pipeline::DEFAULT_DEVICE_ID.to_string()),
        date: Utc::now(),
    };

    ctx.state.record_session(session.clone()).await;
    let event = BroadcastEvent::SessionUpdate(session.clone());
    let name = event.name();
    ctx.hub.publish(event);
    ctx.metrics.inc_event(ctx.station_name(), name);

    let outcome = ctx.store.save_session(session).await;
    let notice = outcome.notice();
    (
        StatusCode::CREATED,
        Json(Envelope {
            message: Some("Session data recorded successfully".into()),
            data: outcome.into_inner(),
            notice,
        }),
    )
        .into_response()
}

async fn get_temperature(
    State(ctx): State<AppContext>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let limit: i64 = params
        .get("limit")
        .and_then(|v| v.parse().ok())
        .unwrap_or(100);

    let range = match parse_date_range(&params) {
        Ok(range) => range,
        Err(response) => return response,
    };

    let outcome = ctx.store.list_observations(limit, range).await;
    let notice = outcome.notice();
    (
        StatusCode::OK,
        Json(Envelope {
            message: None,
            data: outcome.into_inner(),
            notice,
        }),
    )
        .into_response()
}

async fn get_emergencies(
    State(ctx): State<AppContext>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let filter = params
        .get("resolved")
        .map(|v| ResolvedFilter::parse(v))
        .unwrap_or(ResolvedFilter::All);

    let outcome = ctx.store.list_alerts(filter).await;
    let notice = outcome.notice();
    (
        StatusCode::OK,
        Json(Envelope {
            message: None,
            data: outcome.into_inner(),
            notice,
        }),
    )
        .into_response()
}

async fn put_resolve_emergency(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Response {
    let resolved_at = Utc::now();
    match ctx.state.resolve_alert(&id, resolved_at).await {
        Ok(alert) => {
            ctx.metrics.inc_alert_resolved(ctx.station_name());
            let event = BroadcastEvent::AlertResolved {
                id: alert.id.clone(),
            };
            let name = event.name();
            ctx.hub.publish(event);
            ctx.metrics.inc_event(ctx.station_name(), name);

            // Shadow update; resolution is already authoritative in memory.
            let store = ctx.store.clone();
            let alert_id = alert.id.clone();
            tokio::spawn(async move {
                store.mark_alert_resolved(&alert_id, resolved_at).await;
            });

            (
                StatusCode::OK,
                Json(Envelope {
                    message: Some("Emergency alert resolved".into()),
                    data: alert,
                    notice: None,
                }),
            )
                .into_response()
        }
        Err(err @ ResolveError::NotFound) => error_response(StatusCode::NOT_FOUND, err.message()),
        Err(err @ ResolveError::AlreadyResolved) => {
            error_response(StatusCode::CONFLICT, err.message())
        }
    }
}

async fn get_sessions(
    State(ctx): State<AppContext>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let range = match parse_date_range(&params) {
        Ok(range) => range,
        Err(response) => return response,
    };

    let outcome = ctx.store.list_sessions(range).await;
    let notice = outcome.notice();
    (
        StatusCode::OK,
        Json(Envelope {
            message: None,
            data: outcome.into_inner(),
            notice,
        }),
    )
        .into_response()
}

async fn get_daily_stats(
    State(ctx): State<AppContext>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let range = match parse_date_range(&params) {
        Ok(range) => range,
        Err(response) => return response,
    };
    // Default to the trailing seven days.
    let (start, end) =
        range.unwrap_or_else(|| (Utc::now() - ChronoDuration::days(7), Utc::now()));

    let outcome = ctx.store.daily_stats(start, end).await;
    let notice = outcome.notice();
    (
        StatusCode::OK,
        Json(Envelope {
            message: None,
            data: outcome.into_inner(),
            notice,
        }),
    )
        .into_response()
}

async fn get_series(
    State(ctx): State<AppContext>,
    Path(kind): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let kind = match ReadingKind::parse(&kind) {
        Some(kind) => kind,
        None => return error_response(StatusCode::NOT_FOUND, format!("Unknown series {kind:?}")),
    };
    let range = params.get("range").map(String::as_str).unwrap_or("20m");
    let max_points: usize = params
        .get("max_points")
        .and_then(|v| v.parse().ok())
        .unwrap_or(500);

    let series = analytics::range_series(&ctx.state, kind, range, max_points, Utc::now()).await;
    (StatusCode::OK, Json(series)).into_response()
}

async fn get_analytics_stats(State(ctx): State<AppContext>) -> Response {
    let stats = analytics::stats(&ctx.state, Utc::now()).await;
    (StatusCode::OK, Json(stats)).into_response()
}

async fn get_distribution(State(ctx): State<AppContext>) -> Response {
    let distribution = analytics::distribution(&ctx.state).await;
    (StatusCode::OK, Json(distribution)).into_response()
}

/// Parses `startDate`/`endDate` query parameters. Both or neither must be
/// present; values accept RFC 3339 or a plain `YYYY-MM-DD` day.
fn parse_date_range(
    params: &HashMap<String, String>,
) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>, Response> {
    let start = params.get("startDate");
    let end = params.get("endDate");

    match (start, end) {
        (None, None) => Ok(None),
        (Some(start), Some(end)) => {
            let start = parse_instant(start).ok_or_else(|| {
                error_response(StatusCode::BAD_REQUEST, "Invalid startDate value")
            })?;
            let end = parse_instant(end)
                .ok_or_else(|| error_response(StatusCode::BAD_REQUEST, "Invalid endDate value"))?;
            if start > end {
                return Err(error_response(
                    StatusCode::BAD_REQUEST,
                    "startDate must not be after endDate",
                ));
            }
            Ok(Some((start, end)))
        }
        _ => Err(error_response(
            StatusCode::BAD_REQUEST,
            "Provide both startDate and endDate, or neither",
        )),
    }
}

fn parse_instant(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(value) {
        return Some(instant.with_timezone(&Utc));
    }
    value
        .parse::<NaiveDate>()
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

async fn ws_upgrade(State(ctx): State<AppContext>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| observer_session(ctx, socket))
}

/// One connected observer. Subscribes first, then sends the snapshot frames,
/// then relays live events; subscription before snapshot means an event can
/// be duplicated across the boundary but never lost. A lagged observer skips
/// the missed events rather than stalling the hub.
async fn observer_session(ctx: AppContext, mut socket: WebSocket) {
    let mut events = ctx.hub.subscribe();
    ctx.metrics
        .set_observers(ctx.station_name(), ctx.hub.observer_count() as i64);
    debug!(observers = ctx.hub.observer_count(), "observer connected");

    let mut open = true;
    for event in hub::snapshot_events(&ctx.state).await {
        if send_event(&mut socket, &event).await.is_err() {
            open = false;
            break;
        }
    }

    while open {
        tokio::select! {
            inbound = socket.recv() => match inbound {
                // Inbound frames are ignored; the socket is send-only.
                Some(Ok(_)) => {}
                Some(Err(_)) | None => break,
            },
            event = events.recv() => match event {
                Ok(event) => {
                    if send_event(&mut socket, &event).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "observer lagging; live events skipped");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    drop(events);
    ctx.metrics
        .set_observers(ctx.station_name(), ctx.hub.observer_count() as i64);
    debug!(observers = ctx.hub.observer_count(), "observer disconnected");
}

async fn send_event(socket: &mut WebSocket, event: &BroadcastEvent) -> Result<(), ()> {
    let frame = match serde_json::to_string(event) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(error = ?err, "failed to serialize broadcast event");
            return Ok(());
        }
    };
    socket.send(Message::Text(frame)).await.map_err(|_| ())
}
