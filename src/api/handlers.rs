//! HTTP handlers for the read and control API.

use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};

use super::envelope::{ApiErrorResponse, ApiResponse, NOT_READY};
use crate::acquisition::{CollectorStatsSnapshot, PollLoop};
use crate::station::Station;
use crate::storage::{LatestReading, LogStatus};
use crate::types::Reading;

/// Shared state for every handler.
#[derive(Clone)]
pub struct ApiState {
    pub station: Arc<Station>,
}

impl ApiState {
    pub fn new(station: Arc<Station>) -> Self {
        Self { station }
    }
}

// ============================================================================
// Request / response types
// ============================================================================

/// Body of `POST /v1/log`. `path` is relative to the configured log directory.
#[derive(Debug, Deserialize)]
pub struct StartLogRequest {
    pub path: PathBuf,
}

/// Body of a successful `DELETE /v1/log`.
#[derive(Debug, Serialize)]
pub struct LogClosed {
    pub path: PathBuf,
}

/// `GET /v1/status`
#[derive(Debug, Serialize)]
pub struct StationStatus {
    pub device: String,
    pub polling: bool,
    pub collector: CollectorStatsSnapshot,
    pub log: LogStatus,
}

// ============================================================================
// Read API
// ============================================================================

const NOT_READY_MESSAGE: &str = "No reading received from the data logger yet";

/// `GET /v1/`: the latest reading as `{"time": ..., "data": [...]}`.
pub async fn latest_reading(State(state): State<ApiState>) -> Response {
    match state.station.latest() {
        Some(reading) => (StatusCode::OK, axum::Json(reading.as_ref())).into_response(),
        None => ApiErrorResponse::not_ready(NOT_READY_MESSAGE),
    }
}

/// `GET /v1/status`
pub async fn station_status(State(state): State<ApiState>) -> Response {
    let station = &state.station;
    let device = station.collector().config().addr();
    let polling = station.collector().is_running();
    let collector = station.collector_stats();
    match with_log_lock(&state, Station::log_status).await {
        Ok(log) => ApiResponse::ok(StationStatus {
            device,
            polling,
            collector,
            log,
        }),
        Err(resp) => resp,
    }
}

// ============================================================================
// Log control
// ============================================================================

/// Run a station call that takes the log mutex on the blocking pool. The
/// collector holds that mutex across a row write and its fsync.
async fn with_log_lock<T, F>(state: &ApiState, f: F) -> Result<T, Response>
where
    T: Send + 'static,
    F: FnOnce(&Station) -> T + Send + 'static,
{
    let station = Arc::clone(&state.station);
    tokio::task::spawn_blocking(move || f(&station))
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Log control task failed");
            ApiErrorResponse::internal("Log control task failed")
        })
}

/// `GET /v1/log`
pub async fn log_status(State(state): State<ApiState>) -> Response {
    match with_log_lock(&state, Station::log_status).await {
        Ok(status) => ApiResponse::ok(status),
        Err(resp) => resp,
    }
}

/// `POST /v1/log`: attach a TSV log.
pub async fn start_logging(
    State(state): State<ApiState>,
    axum::Json(request): axum::Json<StartLogRequest>,
) -> Response {
    if request.path.as_os_str().is_empty() {
        return ApiErrorResponse::bad_request("Log path must not be empty");
    }

    let requested = request.path;
    let started = with_log_lock(&state, move |station| {
        station
            .start_logging_in_log_dir(&requested)
            .map(|path| (path, station.log_status()))
    })
    .await;

    match started {
        Ok(Ok((path, status))) => {
            tracing::info!(path = %path.display(), "Logging started via API");
            ApiResponse::created(status)
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Failed to start logging");
            ApiErrorResponse::from_log_error(&e)
        }
        Err(resp) => resp,
    }
}

/// `DELETE /v1/log`: detach the current log.
pub async fn stop_logging(State(state): State<ApiState>) -> Response {
    match with_log_lock(&state, Station::stop_logging).await {
        Ok(Ok(path)) => {
            tracing::info!(path = %path.display(), "Logging stopped via API");
            ApiResponse::ok(LogClosed { path })
        }
        Ok(Err(e)) => ApiErrorResponse::from_log_error(&e),
        Err(resp) => resp,
    }
}

// ============================================================================
// Live stream
// ============================================================================

/// `GET /v1/stream`: one `reading` event per publish. The first event is
/// the current reading, or `not_ready` when nothing has arrived yet.
pub async fn reading_stream(
    State(state): State<ApiState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.station.subscribe();
    let current = rx.borrow_and_update().clone();
    let first = match current {
        Some(reading) => reading_event(&reading),
        None => not_ready_event(),
    };

    let updates = stream::unfold(rx, |mut rx| async move {
        rx.changed().await.ok()?;
        let next: LatestReading = rx.borrow_and_update().clone();
        Some((next, rx))
    })
    .filter_map(|latest| async move { latest.and_then(|r| reading_event(&r)) });

    let events = stream::iter(first).chain(updates).map(Ok);

    Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

fn reading_event(reading: &Reading) -> Option<Event> {
    encode_event(Event::default().event("reading").json_data(reading))
}

/// Same body as `GET /v1/` before the first reading.
fn not_ready_event() -> Option<Event> {
    let body = ApiErrorResponse::body(NOT_READY, NOT_READY_MESSAGE);
    encode_event(Event::default().event("not_ready").json_data(body))
}

fn encode_event(event: Result<Event, axum::Error>) -> Option<Event> {
    match event {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to encode stream event");
            None
        }
    }
}
