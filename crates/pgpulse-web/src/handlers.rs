//! HTTP request handlers: monitoring control, metrics pull path and SSE push path.

use std::convert::Infallible;
use std::sync::atomic::Ordering;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use pgpulse_core::control::{AssessmentReport, MonitorStatus};
use pgpulse_core::poller::{ScheduleError, StartOutcome};
use pgpulse_core::pool::PoolStats;
use pgpulse_core::snapshot::LastMetrics;

use crate::state::{AppState, SSE_CONNECTIONS};

/// SSE event name carried by every pushed snapshot.
pub(crate) const METRICS_EVENT: &str = "metrics-updated";

// ============================================================
// Errors
// ============================================================

#[derive(Debug)]
pub(crate) enum ApiError {
    BadRequest(String),
}

impl From<ScheduleError> for ApiError {
    fn from(e: ScheduleError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

#[derive(Serialize, utoipa::ToSchema)]
pub(crate) struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(error) => {
                (StatusCode::BAD_REQUEST, Json(ErrorBody { error })).into_response()
            }
        }
    }
}

// ============================================================
// Health
// ============================================================

#[derive(Serialize, utoipa::ToSchema)]
pub(crate) struct HealthResponse {
    #[schema(value_type = String)]
    status: &'static str,
    #[schema(value_type = String)]
    version: &'static str,
    /// Connection pool counters; absent when not backed by PostgreSQL.
    pool: Option<PoolStats>,
}

#[utoipa::path(
    get,
    path = "/api/v1/health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    )
)]
pub(crate) async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: pgpulse_core::VERSION,
        pool: state.control.pool_stats(),
    })
}

// ============================================================
// Monitoring control
// ============================================================

#[derive(Debug, Default, Deserialize, utoipa::ToSchema)]
pub(crate) struct StartRequest {
    /// Polling interval in seconds; the server default when omitted.
    interval_seconds: Option<f64>,
}

#[derive(Serialize, utoipa::ToSchema)]
pub(crate) struct StartResponse {
    outcome: StartOutcome,
    status: MonitorStatus,
}

#[derive(Serialize, utoipa::ToSchema)]
pub(crate) struct StopResponse {
    /// Whether a running schedule was cancelled.
    stopped: bool,
    status: MonitorStatus,
}

#[utoipa::path(
    post,
    path = "/api/v1/monitoring/start",
    request_body(content = StartRequest, description = "May be empty to use the default interval"),
    responses(
        (status = 200, description = "Monitoring running", body = StartResponse),
        (status = 400, description = "Invalid interval or body", body = ErrorBody)
    )
)]
pub(crate) async fn handle_start(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<StartResponse>, ApiError> {
    // An empty body means "use the default interval".
    let request: StartRequest = if body.iter().all(u8::is_ascii_whitespace) {
        StartRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("invalid request body: {}", e)))?
    };

    let outcome = state
        .control
        .start_monitoring(request.interval_seconds)
        .await?;
    Ok(Json(StartResponse {
        outcome,
        status: state.control.status(),
    }))
}

#[utoipa::path(
    post,
    path = "/api/v1/monitoring/stop",
    responses(
        (status = 200, description = "Monitoring stopped", body = StopResponse)
    )
)]
pub(crate) async fn handle_stop(State(state): State<AppState>) -> Json<StopResponse> {
    let stopped = state.control.stop_monitoring().await;
    Json(StopResponse {
        stopped,
        status: state.control.status(),
    })
}

#[utoipa::path(
    get,
    path = "/api/v1/monitoring/status",
    responses(
        (status = 200, description = "Poller state", body = MonitorStatus)
    )
)]
pub(crate) async fn handle_status(State(state): State<AppState>) -> Json<MonitorStatus> {
    Json(state.control.status())
}

// ============================================================
// Metrics
// ============================================================

#[utoipa::path(
    get,
    path = "/api/v1/metrics",
    responses(
        (status = 200, description = "Last collected snapshot, null before the first collection", body = LastMetrics)
    )
)]
pub(crate) async fn handle_metrics(State(state): State<AppState>) -> Json<LastMetrics> {
    Json(state.control.last_metrics())
}

#[utoipa::path(
    get,
    path = "/api/v1/metrics/assessment",
    responses(
        (status = 200, description = "Warning levels for the last snapshot", body = AssessmentReport)
    )
)]
pub(crate) async fn handle_assessment(State(state): State<AppState>) -> Json<AssessmentReport> {
    Json(state.control.assessment())
}

// ============================================================
// SSE streaming
// ============================================================

struct SseGuard;

impl Drop for SseGuard {
    fn drop(&mut self) {
        let active = SSE_CONNECTIONS.fetch_sub(1, Ordering::Relaxed) - 1;
        info!(active_connections = active, "SSE client disconnected");
    }
}

/// Pushes every published snapshot as a `metrics-updated` event. Snapshots
/// published before the client connected are not replayed.
pub(crate) async fn handle_stream(
    State(state): State<AppState>,
) -> Sse<impl futures_core::Stream<Item = Result<Event, Infallible>>> {
    let active = SSE_CONNECTIONS.fetch_add(1, Ordering::Relaxed) + 1;
    info!(active_connections = active, "SSE client connected");
    let guard = SseGuard;

    let mut subscription = state.control.subscribe();
    let mut shutdown = state.shutdown.clone();

    let stream = async_stream::stream! {
        let _guard = guard;
        loop {
            let next = tokio::select! {
                next = subscription.recv() => next,
                _ = shutdown.wait_for(|stop| *stop) => None,
            };
            let Some(snapshot) = next else { break };
            match serde_json::to_string(snapshot.as_ref()) {
                Ok(json) => {
                    yield Ok(Event::default().event(METRICS_EVENT).data(json));
                }
                Err(e) => {
                    error!(error = %e, "failed to serialize snapshot");
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
