//! OpenAPI documentation definition.

use pgpulse_core::control::{AssessmentReport, MonitorStatus};
use pgpulse_core::health::{HealthLevel, MetricAssessment};
use pgpulse_core::poller::StartOutcome;
use pgpulse_core::pool::PoolStats;
use pgpulse_core::snapshot::{
    DatabaseMetrics, LastMetrics, MetricsSnapshot, SnapshotOutcome, SnapshotStatus,
};
use utoipa::OpenApi;

use crate::handlers::{ErrorBody, HealthResponse, StartRequest, StartResponse, StopResponse};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::handle_health,
        crate::handlers::handle_start,
        crate::handlers::handle_stop,
        crate::handlers::handle_status,
        crate::handlers::handle_metrics,
        crate::handlers::handle_assessment,
    ),
    components(schemas(
        HealthResponse,
        PoolStats,
        StartRequest,
        StartResponse,
        StopResponse,
        StartOutcome,
        ErrorBody,
        MonitorStatus,
        LastMetrics,
        MetricsSnapshot,
        SnapshotOutcome,
        SnapshotStatus,
        DatabaseMetrics,
        AssessmentReport,
        MetricAssessment,
        HealthLevel,
    )),
    info(
        title = "pgpulse API",
        version = "1.0",
        description = "Live PostgreSQL metrics: start/stop polling, pull the last snapshot, or stream updates over SSE (event `metrics-updated`)"
    )
)]
pub(crate) struct ApiDoc;
