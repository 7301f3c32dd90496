//! Entry points the embedding application (or the HTTP layer) calls.
//!
//! [`MonitorControl`] owns one poller and exposes start/stop, the pull path
//! (`last_metrics`) and the push path (`subscribe`). All operations are safe
//! to call from any task.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::channel::Subscription;
use crate::collector::{MetricsCollector, MetricsSource, PgMetricsSource};
use crate::config::{DatabaseConfig, MonitorConfig};
use crate::health::{HealthLevel, MetricAssessment};
use crate::poller::{MetricsPoller, ScheduleError, StartOutcome, interval_from_secs};
use crate::pool::{PgPool, PoolStats};
use crate::snapshot::{LastMetrics, SnapshotStatus};

/// Poller state for status displays.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
pub struct MonitorStatus {
    pub running: bool,
    /// Active interval; absent while stopped.
    pub interval_seconds: Option<f64>,
    pub collections: u64,
    pub observers: usize,
}

/// Threshold assessment of the last snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
pub struct AssessmentReport {
    pub captured_at: Option<DateTime<Utc>>,
    pub status: Option<SnapshotStatus>,
    /// Number of metrics at `warning` level.
    pub warnings: usize,
    pub metrics: Vec<MetricAssessment>,
}

pub struct MonitorControl {
    poller: MetricsPoller,
    config: MonitorConfig,
    pool: Option<PgPool>,
}

impl MonitorControl {
    /// Builds a control surface over an arbitrary metrics source.
    pub fn new(source: Arc<dyn MetricsSource>, config: MonitorConfig) -> Self {
        Self {
            poller: MetricsPoller::new(MetricsCollector::new(source)),
            config,
            pool: None,
        }
    }

    /// Builds a control surface backed by a PostgreSQL pool. No connection
    /// is opened until the first collection.
    pub fn from_config(database: &DatabaseConfig, config: MonitorConfig) -> Self {
        let pool = PgPool::new(database);
        let source = Arc::new(PgMetricsSource::new(pool.clone()));
        let mut control = Self::new(source, config);
        control.pool = Some(pool);
        control
    }

    /// Starts polling. `None` uses the configured default interval.
    pub async fn start_monitoring(
        &self,
        interval_seconds: Option<f64>,
    ) -> Result<StartOutcome, ScheduleError> {
        let interval = match interval_seconds {
            Some(secs) => interval_from_secs(secs)?,
            None => self.config.default_interval,
        };
        self.poller.start(interval).await
    }

    /// Stops polling. Returns whether a schedule was running.
    pub async fn stop_monitoring(&self) -> bool {
        self.poller.stop().await
    }

    pub fn last_metrics(&self) -> LastMetrics {
        LastMetrics {
            snapshot: self.poller.last_snapshot(),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        self.poller.subscribe()
    }

    pub fn assessment(&self) -> AssessmentReport {
        let Some(snapshot) = self.poller.last_snapshot() else {
            return AssessmentReport {
                captured_at: None,
                status: None,
                warnings: 0,
                metrics: Vec::new(),
            };
        };
        let metrics = snapshot.assess(&self.config.thresholds);
        AssessmentReport {
            captured_at: Some(snapshot.captured_at),
            status: Some(snapshot.status()),
            warnings: metrics
                .iter()
                .filter(|m| m.level == HealthLevel::Warning)
                .count(),
            metrics,
        }
    }

    pub fn status(&self) -> MonitorStatus {
        MonitorStatus {
            running: self.poller.is_running(),
            interval_seconds: self.poller.interval().map(|d| d.as_secs_f64()),
            collections: self.poller.collections(),
            observers: self.poller.channel().observer_count(),
        }
    }

    /// Pool counters, when backed by PostgreSQL.
    pub fn pool_stats(&self) -> Option<PoolStats> {
        self.pool.as_ref().map(PgPool::stats)
    }

    pub fn default_interval(&self) -> Duration {
        self.config.default_interval
    }
}
