//! Database metrics collector.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                  MetricsCollector                    │
//! │   collect() ──► MetricsSnapshot (never an Err)       │
//! │        │                                             │
//! │  ┌─────▼───────────────┐                             │
//! │  │ MetricsSource       │ (trait) open() per pass     │
//! │  └─────┬───────────────┘                             │
//! │  ┌─────▼───────────────┐  activity()   ─┐            │
//! │  │ MetricsSession      │  throughput() ─┼─► merge    │
//! │  └─────────────────────┘  storage()    ─┘            │
//! └────────┼─────────────────────────────────────────────┘
//!          │
//!   ┌──────┴───────┐
//!   │              │
//! ┌─▼────────────┐ ┌▼────────────┐
//! │PgMetricsSource│ │ MockSource  │
//! │ (PgPool)     │ │ (Testing)   │
//! └──────────────┘ └─────────────┘
//! ```
//!
//! A pass is all-or-nothing: if any of the three read groups fails, the
//! result is an error snapshot. The session is dropped at the end of the pass
//! whatever the outcome, which returns its connection to the pool.
//!
//! # Usage
//!
//! ```
//! use std::sync::Arc;
//! use pgpulse_core::collector::{MetricsCollector, mock::MockSource};
//!
//! let collector = MetricsCollector::new(Arc::new(MockSource::new()));
//! let snapshot = collector.collect();
//! assert!(snapshot.is_healthy());
//! ```

pub mod mock;
mod pg_collector;

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};
use tracing::warn;

use crate::pool::PoolError;
use crate::snapshot::{
    ActivityCounts, DatabaseMetrics, MetricsSnapshot, StorageFootprint, ThroughputCounters,
};

pub use pg_collector::PgMetricsSource;
pub(crate) use pg_collector::format_postgres_error;

/// Error type for a collection pass.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectError {
    /// No connection could be borrowed.
    Pool(PoolError),
    /// Query execution failed (including statement timeouts).
    Query(String),
    /// A column could not be read into its snapshot field.
    Conversion { column: String, reason: String },
}

impl std::fmt::Display for CollectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectError::Pool(e) => write!(f, "{}", e),
            CollectError::Query(msg) => write!(f, "PostgreSQL query error: {}", msg),
            CollectError::Conversion { column, reason } => {
                write!(f, "PostgreSQL: cannot read {}: {}", column, reason)
            }
        }
    }
}

impl std::error::Error for CollectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CollectError::Pool(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PoolError> for CollectError {
    fn from(e: PoolError) -> Self {
        CollectError::Pool(e)
    }
}

/// Something that can open a diagnostic session against the database.
pub trait MetricsSource: Send + Sync {
    /// Borrows a session for one collection pass. Dropping the session
    /// releases whatever it borrowed.
    fn open(&self) -> Result<Box<dyn MetricsSession + '_>, CollectError>;
}

/// One borrowed connection, able to run the three read groups.
pub trait MetricsSession {
    fn activity(&mut self) -> Result<ActivityCounts, CollectError>;
    fn throughput(&mut self) -> Result<ThroughputCounters, CollectError>;
    fn storage(&mut self) -> Result<StorageFootprint, CollectError>;
}

/// Produces exactly one [`MetricsSnapshot`] per call to [`collect`](Self::collect).
pub struct MetricsCollector {
    source: Arc<dyn MetricsSource>,
    last_captured: Mutex<Option<DateTime<Utc>>>,
}

impl MetricsCollector {
    pub fn new(source: Arc<dyn MetricsSource>) -> Self {
        Self {
            source,
            last_captured: Mutex::new(None),
        }
    }

    /// Runs one collection pass. Faults are folded into an error snapshot.
    pub fn collect(&self) -> MetricsSnapshot {
        let result = self.collect_metrics();
        let captured_at = self.next_timestamp();
        match result {
            Ok(metrics) => MetricsSnapshot::healthy(captured_at, metrics),
            Err(e) => {
                warn!(error = %e, "metrics collection failed");
                MetricsSnapshot::error(captured_at, e.to_string())
            }
        }
    }

    /// Error snapshot stamped from the same clock as collected ones, for
    /// faults raised outside a pass.
    pub fn error_snapshot(&self, message: impl Into<String>) -> MetricsSnapshot {
        MetricsSnapshot::error(self.next_timestamp(), message)
    }

    fn collect_metrics(&self) -> Result<DatabaseMetrics, CollectError> {
        let mut session = self.source.open()?;
        let activity = session.activity()?;
        let throughput = session.throughput()?;
        let storage = session.storage()?;
        Ok(DatabaseMetrics::from_groups(activity, throughput, storage))
    }

    /// Wall-clock time, nudged forward when the clock did not advance so
    /// that `captured_at` is strictly increasing per collector.
    fn next_timestamp(&self) -> DateTime<Utc> {
        let mut last = self
            .last_captured
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut now = Utc::now();
        if let Some(prev) = *last
            && now <= prev
        {
            now = prev + TimeDelta::microseconds(1);
        }
        *last = Some(now);
        now
    }
}
