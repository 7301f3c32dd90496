//! Metrics snapshot: one immutable, timestamped result of a collection pass.
//!
//! A snapshot is either fully populated ([`SnapshotOutcome::Healthy`]) or
//! minimal ([`SnapshotOutcome::Error`]); there is no partially filled healthy
//! state. Snapshots are shared as `Arc<MetricsSnapshot>` and replaced
//! wholesale on every tick.
//!
//! Wire shape (JSON):
//!
//! ```text
//! {"captured_at": "...", "status": "healthy", "active_connections": 3, ...}
//! {"captured_at": "...", "status": "error", "error": "connection refused"}
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Percentage of block requests served from shared buffers.
///
/// `hits * 100 / (hits + reads + 1)`. The `+1` keeps the ratio defined when
/// both counters are zero and biases it slightly low.
pub fn cache_hit_ratio(hits: u64, reads: u64) -> f64 {
    let hits = hits as f64;
    hits * 100.0 / (hits + reads as f64 + 1.0)
}

/// Snapshot status, as exposed on the wire under `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStatus {
    Healthy,
    Error,
}

/// Connection and lock counts.
/// Source: `pg_stat_activity`, `pg_locks`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActivityCounts {
    pub active_connections: u64,
    pub waiting_connections: u64,
    pub blocked_transactions: u64,
}

/// Cumulative transaction and block counters for the current database.
/// Source: `pg_stat_database`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ThroughputCounters {
    pub xact_commit: u64,
    pub xact_rollback: u64,
    pub blks_read: u64,
    pub blks_hit: u64,
}

/// Size of the current database and its user table count.
/// Source: `pg_database_size()`, `pg_stat_user_tables`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StorageFootprint {
    pub database_size_pretty: String,
    pub table_count: u64,
}

/// Numeric measurements of one successful collection pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
pub struct DatabaseMetrics {
    pub active_connections: u64,
    pub waiting_connections: u64,
    pub blocked_transactions: u64,
    /// Lifetime total; only decreases if the server's statistics reset.
    pub transactions_committed: u64,
    /// Lifetime total; only decreases if the server's statistics reset.
    pub transactions_rolled_back: u64,
    pub blocks_read: u64,
    pub blocks_hit: u64,
    /// Percentage in `[0, 100]`, see [`cache_hit_ratio`].
    pub cache_hit_ratio: f64,
    /// Display-only size string, e.g. `"8241 kB"`.
    pub database_size_pretty: String,
    pub table_count: u64,
}

impl DatabaseMetrics {
    /// Merges the three read groups into one flat record.
    ///
    /// Pure: identical inputs always produce identical output.
    pub fn from_groups(
        activity: ActivityCounts,
        throughput: ThroughputCounters,
        storage: StorageFootprint,
    ) -> Self {
        Self {
            active_connections: activity.active_connections,
            waiting_connections: activity.waiting_connections,
            blocked_transactions: activity.blocked_transactions,
            transactions_committed: throughput.xact_commit,
            transactions_rolled_back: throughput.xact_rollback,
            blocks_read: throughput.blks_read,
            blocks_hit: throughput.blks_hit,
            cache_hit_ratio: cache_hit_ratio(throughput.blks_hit, throughput.blks_read),
            database_size_pretty: storage.database_size_pretty,
            table_count: storage.table_count,
        }
    }
}

/// Result of a collection pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SnapshotOutcome {
    Healthy(DatabaseMetrics),
    Error {
        /// Human-readable diagnostic, never empty.
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
pub struct MetricsSnapshot {
    /// Collection time, taken by the collector rather than the database.
    pub captured_at: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: SnapshotOutcome,
}

impl MetricsSnapshot {
    pub fn healthy(captured_at: DateTime<Utc>, metrics: DatabaseMetrics) -> Self {
        Self {
            captured_at,
            outcome: SnapshotOutcome::Healthy(metrics),
        }
    }

    /// Builds an error snapshot. An empty message is replaced so that
    /// `error` is always meaningful.
    pub fn error(captured_at: DateTime<Utc>, message: impl Into<String>) -> Self {
        let mut error = message.into();
        if error.trim().is_empty() {
            error = "unknown collection failure".to_string();
        }
        Self {
            captured_at,
            outcome: SnapshotOutcome::Error { error },
        }
    }

    pub fn status(&self) -> SnapshotStatus {
        match self.outcome {
            SnapshotOutcome::Healthy(_) => SnapshotStatus::Healthy,
            SnapshotOutcome::Error { .. } => SnapshotStatus::Error,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status() == SnapshotStatus::Healthy
    }

    /// Measurements, present only for healthy snapshots.
    pub fn metrics(&self) -> Option<&DatabaseMetrics> {
        match &self.outcome {
            SnapshotOutcome::Healthy(metrics) => Some(metrics),
            SnapshotOutcome::Error { .. } => None,
        }
    }

    /// Diagnostic, present only for error snapshots.
    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            SnapshotOutcome::Healthy(_) => None,
            SnapshotOutcome::Error { error } => Some(error),
        }
    }
}

/// Pull-path envelope: `snapshot` is `None` until the first collection completes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
pub struct LastMetrics {
    #[cfg_attr(feature = "api", schema(value_type = Option<MetricsSnapshot>))]
    pub snapshot: Option<Arc<MetricsSnapshot>>,
}
