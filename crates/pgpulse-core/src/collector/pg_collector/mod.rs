//! PostgreSQL metrics source.
//!
//! Runs the diagnostic statements from [`queries`] over a connection
//! borrowed from the shared [`PgPool`]:
//! - `pg_stat_activity` / `pg_locks`: connection and lock counts
//! - `pg_stat_database`: commit/rollback and block counters
//! - `pg_database_size()` / `pg_stat_user_tables`: size and table count
//!
//! The connection is held by [`PgSession`] for exactly one pass and goes back
//! to the pool when the session is dropped.

mod activity;
mod database;
mod queries;
mod storage;

use postgres::Row;

use super::{CollectError, MetricsSession, MetricsSource};
use crate::pool::{PgPool, PooledClient};
use crate::snapshot::{ActivityCounts, StorageFootprint, ThroughputCounters};

/// Metrics source backed by the application's connection pool.
#[derive(Clone)]
pub struct PgMetricsSource {
    pool: PgPool,
}

impl PgMetricsSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl MetricsSource for PgMetricsSource {
    fn open(&self) -> Result<Box<dyn MetricsSession + '_>, CollectError> {
        let client = self.pool.get()?;
        Ok(Box::new(PgSession { client }))
    }
}

struct PgSession {
    client: PooledClient,
}

impl PgSession {
    fn query_single_row(&mut self, sql: &str) -> Result<Row, CollectError> {
        self.client
            .query_one(sql, &[])
            .map_err(|e| CollectError::Query(format_postgres_error(&e)))
    }
}

impl MetricsSession for PgSession {
    fn activity(&mut self) -> Result<ActivityCounts, CollectError> {
        self.query_activity()
    }

    fn throughput(&mut self) -> Result<ThroughputCounters, CollectError> {
        self.query_throughput()
    }

    fn storage(&mut self) -> Result<StorageFootprint, CollectError> {
        self.query_storage()
    }
}

/// Reads a `bigint` count column.
fn count(row: &Row, column: &str) -> Result<u64, CollectError> {
    let value: i64 = row
        .try_get(column)
        .map_err(|e| CollectError::Conversion {
            column: column.to_string(),
            reason: e.to_string(),
        })?;
    non_negative(column, value)
}

fn non_negative(column: &str, value: i64) -> Result<u64, CollectError> {
    u64::try_from(value).map_err(|_| CollectError::Conversion {
        column: column.to_string(),
        reason: format!("negative value {}", value),
    })
}

/// Formats PostgreSQL error message for display.
pub(crate) fn format_postgres_error(e: &postgres::Error) -> String {
    if let Some(db_error) = e.as_db_error() {
        format!("{}: {}", db_error.severity(), db_error.message())
    } else {
        let msg = e.to_string();
        if msg.contains("Connection refused") {
            "connection refused".to_string()
        } else if msg.contains("password authentication failed") {
            "password authentication failed".to_string()
        } else if msg.contains("timed out") {
            "connection timed out".to_string()
        } else if msg.contains("does not exist") {
            msg.split("FATAL:")
                .last()
                .unwrap_or(&msg)
                .trim()
                .to_string()
        } else {
            msg
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_must_be_non_negative() {
        assert_eq!(non_negative("table_count", 12), Ok(12));
        assert_eq!(non_negative("table_count", 0), Ok(0));
        let err = non_negative("blks_hit", -1).unwrap_err();
        assert_eq!(
            err.to_string(),
            "PostgreSQL: cannot read blks_hit: negative value -1"
        );
    }

    #[test]
    fn every_statement_is_read_only() {
        for sql in [
            queries::ACTIVITY_QUERY,
            queries::THROUGHPUT_QUERY,
            queries::STORAGE_QUERY,
        ] {
            let upper = sql.to_uppercase();
            assert!(upper.trim_start().starts_with("SELECT"));
            for verb in ["INSERT", "UPDATE", "DELETE", "ALTER", "DROP"] {
                assert!(!upper.contains(verb), "{verb} in {sql}");
            }
        }
    }

    #[test]
    fn columns_match_reader_names() {
        for column in ["active_connections", "waiting_connections", "blocked_transactions"] {
            assert!(queries::ACTIVITY_QUERY.contains(&format!("AS {column}")));
        }
        for column in ["xact_commit", "xact_rollback", "blks_read", "blks_hit"] {
            assert!(queries::THROUGHPUT_QUERY.contains(&format!("AS {column}")));
        }
        for column in ["db_size", "table_count"] {
            assert!(queries::STORAGE_QUERY.contains(&format!("AS {column}")));
        }
    }
}
