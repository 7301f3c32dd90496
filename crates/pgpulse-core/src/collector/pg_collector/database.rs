//! pg_stat_database counters for the current database.

use crate::collector::CollectError;
use crate::snapshot::ThroughputCounters;

use super::queries::THROUGHPUT_QUERY;
use super::{PgSession, count};

impl PgSession {
    /// Reads lifetime commit/rollback and block read/hit totals.
    ///
    /// The cache hit ratio is derived from `blks_hit` and `blks_read` when
    /// the snapshot is assembled, not in SQL.
    pub(super) fn query_throughput(&mut self) -> Result<ThroughputCounters, CollectError> {
        let row = self.query_single_row(THROUGHPUT_QUERY)?;
        Ok(ThroughputCounters {
            xact_commit: count(&row, "xact_commit")?,
            xact_rollback: count(&row, "xact_rollback")?,
            blks_read: count(&row, "blks_read")?,
            blks_hit: count(&row, "blks_hit")?,
        })
    }
}
