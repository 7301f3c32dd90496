//! Connection and lock counts.

use crate::collector::CollectError;
use crate::snapshot::ActivityCounts;

use super::queries::ACTIVITY_QUERY;
use super::{PgSession, count};

impl PgSession {
    /// Counts active backends, backends waiting on an event, and lock
    /// requests not yet granted. Not cached, these change every tick.
    pub(super) fn query_activity(&mut self) -> Result<ActivityCounts, CollectError> {
        let row = self.query_single_row(ACTIVITY_QUERY)?;
        Ok(ActivityCounts {
            active_connections: count(&row, "active_connections")?,
            waiting_connections: count(&row, "waiting_connections")?,
            blocked_transactions: count(&row, "blocked_transactions")?,
        })
    }
}
