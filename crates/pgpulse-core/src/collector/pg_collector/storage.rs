//! Database size and table count.

use crate::collector::CollectError;
use crate::snapshot::StorageFootprint;

use super::queries::STORAGE_QUERY;
use super::{PgSession, count};

impl PgSession {
    /// Reads the pretty-printed database size and the number of user tables.
    pub(super) fn query_storage(&mut self) -> Result<StorageFootprint, CollectError> {
        let row = self.query_single_row(STORAGE_QUERY)?;
        let database_size_pretty = row
            .try_get::<_, String>("db_size")
            .map_err(|e| CollectError::Conversion {
                column: "db_size".to_string(),
                reason: e.to_string(),
            })?;
        Ok(StorageFootprint {
            database_size_pretty,
            table_count: count(&row, "table_count")?,
        })
    }
}
