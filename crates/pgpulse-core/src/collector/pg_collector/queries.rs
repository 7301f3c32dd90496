//! Diagnostic statements for the three read groups.
//!
//! Every statement is parameterless, read-only and returns exactly one row.
//! Counts are cast to `bigint` so each column reads as `i64`.

/// Connection and lock counts (`pg_stat_activity`, `pg_locks`).
pub(super) const ACTIVITY_QUERY: &str = r#"
    SELECT
        (SELECT count(*) FROM pg_stat_activity WHERE state = 'active')::bigint
            AS active_connections,
        (SELECT count(*) FROM pg_stat_activity WHERE wait_event_type IS NOT NULL)::bigint
            AS waiting_connections,
        (SELECT count(*) FROM pg_locks WHERE NOT granted)::bigint
            AS blocked_transactions
"#;

/// Cumulative counters of the current database (`pg_stat_database`).
pub(super) const THROUGHPUT_QUERY: &str = r#"
    SELECT
        xact_commit::bigint AS xact_commit,
        xact_rollback::bigint AS xact_rollback,
        blks_read::bigint AS blks_read,
        blks_hit::bigint AS blks_hit
    FROM pg_stat_database
    WHERE datname = current_database()
"#;

/// Database size and user table count.
pub(super) const STORAGE_QUERY: &str = r#"
    SELECT
        pg_size_pretty(pg_database_size(current_database())) AS db_size,
        (SELECT count(*) FROM pg_stat_user_tables)::bigint AS table_count
"#;
