//! Scripted metrics source for testing without a PostgreSQL server.
//!
//! Each call to `open()` consumes the next [`MockStep`]; once the script is
//! exhausted every pass is healthy. Healthy passes return
//! [`MockSource::baseline`] for the current pass number, so cumulative
//! counters grow from pass to pass like a live server's.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{CollectError, MetricsSession, MetricsSource};
use crate::pool::PoolError;
use crate::snapshot::{ActivityCounts, DatabaseMetrics, StorageFootprint, ThroughputCounters};

/// The read group a scripted failure applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryGroup {
    Activity,
    Throughput,
    Storage,
}

/// Scripted outcome of one collection pass.
#[derive(Debug, Clone, PartialEq)]
pub enum MockStep {
    Healthy,
    /// `open()` fails as if the pool could not connect.
    FailConnect(String),
    /// The session opens, then the given group fails.
    FailQuery { group: QueryGroup, message: String },
    /// `open()` panics with the message.
    Panic(String),
}

impl MockStep {
    pub fn fail_query(group: QueryGroup, message: impl Into<String>) -> Self {
        MockStep::FailQuery {
            group,
            message: message.into(),
        }
    }
}

#[derive(Default)]
pub struct MockSource {
    script: Mutex<VecDeque<MockStep>>,
    delay: Duration,
    passes: AtomicUsize,
    opened: AtomicUsize,
    released: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a step to the script.
    pub fn then(self, step: MockStep) -> Self {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(step);
        self
    }

    /// Makes every session block for `delay` inside its first query.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Metrics a healthy pass number `pass` (1-based) reduces to.
    pub fn baseline(pass: usize) -> DatabaseMetrics {
        let (activity, throughput, storage) = Self::groups(pass as u64);
        DatabaseMetrics::from_groups(activity, throughput, storage)
    }

    fn groups(pass: u64) -> (ActivityCounts, ThroughputCounters, StorageFootprint) {
        (
            ActivityCounts {
                active_connections: 4,
                waiting_connections: 1,
                blocked_transactions: 0,
            },
            ThroughputCounters {
                xact_commit: 1_000 + pass * 10,
                xact_rollback: 3,
                blks_read: 1_200,
                blks_hit: 98_000 + pass * 100,
            },
            StorageFootprint {
                database_size_pretty: "8241 kB".to_string(),
                table_count: 12,
            },
        )
    }

    /// Total `open()` calls, successful or not.
    pub fn passes(&self) -> usize {
        self.passes.load(Ordering::SeqCst)
    }

    /// Sessions handed out.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Sessions dropped.
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Highest number of sessions alive at the same time.
    pub fn max_concurrent_sessions(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

impl MetricsSource for MockSource {
    fn open(&self) -> Result<Box<dyn MetricsSession + '_>, CollectError> {
        let pass = self.passes.fetch_add(1, Ordering::SeqCst) as u64 + 1;
        let step = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(MockStep::Healthy);

        let failing = match step {
            MockStep::FailConnect(msg) => {
                return Err(CollectError::Pool(PoolError::Connect(msg)));
            }
            MockStep::FailQuery { group, message } => Some((group, message)),
            MockStep::Panic(msg) => panic!("{}", msg),
            MockStep::Healthy => None,
        };

        self.opened.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        Ok(Box::new(MockSession {
            source: self,
            pass,
            failing,
        }))
    }
}

struct MockSession<'a> {
    source: &'a MockSource,
    pass: u64,
    failing: Option<(QueryGroup, String)>,
}

impl MockSession<'_> {
    fn check(&self, group: QueryGroup) -> Result<(), CollectError> {
        match &self.failing {
            Some((g, message)) if *g == group => Err(CollectError::Query(message.clone())),
            _ => Ok(()),
        }
    }
}

impl MetricsSession for MockSession<'_> {
    fn activity(&mut self) -> Result<ActivityCounts, CollectError> {
        if !self.source.delay.is_zero() {
            std::thread::sleep(self.source.delay);
        }
        self.check(QueryGroup::Activity)?;
        Ok(MockSource::groups(self.pass).0)
    }

    fn throughput(&mut self) -> Result<ThroughputCounters, CollectError> {
        self.check(QueryGroup::Throughput)?;
        Ok(MockSource::groups(self.pass).1)
    }

    fn storage(&mut self) -> Result<StorageFootprint, CollectError> {
        self.check(QueryGroup::Storage)?;
        Ok(MockSource::groups(self.pass).2)
    }
}

impl Drop for MockSession<'_> {
    fn drop(&mut self) {
        self.source.active.fetch_sub(1, Ordering::SeqCst);
        self.source.released.fetch_add(1, Ordering::SeqCst);
    }
}
