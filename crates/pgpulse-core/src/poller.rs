//! Repeating metrics schedule.
//!
//! [`MetricsPoller::start`] spawns a schedule task that collects once
//! immediately and then every interval until [`MetricsPoller::stop`]; `start`
//! returns once the immediate collection has been cached and published. The
//! schedule is owned by the task, not by the `start` call, so dropping a
//! pending `start` future leaves a consistent running schedule behind.
//!
//! At most one schedule exists per poller, and at most one collection is in
//! flight: the collect → cache → publish sequence runs under a per-poller
//! async mutex, so snapshots are cached and published in the order they were
//! collected.
//!
//! Collections run on the blocking pool because the PostgreSQL driver is
//! synchronous.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::channel::{SnapshotChannel, Subscription};
use crate::collector::MetricsCollector;
use crate::snapshot::MetricsSnapshot;

/// Error type for scheduling requests.
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleError {
    InvalidInterval(String),
}

impl std::fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleError::InvalidInterval(msg) => write!(f, "invalid polling interval: {}", msg),
        }
    }
}

impl std::error::Error for ScheduleError {}

/// Converts a caller-supplied interval in seconds. Only positivity is
/// enforced; bounds are the caller's policy.
pub fn interval_from_secs(secs: f64) -> Result<Duration, ScheduleError> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(ScheduleError::InvalidInterval(format!(
            "{} is not a positive number of seconds",
            secs
        )));
    }
    match Duration::try_from_secs_f64(secs) {
        Ok(d) if !d.is_zero() => Ok(d),
        _ => Err(ScheduleError::InvalidInterval(format!(
            "{} seconds is out of range",
            secs
        ))),
    }
}

/// Longest timer period actually armed. Longer intervals are valid but can
/// not be added to a monotonic instant, and would never fire anyway.
const MAX_TICK_PERIOD: Duration = Duration::from_secs(86_400 * 365 * 30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum StartOutcome {
    Started,
    /// A schedule was already active; nothing changed.
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy)]
struct ActiveSchedule {
    generation: u64,
    interval: Duration,
}

struct Shared {
    collector: MetricsCollector,
    channel: SnapshotChannel,
    last: RwLock<Option<Arc<MetricsSnapshot>>>,
    /// Reentrancy guard: held across one collect → cache → publish sequence.
    in_flight: tokio::sync::Mutex<()>,
    collections: AtomicU64,
    /// Schedule currently owning the tick stream, if any.
    active: Mutex<Option<ActiveSchedule>>,
    generations: AtomicU64,
}

impl Shared {
    async fn run_once(self: &Arc<Self>, interval: Duration) -> Arc<MetricsSnapshot> {
        let _guard = self.in_flight.lock().await;

        let t0 = std::time::Instant::now();
        let shared = self.clone();
        let snapshot = match tokio::task::spawn_blocking(move || shared.collector.collect()).await
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(error = %e, "collection task failed");
                self.collector
                    .error_snapshot(format!("collection task failed: {}", e))
            }
        };
        let elapsed = t0.elapsed();
        let snapshot = Arc::new(snapshot);

        *self.last.write().unwrap_or_else(PoisonError::into_inner) = Some(snapshot.clone());
        let count = self.collections.fetch_add(1, Ordering::SeqCst) + 1;
        let delivered = self.channel.publish(snapshot.clone());

        if count == 1 {
            info!(
                duration_ms = elapsed.as_millis() as u64,
                healthy = snapshot.is_healthy(),
                "first snapshot collected"
            );
        } else {
            debug!(
                duration_ms = elapsed.as_millis() as u64,
                healthy = snapshot.is_healthy(),
                collections = count,
                observers = delivered,
                "tick completed"
            );
        }
        if elapsed > interval / 2 {
            warn!(
                duration_ms = elapsed.as_millis() as u64,
                interval_ms = interval.as_millis() as u64,
                "collection exceeded 50% of interval"
            );
        }

        snapshot
    }

    fn active(&self) -> std::sync::MutexGuard<'_, Option<ActiveSchedule>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears the active schedule when its task ends, however it ends. A newer
/// schedule installed in the meantime is left alone.
struct ActiveGuard {
    shared: Arc<Shared>,
    generation: u64,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let mut active = self.shared.active();
        if matches!(*active, Some(a) if a.generation == self.generation) {
            *active = None;
        }
    }
}

struct Schedule {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Owns one repeating collection schedule and the last-known snapshot.
pub struct MetricsPoller {
    shared: Arc<Shared>,
    schedule: tokio::sync::Mutex<Option<Schedule>>,
}

impl MetricsPoller {
    pub fn new(collector: MetricsCollector) -> Self {
        Self::with_channel(collector, SnapshotChannel::new())
    }

    /// Creates a poller publishing into an existing channel.
    pub fn with_channel(collector: MetricsCollector, channel: SnapshotChannel) -> Self {
        Self {
            shared: Arc::new(Shared {
                collector,
                channel,
                last: RwLock::new(None),
                in_flight: tokio::sync::Mutex::new(()),
                collections: AtomicU64::new(0),
                active: Mutex::new(None),
                generations: AtomicU64::new(0),
            }),
            schedule: tokio::sync::Mutex::new(None),
        }
    }

    /// Starts polling every `interval`, after one immediate collection that
    /// completes before this returns. Idempotent while running.
    pub async fn start(&self, interval: Duration) -> Result<StartOutcome, ScheduleError> {
        if interval.is_zero() {
            return Err(ScheduleError::InvalidInterval(
                "interval must be positive".to_string(),
            ));
        }

        let mut schedule = self.schedule.lock().await;
        if let Some(active) = schedule.as_ref()
            && !active.task.is_finished()
        {
            debug!(
                requested_ms = interval.as_millis() as u64,
                "polling already running, start ignored"
            );
            return Ok(StartOutcome::AlreadyRunning);
        }

        info!(interval_ms = interval.as_millis() as u64, "starting metrics polling");
        let generation = self.shared.generations.fetch_add(1, Ordering::SeqCst) + 1;
        *self.shared.active() = Some(ActiveSchedule {
            generation,
            interval,
        });

        let (first_done, first_done_rx) = oneshot::channel();
        let (shutdown, shutdown_rx) = oneshot::channel();
        let guard = ActiveGuard {
            shared: self.shared.clone(),
            generation,
        };
        let task = tokio::spawn(run_schedule(guard, interval, first_done, shutdown_rx));
        *schedule = Some(Schedule { shutdown, task });

        // Cancelling here leaves the schedule running; it still caches and
        // publishes its first snapshot.
        let _ = first_done_rx.await;
        Ok(StartOutcome::Started)
    }

    /// Cancels future ticks. A collection already in flight may still finish
    /// and publish. Returns whether a schedule was running.
    pub async fn stop(&self) -> bool {
        let mut schedule = self.schedule.lock().await;
        match schedule.take() {
            Some(active) => {
                let _ = active.shutdown.send(());
                *self.shared.active() = None;
                info!(
                    collections = self.collections(),
                    "stopped metrics polling"
                );
                true
            }
            None => {
                debug!("polling not running, stop ignored");
                false
            }
        }
    }

    /// Most recent completed snapshot, `None` before the first collection.
    pub fn last_snapshot(&self) -> Option<Arc<MetricsSnapshot>> {
        self.shared
            .last
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn subscribe(&self) -> Subscription {
        self.shared.channel.subscribe()
    }

    pub fn channel(&self) -> &SnapshotChannel {
        &self.shared.channel
    }

    /// Interval of the active schedule.
    pub fn interval(&self) -> Option<Duration> {
        let active = *self.shared.active();
        active.map(|a| a.interval)
    }

    pub fn is_running(&self) -> bool {
        self.interval().is_some()
    }

    /// Completed collection passes since creation.
    pub fn collections(&self) -> u64 {
        self.shared.collections.load(Ordering::SeqCst)
    }
}

async fn run_schedule(
    guard: ActiveGuard,
    interval: Duration,
    first_done: oneshot::Sender<()>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let shared = guard.shared.clone();
    shared.run_once(interval).await;
    let _ = first_done.send(());

    let period = interval.min(MAX_TICK_PERIOD);
    let mut tick = tokio::time::interval_at(Instant::now() + period, period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            _ = tick.tick() => {}
        }
        shared.run_once(interval).await;
    }
    debug!("tick loop exited");
    drop(guard);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::{MockSource, MockStep};
    use crate::snapshot::SnapshotStatus;

    fn poller_with(source: Arc<MockSource>) -> MetricsPoller {
        MetricsPoller::new(MetricsCollector::new(source))
    }

    #[tokio::test]
    async fn snapshot_available_when_start_returns() {
        let poller = poller_with(Arc::new(MockSource::new()));
        assert!(poller.last_snapshot().is_none());

        let outcome = poller.start(Duration::from_secs(5)).await.unwrap();
        assert_eq!(outcome, StartOutcome::Started);
        let snap = poller.last_snapshot().expect("first collection completed");
        assert!(snap.is_healthy());
        assert!(poller.is_running());
        assert_eq!(poller.interval(), Some(Duration::from_secs(5)));
        poller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn double_start_keeps_one_schedule() {
        let source = Arc::new(MockSource::new());
        let poller = poller_with(source.clone());

        assert_eq!(
            poller.start(Duration::from_secs(5)).await.unwrap(),
            StartOutcome::Started
        );
        assert_eq!(
            poller.start(Duration::from_secs(5)).await.unwrap(),
            StartOutcome::AlreadyRunning
        );
        assert_eq!(source.passes(), 1);

        // Ticks at 5s and 10s.
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(source.passes(), 3);
        poller.stop().await;
    }

    #[tokio::test]
    async fn stop_before_start_is_noop() {
        let poller = poller_with(Arc::new(MockSource::new()));
        assert!(!poller.stop().await);
        assert!(!poller.stop().await);
        assert!(poller.last_snapshot().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_halts_publication_but_keeps_last_snapshot() {
        let source = Arc::new(MockSource::new());
        let poller = poller_with(source.clone());
        let mut sub = poller.subscribe();

        poller.start(Duration::from_secs(5)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(poller.stop().await);
        let last = poller.last_snapshot().unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(source.passes(), 2);
        assert!(!poller.is_running());

        let first = sub.try_recv().unwrap();
        let second = sub.try_recv().unwrap();
        assert!(sub.try_recv().is_none());
        assert!(first.captured_at < second.captured_at);
        assert!(Arc::ptr_eq(&second, &last));
        assert!(Arc::ptr_eq(&poller.last_snapshot().unwrap(), &last));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_collection_keeps_schedule_running() {
        let source = Arc::new(
            MockSource::new()
                .then(MockStep::Healthy)
                .then(MockStep::FailConnect("connection refused".to_string()))
                .then(MockStep::Healthy),
        );
        let poller = poller_with(source);
        let mut sub = poller.subscribe();

        poller.start(Duration::from_secs(5)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(11)).await;
        poller.stop().await;

        let snaps: Vec<_> = std::iter::from_fn(|| sub.try_recv()).collect();
        let statuses: Vec<_> = snaps.iter().map(|s| s.status()).collect();
        assert_eq!(
            statuses,
            [SnapshotStatus::Healthy, SnapshotStatus::Error, SnapshotStatus::Healthy]
        );
        assert!(snaps.windows(2).all(|w| w[0].captured_at < w[1].captured_at));
        assert_eq!(poller.collections(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_after_stop_creates_new_schedule() {
        let source = Arc::new(MockSource::new());
        let poller = poller_with(source.clone());

        poller.start(Duration::from_secs(5)).await.unwrap();
        poller.stop().await;
        assert_eq!(
            poller.start(Duration::from_secs(2)).await.unwrap(),
            StartOutcome::Started
        );
        assert_eq!(poller.interval(), Some(Duration::from_secs(2)));
        tokio::time::sleep(Duration::from_secs(5)).await;
        // 2 immediate passes plus ticks at 2s and 4s.
        assert_eq!(source.passes(), 4);
        poller.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn slow_collections_never_overlap() {
        let source = Arc::new(MockSource::new().with_delay(Duration::from_millis(30)));
        let poller = poller_with(source.clone());

        poller.start(Duration::from_millis(10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        poller.stop().await;

        assert!(source.passes() >= 2);
        assert_eq!(source.max_concurrent_sessions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_collection_becomes_error_snapshot() {
        let source = Arc::new(
            MockSource::new()
                .then(MockStep::Healthy)
                .then(MockStep::Panic("driver bug".to_string()))
                .then(MockStep::Healthy),
        );
        let poller = poller_with(source);
        let mut sub = poller.subscribe();

        poller.start(Duration::from_secs(5)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(poller.is_running());
        poller.stop().await;

        let snaps: Vec<_> = std::iter::from_fn(|| sub.try_recv()).collect();
        let statuses: Vec<_> = snaps.iter().map(|s| s.status()).collect();
        assert_eq!(
            statuses,
            [SnapshotStatus::Healthy, SnapshotStatus::Error, SnapshotStatus::Healthy]
        );
        assert!(
            snaps[1]
                .error_message()
                .is_some_and(|m| m.starts_with("collection task failed"))
        );
        assert!(snaps.windows(2).all(|w| w[0].captured_at < w[1].captured_at));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancelled_start_leaves_a_consistent_schedule() {
        let source = Arc::new(MockSource::new().with_delay(Duration::from_millis(200)));
        let poller = poller_with(source.clone());
        let mut sub = poller.subscribe();

        let pending = tokio::time::timeout(
            Duration::from_millis(20),
            poller.start(Duration::from_millis(50)),
        )
        .await;
        assert!(pending.is_err());
        assert!(poller.is_running());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(poller.last_snapshot().is_some());
        assert!(sub.try_recv().is_some());
        assert!(source.passes() >= 2, "schedule never ticked");
        assert_eq!(
            poller.start(Duration::from_millis(50)).await.unwrap(),
            StartOutcome::AlreadyRunning
        );

        assert!(poller.stop().await);
        assert!(!poller.is_running());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_lets_the_in_flight_collection_publish_once() {
        let source = Arc::new(MockSource::new().with_delay(Duration::from_millis(200)));
        let poller = poller_with(source.clone());
        let mut sub = poller.subscribe();

        poller.start(Duration::from_millis(100)).await.unwrap();
        while source.passes() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(poller.stop().await);
        assert_eq!(poller.collections(), 1);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(source.passes(), 2);
        assert_eq!(poller.collections(), 2);
        let first = sub.try_recv().unwrap();
        let late = sub.try_recv().unwrap();
        assert!(sub.try_recv().is_none());
        assert!(first.captured_at < late.captured_at);
        assert!(Arc::ptr_eq(&poller.last_snapshot().unwrap(), &late));
        assert!(!poller.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn huge_interval_schedules_without_ticking() {
        let source = Arc::new(MockSource::new());
        let poller = poller_with(source.clone());
        let interval = interval_from_secs(1e19).unwrap();

        assert_eq!(poller.start(interval).await.unwrap(), StartOutcome::Started);
        tokio::time::sleep(Duration::from_secs(3600)).await;

        assert!(poller.is_running());
        assert_eq!(poller.interval(), Some(interval));
        assert_eq!(
            poller.start(interval).await.unwrap(),
            StartOutcome::AlreadyRunning
        );
        assert_eq!(source.passes(), 1);
        assert!(poller.stop().await);
    }

    #[tokio::test]
    async fn zero_interval_is_rejected() {
        let poller = poller_with(Arc::new(MockSource::new()));
        let err = poller.start(Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidInterval(_)));
        assert!(poller.last_snapshot().is_none());
        assert!(!poller.is_running());
    }

    #[test]
    fn interval_conversion_requires_positive_seconds() {
        assert_eq!(interval_from_secs(5.0), Ok(Duration::from_secs(5)));
        assert_eq!(interval_from_secs(0.5), Ok(Duration::from_millis(500)));
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY, 1e-12] {
            assert!(interval_from_secs(bad).is_err(), "{bad} accepted");
        }
    }
}
