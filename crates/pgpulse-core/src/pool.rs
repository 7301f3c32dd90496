//! Blocking PostgreSQL connection pool.
//!
//! The pool is shared between the metrics collector and the rest of the
//! application. Callers borrow a [`PooledClient`] per unit of work; dropping
//! it hands the connection back, on every exit path. Connections found closed
//! on return are discarded instead of being reused.
//!
//! ```ignore
//! let pool = PgPool::new(&DatabaseConfig::from_env()?);
//! let mut client = pool.get()?;
//! client.query_one("SELECT 1", &[])?;
//! // returned to the pool here
//! ```

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use postgres::{Client, NoTls};
use tracing::{debug, warn};

use crate::collector::format_postgres_error;
use crate::config::DatabaseConfig;

/// Error type for connection checkout.
#[derive(Debug, Clone, PartialEq)]
pub enum PoolError {
    /// Opening a new connection failed.
    Connect(String),
    /// No connection became free within the acquire timeout.
    Timeout(Duration),
}

impl std::fmt::Display for PoolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolError::Connect(msg) => write!(f, "PostgreSQL: {}", msg),
            PoolError::Timeout(after) => write!(
                f,
                "PostgreSQL: no free connection after {} ms",
                after.as_millis()
            ),
        }
    }
}

impl std::error::Error for PoolError {}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
pub struct PoolStats {
    pub max_size: usize,
    /// Connections currently open, idle or borrowed.
    pub open: usize,
    pub idle: usize,
    pub in_use: usize,
    /// Connections dropped because they were closed when handed back.
    pub discarded: u64,
}

struct PoolState {
    idle: Vec<Client>,
    open: usize,
    discarded: u64,
}

struct PoolInner {
    config: postgres::Config,
    max_size: usize,
    acquire_timeout: Duration,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, client: Client) {
        let mut state = self.lock();
        if client.is_closed() {
            state.open = state.open.saturating_sub(1);
            state.discarded += 1;
            warn!(
                open = state.open,
                "discarding closed connection on release"
            );
        } else {
            state.idle.push(client);
        }
        drop(state);
        self.available.notify_one();
    }
}

/// Cloneable handle to a shared pool.
#[derive(Clone)]
pub struct PgPool {
    inner: Arc<PoolInner>,
}

impl PgPool {
    /// Creates an empty pool; connections are opened lazily on checkout.
    pub fn new(config: &DatabaseConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                config: config.to_pg_config(),
                max_size: config.pool_max_size.max(1),
                acquire_timeout: config.acquire_timeout,
                state: Mutex::new(PoolState {
                    idle: Vec::new(),
                    open: 0,
                    discarded: 0,
                }),
                available: Condvar::new(),
            }),
        }
    }

    /// Borrows a connection, opening one if the pool has room, otherwise
    /// waiting up to the acquire timeout for one to be returned.
    pub fn get(&self) -> Result<PooledClient, PoolError> {
        let deadline = Instant::now() + self.inner.acquire_timeout;
        let mut state = self.inner.lock();

        loop {
            while let Some(client) = state.idle.pop() {
                if client.is_closed() {
                    state.open = state.open.saturating_sub(1);
                    state.discarded += 1;
                    debug!("dropping idle connection closed by server");
                    continue;
                }
                return Ok(self.wrap(client));
            }

            if state.open < self.inner.max_size {
                // Reserve the slot, then connect without holding the lock.
                state.open += 1;
                drop(state);
                return match self.inner.config.connect(NoTls) {
                    Ok(client) => {
                        debug!("opened new pooled connection");
                        Ok(self.wrap(client))
                    }
                    Err(e) => {
                        let mut state = self.inner.lock();
                        state.open = state.open.saturating_sub(1);
                        drop(state);
                        self.inner.available.notify_one();
                        Err(PoolError::Connect(format_postgres_error(&e)))
                    }
                };
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(PoolError::Timeout(self.inner.acquire_timeout));
            }
            state = self
                .inner
                .available
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.lock();
        PoolStats {
            max_size: self.inner.max_size,
            open: state.open,
            idle: state.idle.len(),
            in_use: state.open.saturating_sub(state.idle.len()),
            discarded: state.discarded,
        }
    }

    fn wrap(&self, client: Client) -> PooledClient {
        PooledClient {
            client: Some(client),
            pool: self.inner.clone(),
        }
    }
}

/// A connection borrowed from [`PgPool`], returned on drop.
pub struct PooledClient {
    client: Option<Client>,
    pool: Arc<PoolInner>,
}

impl std::ops::Deref for PooledClient {
    type Target = Client;

    fn deref(&self) -> &Client {
        // Only `drop` takes the client out.
        self.client.as_ref().expect("pooled client already released")
    }
}

impl std::ops::DerefMut for PooledClient {
    fn deref_mut(&mut self) -> &mut Client {
        self.client.as_mut().expect("pooled client already released")
    }
}

impl Drop for PooledClient {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            self.pool.release(client);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_config() -> DatabaseConfig {
        DatabaseConfig::new("nobody", "nothing")
            .with_host("127.0.0.1")
            .with_port(1)
            .with_connect_timeout(Duration::from_secs(1))
            .with_acquire_timeout(Duration::from_millis(50))
            .with_pool_max_size(2)
    }

    #[test]
    fn new_pool_is_empty() {
        let pool = PgPool::new(&unreachable_config());
        assert_eq!(
            pool.stats(),
            PoolStats {
                max_size: 2,
                open: 0,
                idle: 0,
                in_use: 0,
                discarded: 0,
            }
        );
    }

    #[test]
    fn failed_connect_frees_its_slot() {
        let pool = PgPool::new(&unreachable_config());
        for _ in 0..3 {
            let err = pool.get().err().expect("nothing listens on port 1");
            assert!(matches!(err, PoolError::Connect(_)), "got {err:?}");
        }
        assert_eq!(pool.stats().open, 0);
    }

    #[test]
    fn errors_read_as_postgres_faults() {
        assert_eq!(
            PoolError::Connect("connection refused".into()).to_string(),
            "PostgreSQL: connection refused"
        );
        assert_eq!(
            PoolError::Timeout(Duration::from_millis(250)).to_string(),
            "PostgreSQL: no free connection after 250 ms"
        );
    }
}
