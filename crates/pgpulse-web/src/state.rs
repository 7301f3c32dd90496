//! Shared application state and global allocator.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;

use tokio::sync::watch;

use pgpulse_core::control::MonitorControl;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) control: Arc<MonitorControl>,
    /// Flips to `true` when the server starts shutting down; open streams end.
    pub(crate) shutdown: watch::Receiver<bool>,
}

impl AppState {
    pub(crate) fn new(control: Arc<MonitorControl>) -> (Self, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                control,
                shutdown: rx,
            },
            tx,
        )
    }
}

pub(crate) static SSE_CONNECTIONS: AtomicUsize = AtomicUsize::new(0);
