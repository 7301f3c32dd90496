//! pgpulse-core: live PostgreSQL metrics for the catalog admin console.
//!
//! Provides:
//! - `snapshot`: immutable metrics snapshot and its wire shape
//! - `health`: warning thresholds applied to a snapshot
//! - `config`: database and monitor configuration
//! - `pool`: blocking PostgreSQL connection pool shared with the rest of the app
//! - `collector`: diagnostic queries reduced into a snapshot
//! - `poller`: repeating schedule with a single in-flight collection
//! - `channel`: fan-out of published snapshots to observers
//! - `control`: start/stop/pull entry points for the embedding application

pub mod channel;
pub mod collector;
pub mod config;
pub mod control;
pub mod health;
pub mod poller;
pub mod pool;
pub mod snapshot;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
