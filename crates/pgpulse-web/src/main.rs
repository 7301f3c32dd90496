mod app;
mod auth;
mod handlers;
mod openapi;
mod state;

use std::net::SocketAddr;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};

use pgpulse_core::config::{DatabaseConfig, MonitorConfig};
use pgpulse_core::control::MonitorControl;

use auth::AuthConfig;
use state::AppState;

// ============================================================
// CLI
// ============================================================

#[derive(Parser)]
#[command(
    name = "pgpulse-web",
    about = "pgpulse live PostgreSQL metrics server",
    version = pgpulse_core::VERSION
)]
struct Args {
    /// Listen address.
    #[arg(long, default_value = "127.0.0.1:8080", env = "PGPULSE_LISTEN")]
    listen: String,

    /// Default polling interval in seconds, used when a start request omits one.
    #[arg(long, default_value = "5", env = "PGPULSE_INTERVAL")]
    interval: f64,

    /// Start polling at startup instead of waiting for a start request.
    #[arg(long, env = "PGPULSE_AUTOSTART")]
    autostart: bool,

    /// Server-side statement timeout for diagnostic queries (ms, 0 disables).
    #[arg(long, default_value = "5000", env = "PGPULSE_STATEMENT_TIMEOUT_MS")]
    statement_timeout_ms: u64,

    /// Connection timeout in seconds.
    #[arg(long, default_value = "5", env = "PGPULSE_CONNECT_TIMEOUT_SECS")]
    connect_timeout_secs: u64,

    /// Maximum pooled connections.
    #[arg(long, default_value = "4", env = "PGPULSE_POOL_SIZE")]
    pool_size: usize,

    /// Basic Auth admin username. If set, --admin-password is also required.
    #[arg(long, env = "PGPULSE_ADMIN_USER")]
    admin_user: Option<String>,

    /// Basic Auth admin password.
    #[arg(long, env = "PGPULSE_ADMIN_PASSWORD")]
    admin_password: Option<String>,

    /// Basic Auth read-only username. If set, --viewer-password is also required.
    #[arg(long, env = "PGPULSE_VIEWER_USER")]
    viewer_user: Option<String>,

    /// Basic Auth read-only password.
    #[arg(long, env = "PGPULSE_VIEWER_PASSWORD")]
    viewer_password: Option<String>,
}

// ============================================================
// Main
// ============================================================

fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pgpulse_web=info,pgpulse_core=info".into()),
        )
        .init();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
        .block_on(async_main(args));
}

async fn async_main(args: Args) {
    info!(version = pgpulse_core::VERSION, "starting");

    let default_interval = match pgpulse_core::poller::interval_from_secs(args.interval) {
        Ok(d) => d,
        Err(e) => {
            error!(error = %e, "invalid --interval");
            process::exit(2);
        }
    };

    let database = match DatabaseConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "failed to read database settings");
            process::exit(1);
        }
    }
    .with_statement_timeout(Duration::from_millis(args.statement_timeout_ms))
    .with_connect_timeout(Duration::from_secs(args.connect_timeout_secs))
    .with_pool_max_size(args.pool_size);
    info!(
        host = %database.host,
        port = database.port,
        dbname = %database.dbname,
        pool_size = database.pool_max_size,
        "database target"
    );

    let auth = match AuthConfig::from_pairs(
        (args.admin_user, args.admin_password),
        (args.viewer_user, args.viewer_password),
    ) {
        Ok(Some(auth)) => {
            info!("basic auth enabled");
            Some(Arc::new(auth))
        }
        Ok(None) => {
            warn!("basic auth disabled, every endpoint is open");
            None
        }
        Err(e) => {
            error!(error = %e, "invalid auth settings");
            process::exit(2);
        }
    };

    let control = Arc::new(MonitorControl::from_config(
        &database,
        MonitorConfig::default().with_default_interval(default_interval),
    ));

    if args.autostart
        && let Err(e) = control.start_monitoring(None).await
    {
        error!(error = %e, "autostart failed");
    }

    let (state, shutdown_tx) = AppState::new(control.clone());
    let app = app::build_router(state, auth).into_make_service_with_connect_info::<SocketAddr>();

    let addr: SocketAddr = args.listen.parse().expect("invalid listen address");
    info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl-c");
            }
            info!("shutting down");
            let _ = shutdown_tx.send(true);
        })
        .await
        .expect("server error");

    control.stop_monitoring().await;
    info!("stopped");
}
