//! taskflow-server – entry point.
//!
//! Startup order:
//! 1. Parse and validate configuration from environment variables.
//! 2. Initialise structured tracing (JSON in production, pretty in debug).
//! 3. Open the SQLite database and run pending migrations.
//! 4. Start the change-event bus.
//! 5. Serve the task API listener and the ops/mirror listener until a
//!    shutdown signal arrives, then close the bus.

use std::future::IntoFuture;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use taskflow_core::EventBus;
use taskflow_server::config::Config;
use taskflow_server::db::{DbOptions, SqliteStore};
use taskflow_server::routes;
use taskflow_server::service::TaskService;
use taskflow_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Configuration ───────────────────────────────────────────────────────
    let cfg = Config::from_env();
    cfg.validate().map_err(anyhow::Error::msg)?;

    // ── 2. Tracing ─────────────────────────────────────────────────────────────
    // A RUST_LOG spec overrides LOG_LEVEL, so ad-hoc per-module filters work
    // without touching the service configuration.
    let filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|spec| spec.parse::<EnvFilter>().ok())
        .or_else(|| cfg.log_level.parse().ok())
        .unwrap_or_default();

    let logs = tracing_subscriber::fmt().with_env_filter(filter);
    if cfg.enable_debug {
        logs.pretty().init();
    } else {
        logs.json().init();
    }

    info!(version = env!("CARGO_PKG_VERSION"), "taskflow-server starting");

    // ── 3. Database ────────────────────────────────────────────────────────────
    let store = SqliteStore::connect(&DbOptions {
        path: cfg.db_path.clone(),
        max_open_conns: cfg.db_max_open_conns,
        max_idle_conns: cfg.db_max_idle_conns,
        conn_max_lifetime: cfg.db_conn_max_lifetime(),
    })
    .await?;

    // ── 4. Event bus + shared state ────────────────────────────────────────────
    let bus = EventBus::start();
    let service = TaskService::new(store, bus.clone());
    let state = Arc::new(AppState::new(cfg.clone(), service));

    // ── 5. Listeners ───────────────────────────────────────────────────────────
    let api = routes::build_api(Arc::clone(&state));
    let mirror = routes::build_mirror(Arc::clone(&state));

    let api_listener = tokio::net::TcpListener::bind(cfg.rpc_addr()).await?;
    let mirror_listener = tokio::net::TcpListener::bind(cfg.http_addr()).await?;
    info!(api = %cfg.rpc_addr(), ops = %cfg.http_addr(), "listening");

    let api_server = axum::serve(api_listener, api)
        .with_graceful_shutdown(shutdown_signal())
        .into_future();
    let mirror_server = axum::serve(mirror_listener, mirror)
        .with_graceful_shutdown(shutdown_signal())
        .into_future();
    tokio::try_join!(api_server, mirror_server)?;

    bus.shutdown();
    info!("server stopped");
    Ok(())
}

/// Resolves on SIGINT (Ctrl-C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    {
        let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(term) => term,
            Err(_) => return ctrl_c.await,
        };
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await;

    info!("shutdown signal received");
}
