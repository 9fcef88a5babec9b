//! Governance Sync API - project tracker data governance service
//!
//! Keeps a project tracker's three business tables (projects, phases,
//! step progress) auditable and recoverable:
//! - Export / import of tables as CSV or hashed JSON bundles, with a backup
//!   before every destructive write and all-or-nothing commits
//! - Referential integrity scans with operator-directed fixes
//! - Inline edits recorded field by field in the change history
//! - Ingestion of JSONL governance log files into the governance log table

mod config;
mod editor;
mod error;
mod governance;
mod integrity;
mod ledger;
mod models;
mod routes;
mod state;
mod store;
mod transfer;

use crate::config::{Settings, StoreBackend};
use crate::routes::create_router;
use crate::state::AppState;
use crate::store::{MemoryStore, PgStore, TransactionalStore};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber for structured logging
    init_tracing();

    info!("🚀 Starting Governance Sync API...");

    // Load configuration
    let settings = Settings::load()?;
    info!("📋 Configuration loaded successfully");

    let store = init_store(&settings).await?;
    info!("✅ Store ready (backend: {})", store.backend_name());

    let state = Arc::new(AppState::new(store, &settings));

    // Background governance log ingestion
    let sync_task = if settings.sync.interval_secs > 0 {
        let period = Duration::from_secs(settings.sync.interval_secs);
        info!(
            "🔄 Governance log sync every {}s from {}",
            settings.sync.interval_secs,
            state.sync.log_dir().display()
        );
        Some(state.sync.clone().spawn_periodic(period))
    } else {
        warn!("⚠️  SYNC_INTERVAL_SECS=0, periodic governance log sync disabled");
        None
    };

    // Build the router
    let app = create_router(state, &settings);

    // Create socket address
    let addr = SocketAddr::from((settings.server.host, settings.server.port));

    info!("🌐 Server listening on http://{}", addr);
    info!("");
    info!("📚 API Endpoints:");
    info!("   ─── Export / Import ───");
    info!("   GET   /export/{{table}}              - Download table as CSV");
    info!("   GET   /json/{{table}}                - Download table as hashed bundle");
    info!("   GET   /export                      - Download full bundle");
    info!("   POST  /import/{{table}}              - Replace table from CSV");
    info!("   POST  /import?override=true        - Restore full bundle");
    info!("   POST  /preview                     - Dry-run bundle diff");
    info!("");
    info!("   ─── Integrity ───");
    info!("   GET   /orphans?source=snapshot     - Detect orphaned records");
    info!("   PATCH /orphans/fix/{{table}}         - Fix one orphaned record");
    info!("   PATCH /{{table}}/{{recordId}}          - Inline edit");
    info!("");
    info!("   ─── Governance ───");
    info!("   POST  /governance_logs/sync        - Ingest JSONL log files");
    info!("   GET   /governance_logs             - List recent log entries");
    info!("   PATCH /governance_logs/{{id}}/archive - Archive a log entry");
    info!("   GET   /change_history              - Field-level change history");
    info!("");

    // Create TCP listener and serve
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(task) = sync_task {
        task.abort();
    }

    info!("👋 Server shutdown complete");
    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,governance_sync_api=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}

/// Build the configured store backend
async fn init_store(settings: &Settings) -> anyhow::Result<Arc<dyn TransactionalStore>> {
    match settings.storage.backend {
        StoreBackend::Postgres => {
            let store = PgStore::connect(&settings.database)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to connect to PostgreSQL: {}", e))?;
            store
                .ensure_schema()
                .await
                .map_err(|e| anyhow::anyhow!("Failed to initialize schema: {}", e))?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            warn!("⚠️  Using in-memory store, data is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("📴 Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("📴 Received terminate signal, initiating graceful shutdown...");
        },
    }
}
