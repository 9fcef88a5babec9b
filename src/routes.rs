//! Route definitions and router setup
//!
//! Configures all API routes and middleware.

mod extract;
mod governance;
mod integrity;
mod records;
mod transfer;

use crate::config::Settings;
use crate::state::SharedState;
use axum::{
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderName, Method},
    routing::{get, patch, post},
    Router,
};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    request_id::MakeRequestUuid,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
    ServiceBuilderExt,
};
use tracing::Level;

pub use extract::{USER_ID_HEADER, USER_ROLE_HEADER};

/// Create the application router with all routes and middleware
pub fn create_router(state: SharedState, settings: &Settings) -> Router {
    // Build CORS layer
    let cors = build_cors_layer(settings);

    // Build tracing/logging layer
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    // Build middleware stack
    let middleware = ServiceBuilder::new()
        .set_x_request_id(MakeRequestUuid)
        .layer(trace_layer)
        .layer(CompressionLayer::new())
        .layer(cors)
        .propagate_x_request_id();

    // Build the router
    Router::new()
        // Health check
        .route("/health", get(health_check))

        // Export / import
        .route("/export", get(transfer::export_bundle))
        .route("/export/{table}", get(transfer::export_csv))
        .route("/json/{table}", get(transfer::export_table_json))
        .route("/import", post(transfer::import_bundle))
        .route("/import/{table}", post(transfer::import_csv))
        .route("/preview", post(transfer::preview_bundle))

        // Referential integrity
        .route("/orphans", get(integrity::list_orphans))
        .route("/orphans/fix/{table}", patch(integrity::fix_orphan))

        // Governance log and change history
        .route("/governance_logs", get(governance::list_logs))
        .route("/governance_logs/sync", post(governance::sync_logs))
        .route("/governance_logs/{id}/archive", patch(governance::archive_log))
        .route("/change_history", get(governance::change_history))

        // Inline edit
        .route("/{table}/{record_id}", patch(records::edit_record))

        // Apply middleware and state
        .layer(DefaultBodyLimit::max(settings.transfer.max_upload_bytes))
        .layer(middleware)
        .with_state(state)
}

/// Build CORS layer from settings
fn build_cors_layer(settings: &Settings) -> CorsLayer {
    let origins: Vec<_> = settings
        .cors
        .allowed_origins
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();

    let methods = [Method::GET, Method::POST, Method::PATCH, Method::OPTIONS];
    let headers = [
        header::CONTENT_TYPE,
        header::ACCEPT,
        HeaderName::from_static(USER_ID_HEADER),
        HeaderName::from_static(USER_ROLE_HEADER),
    ];

    if origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(headers)
            .expose_headers([header::CONTENT_DISPOSITION])
            .max_age(Duration::from_secs(3600))
    } else {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers(headers)
            .expose_headers([header::CONTENT_DISPOSITION])
            .max_age(Duration::from_secs(3600))
    }
}

/// Health check endpoint
async fn health_check(State(state): State<SharedState>) -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "success": true,
        "message": "Server is running fine.",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "store": state.store.backend_name(),
    }))
}
