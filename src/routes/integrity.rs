//! Referential integrity route handlers

use super::extract::parse_table;
use crate::error::{ApiResult, AppError};
use crate::integrity::{FixRequest, FixResult, IntegrityReport};
use crate::models::Actor;
use crate::state::SharedState;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct OrphansQuery {
    /// `live` (default) or `snapshot`
    pub source: Option<String>,
}

/// GET /orphans
pub async fn list_orphans(
    State(state): State<SharedState>,
    Query(query): Query<OrphansQuery>,
) -> ApiResult<Json<IntegrityReport>> {
    let report = match query.source.as_deref() {
        None | Some("live") => state.inspector.detect_orphans().await?,
        Some("snapshot") => state.inspector.detect_orphans_in_snapshots(&state.snapshot_dir).await?,
        Some(other) => {
            return Err(AppError::BadRequest(format!(
                "Unknown source '{}', expected 'live' or 'snapshot'",
                other
            )))
        }
    };
    Ok(Json(report))
}

/// PATCH /orphans/fix/{table}
pub async fn fix_orphan(
    State(state): State<SharedState>,
    Path(table): Path<String>,
    actor: Actor,
    Json(payload): Json<FixRequest>,
) -> ApiResult<Json<FixResult>> {
    let table = parse_table(&table)?;
    Ok(Json(state.inspector.apply_fix(table, payload, &actor).await?))
}
