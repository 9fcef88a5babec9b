//! Export, import and preview route handlers

use super::extract::{parse_table, read_upload};
use crate::error::ApiResult;
use crate::models::Actor;
use crate::state::SharedState;
use crate::transfer::{ImportResult, PreviewReport, SchemaExportBundle};
use axum::{
    extract::{Multipart, Path, Query, State},
    http::header,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Default, Deserialize)]
pub struct ImportQuery {
    /// Accept a bundle whose hash does not match its tables
    #[serde(default, rename = "override")]
    pub override_hash: bool,
}

/// GET /export/{table}
///
/// Download one table as CSV. Governance logs are limited to the most recent rows.
pub async fn export_csv(
    State(state): State<SharedState>,
    Path(table): Path<String>,
    actor: Actor,
) -> ApiResult<impl IntoResponse> {
    let table = parse_table(&table)?;
    let export = state.transfer.export_csv(table, &actor).await?;

    let headers = [
        (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", export.file_name),
        ),
    ];
    Ok((headers, export.contents))
}

/// GET /json/{table}
pub async fn export_table_json(
    State(state): State<SharedState>,
    Path(table): Path<String>,
    actor: Actor,
) -> ApiResult<Json<SchemaExportBundle>> {
    let table = parse_table(&table)?;
    Ok(Json(state.transfer.export_table_json(table, &actor).await?))
}

/// GET /export
pub async fn export_bundle(State(state): State<SharedState>, actor: Actor) -> ApiResult<Json<SchemaExportBundle>> {
    Ok(Json(state.transfer.export_bundle(&actor).await?))
}

/// POST /import/{table}
///
/// Replace one table with an uploaded CSV (multipart field `file`).
pub async fn import_csv(
    State(state): State<SharedState>,
    Path(table): Path<String>,
    actor: Actor,
    multipart: Multipart,
) -> ApiResult<Json<ImportResult>> {
    let table = parse_table(&table)?;
    let (file_name, bytes) = read_upload(multipart).await?;
    debug!(table = %table, file = ?file_name, size = bytes.len(), "CSV upload received");

    Ok(Json(state.transfer.import_csv(table, &bytes, &actor).await?))
}

/// POST /import?override=true
///
/// Restore an uploaded bundle (multipart field `file`).
pub async fn import_bundle(
    State(state): State<SharedState>,
    Query(query): Query<ImportQuery>,
    actor: Actor,
    multipart: Multipart,
) -> ApiResult<Json<ImportResult>> {
    let (file_name, bytes) = read_upload(multipart).await?;
    debug!(file = ?file_name, size = bytes.len(), override_hash = query.override_hash, "Bundle upload received");

    Ok(Json(
        state
            .transfer
            .import_bundle(&bytes, query.override_hash, &actor)
            .await?,
    ))
}

/// POST /preview
pub async fn preview_bundle(State(state): State<SharedState>, multipart: Multipart) -> ApiResult<Json<PreviewReport>> {
    let (_, bytes) = read_upload(multipart).await?;
    Ok(Json(state.transfer.preview(&bytes).await?))
}
