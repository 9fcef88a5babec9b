//! Inline record edit handler

use super::extract::parse_table;
use crate::editor::EditResult;
use crate::error::ApiResult;
use crate::models::{Actor, Record};
use crate::state::SharedState;
use axum::{
    extract::{Path, State},
    Json,
};

/// PATCH /{table}/{record_id}
///
/// Body is a flat object of field name to new value.
pub async fn edit_record(
    State(state): State<SharedState>,
    Path((table, record_id)): Path<(String, String)>,
    actor: Actor,
    Json(changes): Json<Record>,
) -> ApiResult<Json<EditResult>> {
    let table = parse_table(&table)?;
    Ok(Json(state.editor.edit(table, &record_id, changes, &actor).await?))
}
