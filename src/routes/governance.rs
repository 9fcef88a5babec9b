//! Governance log and change history route handlers

use super::extract::parse_table;
use crate::error::ApiResult;
use crate::governance::{SyncReport, MAX_LIST_LIMIT};
use crate::models::{Actor, ChangeHistoryRecord, Record, SuccessResponse};
use crate::state::SharedState;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

const DEFAULT_LIMIT: usize = 100;

#[derive(Debug, Default, Deserialize)]
pub struct ListLogsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub table: Option<String>,
    pub record_id: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveResponse {
    pub id: i64,
    pub governance_log_id: i64,
}

/// POST /governance_logs/sync
pub async fn sync_logs(State(state): State<SharedState>) -> ApiResult<Json<SyncReport>> {
    Ok(Json(state.sync.sync().await?))
}

/// GET /governance_logs?limit=
pub async fn list_logs(
    State(state): State<SharedState>,
    Query(query): Query<ListLogsQuery>,
) -> ApiResult<Json<SuccessResponse<Vec<Record>>>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIST_LIMIT);
    let logs = state.governance.list(limit).await?;
    Ok(Json(SuccessResponse::with_data(
        format!("Retrieved {} governance log(s)", logs.len()),
        logs,
    )))
}

/// PATCH /governance_logs/{id}/archive
pub async fn archive_log(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    actor: Actor,
) -> ApiResult<Json<SuccessResponse<ArchiveResponse>>> {
    let governance_log_id = state.governance.archive(id, &actor).await?;
    Ok(Json(SuccessResponse::with_data(
        format!("Governance log {} archived", id),
        ArchiveResponse { id, governance_log_id },
    )))
}

/// GET /change_history?table=&recordId=&limit=
pub async fn change_history(
    State(state): State<SharedState>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<SuccessResponse<Vec<ChangeHistoryRecord>>>> {
    let table = query.table.as_deref().map(parse_table).transpose()?;
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    let history = state.ledger.history(table, query.record_id, limit).await?;
    Ok(Json(SuccessResponse::with_data(
        format!("Retrieved {} change(s)", history.len()),
        history,
    )))
}
