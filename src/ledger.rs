//! Change-history ledger
//!
//! One row per mutated field, written inside the transaction of the
//! mutation and linked to the governance log row that authorized it.

use crate::error::AppError;
use crate::models::governance::{ChangeHistoryRecord, FieldChange};
use crate::models::tables::{value_as_text, TableKind};
use crate::store::{Statement, TransactionalStore, TxId};
use std::sync::Arc;
use tracing::debug;

/// Upper bound for history listings
pub const MAX_HISTORY_LIMIT: usize = 1000;

/// Transaction, actor and authorizing log row shared by every ledger row of one operation
#[derive(Debug, Clone)]
pub struct LedgerScope {
    pub tx: TxId,
    pub changed_by: String,
    pub governance_log_id: i64,
}

#[derive(Clone)]
pub struct ChangeHistoryLedger {
    store: Arc<dyn TransactionalStore>,
}

impl ChangeHistoryLedger {
    pub fn new(store: Arc<dyn TransactionalStore>) -> Self {
        Self { store }
    }

    /// Append one field change; returns the ledger row id
    pub async fn record(
        &self,
        scope: &LedgerScope,
        table: TableKind,
        record_id: &str,
        change: &FieldChange,
    ) -> Result<Option<i64>, AppError> {
        let row = ChangeHistoryRecord {
            id: None,
            table_name: table.name().to_string(),
            record_id: record_id.to_string(),
            field_name: change.field.clone(),
            old_value: value_as_text(&change.old_value),
            new_value: value_as_text(&change.new_value),
            changed_by: scope.changed_by.clone(),
            transaction_id: Some(scope.tx.to_string()),
            governance_log_id: Some(scope.governance_log_id),
            timestamp: None,
        };
        let id = self
            .store
            .insert(TableKind::ChangeHistory, row.to_record(), Some(scope.tx))
            .await?;
        debug!(table = %table, record_id, field = %change.field, "Recorded change history");
        Ok(id)
    }

    /// Append one row per change, in order
    pub async fn record_all(
        &self,
        scope: &LedgerScope,
        table: TableKind,
        record_id: &str,
        changes: &[FieldChange],
    ) -> Result<usize, AppError> {
        for change in changes {
            self.record(scope, table, record_id, change).await?;
        }
        Ok(changes.len())
    }

    /// Entries newest first, optionally filtered by table and record
    pub async fn history(
        &self,
        table: Option<TableKind>,
        record_id: Option<String>,
        limit: usize,
    ) -> Result<Vec<ChangeHistoryRecord>, AppError> {
        let rows = self
            .store
            .execute(
                Statement::SelectHistory {
                    table,
                    record_id,
                    limit: limit.clamp(1, MAX_HISTORY_LIMIT),
                },
                None,
            )
            .await?
            .into_rows();

        rows.into_iter()
            .map(|row| {
                serde_json::from_value(serde_json::Value::Object(row))
                    .map_err(|e| AppError::Internal(format!("Malformed change_history row: {}", e)))
            })
            .collect()
    }
}
