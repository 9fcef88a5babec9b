//! Inline record editing

use crate::error::{not_found_error, validation_error, AppError};
use crate::governance::GovernanceLogger;
use crate::ledger::{ChangeHistoryLedger, LedgerScope};
use crate::models::governance::{Actor, FieldChange, GovernanceLogEntry};
use crate::models::tables::{validate_identifier, value_as_text, Record, TableKind};
use crate::store::{settle, Statement, TransactionalStore, TxId};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditResult {
    pub success: bool,
    pub table: TableKind,
    pub record_id: String,
    pub changes: Vec<FieldChange>,
    /// Absent when no field actually changed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub governance_log_id: Option<i64>,
    pub transaction_id: String,
}

pub struct RecordEditor {
    store: Arc<dyn TransactionalStore>,
    governance: GovernanceLogger,
    ledger: ChangeHistoryLedger,
}

/// Reject anything that is not an editable column of `table`
fn check_fields(table: TableKind, changes: &Record) -> Result<(), AppError> {
    if !table.is_importable() {
        return Err(AppError::BadRequest(format!("Records of '{}' cannot be edited", table)));
    }
    if changes.is_empty() {
        return Err(validation_error("No fields to update"));
    }
    for field in changes.keys() {
        validate_identifier(field).map_err(|e| validation_error(e.to_string()))?;
        if field == table.primary_key() {
            return Err(validation_error(format!(
                "Primary key '{}' cannot be edited",
                field
            )));
        }
        if !table.has_column(field) || table.is_managed_column(field) {
            return Err(validation_error(format!("Unknown field '{}' for {}", field, table)));
        }
    }
    Ok(())
}

impl RecordEditor {
    pub fn new(store: Arc<dyn TransactionalStore>, governance: GovernanceLogger, ledger: ChangeHistoryLedger) -> Self {
        Self {
            store,
            governance,
            ledger,
        }
    }

    /// Write the fields of `changes` that differ from the stored record
    pub async fn edit(
        &self,
        table: TableKind,
        record_id: &str,
        changes: Record,
        actor: &Actor,
    ) -> Result<EditResult, AppError> {
        let result = self.edit_checked(table, record_id, &changes, actor).await;
        if let Err(err) = &result {
            let fields: Vec<&String> = changes.keys().collect();
            let entry = GovernanceLogEntry::new("record_edit", actor)
                .resource(table.name(), record_id)
                .action("update")
                .details(json!({ "fields": fields }));
            self.governance.record_failure(entry, err).await;
        }
        result
    }

    async fn edit_checked(
        &self,
        table: TableKind,
        record_id: &str,
        changes: &Record,
        actor: &Actor,
    ) -> Result<EditResult, AppError> {
        check_fields(table, changes)?;

        let tx = self.store.begin_transaction().await?;
        let result = self.edit_in(tx, table, record_id, changes, actor).await;
        let (applied, governance_log_id) = settle(self.store.as_ref(), tx, result).await?;

        info!(%tx, table = %table, record_id, changed = applied.len(), "✏️ Record edited");
        Ok(EditResult {
            success: true,
            table,
            record_id: record_id.to_string(),
            changes: applied,
            governance_log_id,
            transaction_id: tx.to_string(),
        })
    }

    async fn edit_in(
        &self,
        tx: TxId,
        table: TableKind,
        record_id: &str,
        changes: &Record,
        actor: &Actor,
    ) -> Result<(Vec<FieldChange>, Option<i64>), AppError> {
        let current = self
            .store
            .fetch_one(table, record_id, Some(tx))
            .await?
            .ok_or_else(|| not_found_error(format!("{} record '{}' not found", table, record_id)))?;

        let applied: Vec<FieldChange> = changes
            .iter()
            .filter_map(|(field, new_value)| {
                let old_value = current.get(field).cloned().unwrap_or(Value::Null);
                (value_as_text(&old_value) != value_as_text(new_value)).then(|| FieldChange {
                    field: field.clone(),
                    old_value,
                    new_value: new_value.clone(),
                })
            })
            .collect();
        if applied.is_empty() {
            return Ok((applied, None));
        }

        for change in &applied {
            self.store
                .execute(
                    Statement::UpdateField {
                        table,
                        key: record_id.to_string(),
                        field: change.field.clone(),
                        value: change.new_value.clone(),
                    },
                    Some(tx),
                )
                .await?;
        }

        let entry = GovernanceLogEntry::new("record_edit", actor)
            .resource(table.name(), record_id)
            .action("update")
            .details(json!({
                "table": table.name(),
                "recordId": record_id,
                "changes": applied,
                "transactionId": tx.to_string(),
            }));
        let governance_log_id = self.governance.record(&entry, Some(tx)).await?;

        let scope = LedgerScope {
            tx,
            changed_by: actor.user_id.clone(),
            governance_log_id,
        };
        self.ledger.record_all(&scope, table, record_id, &applied).await?;
        Ok((applied, Some(governance_log_id)))
    }
}
