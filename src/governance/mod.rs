//! Governance log writer
//!
//! Every mutating operation emits exactly one governance log row inside its
//! own transaction. Failures emit a best-effort row outside any transaction.

pub mod sync;

pub use sync::{GovernanceLogSync, SyncReport};

use crate::error::{not_found_error, AppError};
use crate::ledger::{ChangeHistoryLedger, LedgerScope};
use crate::models::governance::{Actor, FieldChange, GovernanceLogEntry};
use crate::models::tables::{Record, TableKind};
use crate::store::{settle, Statement, TransactionalStore, TxId};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Upper bound for log listings
pub const MAX_LIST_LIMIT: usize = 1000;

#[derive(Clone)]
pub struct GovernanceLogger {
    store: Arc<dyn TransactionalStore>,
    ledger: ChangeHistoryLedger,
}

impl GovernanceLogger {
    pub fn new(store: Arc<dyn TransactionalStore>, ledger: ChangeHistoryLedger) -> Self {
        Self { store, ledger }
    }

    /// Insert one entry and return its store-assigned id
    pub async fn record(&self, entry: &GovernanceLogEntry, tx: Option<TxId>) -> Result<i64, AppError> {
        let id = self
            .store
            .insert(TableKind::GovernanceLogs, entry.to_record(), tx)
            .await
            .map_err(|e| AppError::GovernanceWrite {
                transaction_id: tx.map(|t| t.to_string()),
                reason: e.to_string(),
            })?
            .ok_or_else(|| AppError::Internal("governance log insert returned no id".to_string()))?;
        info!(
            id,
            event_type = %entry.event_type,
            success = entry.success,
            "Governance event recorded"
        );
        Ok(id)
    }

    /// Record a failed operation in autocommit mode.
    ///
    /// Never fails the caller; a store error here is only logged. Must not be
    /// called while the current task holds an open transaction. Skipped when
    /// `err` is itself a failed governance write.
    pub async fn record_failure(&self, entry: GovernanceLogEntry, err: &AppError) {
        if matches!(err, AppError::GovernanceWrite { .. }) {
            warn!(event_type = %entry.event_type, "Not logging failure of a governance log write: {}", err);
            return;
        }
        let entry = entry.failed(err.to_string()).details_with("code", json!(err.code()));
        if let Err(e) = self.record(&entry, None).await {
            error!(event_type = %entry.event_type, "Failed to record failure event: {}", e);
        }
    }

    /// Newest entries first
    pub async fn list(&self, limit: usize) -> Result<Vec<Record>, AppError> {
        Ok(self
            .store
            .fetch_recent(TableKind::GovernanceLogs, limit.clamp(1, MAX_LIST_LIMIT), None)
            .await?)
    }

    /// Soft-delete one entry. The archival itself is logged and ledgered.
    pub async fn archive(&self, id: i64, actor: &Actor) -> Result<i64, AppError> {
        let tx = self.store.begin_transaction().await?;
        let result = self.archive_in(tx, id, actor).await;
        let result = settle(self.store.as_ref(), tx, result).await;

        if let Err(err) = &result {
            let entry = GovernanceLogEntry::new("governance_log_archive", actor)
                .resource(TableKind::GovernanceLogs.name(), id.to_string())
                .action("archive");
            self.record_failure(entry, err).await;
        }
        result
    }

    async fn archive_in(&self, tx: TxId, id: i64, actor: &Actor) -> Result<i64, AppError> {
        let current = self
            .store
            .fetch_one(TableKind::GovernanceLogs, &id.to_string(), Some(tx))
            .await?
            .ok_or_else(|| not_found_error(format!("Governance log {} not found", id)))?;

        let was_archived = current.get("archived").cloned().unwrap_or(Value::Bool(false));
        if was_archived == Value::Bool(true) {
            warn!(id, "Governance log already archived");
        }

        self.store
            .execute(Statement::ArchiveGovernanceLog { id }, Some(tx))
            .await?;

        let entry = GovernanceLogEntry::new("governance_log_archive", actor)
            .resource(TableKind::GovernanceLogs.name(), id.to_string())
            .action("archive")
            .details(json!({
                "archivedEventType": current.get("event_type"),
                "archivedTimestamp": current.get("timestamp"),
                "transactionId": tx.to_string(),
            }));
        let log_id = self.record(&entry, Some(tx)).await?;

        let scope = LedgerScope {
            tx,
            changed_by: actor.user_id.clone(),
            governance_log_id: log_id,
        };
        let change = FieldChange {
            field: "archived".to_string(),
            old_value: was_archived,
            new_value: Value::Bool(true),
        };
        self.ledger
            .record(&scope, TableKind::GovernanceLogs, &id.to_string(), &change)
            .await?;

        Ok(log_id)
    }
}
