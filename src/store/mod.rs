//! Transactional store
//!
//! The single owner of physical storage. Callers open a transaction, pass the
//! opaque handle into every statement of one logical operation, and settle it
//! with commit or rollback. Statements issued without a handle autocommit.

pub mod memory;
pub mod postgres;
pub mod sql;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::error::AppError;
use crate::models::governance::NaturalKey;
use crate::models::tables::{Record, TableKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

/// Opaque transaction handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxId(Uuid);

impl TxId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TxId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Errors raised by a store backend
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("Invalid transaction state: {0}")]
    InvalidTransactionState(String),

    #[error("Unknown column '{column}' for table {table}")]
    UnknownColumn { table: TableKind, column: String },

    #[error("Write rejected: {0}")]
    Rejected(String),

    #[error("Malformed row: {0}")]
    Decode(String),
}

/// A typed statement; backends decide how to execute it
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Every row, ordered by primary key
    SelectAll { table: TableKind },
    /// Newest rows first, bounded
    SelectRecent { table: TableKind, limit: usize },
    SelectOne { table: TableKind, key: String },
    Insert { table: TableKind, record: Record },
    UpdateField {
        table: TableKind,
        key: String,
        field: String,
        value: Value,
    },
    Delete { table: TableKind, key: String },
    DeleteAll { table: TableKind },
    FindGovernanceLog { key: NaturalKey },
    ArchiveGovernanceLog { id: i64 },
    SelectHistory {
        table: Option<TableKind>,
        record_id: Option<String>,
        limit: usize,
    },
}

impl Statement {
    /// Whether the statement mutates storage
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Statement::Insert { .. }
                | Statement::UpdateField { .. }
                | Statement::Delete { .. }
                | Statement::DeleteAll { .. }
                | Statement::ArchiveGovernanceLog { .. }
        )
    }

    pub fn table(&self) -> TableKind {
        match self {
            Statement::SelectAll { table }
            | Statement::SelectRecent { table, .. }
            | Statement::SelectOne { table, .. }
            | Statement::Insert { table, .. }
            | Statement::UpdateField { table, .. }
            | Statement::Delete { table, .. }
            | Statement::DeleteAll { table } => *table,
            Statement::FindGovernanceLog { .. } | Statement::ArchiveGovernanceLog { .. } => {
                TableKind::GovernanceLogs
            }
            Statement::SelectHistory { .. } => TableKind::ChangeHistory,
        }
    }
}

/// Result of executing a statement
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Rows(Vec<Record>),
    Affected(u64),
    /// Insert result; carries the generated id for serial tables
    Inserted(Option<i64>),
}

impl QueryOutcome {
    pub fn into_rows(self) -> Vec<Record> {
        match self {
            QueryOutcome::Rows(rows) => rows,
            _ => Vec::new(),
        }
    }

    pub fn affected(&self) -> u64 {
        match self {
            QueryOutcome::Rows(rows) => rows.len() as u64,
            QueryOutcome::Affected(n) => *n,
            QueryOutcome::Inserted(_) => 1,
        }
    }

    pub fn inserted_id(&self) -> Option<i64> {
        match self {
            QueryOutcome::Inserted(id) => *id,
            _ => None,
        }
    }
}

#[async_trait]
pub trait TransactionalStore: Send + Sync {
    /// Short backend name for logs and runtime context
    fn backend_name(&self) -> &'static str;

    async fn begin_transaction(&self) -> Result<TxId, StoreError>;

    async fn execute(&self, statement: Statement, tx: Option<TxId>) -> Result<QueryOutcome, StoreError>;

    /// Idempotent for handles this store already closed
    async fn commit_transaction(&self, tx: TxId) -> Result<(), StoreError>;

    /// Idempotent for handles this store already closed
    async fn rollback_transaction(&self, tx: TxId) -> Result<(), StoreError>;

    async fn fetch_all(&self, table: TableKind, tx: Option<TxId>) -> Result<Vec<Record>, StoreError> {
        Ok(self.execute(Statement::SelectAll { table }, tx).await?.into_rows())
    }

    async fn fetch_recent(&self, table: TableKind, limit: usize, tx: Option<TxId>) -> Result<Vec<Record>, StoreError> {
        Ok(self
            .execute(Statement::SelectRecent { table, limit }, tx)
            .await?
            .into_rows())
    }

    async fn fetch_one(&self, table: TableKind, key: &str, tx: Option<TxId>) -> Result<Option<Record>, StoreError> {
        let rows = self
            .execute(
                Statement::SelectOne {
                    table,
                    key: key.to_string(),
                },
                tx,
            )
            .await?
            .into_rows();
        Ok(rows.into_iter().next())
    }

    async fn insert(&self, table: TableKind, record: Record, tx: Option<TxId>) -> Result<Option<i64>, StoreError> {
        Ok(self
            .execute(Statement::Insert { table, record }, tx)
            .await?
            .inserted_id())
    }
}

/// Commit on success, roll back on failure.
///
/// Store errors raised inside the transaction surface as
/// `AppError::TransactionFailure`; other errors pass through unchanged.
pub async fn settle<T>(
    store: &dyn TransactionalStore,
    tx: TxId,
    result: Result<T, AppError>,
) -> Result<T, AppError> {
    match result {
        Ok(value) => {
            if let Err(e) = store.commit_transaction(tx).await {
                error!(%tx, "Commit failed: {}", e);
                if let Err(rb) = store.rollback_transaction(tx).await {
                    error!(%tx, "Rollback after failed commit also failed: {}", rb);
                }
                return Err(AppError::TransactionFailure {
                    transaction_id: tx.to_string(),
                    reason: e.to_string(),
                });
            }
            Ok(value)
        }
        Err(err) => {
            if let Err(rb) = store.rollback_transaction(tx).await {
                error!(%tx, "Rollback failed: {}", rb);
            }
            warn!(%tx, "Transaction rolled back: {}", err);
            Err(match err {
                AppError::Store(e) => AppError::TransactionFailure {
                    transaction_id: tx.to_string(),
                    reason: e.to_string(),
                },
                other => other,
            })
        }
    }
}
