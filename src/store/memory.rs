//! In-memory store backend
//!
//! Transactions are serialized: `begin_transaction` takes the writer lock and
//! stages statements on a private copy of the tables, which replaces the live
//! copy on commit. Autocommit writes run as single-statement transactions.
//! Used by the test suite and for local runs without PostgreSQL.

use crate::models::tables::{value_as_text, Record, TableKind};
use crate::store::{QueryOutcome, Statement, StoreError, TransactionalStore, TxId};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;

#[derive(Debug, Clone, Default)]
struct Tables {
    rows: HashMap<TableKind, Vec<Record>>,
    next_id: HashMap<TableKind, i64>,
}

struct OpenTx {
    staged: Tables,
    _writer: OwnedMutexGuard<()>,
}

/// Store backed by process memory
pub struct MemoryStore {
    live: RwLock<Tables>,
    writer: Arc<Mutex<()>>,
    open: Mutex<HashMap<TxId, OpenTx>>,
    closed: Mutex<HashSet<TxId>>,
    failing: Mutex<HashSet<TableKind>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            live: RwLock::new(Tables::default()),
            writer: Arc::new(Mutex::new(())),
            open: Mutex::new(HashMap::new()),
            closed: Mutex::new(HashSet::new()),
            failing: Mutex::new(HashSet::new()),
        }
    }

    /// Make every subsequent write to `table` fail until cleared
    pub async fn fail_writes_to(&self, table: TableKind) {
        self.failing.lock().await.insert(table);
    }

    pub async fn clear_failures(&self) {
        self.failing.lock().await.clear();
    }

    async fn check_failure(&self, statement: &Statement) -> Result<(), StoreError> {
        if statement.is_write() && self.failing.lock().await.contains(&statement.table()) {
            return Err(StoreError::Rejected(format!(
                "writes to {} are failing",
                statement.table()
            )));
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn key_matches(table: TableKind, record: &Record, key: &str) -> bool {
    record
        .get(table.primary_key())
        .and_then(value_as_text)
        .is_some_and(|k| k == key)
}

fn sort_key(table: TableKind, record: &Record) -> (i64, String) {
    let key = record.get(table.primary_key());
    let numeric = key.and_then(Value::as_i64).unwrap_or(0);
    (numeric, key.and_then(value_as_text).unwrap_or_default())
}

impl Tables {
    fn table(&self, table: TableKind) -> &[Record] {
        self.rows.get(&table).map(Vec::as_slice).unwrap_or(&[])
    }

    fn apply(&mut self, statement: Statement) -> Result<QueryOutcome, StoreError> {
        match statement {
            Statement::SelectAll { table } => {
                let mut rows = self.table(table).to_vec();
                rows.sort_by_key(|r| sort_key(table, r));
                Ok(QueryOutcome::Rows(rows))
            }
            Statement::SelectRecent { table, limit } => {
                let mut rows = self.table(table).to_vec();
                rows.sort_by(|a, b| {
                    let ts = |r: &Record| r.get("timestamp").and_then(value_as_text).unwrap_or_default();
                    ts(b).cmp(&ts(a)).then(sort_key(table, b).cmp(&sort_key(table, a)))
                });
                rows.truncate(limit);
                Ok(QueryOutcome::Rows(rows))
            }
            Statement::SelectOne { table, key } => Ok(QueryOutcome::Rows(
                self.table(table)
                    .iter()
                    .filter(|r| key_matches(table, r, &key))
                    .take(1)
                    .cloned()
                    .collect(),
            )),
            Statement::Insert { table, record } => self.insert(table, record),
            Statement::UpdateField {
                table,
                key,
                field,
                value,
            } => {
                if !table.has_column(&field) {
                    return Err(StoreError::UnknownColumn { table, column: field });
                }
                let mut affected = 0;
                if let Some(rows) = self.rows.get_mut(&table) {
                    for row in rows.iter_mut().filter(|r| key_matches(table, r, &key)) {
                        row.insert(field.clone(), value.clone());
                        if table.has_column("updatedAt") {
                            row.insert("updatedAt".into(), json!(now()));
                        }
                        affected += 1;
                    }
                }
                Ok(QueryOutcome::Affected(affected))
            }
            Statement::Delete { table, key } => {
                let rows = self.rows.entry(table).or_default();
                let before = rows.len();
                rows.retain(|r| !key_matches(table, r, &key));
                Ok(QueryOutcome::Affected((before - rows.len()) as u64))
            }
            Statement::DeleteAll { table } => {
                let removed = self.rows.remove(&table).map(|r| r.len()).unwrap_or(0);
                Ok(QueryOutcome::Affected(removed as u64))
            }
            Statement::FindGovernanceLog { key } => Ok(QueryOutcome::Rows(
                self.table(TableKind::GovernanceLogs)
                    .iter()
                    .filter(|r| {
                        r.get("timestamp").and_then(value_as_text).as_deref() == Some(key.timestamp.as_str())
                            && r.get("event_type").and_then(value_as_text).as_deref()
                                == Some(key.event_type.as_str())
                            && r.get("resource_id").and_then(value_as_text).filter(|v| !v.is_empty())
                                == key.resource_id.clone().filter(|v| !v.is_empty())
                    })
                    .take(1)
                    .cloned()
                    .collect(),
            )),
            Statement::ArchiveGovernanceLog { id } => {
                let mut affected = 0;
                if let Some(rows) = self.rows.get_mut(&TableKind::GovernanceLogs) {
                    for row in rows.iter_mut().filter(|r| r.get("id").and_then(Value::as_i64) == Some(id)) {
                        row.insert("archived".into(), Value::Bool(true));
                        affected += 1;
                    }
                }
                Ok(QueryOutcome::Affected(affected))
            }
            Statement::SelectHistory {
                table,
                record_id,
                limit,
            } => {
                let mut rows: Vec<Record> = self
                    .table(TableKind::ChangeHistory)
                    .iter()
                    .filter(|r| {
                        table.map_or(true, |t| r.get("table_name").and_then(Value::as_str) == Some(t.name()))
                            && record_id
                                .as_deref()
                                .map_or(true, |id| r.get("record_id").and_then(Value::as_str) == Some(id))
                    })
                    .cloned()
                    .collect();
                rows.sort_by_key(|r| std::cmp::Reverse(r.get("id").and_then(Value::as_i64).unwrap_or(0)));
                rows.truncate(limit);
                Ok(QueryOutcome::Rows(rows))
            }
        }
    }

    fn insert(&mut self, table: TableKind, mut record: Record) -> Result<QueryOutcome, StoreError> {
        if let Some(unknown) = record.keys().find(|k| !table.has_column(k)) {
            return Err(StoreError::UnknownColumn {
                table,
                column: unknown.clone(),
            });
        }

        let generated = if table.has_generated_key() {
            let next = self.next_id.entry(table).or_insert(0);
            *next += 1;
            record.insert("id".into(), json!(*next));
            Some(*next)
        } else {
            let key = table
                .key_of(&record)
                .ok_or_else(|| StoreError::Rejected(format!("{} row without {}", table, table.primary_key())))?;
            if self.table(table).iter().any(|r| key_matches(table, r, &key)) {
                return Err(StoreError::Rejected(format!(
                    "duplicate key {}={} in {}",
                    table.primary_key(),
                    key,
                    table
                )));
            }
            for column in ["createdAt", "updatedAt"] {
                if record.get(column).map_or(true, Value::is_null) {
                    record.insert(column.into(), json!(now()));
                }
            }
            None
        };

        if table == TableKind::GovernanceLogs && record.get("archived").map_or(true, Value::is_null) {
            record.insert("archived".into(), Value::Bool(false));
        }

        self.rows.entry(table).or_default().push(record);
        Ok(QueryOutcome::Inserted(generated))
    }
}

#[async_trait]
impl TransactionalStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn begin_transaction(&self) -> Result<TxId, StoreError> {
        let writer = self.writer.clone().lock_owned().await;
        let staged = self.live.read().await.clone();
        let tx = TxId::new();
        self.open.lock().await.insert(
            tx,
            OpenTx {
                staged,
                _writer: writer,
            },
        );
        debug!(%tx, "Began in-memory transaction");
        Ok(tx)
    }

    async fn execute(&self, statement: Statement, tx: Option<TxId>) -> Result<QueryOutcome, StoreError> {
        self.check_failure(&statement).await?;

        match tx {
            Some(tx) => {
                let mut open = self.open.lock().await;
                let entry = open.get_mut(&tx).ok_or_else(|| {
                    StoreError::InvalidTransactionState(format!("transaction {} is not open", tx))
                })?;
                entry.staged.apply(statement)
            }
            None if statement.is_write() => {
                let _writer = self.writer.lock().await;
                let mut live = self.live.write().await;
                let mut staged = live.clone();
                let outcome = staged.apply(statement)?;
                *live = staged;
                Ok(outcome)
            }
            None => self.live.write().await.apply(statement),
        }
    }

    async fn commit_transaction(&self, tx: TxId) -> Result<(), StoreError> {
        let entry = self.open.lock().await.remove(&tx);
        match entry {
            Some(entry) => {
                *self.live.write().await = entry.staged;
                self.closed.lock().await.insert(tx);
                debug!(%tx, "Committed in-memory transaction");
                Ok(())
            }
            None if self.closed.lock().await.contains(&tx) => Ok(()),
            None => Err(StoreError::InvalidTransactionState(format!(
                "unknown transaction {}",
                tx
            ))),
        }
    }

    async fn rollback_transaction(&self, tx: TxId) -> Result<(), StoreError> {
        let entry = self.open.lock().await.remove(&tx);
        match entry {
            Some(_) => {
                self.closed.lock().await.insert(tx);
                debug!(%tx, "Rolled back in-memory transaction");
                Ok(())
            }
            None if self.closed.lock().await.contains(&tx) => Ok(()),
            None => Err(StoreError::InvalidTransactionState(format!(
                "unknown transaction {}",
                tx
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn project(id: &str) -> Record {
        json!({"projectId": id, "projectName": format!("Project {}", id), "owner": "alice"})
            .as_object()
            .cloned()
            .unwrap()
    }

    #[tokio::test]
    async fn test_rollback_discards_staged_writes() {
        let store = MemoryStore::new();
        store.insert(TableKind::Projects, project("P1"), None).await.unwrap();

        let tx = store.begin_transaction().await.unwrap();
        store
            .execute(Statement::DeleteAll { table: TableKind::Projects }, Some(tx))
            .await
            .unwrap();
        assert!(store.fetch_all(TableKind::Projects, Some(tx)).await.unwrap().is_empty());
        store.rollback_transaction(tx).await.unwrap();

        let rows = store.fetch_all(TableKind::Projects, None).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_commit_and_rollback_are_idempotent_once_closed() {
        let store = MemoryStore::new();
        let tx = store.begin_transaction().await.unwrap();
        store.commit_transaction(tx).await.unwrap();
        store.commit_transaction(tx).await.unwrap();
        store.rollback_transaction(tx).await.unwrap();

        let unknown = TxId::new();
        assert!(matches!(
            store.commit_transaction(unknown).await,
            Err(StoreError::InvalidTransactionState(_))
        ));
        assert!(matches!(
            store.execute(Statement::SelectAll { table: TableKind::Projects }, Some(tx)).await,
            Err(StoreError::InvalidTransactionState(_))
        ));
    }

    #[tokio::test]
    async fn test_insert_sets_timestamps_and_rejects_duplicates() {
        let store = MemoryStore::new();
        store.insert(TableKind::Projects, project("P1"), None).await.unwrap();
        let row = store.fetch_one(TableKind::Projects, "P1", None).await.unwrap().unwrap();
        assert!(row.get("createdAt").is_some_and(|v| v.is_string()));

        let err = store.insert(TableKind::Projects, project("P1"), None).await;
        assert!(matches!(err, Err(StoreError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_generated_ids_increase() {
        let store = MemoryStore::new();
        let record = json!({"timestamp": "t", "event_type": "e"}).as_object().cloned().unwrap();
        let first = store.insert(TableKind::GovernanceLogs, record.clone(), None).await.unwrap();
        let second = store.insert(TableKind::GovernanceLogs, record, None).await.unwrap();
        assert_eq!(first, Some(1));
        assert_eq!(second, Some(2));
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let store = MemoryStore::new();
        store.fail_writes_to(TableKind::Projects).await;
        assert!(store.insert(TableKind::Projects, project("P1"), None).await.is_err());
        store.clear_failures().await;
        assert!(store.insert(TableKind::Projects, project("P1"), None).await.is_ok());
    }
}
