//! PostgreSQL store backend
//!
//! Each open transaction pins one pooled client on which `BEGIN` was issued.
//! Statements carrying that handle run on the pinned client; autocommit
//! statements check out a fresh client per call.

use crate::config::DatabaseConfig;
use crate::models::tables::{Record, TableKind};
use crate::store::sql::{self, SqlBuilder};
use crate::store::{QueryOutcome, Statement, StoreError, TransactionalStore, TxId};
use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Object, Pool, RecyclingMethod, Runtime};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_postgres::types::ToSql;
use tokio_postgres::{NoTls, Row};
use tracing::{debug, error, info};

type PinnedClient = Arc<Mutex<Object>>;

/// Store backed by a deadpool-postgres pool
pub struct PgStore {
    pool: Pool,
    open: Mutex<HashMap<TxId, PinnedClient>>,
    closed: Mutex<HashSet<TxId>>,
}

impl PgStore {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            open: Mutex::new(HashMap::new()),
            closed: Mutex::new(HashSet::new()),
        }
    }

    /// Build the pool from configuration and verify it with a test query
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let mut cfg = Config::new();
        cfg.host = Some(config.host.clone());
        cfg.port = Some(config.port);
        cfg.user = Some(config.user.clone());
        cfg.password = Some(config.password.clone());
        cfg.dbname = Some(config.database.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(deadpool_postgres::PoolConfig::new(config.max_pool_size));

        let pool = (if config.require_tls {
            let certs = rustls_native_certs::load_native_certs();
            let mut root_store = rustls::RootCertStore::empty();
            for cert in certs.certs {
                root_store.add(cert).ok();
            }

            let tls_config = rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth();

            let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);
            cfg.create_pool(Some(Runtime::Tokio1), tls)
        } else {
            cfg.create_pool(Some(Runtime::Tokio1), NoTls)
        })
        .map_err(|e| StoreError::Rejected(format!("Failed to create pool: {}", e)))?;

        let client = pool.get().await?;
        client.query_one("SELECT 1", &[]).await?;
        drop(client);

        info!(
            "✅ Database connection successful ({}:{}/{}, TLS: {})",
            config.host, config.port, config.database, config.require_tls
        );
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if they don't exist
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        for statement in sql::schema_statements() {
            client.batch_execute(statement).await?;
        }
        info!("✅ Database tables initialized");
        Ok(())
    }

    async fn pinned(&self, tx: TxId) -> Result<PinnedClient, StoreError> {
        self.open
            .lock()
            .await
            .get(&tx)
            .cloned()
            .ok_or_else(|| StoreError::InvalidTransactionState(format!("transaction {} is not open", tx)))
    }

    async fn close(&self, tx: TxId, command: &str) -> Result<(), StoreError> {
        let pinned = self.open.lock().await.remove(&tx);
        let Some(pinned) = pinned else {
            return if self.closed.lock().await.contains(&tx) {
                Ok(())
            } else {
                Err(StoreError::InvalidTransactionState(format!("unknown transaction {}", tx)))
            };
        };

        self.closed.lock().await.insert(tx);
        let client = pinned.lock().await;
        if let Err(e) = client.batch_execute(command).await {
            error!(%tx, "{} failed: {}", command, e);
            drop(client);
            // Never hand a client with an unsettled transaction back to the pool
            if let Ok(mutex) = Arc::try_unwrap(pinned) {
                let _ = Object::take(mutex.into_inner());
            }
            return Err(StoreError::Database(e));
        }
        debug!(%tx, "{} issued", command);
        Ok(())
    }
}

fn decode_rows(rows: Vec<Row>) -> Result<Vec<Record>, StoreError> {
    rows.into_iter()
        .map(|row| match row.try_get::<_, Value>(0)? {
            Value::Object(map) => Ok(map),
            other => Err(StoreError::Decode(format!("expected object, got {}", other))),
        })
        .collect()
}

/// Drop columns the table doesn't have and columns the store assigns
fn insertable_columns(table: TableKind, record: &Record) -> Result<Vec<&'static str>, StoreError> {
    if let Some(unknown) = record.keys().find(|k| !table.has_column(k)) {
        return Err(StoreError::UnknownColumn {
            table,
            column: unknown.clone(),
        });
    }
    Ok(table
        .columns()
        .iter()
        .copied()
        .filter(|c| {
            let present = record.get(*c).is_some_and(|v| !v.is_null());
            present && !(table.has_generated_key() && *c == "id")
        })
        .collect())
}

async fn run(client: &Object, statement: Statement) -> Result<QueryOutcome, StoreError> {
    match statement {
        Statement::SelectAll { table } => {
            let rows = client.query(&SqlBuilder::select_all(table), &[]).await?;
            Ok(QueryOutcome::Rows(decode_rows(rows)?))
        }
        Statement::SelectRecent { table, limit } => {
            let limit = limit as i64;
            let rows = client.query(&SqlBuilder::select_recent(table), &[&limit]).await?;
            Ok(QueryOutcome::Rows(decode_rows(rows)?))
        }
        Statement::SelectOne { table, key } => {
            let rows = client.query(&SqlBuilder::select_one(table), &[&key]).await?;
            Ok(QueryOutcome::Rows(decode_rows(rows)?))
        }
        Statement::Insert { table, record } => {
            let columns = insertable_columns(table, &record)?;
            if columns.is_empty() {
                return Err(StoreError::Rejected(format!("empty row for {}", table)));
            }
            let payload = Value::Object(record);
            let query = SqlBuilder::insert(table, &columns);
            if table.has_generated_key() {
                let row = client.query_one(&query, &[&payload]).await?;
                Ok(QueryOutcome::Inserted(Some(row.try_get::<_, i64>(0)?)))
            } else {
                client.execute(&query, &[&payload]).await?;
                Ok(QueryOutcome::Inserted(None))
            }
        }
        Statement::UpdateField {
            table,
            key,
            field,
            value,
        } => {
            if !table.has_column(&field) {
                return Err(StoreError::UnknownColumn { table, column: field });
            }
            let mut payload = Record::new();
            payload.insert(field.clone(), value);
            let payload = Value::Object(payload);
            let affected = client
                .execute(&SqlBuilder::update_field(table, &field), &[&payload, &key])
                .await?;
            Ok(QueryOutcome::Affected(affected))
        }
        Statement::Delete { table, key } => {
            let affected = client.execute(&SqlBuilder::delete_one(table), &[&key]).await?;
            Ok(QueryOutcome::Affected(affected))
        }
        Statement::DeleteAll { table } => {
            let affected = client.execute(&SqlBuilder::delete_all(table), &[]).await?;
            Ok(QueryOutcome::Affected(affected))
        }
        Statement::FindGovernanceLog { key } => {
            let rows = client
                .query(
                    sql::FIND_GOVERNANCE_LOG,
                    &[&key.timestamp, &key.event_type, &key.resource_id],
                )
                .await?;
            Ok(QueryOutcome::Rows(decode_rows(rows)?))
        }
        Statement::ArchiveGovernanceLog { id } => {
            let affected = client.execute(sql::ARCHIVE_GOVERNANCE_LOG, &[&id]).await?;
            Ok(QueryOutcome::Affected(affected))
        }
        Statement::SelectHistory {
            table,
            record_id,
            limit,
        } => {
            let limit = limit as i64;
            let table_name = table.map(|t| t.name().to_string());
            let mut params: Vec<&(dyn ToSql + Sync)> = vec![&limit];
            if let Some(name) = &table_name {
                params.push(name);
            }
            if let Some(id) = &record_id {
                params.push(id);
            }
            let query = SqlBuilder::select_history(table_name.is_some(), record_id.is_some());
            let rows = client.query(&query, &params).await?;
            Ok(QueryOutcome::Rows(decode_rows(rows)?))
        }
    }
}

#[async_trait]
impl TransactionalStore for PgStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn begin_transaction(&self) -> Result<TxId, StoreError> {
        let client = self.pool.get().await?;
        client.batch_execute("BEGIN").await?;
        let tx = TxId::new();
        self.open.lock().await.insert(tx, Arc::new(Mutex::new(client)));
        debug!(%tx, "BEGIN issued");
        Ok(tx)
    }

    async fn execute(&self, statement: Statement, tx: Option<TxId>) -> Result<QueryOutcome, StoreError> {
        match tx {
            Some(tx) => {
                let pinned = self.pinned(tx).await?;
                let client = pinned.lock().await;
                run(&client, statement).await
            }
            None => {
                let client = self.pool.get().await?;
                run(&client, statement).await
            }
        }
    }

    async fn commit_transaction(&self, tx: TxId) -> Result<(), StoreError> {
        self.close(tx, "COMMIT").await
    }

    async fn rollback_transaction(&self, tx: TxId) -> Result<(), StoreError> {
        self.close(tx, "ROLLBACK").await
    }
}
