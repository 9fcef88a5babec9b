//! Import/export engine
//!
//! Whole-table CSV and whole-schema JSON bundle exports, and transactional
//! imports guarded by structure checks, hash verification and a pre-write
//! backup. Every operation emits one governance log row.

pub mod artifacts;
pub mod bundle;
pub mod preview;
pub mod tabular;
pub mod validation;

pub use artifacts::ArtifactWriter;
pub use bundle::SchemaExportBundle;
pub use preview::{PreviewEngine, PreviewReport};
pub use validation::ValidationReport;

use crate::config::TransferConfig;
use crate::error::AppError;
use crate::governance::GovernanceLogger;
use crate::models::governance::{Actor, GovernanceLogEntry};
use crate::models::tables::{Record, TableKind};
use crate::store::{settle, Statement, TransactionalStore, TxId};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// A rendered CSV export
#[derive(Debug, Clone)]
pub struct CsvExport {
    pub file_name: String,
    pub contents: String,
    pub record_count: usize,
}

/// Outcome of a committed import
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub success: bool,
    pub record_count: usize,
    pub record_counts: BTreeMap<String, usize>,
    pub backup_path: String,
    pub transaction_id: String,
    pub governance_log_id: i64,
    pub hash_verified: bool,
    pub validation: ValidationReport,
}

pub struct ImportExportEngine {
    store: Arc<dyn TransactionalStore>,
    governance: GovernanceLogger,
    artifacts: ArtifactWriter,
    config: TransferConfig,
}

/// Keep only real, non-generated columns of `table`
fn sanitize(table: TableKind, row: &Record) -> Record {
    let dropped: Vec<&String> = row.keys().filter(|k| !table.has_column(k)).collect();
    if !dropped.is_empty() {
        warn!(table = %table, columns = ?dropped, "Ignoring unknown columns in upload");
    }
    row.iter()
        .filter(|(k, _)| table.has_column(k) && !(table.has_generated_key() && k.as_str() == "id"))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn display_path(path: &Path) -> String {
    path.display().to_string()
}

impl ImportExportEngine {
    pub fn new(
        store: Arc<dyn TransactionalStore>,
        governance: GovernanceLogger,
        artifacts: ArtifactWriter,
        config: TransferConfig,
    ) -> Self {
        Self {
            store,
            governance,
            artifacts,
            config,
        }
    }

    /// Full contents, or the recent window for sensitive tables
    async fn read_table(&self, table: TableKind, tx: Option<TxId>) -> Result<Vec<Record>, AppError> {
        let rows = if table.is_sensitive() {
            self.store
                .fetch_recent(table, self.config.export_log_limit, tx)
                .await?
        } else {
            self.store.fetch_all(table, tx).await?
        };
        Ok(rows)
    }

    async fn read_tables(&self, tables: &[TableKind]) -> Result<Vec<(TableKind, Vec<Record>)>, AppError> {
        let mut out = Vec::with_capacity(tables.len());
        for table in tables {
            out.push((*table, self.read_table(*table, None).await?));
        }
        Ok(out)
    }

    async fn with_failure_log<T>(
        &self,
        entry: GovernanceLogEntry,
        result: Result<T, AppError>,
    ) -> Result<T, AppError> {
        if let Err(err) = &result {
            self.governance.record_failure(entry, err).await;
        }
        result
    }

    // ==================== Export ====================

    /// One table as CSV; governance logs are windowed and stripped to the allow-list
    pub async fn export_csv(&self, table: TableKind, actor: &Actor) -> Result<CsvExport, AppError> {
        let result = self.export_csv_inner(table, actor).await;
        let entry = GovernanceLogEntry::new("data_export", actor)
            .resource(table.name(), table.name())
            .action("export_csv");
        self.with_failure_log(entry, result).await
    }

    async fn export_csv_inner(&self, table: TableKind, actor: &Actor) -> Result<CsvExport, AppError> {
        let rows = self.read_table(table, None).await?;
        let contents = tabular::write_csv(table, &rows)?;
        let prefix = format!("{}_export", table);
        let copy = self.artifacts.write_export(&prefix, "csv", contents.as_bytes()).await?;
        let file_name = copy
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.csv", prefix));

        let entry = GovernanceLogEntry::new("data_export", actor)
            .resource(table.name(), table.name())
            .action("export_csv")
            .details(json!({
                "format": "csv",
                "recordCount": rows.len(),
                "destination": display_path(&copy),
                "truncated": table.is_sensitive(),
            }));
        self.governance.record(&entry, None).await?;

        info!(table = %table, records = rows.len(), "📤 CSV export complete");
        Ok(CsvExport {
            file_name,
            contents,
            record_count: rows.len(),
        })
    }

    /// One table as a hashed bundle
    pub async fn export_table_json(&self, table: TableKind, actor: &Actor) -> Result<SchemaExportBundle, AppError> {
        let result = self.export_bundle_of(&[table], actor, "export_json").await;
        let entry = GovernanceLogEntry::new("data_export", actor)
            .resource(table.name(), table.name())
            .action("export_json");
        self.with_failure_log(entry, result).await
    }

    /// Every bundled table as one hashed bundle
    pub async fn export_bundle(&self, actor: &Actor) -> Result<SchemaExportBundle, AppError> {
        let result = self.export_bundle_of(&TableKind::BUNDLED, actor, "export_bundle").await;
        let entry = GovernanceLogEntry::new("data_export", actor)
            .resource("schema", "full")
            .action("export_bundle");
        self.with_failure_log(entry, result).await
    }

    async fn export_bundle_of(
        &self,
        tables: &[TableKind],
        actor: &Actor,
        action: &str,
    ) -> Result<SchemaExportBundle, AppError> {
        let bundle = SchemaExportBundle::build(self.read_tables(tables).await?);
        let contents = serde_json::to_vec_pretty(&bundle)
            .map_err(|e| AppError::Internal(format!("Failed to serialize bundle: {}", e)))?;
        let prefix = match tables {
            [single] => format!("{}_export", single),
            _ => "schema_export".to_string(),
        };
        let copy = self.artifacts.write_export(&prefix, "json", &contents).await?;

        let resource = match tables {
            [single] => single.name(),
            _ => "schema",
        };
        let entry = GovernanceLogEntry::new("data_export", actor)
            .resource(resource, resource)
            .action(action)
            .details(json!({
                "format": "json",
                "recordCounts": bundle.metadata.record_counts,
                "hash": bundle.metadata.hash,
                "destination": display_path(&copy),
            }));
        self.governance.record(&entry, None).await?;

        info!(hash = %bundle.metadata.hash, counts = ?bundle.metadata.record_counts, "📤 Bundle export complete");
        Ok(bundle)
    }

    // ==================== Import ====================

    /// Replace the business tables with a bundle's contents and merge its logs
    pub async fn import_bundle(
        &self,
        bytes: &[u8],
        override_hash: bool,
        actor: &Actor,
    ) -> Result<ImportResult, AppError> {
        let result = self.import_bundle_inner(bytes, override_hash, actor).await;
        let entry = GovernanceLogEntry::new("data_import", actor)
            .resource("schema", "full")
            .action("import_bundle");
        self.with_failure_log(entry, result).await
    }

    async fn import_bundle_inner(
        &self,
        bytes: &[u8],
        override_hash: bool,
        actor: &Actor,
    ) -> Result<ImportResult, AppError> {
        let bundle = SchemaExportBundle::parse(bytes)?;

        let hash_verified = match bundle.verify() {
            Ok(()) => true,
            Err(err) if override_hash && self.config.allow_hash_override => {
                warn!("Importing bundle despite hash mismatch (override): {}", err);
                false
            }
            Err(err) => return Err(err),
        };

        let current = self.read_tables(&TableKind::CANONICAL).await?;
        let backup = self.artifacts.write_backup("schema", current).await?;

        let tx = self.store.begin_transaction().await?;
        let result = self
            .apply_bundle(tx, &bundle, hash_verified, &backup, actor)
            .await;
        let (record_counts, governance_log_id) = settle(self.store.as_ref(), tx, result).await?;

        info!(%tx, counts = ?record_counts, "📥 Bundle import committed");
        Ok(ImportResult {
            success: true,
            record_count: record_counts.values().sum(),
            record_counts,
            backup_path: display_path(&backup),
            transaction_id: tx.to_string(),
            governance_log_id,
            hash_verified,
            validation: ValidationReport::default(),
        })
    }

    async fn apply_bundle(
        &self,
        tx: TxId,
        bundle: &SchemaExportBundle,
        hash_verified: bool,
        backup: &Path,
        actor: &Actor,
    ) -> Result<(BTreeMap<String, usize>, i64), AppError> {
        // Tables absent from the bundle are left as they are
        let replaced: Vec<TableKind> = TableKind::CANONICAL
            .into_iter()
            .filter(|t| bundle.contains(*t))
            .collect();

        // Children first so no intermediate state has dangling references
        for table in replaced.iter().rev() {
            self.store
                .execute(Statement::DeleteAll { table: *table }, Some(tx))
                .await?;
        }

        let mut record_counts = BTreeMap::new();
        for table in replaced {
            let rows = bundle.rows(table);
            for row in &rows {
                self.store.insert(table, sanitize(table, row), Some(tx)).await?;
            }
            record_counts.insert(table.name().to_string(), rows.len());
        }

        let merged = self.merge_logs(tx, &bundle.rows(TableKind::GovernanceLogs)).await?;
        record_counts.insert(TableKind::GovernanceLogs.name().to_string(), merged);

        let entry = GovernanceLogEntry::new("data_import", actor)
            .resource("schema", "full")
            .action("import_bundle")
            .details(json!({
                "recordCounts": record_counts,
                "backupPath": display_path(backup),
                "bundleTimestamp": bundle.metadata.timestamp,
                "bundleVersion": bundle.metadata.version,
                "bundleHash": bundle.metadata.hash,
                "hashVerified": hash_verified,
                "transactionId": tx.to_string(),
            }));
        let log_id = self.governance.record(&entry, Some(tx)).await?;
        Ok((record_counts, log_id))
    }

    /// Insert bundled log rows whose natural key is not stored; returns the number inserted
    async fn merge_logs(&self, tx: TxId, rows: &[Record]) -> Result<usize, AppError> {
        let mut inserted = 0;
        for row in rows {
            let entry = match GovernanceLogEntry::from_record(row) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable governance log row in bundle: {}", e);
                    continue;
                }
            };
            let existing = self
                .store
                .execute(
                    Statement::FindGovernanceLog {
                        key: entry.natural_key(),
                    },
                    Some(tx),
                )
                .await?
                .into_rows();
            if !existing.is_empty() {
                continue;
            }
            let mut record = entry.to_record();
            if let Some(archived) = row.get("archived").filter(|v| v.is_boolean()) {
                record.insert("archived".into(), archived.clone());
            }
            self.store.insert(TableKind::GovernanceLogs, record, Some(tx)).await?;
            inserted += 1;
        }
        Ok(inserted)
    }

    /// Replace one business table with validated CSV rows
    pub async fn import_csv(&self, table: TableKind, bytes: &[u8], actor: &Actor) -> Result<ImportResult, AppError> {
        let result = self.import_csv_inner(table, bytes, actor).await;
        let entry = GovernanceLogEntry::new("data_import", actor)
            .resource(table.name(), table.name())
            .action("import_csv");
        self.with_failure_log(entry, result).await
    }

    async fn import_csv_inner(&self, table: TableKind, bytes: &[u8], actor: &Actor) -> Result<ImportResult, AppError> {
        if !table.is_importable() {
            return Err(AppError::BadRequest(format!(
                "Table '{}' cannot be imported from CSV",
                table
            )));
        }

        let parsed = tabular::read_csv(bytes)?;
        if parsed.is_empty() {
            return Err(AppError::Validation("CSV contains no data rows".to_string()));
        }
        let report = validation::validate_parsed(table, &parsed);
        if !report.is_valid() {
            warn!(table = %table, issues = report.total_issues, "CSV upload rejected");
            return Err(AppError::ValidationFailed(report));
        }
        let rows = parsed.into_records();

        let current = self.store.fetch_all(table, None).await?;
        let backup = self.artifacts.write_backup(table.name(), vec![(table, current)]).await?;

        let tx = self.store.begin_transaction().await?;
        let result = self.apply_csv(tx, table, &rows, &backup, actor).await;
        let governance_log_id = settle(self.store.as_ref(), tx, result).await?;

        info!(%tx, table = %table, records = rows.len(), "📥 CSV import committed");
        Ok(ImportResult {
            success: true,
            record_count: rows.len(),
            record_counts: BTreeMap::from([(table.name().to_string(), rows.len())]),
            backup_path: display_path(&backup),
            transaction_id: tx.to_string(),
            governance_log_id,
            hash_verified: false,
            validation: report,
        })
    }

    async fn apply_csv(
        &self,
        tx: TxId,
        table: TableKind,
        rows: &[Record],
        backup: &Path,
        actor: &Actor,
    ) -> Result<i64, AppError> {
        self.store
            .execute(Statement::DeleteAll { table }, Some(tx))
            .await?;
        for row in rows {
            self.store.insert(table, sanitize(table, row), Some(tx)).await?;
        }

        let entry = GovernanceLogEntry::new("data_import", actor)
            .resource(table.name(), table.name())
            .action("import_csv")
            .details(json!({
                "format": "csv",
                "recordCount": rows.len(),
                "backupPath": display_path(backup),
                "transactionId": tx.to_string(),
                "importedAt": Utc::now().to_rfc3339(),
            }));
        self.governance.record(&entry, Some(tx)).await
    }

    /// Dry-run diff of a bundle against the live tables; writes nothing
    pub async fn preview(&self, bytes: &[u8]) -> Result<PreviewReport, AppError> {
        let bundle = SchemaExportBundle::parse(bytes)?;
        let mut current = HashMap::new();
        for table in TableKind::BUNDLED {
            current.insert(table, self.store.fetch_all(table, None).await?);
        }
        let report = PreviewEngine::preview(&bundle, &current);
        info!(risk = ?report.risk_level, hash_valid = report.hash_valid, "🔍 Import preview computed");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::ChangeHistoryLedger;
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use tempfile::TempDir;

    struct Fixture {
        store: Arc<MemoryStore>,
        engine: ImportExportEngine,
        dir: TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let governance = GovernanceLogger::new(store.clone(), ChangeHistoryLedger::new(store.clone()));
        let artifacts = ArtifactWriter::new(dir.path().join("backups"), dir.path().join("audit"));
        let engine = ImportExportEngine::new(store.clone(), governance, artifacts, TransferConfig::default());
        Fixture { store, engine, dir }
    }

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    /// Strip the store-owned columns so two snapshots compare by content
    fn comparable(table: TableKind, rows: &[Record]) -> Vec<Value> {
        let mut out: Vec<Value> = rows
            .iter()
            .map(|r| {
                Value::Object(
                    r.iter()
                        .filter(|(k, v)| !table.is_managed_column(k) && !v.is_null())
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                )
            })
            .collect();
        out.sort_by_key(|v| v.to_string());
        out
    }

    async fn seed(store: &MemoryStore) {
        for row in [
            json!({"projectId": "P1", "projectName": "Alpha", "owner": "alice", "status": "active"}),
            json!({"projectId": "P2", "projectName": "Beta", "owner": "bob"}),
        ] {
            store.insert(TableKind::Projects, record(row), None).await.unwrap();
        }
        for row in [
            json!({"phaseid": "PH1", "phasename": "Discovery", "project_ref": "P1", "RAG": "green"}),
            json!({"phaseid": "PH2", "phasename": "Build", "project_ref": "P2"}),
        ] {
            store.insert(TableKind::Phases, record(row), None).await.unwrap();
        }
        store
            .insert(
                TableKind::StepProgress,
                record(json!({"stepId": "S1", "phaseId": "PH1", "stepName": "Interview"})),
                None,
            )
            .await
            .unwrap();
    }

    async fn snapshot(store: &MemoryStore) -> Vec<Vec<Value>> {
        let mut out = Vec::new();
        for table in TableKind::CANONICAL {
            out.push(comparable(table, &store.fetch_all(table, None).await.unwrap()));
        }
        out
    }

    fn actor() -> Actor {
        Actor::new("alice", "admin")
    }

    #[tokio::test]
    async fn test_export_then_import_round_trips() {
        let fx = fixture();
        seed(&fx.store).await;
        let before = snapshot(&fx.store).await;

        let bundle = fx.engine.export_bundle(&actor()).await.unwrap();
        assert_eq!(bundle::compute_hash(&bundle.tables), bundle.metadata.hash);
        assert_eq!(bundle.metadata.record_counts["projects"], 2);

        // Mutate, then restore from the bundle
        fx.store
            .execute(Statement::DeleteAll { table: TableKind::StepProgress }, None)
            .await
            .unwrap();
        let bytes = serde_json::to_vec(&bundle).unwrap();
        let result = fx.engine.import_bundle(&bytes, false, &actor()).await.unwrap();

        assert!(result.success);
        assert!(result.hash_verified);
        assert_eq!(result.record_counts["step_progress"], 1);
        assert!(Path::new(&result.backup_path).exists());
        assert_eq!(snapshot(&fx.store).await, before);

        let log = fx
            .store
            .fetch_one(TableKind::GovernanceLogs, &result.governance_log_id.to_string(), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(log["event_type"], "data_import");
        assert_eq!(log["details"]["transactionId"], result.transaction_id);
    }

    #[tokio::test]
    async fn test_failed_import_rolls_back_everything() {
        let fx = fixture();
        seed(&fx.store).await;
        let before = snapshot(&fx.store).await;

        let bundle = SchemaExportBundle::build(vec![
            (TableKind::Projects, vec![record(json!({"projectId": "P9", "projectName": "Other"}))]),
            (TableKind::Phases, vec![]),
            (TableKind::StepProgress, vec![]),
        ]);
        fx.store.fail_writes_to(TableKind::GovernanceLogs).await;

        let err = fx
            .engine
            .import_bundle(&serde_json::to_vec(&bundle).unwrap(), false, &actor())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::GovernanceWrite { transaction_id: Some(_), .. }));
        assert_eq!(snapshot(&fx.store).await, before);

        // No failure row is attempted for a failed governance write
        fx.store.clear_failures().await;
        assert!(fx.store.fetch_all(TableKind::GovernanceLogs, None).await.unwrap().is_empty());

        // The backup taken before the transaction is kept
        let backups: Vec<_> = std::fs::read_dir(fx.dir.path().join("backups")).unwrap().collect();
        assert_eq!(backups.len(), 1);
    }

    #[tokio::test]
    async fn test_altered_hash_is_rejected_without_changes() {
        let fx = fixture();
        seed(&fx.store).await;
        let before = snapshot(&fx.store).await;

        let mut bundle = SchemaExportBundle::build(vec![(TableKind::Projects, vec![])]);
        bundle.metadata.hash = "f".repeat(64);
        let bytes = serde_json::to_vec(&bundle).unwrap();

        let err = fx.engine.import_bundle(&bytes, false, &actor()).await.unwrap_err();
        assert!(matches!(err, AppError::IntegrityCheckFailed { .. }));
        assert_eq!(snapshot(&fx.store).await, before);
        assert!(!fx.dir.path().join("backups").exists());

        let logs = fx.store.fetch_all(TableKind::GovernanceLogs, None).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0]["success"], false);
        assert_eq!(logs[0]["details"]["code"], "INTEGRITY_CHECK_FAILED");

        // Override applies the bundle
        let result = fx.engine.import_bundle(&bytes, true, &actor()).await.unwrap();
        assert!(!result.hash_verified);
        assert!(fx.store.fetch_all(TableKind::Projects, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bundle_logs_are_merged_not_replaced() {
        let fx = fixture();
        seed(&fx.store).await;
        fx.engine.export_bundle(&actor()).await.unwrap();
        // The second export carries the first export's log row
        let bundle = fx.engine.export_bundle(&actor()).await.unwrap();
        assert_eq!(bundle.rows(TableKind::GovernanceLogs).len(), 1);
        let logs_before = fx.store.fetch_all(TableKind::GovernanceLogs, None).await.unwrap().len();

        let bytes = serde_json::to_vec(&bundle).unwrap();
        let result = fx.engine.import_bundle(&bytes, false, &actor()).await.unwrap();
        assert_eq!(result.record_counts["governance_logs"], 0);

        let logs_after = fx.store.fetch_all(TableKind::GovernanceLogs, None).await.unwrap().len();
        assert_eq!(logs_after, logs_before + 1);
    }

    #[tokio::test]
    async fn test_csv_validation_rejects_before_any_write() {
        let fx = fixture();
        seed(&fx.store).await;
        let before = snapshot(&fx.store).await;

        let csv = "phaseid,phasename,project_ref\n\
                   PH1,Discovery,P1\n\
                   PH2,Build,P1\n\
                   PH3,,P1\n\
                   PH4,Test,P1\n\
                   PH5,Launch,P2\n\
                   PH6,Review,P2\n\
                   PH2,Again,P2\n";
        let err = fx
            .engine
            .import_csv(TableKind::Phases, csv.as_bytes(), &actor())
            .await
            .unwrap_err();

        let AppError::ValidationFailed(report) = err else {
            panic!("expected validation failure, got {:?}", err);
        };
        let rows: Vec<usize> = report.issues.iter().map(|i| i.row).collect();
        assert_eq!(rows, vec![3, 7]);
        assert_eq!(snapshot(&fx.store).await, before);
        assert!(!fx.dir.path().join("backups").exists());
    }

    #[tokio::test]
    async fn test_ragged_csv_rows_are_itemized() {
        let fx = fixture();
        seed(&fx.store).await;
        let before = snapshot(&fx.store).await;

        let csv = "projectId,projectName,owner\nP7,Seventh,carol\nP8,Eighth,dan,extra\n";
        let err = fx
            .engine
            .import_csv(TableKind::Projects, csv.as_bytes(), &actor())
            .await
            .unwrap_err();

        let AppError::ValidationFailed(report) = err else {
            panic!("expected validation failure, got {:?}", err);
        };
        assert_eq!(report.total_issues, 1);
        assert_eq!((report.issues[0].row, report.issues[0].field.as_str()), (2, "row"));
        assert_eq!(snapshot(&fx.store).await, before);
    }

    #[tokio::test]
    async fn test_csv_import_replaces_table() {
        let fx = fixture();
        seed(&fx.store).await;

        let csv = "projectId,projectName,owner,colour\nP7,Seventh,carol,red\nP8,Eighth,,blue\n";
        let result = fx
            .engine
            .import_csv(TableKind::Projects, csv.as_bytes(), &actor())
            .await
            .unwrap();
        assert_eq!(result.record_count, 2);
        assert!(result.validation.is_valid());

        let projects = fx.store.fetch_all(TableKind::Projects, None).await.unwrap();
        let ids: Vec<_> = projects.iter().map(|p| p["projectId"].clone()).collect();
        assert_eq!(ids, vec![json!("P7"), json!("P8")]);
        assert!(projects[0].get("colour").is_none());

        let backup = std::fs::read(&result.backup_path).unwrap();
        let backup = SchemaExportBundle::parse(&backup).unwrap();
        assert_eq!(backup.rows(TableKind::Projects).len(), 2);
    }

    #[tokio::test]
    async fn test_governance_logs_cannot_be_csv_imported() {
        let fx = fixture();
        let err = fx
            .engine
            .import_csv(TableKind::GovernanceLogs, b"timestamp,event_type\nt,e\n", &actor())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_csv_export_keeps_copy_and_logs() {
        let fx = fixture();
        seed(&fx.store).await;

        let export = fx.engine.export_csv(TableKind::Projects, &actor()).await.unwrap();
        assert_eq!(export.record_count, 2);
        assert!(export.contents.starts_with("projectId,"));
        assert!(fx.dir.path().join("audit/exports").join(&export.file_name).exists());

        let logs = fx.store.fetch_all(TableKind::GovernanceLogs, None).await.unwrap();
        assert_eq!(logs[0]["action"], "export_csv");
        assert_eq!(logs[0]["details"]["recordCount"], 2);
    }

    #[tokio::test]
    async fn test_single_table_bundle_leaves_other_tables() {
        let fx = fixture();
        seed(&fx.store).await;
        let before = snapshot(&fx.store).await;

        let phases = fx.engine.export_table_json(TableKind::Phases, &actor()).await.unwrap();
        let bytes = serde_json::to_vec(&phases).unwrap();

        let report = fx.engine.preview(&bytes).await.unwrap();
        let previewed: Vec<TableKind> = report.tables.iter().map(|t| t.table).collect();
        assert_eq!(previewed, vec![TableKind::Phases, TableKind::GovernanceLogs]);
        assert!(report.warnings.contains(&"projects not in bundle; left unchanged".to_string()));

        let result = fx.engine.import_bundle(&bytes, false, &actor()).await.unwrap();
        assert_eq!(result.record_counts.get("projects"), None);
        assert_eq!(result.record_counts["phases"], 2);
        assert_eq!(snapshot(&fx.store).await, before);
        let counts: Vec<usize> = snapshot(&fx.store).await.iter().map(Vec::len).collect();
        assert_eq!(counts, vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn test_preview_does_not_write() {
        let fx = fixture();
        seed(&fx.store).await;
        let bundle = SchemaExportBundle::build(vec![(
            TableKind::Projects,
            vec![record(json!({"projectId": "P1", "projectName": "Alpha renamed"}))],
        )]);

        let report = fx
            .engine
            .preview(&serde_json::to_vec(&bundle).unwrap())
            .await
            .unwrap();
        assert_eq!(report.tables[0].updated, 1);
        assert_eq!(report.tables[0].deleted, 1);
        assert!(fx.store.fetch_all(TableKind::GovernanceLogs, None).await.unwrap().is_empty());
    }
}
