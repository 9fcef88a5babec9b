//! Referential integrity inspector
//!
//! Finds child rows whose foreign key names a missing parent, rows that lack
//! a required attribute and repeated primary keys, in the live store or in
//! flat CSV snapshots. Also counts hierarchy gaps (projects without phases,
//! phases without steps).
//! Repairs are operator-directed and transactional; nothing is fixed
//! automatically.

use crate::error::{not_found_error, validation_error, AppError};
use crate::governance::GovernanceLogger;
use crate::ledger::{ChangeHistoryLedger, LedgerScope};
use crate::models::governance::{Actor, FieldChange, GovernanceLogEntry};
use crate::models::tables::{is_blank, validate_identifier, value_as_text, Record, TableKind};
use crate::store::{settle, Statement, TransactionalStore, TxId};
use crate::transfer::{tabular, ArtifactWriter};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use validator::Validate;

/// Referential issues above this count are high severity
pub const REFERENTIAL_HIGH_THRESHOLD: usize = 20;
pub const REFERENTIAL_MEDIUM_THRESHOLD: usize = 10;
/// Missing required attributes above this count are high severity
pub const ATTRIBUTE_HIGH_THRESHOLD: usize = 50;
pub const ATTRIBUTE_MEDIUM_THRESHOLD: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Tables with a foreign key are graded on referential thresholds,
    /// the others on required-attribute thresholds
    pub fn grade(table: TableKind, count: usize) -> Self {
        let (high, medium) = if table.foreign_key().is_some() {
            (REFERENTIAL_HIGH_THRESHOLD, REFERENTIAL_MEDIUM_THRESHOLD)
        } else {
            (ATTRIBUTE_HIGH_THRESHOLD, ATTRIBUTE_MEDIUM_THRESHOLD)
        };
        if count > high {
            Severity::High
        } else if count > medium {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    DanglingReference,
    MissingAttribute,
    DuplicateKey,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrphanedRecord {
    pub kind: IssueKind,
    pub id: String,
    pub field: String,
    /// `parent_table.key` for broken references, `table.field` otherwise
    pub missing_reference: String,
    pub current_value: Value,
    pub record: Record,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityIssue {
    pub table: TableKind,
    pub orphaned_records: Vec<OrphanedRecord>,
    pub total_orphans: usize,
    pub severity: Severity,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegritySummary {
    pub total_issues: usize,
    pub tables_affected: usize,
    pub high_severity: usize,
    pub projects_without_phases: usize,
    pub phases_without_steps: usize,
    /// Snapshot rows that could not be read and were left out of the scan
    pub skipped_rows: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub issues: Vec<IntegrityIssue>,
    pub summary: IntegritySummary,
}

/// Scan canonical tables. Tables absent from `tables` are treated as empty.
pub fn analyze(tables: &HashMap<TableKind, Vec<Record>>) -> IntegrityReport {
    let empty = Vec::new();
    let rows_of = |t: TableKind| tables.get(&t).unwrap_or(&empty);

    let mut issues = Vec::new();
    for table in TableKind::CANONICAL {
        let rows = rows_of(table);
        let mut orphans = Vec::new();

        if let Some(fk) = table.foreign_key() {
            let parents: HashSet<String> = rows_of(fk.parent)
                .iter()
                .filter_map(|r| fk.parent.key_of(r))
                .collect();
            for row in rows {
                let value = row.get(fk.field).cloned().unwrap_or(Value::Null);
                let reference = value_as_text(&value).map(|v| v.trim().to_string());
                let dangling = match &reference {
                    Some(r) if !r.is_empty() => !parents.contains(r),
                    _ => true,
                };
                if dangling {
                    orphans.push(OrphanedRecord {
                        kind: IssueKind::DanglingReference,
                        id: table.key_of(row).unwrap_or_default(),
                        field: fk.field.to_string(),
                        missing_reference: format!("{}.{}", fk.parent, fk.parent.primary_key()),
                        current_value: value,
                        record: row.clone(),
                    });
                }
            }
        }

        let attributes = std::iter::once(table.primary_key()).chain(table.required_attributes().iter().copied());
        for attribute in attributes {
            for row in rows.iter().filter(|r| is_blank(r.get(attribute))) {
                orphans.push(OrphanedRecord {
                    kind: IssueKind::MissingAttribute,
                    id: table.key_of(row).unwrap_or_default(),
                    field: attribute.to_string(),
                    missing_reference: format!("{}.{}", table, attribute),
                    current_value: row.get(attribute).cloned().unwrap_or(Value::Null),
                    record: row.clone(),
                });
            }
        }

        // Every occurrence after the first
        let mut seen = HashSet::new();
        for row in rows {
            let Some(key) = table.key_of(row) else { continue };
            if !seen.insert(key.clone()) {
                orphans.push(OrphanedRecord {
                    kind: IssueKind::DuplicateKey,
                    id: key.clone(),
                    field: table.primary_key().to_string(),
                    missing_reference: format!("{}.{}", table, table.primary_key()),
                    current_value: Value::String(key),
                    record: row.clone(),
                });
            }
        }

        if !orphans.is_empty() {
            let total_orphans = orphans.len();
            issues.push(IntegrityIssue {
                table,
                severity: Severity::grade(table, total_orphans),
                orphaned_records: orphans,
                total_orphans,
            });
        }
    }

    let summary = IntegritySummary {
        total_issues: issues.iter().map(|i| i.total_orphans).sum(),
        tables_affected: issues.len(),
        high_severity: issues.iter().filter(|i| i.severity == Severity::High).count(),
        projects_without_phases: childless(rows_of(TableKind::Projects), TableKind::Phases, rows_of(TableKind::Phases)),
        phases_without_steps: childless(
            rows_of(TableKind::Phases),
            TableKind::StepProgress,
            rows_of(TableKind::StepProgress),
        ),
        skipped_rows: 0,
    };
    IntegrityReport { issues, summary }
}

/// Parent rows that no `child` row refers to
fn childless(parents: &[Record], child: TableKind, children: &[Record]) -> usize {
    let Some(fk) = child.foreign_key() else {
        return 0;
    };
    let referenced: HashSet<String> = children
        .iter()
        .filter_map(|r| r.get(fk.field).and_then(value_as_text))
        .map(|v| v.trim().to_string())
        .collect();
    parents
        .iter()
        .filter_map(|r| fk.parent.key_of(r))
        .filter(|k| !referenced.contains(k))
        .count()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixAction {
    Update,
    Delete,
}

/// Operator-directed repair of one record
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct FixRequest {
    #[validate(length(min = 1, max = 255, message = "recordId is required"))]
    pub record_id: String,
    #[validate(custom(function = "validate_identifier"))]
    pub field: Option<String>,
    #[serde(default)]
    pub value: Value,
    pub action: FixAction,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FixResult {
    pub success: bool,
    pub table: TableKind,
    pub record_id: String,
    pub action: FixAction,
    pub changes: Vec<FieldChange>,
    pub governance_log_id: i64,
    pub transaction_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_path: Option<String>,
}

pub struct IntegrityInspector {
    store: Arc<dyn TransactionalStore>,
    governance: GovernanceLogger,
    ledger: ChangeHistoryLedger,
    artifacts: ArtifactWriter,
}

impl IntegrityInspector {
    pub fn new(
        store: Arc<dyn TransactionalStore>,
        governance: GovernanceLogger,
        ledger: ChangeHistoryLedger,
        artifacts: ArtifactWriter,
    ) -> Self {
        Self {
            store,
            governance,
            ledger,
            artifacts,
        }
    }

    /// Scan the live tables
    pub async fn detect_orphans(&self) -> Result<IntegrityReport, AppError> {
        let mut tables = HashMap::new();
        for table in TableKind::CANONICAL {
            tables.insert(table, self.store.fetch_all(table, None).await?);
        }
        let report = analyze(&tables);
        info!(
            total = report.summary.total_issues,
            tables = report.summary.tables_affected,
            high = report.summary.high_severity,
            "🔎 Orphan scan complete"
        );
        Ok(report)
    }

    /// Scan `projects.csv`, `phases.csv` and `step_progress.csv` in `dir`.
    /// Unreadable rows are logged, skipped and counted.
    pub async fn detect_orphans_in_snapshots(&self, dir: &Path) -> Result<IntegrityReport, AppError> {
        let mut tables = HashMap::new();
        let mut skipped_rows = 0;
        for table in TableKind::CANONICAL {
            let path = dir.join(format!("{}.csv", table));
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(AppError::NotFound(format!(
                        "Snapshot file {} not found",
                        path.display()
                    )))
                }
                Err(e) => return Err(AppError::Io(e)),
            };
            let parsed = tabular::read_csv(&bytes)?;
            for rejected in &parsed.rejected {
                warn!(file = %path.display(), row = rejected.row, "Skipping snapshot row: {}", rejected.message);
            }
            skipped_rows += parsed.rejected.len();
            tables.insert(table, parsed.into_records());
        }
        let mut report = analyze(&tables);
        report.summary.skipped_rows = skipped_rows;
        info!(
            dir = %dir.display(),
            total = report.summary.total_issues,
            skipped = skipped_rows,
            "🔎 Snapshot orphan scan complete"
        );
        Ok(report)
    }

    /// Update one field or delete one record, with governance, ledger and audit trail
    pub async fn apply_fix(&self, table: TableKind, request: FixRequest, actor: &Actor) -> Result<FixResult, AppError> {
        let result = self.apply_fix_checked(table, &request, actor).await;
        if let Err(err) = &result {
            let entry = GovernanceLogEntry::new("orphan_fix", actor)
                .resource(table.name(), request.record_id.clone())
                .action(action_name(request.action))
                .details(json!({ "field": request.field }));
            self.governance.record_failure(entry, err).await;
        }
        result
    }

    async fn apply_fix_checked(
        &self,
        table: TableKind,
        request: &FixRequest,
        actor: &Actor,
    ) -> Result<FixResult, AppError> {
        request.validate().map_err(|e| validation_error(e.to_string()))?;
        if !table.is_importable() {
            return Err(AppError::BadRequest(format!("Fixes are not supported on '{}'", table)));
        }
        if request.action == FixAction::Update {
            let field = request
                .field
                .as_deref()
                .ok_or_else(|| validation_error("field is required for update"))?;
            if field == table.primary_key() {
                return Err(validation_error("The primary key cannot be changed by a fix"));
            }
            if !table.has_column(field) || table.is_managed_column(field) {
                return Err(validation_error(format!("Unknown field '{}' for {}", field, table)));
            }
        }

        let tx = self.store.begin_transaction().await?;
        let applied = self.fix_in(tx, table, request, actor).await;
        let AppliedFix { mut result, audit } = settle(self.store.as_ref(), tx, applied).await?;
        info!(%tx, table = %table, record_id = %request.record_id, action = ?request.action, "🔧 Fix applied");

        // The fix is committed; a missing audit file is reported, not fatal
        if let Some(payload) = audit {
            let prefix = format!("fix_{}_{}", table, action_name(request.action));
            match self.artifacts.write_fix_record(&prefix, &payload).await {
                Ok(path) => result.audit_path = Some(path.display().to_string()),
                Err(e) => warn!(%tx, table = %table, record_id = %request.record_id, "Failed to write fix audit record: {}", e),
            }
        }
        Ok(result)
    }

    async fn fix_in(&self, tx: TxId, table: TableKind, request: &FixRequest, actor: &Actor) -> Result<AppliedFix, AppError> {
        let record_id = request.record_id.as_str();
        let current = self
            .store
            .fetch_one(table, record_id, Some(tx))
            .await?
            .ok_or_else(|| not_found_error(format!("{} record '{}' not found", table, record_id)))?;

        let (changes, needs_artifact) = match request.action {
            FixAction::Update => {
                let field = request.field.clone().unwrap_or_default();
                let old_value = current.get(&field).cloned().unwrap_or(Value::Null);
                let affected = self
                    .store
                    .execute(
                        Statement::UpdateField {
                            table,
                            key: record_id.to_string(),
                            field: field.clone(),
                            value: request.value.clone(),
                        },
                        Some(tx),
                    )
                    .await?
                    .affected();
                if affected == 0 {
                    return Err(not_found_error(format!("{} record '{}' not found", table, record_id)));
                }
                let sensitive = table.foreign_key().is_some_and(|fk| fk.field == field)
                    || table.required_attributes().contains(&field.as_str());
                let change = FieldChange {
                    field,
                    old_value,
                    new_value: request.value.clone(),
                };
                (vec![change], sensitive)
            }
            FixAction::Delete => {
                self.store
                    .execute(
                        Statement::Delete {
                            table,
                            key: record_id.to_string(),
                        },
                        Some(tx),
                    )
                    .await?;
                let changes = current
                    .iter()
                    .filter(|(_, v)| !v.is_null())
                    .map(|(k, v)| FieldChange {
                        field: k.clone(),
                        old_value: v.clone(),
                        new_value: Value::Null,
                    })
                    .collect();
                (changes, true)
            }
        };

        let entry = GovernanceLogEntry::new("orphan_fix", actor)
            .resource(table.name(), record_id)
            .action(action_name(request.action))
            .details(json!({
                "table": table.name(),
                "field": request.field,
                "before": current,
                "after": match request.action {
                    FixAction::Update => json!({ request.field.clone().unwrap_or_default(): request.value }),
                    FixAction::Delete => Value::Null,
                },
                "transactionId": tx.to_string(),
            }));
        let governance_log_id = self.governance.record(&entry, Some(tx)).await?;

        let scope = LedgerScope {
            tx,
            changed_by: actor.user_id.clone(),
            governance_log_id,
        };
        self.ledger.record_all(&scope, table, record_id, &changes).await?;

        let audit = needs_artifact.then(|| {
            json!({
                "timestamp": entry.timestamp,
                "table": table.name(),
                "recordId": record_id,
                "action": action_name(request.action),
                "user": actor,
                "before": current,
                "changes": changes,
                "governanceLogId": governance_log_id,
                "transactionId": tx.to_string(),
            })
        });

        if changes.is_empty() {
            warn!(table = %table, record_id, "Fix produced no field changes");
        }

        let result = FixResult {
            success: true,
            table,
            record_id: record_id.to_string(),
            action: request.action,
            changes,
            governance_log_id,
            transaction_id: tx.to_string(),
            audit_path: None,
        };
        Ok(AppliedFix { result, audit })
    }
}

/// A fix staged inside its transaction, with the audit payload to write once committed
struct AppliedFix {
    result: FixResult,
    audit: Option<Value>,
}

fn action_name(action: FixAction) -> &'static str {
    match action {
        FixAction::Update => "update",
        FixAction::Delete => "delete",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn sample() -> HashMap<TableKind, Vec<Record>> {
        let mut tables = HashMap::new();
        tables.insert(
            TableKind::Projects,
            vec![
                record(json!({"projectId": "P1", "projectName": "Alpha", "owner": "alice"})),
                record(json!({"projectId": "P2", "projectName": "Beta", "owner": ""})),
            ],
        );
        tables.insert(
            TableKind::Phases,
            vec![
                record(json!({"phaseid": "PH1", "phasename": "Discovery", "project_ref": "P1"})),
                record(json!({"phaseid": "PH2", "phasename": "Build", "project_ref": "P404"})),
                record(json!({"phaseid": "PH3", "phasename": "Test", "project_ref": null})),
            ],
        );
        tables.insert(
            TableKind::StepProgress,
            vec![
                record(json!({"stepId": "S1", "phaseId": "PH1"})),
                record(json!({"stepId": "S2", "phaseId": "PH9"})),
            ],
        );
        tables
    }

    #[test]
    fn test_analyze_reports_dangling_and_missing() {
        let report = analyze(&sample());

        assert_eq!(report.issues.len(), 3);
        let projects = &report.issues[0];
        assert_eq!(projects.table, TableKind::Projects);
        assert_eq!(projects.orphaned_records[0].id, "P2");
        assert_eq!(projects.orphaned_records[0].field, "owner");
        assert_eq!(projects.orphaned_records[0].kind, IssueKind::MissingAttribute);

        let phases = &report.issues[1];
        let ids: Vec<&str> = phases.orphaned_records.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["PH2", "PH3"]);
        assert_eq!(phases.orphaned_records[0].missing_reference, "projects.projectId");
        assert_eq!(phases.orphaned_records[0].current_value, json!("P404"));
        assert_eq!(phases.orphaned_records[0].kind, IssueKind::DanglingReference);
        assert_eq!(phases.severity, Severity::Low);

        assert_eq!(report.issues[2].orphaned_records[0].id, "S2");
        assert_eq!(
            report.summary,
            IntegritySummary {
                total_issues: 4,
                tables_affected: 3,
                high_severity: 0,
                projects_without_phases: 1,
                phases_without_steps: 2,
                skipped_rows: 0,
            }
        );
    }

    #[test]
    fn test_analyze_reports_repeated_keys_and_blank_names() {
        let mut tables = sample();
        tables.insert(
            TableKind::Projects,
            vec![
                record(json!({"projectId": "P1", "projectName": "Alpha", "owner": "alice"})),
                record(json!({"projectId": "P1", "projectName": "Alpha copy", "owner": "alice"})),
                record(json!({"projectId": "P1", "projectName": "Alpha again", "owner": "alice"})),
                record(json!({"projectId": "P3", "projectName": " ", "owner": "carol"})),
                record(json!({"projectId": "", "projectName": "Nameless", "owner": "dave"})),
            ],
        );
        let report = analyze(&tables);

        let projects = &report.issues[0];
        let found: Vec<(IssueKind, &str, &str)> = projects
            .orphaned_records
            .iter()
            .map(|o| (o.kind, o.id.as_str(), o.field.as_str()))
            .collect();
        assert_eq!(
            found,
            vec![
                (IssueKind::MissingAttribute, "", "projectId"),
                (IssueKind::MissingAttribute, "P3", "projectName"),
                (IssueKind::DuplicateKey, "P1", "projectId"),
                (IssueKind::DuplicateKey, "P1", "projectId"),
            ]
        );
        assert_eq!(projects.orphaned_records[2].record["projectName"], "Alpha copy");
        // P3 has no phases; the blank key is not counted
        assert_eq!(report.summary.projects_without_phases, 1);
    }

    #[test]
    fn test_clean_tables_are_omitted() {
        let mut tables = sample();
        tables.insert(TableKind::StepProgress, vec![]);
        let report = analyze(&tables);
        assert!(report.issues.iter().all(|i| i.table != TableKind::StepProgress));
    }

    #[test]
    fn test_severity_thresholds() {
        assert_eq!(Severity::grade(TableKind::Phases, 10), Severity::Low);
        assert_eq!(Severity::grade(TableKind::Phases, 11), Severity::Medium);
        assert_eq!(Severity::grade(TableKind::StepProgress, 21), Severity::High);
        assert_eq!(Severity::grade(TableKind::Projects, 21), Severity::Medium);
        assert_eq!(Severity::grade(TableKind::Projects, 50), Severity::Medium);
        assert_eq!(Severity::grade(TableKind::Projects, 51), Severity::High);
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        inspector: IntegrityInspector,
        dir: TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let ledger = ChangeHistoryLedger::new(store.clone());
        let governance = GovernanceLogger::new(store.clone(), ledger.clone());
        let artifacts = ArtifactWriter::new(dir.path().join("backups"), dir.path().join("audit"));
        let inspector = IntegrityInspector::new(store.clone(), governance, ledger, artifacts);

        for (table, rows) in sample() {
            for row in rows {
                store.insert(table, row, None).await.unwrap();
            }
        }
        Fixture { store, inspector, dir }
    }

    fn actor() -> Actor {
        Actor::new("alice", "admin")
    }

    #[tokio::test]
    async fn test_fix_then_detect() {
        let fx = fixture().await;
        assert_eq!(fx.inspector.detect_orphans().await.unwrap().summary.total_issues, 4);

        let fix = FixRequest {
            record_id: "PH2".into(),
            field: Some("project_ref".into()),
            value: json!("P1"),
            action: FixAction::Update,
        };
        let result = fx.inspector.apply_fix(TableKind::Phases, fix, &actor()).await.unwrap();
        assert_eq!(result.changes.len(), 1);
        assert_eq!(result.changes[0].old_value, json!("P404"));
        assert!(result.audit_path.is_some());

        let report = fx.inspector.detect_orphans().await.unwrap();
        assert_eq!(report.summary.total_issues, 3);
        let phase_orphans: Vec<String> = report
            .issues
            .iter()
            .filter(|i| i.table == TableKind::Phases)
            .flat_map(|i| i.orphaned_records.iter().map(|o| o.id.clone()))
            .collect();
        assert_eq!(phase_orphans, vec!["PH3"]);

        let history = ChangeHistoryLedger::new(fx.store.clone())
            .history(Some(TableKind::Phases), Some("PH2".into()), 10)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].governance_log_id, Some(result.governance_log_id));
    }

    #[tokio::test]
    async fn test_delete_fix_ledgers_every_field() {
        let fx = fixture().await;
        let fix = FixRequest {
            record_id: "S2".into(),
            field: None,
            value: Value::Null,
            action: FixAction::Delete,
        };
        let result = fx
            .inspector
            .apply_fix(TableKind::StepProgress, fix, &actor())
            .await
            .unwrap();

        assert!(fx
            .store
            .fetch_one(TableKind::StepProgress, "S2", None)
            .await
            .unwrap()
            .is_none());
        // stepId, phaseId, createdAt, updatedAt
        assert_eq!(result.changes.len(), 4);
        let audit = result.audit_path.unwrap();
        assert!(audit.starts_with(&fx.dir.path().join("audit/fixes").display().to_string()));
    }

    #[tokio::test]
    async fn test_fix_commits_when_audit_record_cannot_be_written() {
        let fx = fixture().await;
        // A file where the audit directory should be
        std::fs::write(fx.dir.path().join("audit"), b"not a directory").unwrap();

        let fix = FixRequest {
            record_id: "PH2".into(),
            field: Some("project_ref".into()),
            value: json!("P1"),
            action: FixAction::Update,
        };
        let result = fx.inspector.apply_fix(TableKind::Phases, fix, &actor()).await.unwrap();
        assert!(result.audit_path.is_none());

        let phase = fx.store.fetch_one(TableKind::Phases, "PH2", None).await.unwrap().unwrap();
        assert_eq!(phase["project_ref"], "P1");
        let logs = fx.store.fetch_all(TableKind::GovernanceLogs, None).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0]["success"], true);
    }

    #[tokio::test]
    async fn test_fix_on_missing_record_rolls_back() {
        let fx = fixture().await;
        let fix = FixRequest {
            record_id: "PH404".into(),
            field: Some("project_ref".into()),
            value: json!("P1"),
            action: FixAction::Update,
        };
        let err = fx.inspector.apply_fix(TableKind::Phases, fix, &actor()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let logs = fx.store.fetch_all(TableKind::GovernanceLogs, None).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0]["success"], false);
        assert!(ChangeHistoryLedger::new(fx.store.clone())
            .history(None, None, 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_fix_rejects_primary_key_and_bad_identifiers() {
        let fx = fixture().await;
        for field in ["phaseid", "project_ref; --", "colour"] {
            let fix = FixRequest {
                record_id: "PH2".into(),
                field: Some(field.into()),
                value: json!("x"),
                action: FixAction::Update,
            };
            let err = fx.inspector.apply_fix(TableKind::Phases, fix, &actor()).await.unwrap_err();
            assert!(matches!(err, AppError::Validation(_)), "accepted {}", field);
        }
    }

    #[tokio::test]
    async fn test_snapshot_mode_reads_csv_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("projects.csv"), "projectId,projectName,owner\nP1,Alpha,alice\n").unwrap();
        std::fs::write(
            dir.path().join("phases.csv"),
            "phaseid,phasename,project_ref\nPH1,Discovery,P1\nPH2,Build,P2\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("step_progress.csv"), "stepId,phaseId\nS1,PH2\n").unwrap();

        let fx = fixture().await;
        let report = fx.inspector.detect_orphans_in_snapshots(dir.path()).await.unwrap();
        assert_eq!(report.summary.total_issues, 1);
        assert_eq!(report.issues[0].orphaned_records[0].id, "PH2");

        assert_eq!(report.summary.phases_without_steps, 1);
        assert_eq!(report.summary.skipped_rows, 0);

        std::fs::remove_file(dir.path().join("phases.csv")).unwrap();
        let err = fx.inspector.detect_orphans_in_snapshots(dir.path()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_snapshot_scan_skips_ragged_rows() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("projects.csv"), "projectId,projectName,owner
P1,Alpha,alice
").unwrap();
        std::fs::write(
            dir.path().join("phases.csv"),
            "phaseid,phasename,project_ref
PH1,Discovery,P9
PH2,Build,P1,extra
PH3,Test,P1
",
        )
        .unwrap();
        std::fs::write(dir.path().join("step_progress.csv"), "stepId,phaseId
S1,PH3
").unwrap();

        let fx = fixture().await;
        let report = fx.inspector.detect_orphans_in_snapshots(dir.path()).await.unwrap();
        assert_eq!(report.summary.skipped_rows, 1);
        assert_eq!(report.summary.total_issues, 1);
        assert_eq!(report.issues[0].orphaned_records[0].id, "PH1");
    }
}
