//! Governance log ingestion
//!
//! Reconciles append-only JSON Lines files into `governance_logs`. A row is
//! inserted only when no stored row shares its natural key, so repeated runs
//! over the same files converge on the same table contents.

use crate::error::AppError;
use crate::models::governance::GovernanceLogEntry;
use crate::models::tables::TableKind;
use crate::store::{Statement, TransactionalStore};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Outcome of one sync run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Rows inserted
    pub synced: usize,
    pub files_scanned: usize,
    /// Non-blank lines that could not be parsed
    pub skipped: usize,
    /// Lines whose natural key was already stored
    pub duplicates: usize,
    /// Lines or files that failed to read or insert
    pub failed: usize,
    pub files: Vec<String>,
}

pub struct GovernanceLogSync {
    store: Arc<dyn TransactionalStore>,
    log_dir: PathBuf,
    /// One run at a time; the lookup and the insert are not atomic
    running: Mutex<()>,
}

impl GovernanceLogSync {
    pub fn new(store: Arc<dyn TransactionalStore>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            log_dir: log_dir.into(),
            running: Mutex::new(()),
        }
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Ingest every `*.jsonl` file in the log directory
    pub async fn sync(&self) -> Result<SyncReport, AppError> {
        let _running = self.running.lock().await;
        let mut report = SyncReport::default();

        let files = match list_log_files(&self.log_dir).await {
            Ok(files) => files,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(dir = %self.log_dir.display(), "Governance log directory does not exist");
                return Ok(report);
            }
            Err(e) => return Err(AppError::Io(e)),
        };

        let mut seen = HashSet::new();
        for path in files {
            report.files_scanned += 1;
            report.files.push(
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            );

            let contents = match tokio::fs::read_to_string(&path).await {
                Ok(contents) => contents,
                Err(e) => {
                    warn!(file = %path.display(), "Failed to read governance log file: {}", e);
                    report.failed += 1;
                    continue;
                }
            };

            for (index, line) in contents.lines().enumerate() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let entry: GovernanceLogEntry = match serde_json::from_str(line) {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!(
                            file = %path.display(),
                            line = index + 1,
                            "Skipping malformed governance log line: {}",
                            e
                        );
                        report.skipped += 1;
                        continue;
                    }
                };

                let key = entry.natural_key();
                if !seen.insert(key.clone()) {
                    report.duplicates += 1;
                    continue;
                }

                match self.ingest(&entry).await {
                    Ok(true) => report.synced += 1,
                    Ok(false) => report.duplicates += 1,
                    Err(e) => {
                        warn!(
                            file = %path.display(),
                            line = index + 1,
                            "Failed to ingest governance log line: {}",
                            e
                        );
                        report.failed += 1;
                    }
                }
            }
        }

        info!(
            synced = report.synced,
            files = report.files_scanned,
            skipped = report.skipped,
            duplicates = report.duplicates,
            failed = report.failed,
            "Governance log sync finished"
        );
        Ok(report)
    }

    /// Insert unless the natural key is already stored; true when inserted
    async fn ingest(&self, entry: &GovernanceLogEntry) -> Result<bool, AppError> {
        let existing = self
            .store
            .execute(
                Statement::FindGovernanceLog {
                    key: entry.natural_key(),
                },
                None,
            )
            .await?
            .into_rows();
        if !existing.is_empty() {
            return Ok(false);
        }
        self.store
            .insert(TableKind::GovernanceLogs, entry.to_record(), None)
            .await?;
        Ok(true)
    }

    /// Run `sync` on a fixed period until the runtime shuts down
    pub fn spawn_periodic(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(
                dir = %self.log_dir.display(),
                interval_secs = period.as_secs(),
                "Periodic governance log sync started"
            );
            loop {
                ticker.tick().await;
                if let Err(e) = self.sync().await {
                    error!("Periodic governance log sync failed (non-fatal): {}", e);
                }
            }
        })
    }
}

async fn list_log_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_jsonl = path.extension().is_some_and(|ext| ext == "jsonl");
        if is_jsonl && entry.file_type().await?.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;
    use std::fs;

    const DAY_ONE: &str = r#"{"timestamp":"2025-08-01T09:00:00Z","event_type":"phase_update","user_id":"alice","resource_id":"PH-1","action":"update"}
{"timestamp":"2025-08-01T09:05:00Z","event_type":"project_created","user_id":"bob","resource_id":"P-1"}

not json at all
{"timestamp":"2025-08-01T09:00:00Z","event_type":"phase_update","user_id":"alice","resource_id":"PH-1","action":"update"}
"#;

    const DAY_TWO: &str = r#"{"timestamp":"2025-08-02T10:00:00Z","event_type":"data_export","user_id":"carol"}
"#;

    fn write_logs(dir: &Path) {
        fs::write(dir.join("2025-08-01.jsonl"), DAY_ONE).unwrap();
        fs::write(dir.join("2025-08-02.jsonl"), DAY_TWO).unwrap();
        fs::write(dir.join("notes.txt"), "ignored").unwrap();
    }

    #[tokio::test]
    async fn test_sync_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        write_logs(dir.path());
        let store = Arc::new(MemoryStore::new());
        let sync = GovernanceLogSync::new(store.clone(), dir.path());

        let first = sync.sync().await.unwrap();
        assert_eq!(first.synced, 3);
        assert_eq!(first.files_scanned, 2);
        assert_eq!(first.skipped, 1);
        assert_eq!(first.duplicates, 1);
        assert_eq!(first.files, vec!["2025-08-01.jsonl", "2025-08-02.jsonl"]);

        let second = sync.sync().await.unwrap();
        assert_eq!(second.synced, 0);
        assert_eq!(second.duplicates, 4);

        let rows = store.fetch_all(TableKind::GovernanceLogs, None).await.unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[tokio::test]
    async fn test_sync_picks_up_appended_lines() {
        let dir = tempfile::tempdir().unwrap();
        write_logs(dir.path());
        let store = Arc::new(MemoryStore::new());
        let sync = GovernanceLogSync::new(store.clone(), dir.path());
        sync.sync().await.unwrap();

        let appended = format!(
            "{}{}\n",
            DAY_TWO, r#"{"timestamp":"2025-08-02T11:00:00Z","event_type":"data_import","resource_id":42}"#
        );
        fs::write(dir.path().join("2025-08-02.jsonl"), appended).unwrap();

        let report = sync.sync().await.unwrap();
        assert_eq!(report.synced, 1);
        let rows = store.fetch_all(TableKind::GovernanceLogs, None).await.unwrap();
        assert_eq!(rows.len(), 4);
    }

    #[tokio::test]
    async fn test_blank_and_missing_resource_ids_share_a_key() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("a.jsonl"),
            r#"{"timestamp":"2025-08-03T08:00:00Z","event_type":"data_export","resource_id":""}
{"timestamp":"2025-08-03T08:00:00Z","event_type":"data_export"}
"#,
        )
        .unwrap();
        let store = Arc::new(MemoryStore::new());
        let sync = GovernanceLogSync::new(store.clone(), dir.path());

        let first = sync.sync().await.unwrap();
        assert_eq!((first.synced, first.duplicates, first.failed), (1, 1, 0));

        let second = sync.sync().await.unwrap();
        assert_eq!((second.synced, second.duplicates, second.failed), (0, 2, 0));
        assert_eq!(store.fetch_all(TableKind::GovernanceLogs, None).await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_and_manual_runs_do_not_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        write_logs(dir.path());
        let store = Arc::new(MemoryStore::new());
        let sync = Arc::new(GovernanceLogSync::new(store.clone(), dir.path()));

        let handle = sync.clone().spawn_periodic(Duration::from_secs(60));
        let (a, b) = tokio::join!(sync.sync(), sync.sync());
        assert_eq!(a.unwrap().synced + b.unwrap().synced, 3);

        // Only a later periodic run can pick this up
        let appended = format!(
            "{}{}\n",
            DAY_TWO, r#"{"timestamp":"2025-08-02T11:00:00Z","event_type":"data_import","resource_id":42}"#
        );
        fs::write(dir.path().join("2025-08-02.jsonl"), appended).unwrap();
        tokio::time::sleep(Duration::from_secs(300)).await;
        handle.abort();

        let rows = store.fetch_all(TableKind::GovernanceLogs, None).await.unwrap();
        assert_eq!(rows.len(), 4);
    }

    #[tokio::test]
    async fn test_missing_directory_yields_empty_report() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let sync = GovernanceLogSync::new(store, dir.path().join("absent"));
        assert_eq!(sync.sync().await.unwrap(), SyncReport::default());
    }

    #[tokio::test]
    async fn test_insert_failures_are_counted_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_logs(dir.path());
        let store = Arc::new(MemoryStore::new());
        store.fail_writes_to(TableKind::GovernanceLogs).await;
        let sync = GovernanceLogSync::new(store, dir.path());

        let report = sync.sync().await.unwrap();
        assert_eq!(report.synced, 0);
        assert_eq!(report.failed, 3);
    }
}
