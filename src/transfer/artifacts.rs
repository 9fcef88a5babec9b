//! On-disk artifacts: pre-write backups, export copies and fix records

use crate::error::AppError;
use crate::models::tables::{Record, TableKind};
use crate::transfer::bundle::SchemaExportBundle;
use chrono::Utc;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    backup_dir: PathBuf,
    audit_dir: PathBuf,
}

/// `{prefix}_{YYYYmmdd_HHMMSS}_{8 hex}.{ext}`; unique even within one second
fn stamped_name(prefix: &str, ext: &str) -> String {
    let stamp = Utc::now().format("%Y%m%d_%H%M%S");
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}_{}_{}.{}", prefix, stamp, &suffix[..8], ext)
}

async fn write_file(dir: &Path, name: &str, contents: &[u8]) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(name);
    tokio::fs::write(&path, contents).await?;
    Ok(path)
}

impl ArtifactWriter {
    pub fn new(backup_dir: impl Into<PathBuf>, audit_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            audit_dir: audit_dir.into(),
        }
    }

    /// Snapshot table contents as a bundle. Any failure is `BackupFailed`.
    pub async fn write_backup(
        &self,
        label: &str,
        tables: Vec<(TableKind, Vec<Record>)>,
    ) -> Result<PathBuf, AppError> {
        let bundle = SchemaExportBundle::build(tables);
        let contents = serde_json::to_vec_pretty(&bundle)
            .map_err(|e| AppError::BackupFailed(format!("Failed to serialize backup: {}", e)))?;
        let name = stamped_name(&format!("backup_{}", label), "json");
        let path = write_file(&self.backup_dir, &name, &contents)
            .await
            .map_err(|e| AppError::BackupFailed(format!("{}: {}", self.backup_dir.display(), e)))?;
        info!(path = %path.display(), counts = ?bundle.metadata.record_counts, "💾 Backup written");
        Ok(path)
    }

    /// Keep a copy of an export under `{audit_dir}/exports`
    pub async fn write_export(&self, prefix: &str, ext: &str, contents: &[u8]) -> Result<PathBuf, AppError> {
        let path = write_file(&self.audit_dir.join("exports"), &stamped_name(prefix, ext), contents).await?;
        Ok(path)
    }

    /// Persist a fix record under `{audit_dir}/fixes`
    pub async fn write_fix_record(&self, prefix: &str, payload: &Value) -> Result<PathBuf, AppError> {
        let contents = serde_json::to_vec_pretty(payload)
            .map_err(|e| AppError::Internal(format!("Failed to serialize audit record: {}", e)))?;
        let path = write_file(&self.audit_dir.join("fixes"), &stamped_name(prefix, "json"), &contents).await?;
        Ok(path)
    }
}
