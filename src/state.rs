//! Application state management
//!
//! Contains shared state accessible across all handlers. Every component
//! holds the same store handle, built once in `main`.

use crate::config::Settings;
use crate::editor::RecordEditor;
use crate::governance::{GovernanceLogSync, GovernanceLogger};
use crate::integrity::IntegrityInspector;
use crate::ledger::ChangeHistoryLedger;
use crate::store::TransactionalStore;
use crate::transfer::{ArtifactWriter, ImportExportEngine};
use std::path::PathBuf;
use std::sync::Arc;

/// Application state shared across all handlers
pub struct AppState {
    pub store: Arc<dyn TransactionalStore>,

    pub governance: GovernanceLogger,

    pub ledger: ChangeHistoryLedger,

    /// Shared with the periodic sync task
    pub sync: Arc<GovernanceLogSync>,

    pub transfer: ImportExportEngine,

    pub inspector: IntegrityInspector,

    pub editor: RecordEditor,

    /// Directory scanned by snapshot-mode orphan detection
    pub snapshot_dir: PathBuf,
}

impl AppState {
    /// Wire every component onto one store
    pub fn new(store: Arc<dyn TransactionalStore>, settings: &Settings) -> Self {
        let ledger = ChangeHistoryLedger::new(store.clone());
        let governance = GovernanceLogger::new(store.clone(), ledger.clone());
        let artifacts = ArtifactWriter::new(&settings.storage.backup_dir, &settings.storage.audit_dir);

        Self {
            sync: Arc::new(GovernanceLogSync::new(store.clone(), &settings.sync.log_dir)),
            transfer: ImportExportEngine::new(
                store.clone(),
                governance.clone(),
                artifacts.clone(),
                settings.transfer.clone(),
            ),
            inspector: IntegrityInspector::new(store.clone(), governance.clone(), ledger.clone(), artifacts),
            editor: RecordEditor::new(store.clone(), governance.clone(), ledger.clone()),
            snapshot_dir: settings.storage.snapshot_dir.clone(),
            governance,
            ledger,
            store,
        }
    }
}

/// Type alias for shared state
pub type SharedState = Arc<AppState>;
