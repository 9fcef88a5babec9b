//! Import preview
//!
//! Dry-run comparison of an uploaded bundle against the live tables, keyed by
//! primary key (natural key for governance logs). Nothing is written.

use crate::models::governance::GovernanceLogEntry;
use crate::models::tables::{value_as_text, Record, TableKind};
use crate::transfer::bundle::{BundleMetadata, SchemaExportBundle};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Risk level classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Safe,
    Low,
    Medium,
    High,
    Critical,
}

/// Per-table outcome of applying the bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDiff {
    pub table: TableKind,
    pub current_rows: usize,
    pub incoming_rows: usize,
    pub new: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewReport {
    pub metadata: BundleMetadata,
    pub hash_valid: bool,
    pub computed_hash: String,
    pub tables: Vec<TableDiff>,
    pub risk_level: RiskLevel,
    pub warnings: Vec<String>,
}

pub struct PreviewEngine;

impl PreviewEngine {
    /// Compare `bundle` with `current` table contents
    pub fn preview(bundle: &SchemaExportBundle, current: &HashMap<TableKind, Vec<Record>>) -> PreviewReport {
        let computed_hash = bundle.computed_hash();
        let hash_valid = computed_hash.eq_ignore_ascii_case(&bundle.metadata.hash);
        let empty = Vec::new();

        let mut tables = Vec::new();
        let mut absent = Vec::new();
        for table in TableKind::CANONICAL {
            if !bundle.contains(table) {
                absent.push(table);
                continue;
            }
            let live = current.get(&table).unwrap_or(&empty);
            tables.push(Self::diff_table(table, live, &bundle.rows(table)));
        }
        let live_logs = current.get(&TableKind::GovernanceLogs).unwrap_or(&empty);
        tables.push(Self::diff_logs(live_logs, &bundle.rows(TableKind::GovernanceLogs)));

        let mut warnings = Vec::new();
        if !hash_valid {
            warnings.push(format!(
                "Bundle hash {} does not match computed hash {}",
                bundle.metadata.hash, computed_hash
            ));
        }
        for table in absent {
            warnings.push(format!("{} not in bundle; left unchanged", table));
        }
        for diff in tables.iter().filter(|d| d.deleted > 0) {
            warnings.push(format!("{} row(s) in {} would be deleted", diff.deleted, diff.table));
        }

        let risk_level = Self::assess_risk(hash_valid, &tables);
        PreviewReport {
            metadata: bundle.metadata.clone(),
            hash_valid,
            computed_hash,
            tables,
            risk_level,
            warnings,
        }
    }

    /// Business tables are replaced wholesale
    fn diff_table(table: TableKind, current: &[Record], incoming: &[Record]) -> TableDiff {
        let current_by_key: HashMap<String, &Record> = current
            .iter()
            .filter_map(|r| table.key_of(r).map(|k| (k, r)))
            .collect();

        let mut seen = HashSet::new();
        let (mut new, mut updated, mut unchanged) = (0, 0, 0);
        for row in incoming {
            let Some(key) = table.key_of(row) else {
                new += 1;
                continue;
            };
            match current_by_key.get(&key) {
                Some(existing) if Self::differs(table, existing, row) => updated += 1,
                Some(_) => unchanged += 1,
                None => new += 1,
            }
            seen.insert(key);
        }
        let deleted = current_by_key.keys().filter(|k| !seen.contains(*k)).count();

        TableDiff {
            table,
            current_rows: current.len(),
            incoming_rows: incoming.len(),
            new,
            updated,
            deleted,
            unchanged,
        }
    }

    /// Governance logs are merged by natural key, never deleted
    fn diff_logs(current: &[Record], incoming: &[Record]) -> TableDiff {
        let natural_key = |r: &Record| GovernanceLogEntry::from_record(r).ok().map(|e| e.natural_key());
        let existing: HashSet<_> = current.iter().filter_map(natural_key).collect();

        let mut seen = HashSet::new();
        let (mut new, mut unchanged) = (0, 0);
        for key in incoming.iter().filter_map(natural_key) {
            if existing.contains(&key) || !seen.insert(key) {
                unchanged += 1;
            } else {
                new += 1;
            }
        }

        TableDiff {
            table: TableKind::GovernanceLogs,
            current_rows: current.len(),
            incoming_rows: incoming.len(),
            new,
            updated: 0,
            deleted: 0,
            unchanged,
        }
    }

    /// Field-wise text comparison, ignoring store-managed columns
    fn differs(table: TableKind, current: &Record, incoming: &Record) -> bool {
        incoming
            .iter()
            .filter(|(field, _)| !table.is_managed_column(field))
            .any(|(field, value)| value_as_text(value) != current.get(field).and_then(value_as_text))
    }

    fn assess_risk(hash_valid: bool, tables: &[TableDiff]) -> RiskLevel {
        if !hash_valid {
            return RiskLevel::Critical;
        }
        let current: usize = tables.iter().map(|t| t.current_rows).sum();
        let deleted: usize = tables.iter().map(|t| t.deleted).sum();
        let updated: usize = tables.iter().map(|t| t.updated).sum();

        if deleted > 0 && deleted * 2 > current {
            RiskLevel::High
        } else if deleted > 0 {
            RiskLevel::Medium
        } else if updated > 0 {
            RiskLevel::Low
        } else {
            RiskLevel::Safe
        }
    }
}
