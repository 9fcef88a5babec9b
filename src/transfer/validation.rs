//! Field-level validation of uploaded rows

use super::tabular::ParsedCsv;
use crate::models::tables::{is_blank, Record, TableKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Issues beyond this count are counted but not itemized
pub const MAX_REPORTED_ISSUES: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    /// 1-based data row (the header is not counted)
    pub row: usize,
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
    pub total_issues: usize,
}

impl ValidationReport {
    pub fn push(&mut self, row: usize, field: &str, message: String) {
        self.total_issues += 1;
        if self.issues.len() < MAX_REPORTED_ISSUES {
            self.issues.push(ValidationIssue {
                row,
                field: field.to_string(),
                message,
            });
        }
    }

    pub fn is_valid(&self) -> bool {
        self.total_issues == 0
    }
}

/// Field name used for issues that concern a whole row
const ROW_FIELD: &str = "row";

/// Validate a parsed upload. Unreadable rows are reported first, then
/// missing required fields and repeated primary keys, each under its own
/// row number.
pub fn validate_parsed(table: TableKind, parsed: &ParsedCsv) -> ValidationReport {
    let mut report = ValidationReport::default();
    for rejected in &parsed.rejected {
        report.push(rejected.row, ROW_FIELD, rejected.message.clone());
    }
    check_rows(table, parsed.rows.iter().map(|(n, r)| (*n, r)), &mut report);
    report
}

fn check_rows<'a>(
    table: TableKind,
    rows: impl Iterator<Item = (usize, &'a Record)>,
    report: &mut ValidationReport,
) {
    let mut first_seen: HashMap<String, usize> = HashMap::new();

    for (row_number, row) in rows {
        for field in table.required_fields() {
            if is_blank(row.get(*field)) {
                report.push(row_number, field, format!("Required field '{}' is empty", field));
            }
        }

        if let Some(key) = table.key_of(row) {
            if let Some(first) = first_seen.get(&key) {
                report.push(
                    row_number,
                    table.primary_key(),
                    format!("Duplicate {} '{}' (first seen in row {})", table.primary_key(), key, first),
                );
            } else {
                first_seen.insert(key, row_number);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn validate_rows(table: TableKind, rows: Vec<Record>) -> ValidationReport {
        let parsed = ParsedCsv {
            rows: rows.into_iter().enumerate().map(|(i, r)| (i + 1, r)).collect(),
            rejected: Vec::new(),
        };
        validate_parsed(table, &parsed)
    }

    fn phase(id: &str, name: &str, project: &str) -> Record {
        json!({"phaseid": id, "phasename": name, "project_ref": project})
            .as_object()
            .cloned()
            .unwrap()
    }

    #[test]
    fn test_missing_field_and_duplicate_key_both_reported() {
        let rows = vec![
            phase("PH-1", "Discovery", "P-1"),
            phase("PH-2", "Build", "P-1"),
            phase("PH-3", "", "P-1"),
            phase("PH-4", "Test", "P-1"),
            phase("PH-5", "Launch", "P-2"),
            phase("PH-6", "Review", "P-2"),
            phase("PH-2", "Build again", "P-2"),
        ];
        let report = validate_rows(TableKind::Phases, rows);

        assert!(!report.is_valid());
        assert_eq!(report.total_issues, 2);
        assert_eq!(report.issues[0].row, 3);
        assert_eq!(report.issues[0].field, "phasename");
        assert_eq!(report.issues[1].row, 7);
        assert_eq!(report.issues[1].field, "phaseid");
        assert!(report.issues[1].message.contains("first seen in row 2"));
    }

    #[test]
    fn test_issue_list_is_capped() {
        let rows: Vec<Record> = (0..25).map(|_| phase("", "", "")).collect();
        let report = validate_rows(TableKind::Phases, rows);
        assert_eq!(report.issues.len(), MAX_REPORTED_ISSUES);
        assert_eq!(report.total_issues, 75);
    }

    #[test]
    fn test_unreadable_rows_keep_their_row_numbers() {
        let csv = b"phaseid,phasename,project_ref\nPH-1,Discovery,P-1\nPH-2,Build\nPH-3,,P-1\n";
        let parsed = crate::transfer::tabular::read_csv(csv).unwrap();
        let report = validate_parsed(TableKind::Phases, &parsed);

        assert_eq!(report.total_issues, 2);
        assert_eq!(report.issues[0].row, 2);
        assert_eq!(report.issues[0].field, "row");
        assert_eq!(report.issues[0].message, "Expected 3 fields, found 2");
        assert_eq!(report.issues[1].row, 3);
        assert_eq!(report.issues[1].field, "phasename");
    }

    #[test]
    fn test_valid_upload() {
        let rows = vec![phase("PH-1", "Discovery", "P-1")];
        assert!(validate_rows(TableKind::Phases, rows).is_valid());
    }
}
