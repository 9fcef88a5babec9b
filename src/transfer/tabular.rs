//! CSV rendering and parsing of table rows

use crate::error::AppError;
use crate::models::tables::{value_as_text, Record, TableKind};
use serde_json::Value;

/// Column order for a CSV export: the table's allow-list when it has one,
/// otherwise the key order of the first row (all columns when empty).
pub fn export_headers(table: TableKind, rows: &[Record]) -> Vec<String> {
    if let Some(fields) = table.export_fields() {
        return fields.iter().map(|f| f.to_string()).collect();
    }
    match rows.first() {
        Some(first) => first.keys().cloned().collect(),
        None => table.columns().iter().map(|c| c.to_string()).collect(),
    }
}

/// Render rows as CSV with one header row
pub fn write_csv(table: TableKind, rows: &[Record]) -> Result<String, AppError> {
    let headers = export_headers(table, rows);
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(&headers)
        .map_err(|e| AppError::Internal(format!("Failed to write CSV header: {}", e)))?;

    for row in rows {
        let cells = headers
            .iter()
            .map(|h| row.get(h).and_then(value_as_text).unwrap_or_default());
        writer
            .write_record(cells)
            .map_err(|e| AppError::Internal(format!("Failed to write CSV row: {}", e)))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| AppError::Internal(format!("Failed to flush CSV: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| AppError::Internal(format!("CSV is not UTF-8: {}", e)))
}

/// A data row that could not be read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRow {
    /// 1-based data row (the header is not counted)
    pub row: usize,
    pub message: String,
}

/// Rows read from a CSV document, each tagged with its 1-based data row
#[derive(Debug, Clone, Default)]
pub struct ParsedCsv {
    pub rows: Vec<(usize, Record)>,
    pub rejected: Vec<RejectedRow>,
}

impl ParsedCsv {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() && self.rejected.is_empty()
    }

    pub fn into_records(self) -> Vec<Record> {
        self.rows.into_iter().map(|(_, record)| record).collect()
    }
}

/// Parse CSV with a header row into records. Empty cells become null.
///
/// Only an unreadable header fails the whole document. Rows whose field
/// count differs from the header, or that are not valid UTF-8, are
/// returned in `rejected` and reading continues.
pub fn read_csv(bytes: &[u8]) -> Result<ParsedCsv, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(bytes);

    let headers = reader
        .headers()
        .map_err(|e| AppError::Parse(format!("Failed to read CSV header: {}", e)))?
        .clone();
    if headers.iter().all(str::is_empty) {
        return Err(AppError::Parse("CSV has no header row".to_string()));
    }

    let mut parsed = ParsedCsv::default();
    for (idx, result) in reader.records().enumerate() {
        let row_number = idx + 1;
        let row = match result {
            Ok(row) => row,
            Err(e) => {
                parsed.rejected.push(RejectedRow {
                    row: row_number,
                    message: format!("Unreadable row: {}", e),
                });
                continue;
            }
        };
        if row.len() != headers.len() {
            parsed.rejected.push(RejectedRow {
                row: row_number,
                message: format!("Expected {} fields, found {}", headers.len(), row.len()),
            });
            continue;
        }

        let record: Record = headers
            .iter()
            .zip(row.iter())
            .map(|(h, cell)| {
                let value = if cell.is_empty() {
                    Value::Null
                } else {
                    Value::String(cell.to_string())
                };
                (h.to_string(), value)
            })
            .collect();
        parsed.rows.push((row_number, record));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_governance_export_is_stripped_to_allow_list() {
        let row = json!({
            "id": 1,
            "timestamp": "2025-08-01T09:00:00Z",
            "event_type": "data_import",
            "user_id": "alice",
            "user_role": "admin",
            "details": {"secret": "x"},
            "success": true
        });
        let csv = write_csv(TableKind::GovernanceLogs, &[row.as_object().cloned().unwrap()]).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("timestamp,event_type,user_id,resource_type,resource_id,action,success")
        );
        assert_eq!(lines.next(), Some("2025-08-01T09:00:00Z,data_import,alice,,,,true"));
        assert!(!csv.contains("secret"));
    }

    #[test]
    fn test_columns_follow_first_record() {
        let rows = vec![
            json!({"projectId": "P1", "projectName": "Alpha, Inc", "owner": null}),
            json!({"projectId": "P2", "projectName": "Beta", "owner": "bob"}),
        ];
        let rows: Vec<Record> = rows.into_iter().map(|r| r.as_object().cloned().unwrap()).collect();
        let csv = write_csv(TableKind::Projects, &rows).unwrap();
        assert_eq!(csv, "projectId,projectName,owner\nP1,\"Alpha, Inc\",\nP2,Beta,bob\n");

        let parsed = read_csv(csv.as_bytes()).unwrap().into_records();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0]["projectName"], "Alpha, Inc");
        assert_eq!(parsed[0]["owner"], Value::Null);
    }

    #[test]
    fn test_ragged_rows_are_rejected_and_reading_continues() {
        let parsed = read_csv(b"projectId,projectName\nP1,Alpha,extra\nP2,Beta\nP3\n").unwrap();

        let ids: Vec<(usize, Value)> = parsed
            .rows
            .iter()
            .map(|(row, r)| (*row, r["projectId"].clone()))
            .collect();
        assert_eq!(ids, vec![(2, json!("P2"))]);

        let rejected: Vec<usize> = parsed.rejected.iter().map(|r| r.row).collect();
        assert_eq!(rejected, vec![1, 3]);
        assert_eq!(parsed.rejected[0].message, "Expected 2 fields, found 3");
    }

    #[test]
    fn test_missing_header_is_a_parse_error() {
        let err = read_csv(b"").unwrap_err();
        assert!(matches!(err, AppError::Parse(_)));
    }
}
