//! Canonical table registry
//!
//! Every table this service reads or writes is a `TableKind` variant. Keys,
//! required fields, relations and export allow-lists live here so that
//! adding a table is a compile-time change.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("valid regex"));

/// A row as exchanged with the store, in column insertion order.
pub type Record = Map<String, Value>;

/// Tables managed by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    Projects,
    Phases,
    StepProgress,
    GovernanceLogs,
    ChangeHistory,
}

/// A child-to-parent reference checked by the integrity inspector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    pub field: &'static str,
    pub parent: TableKind,
}

impl TableKind {
    /// Business tables, parents before children.
    pub const CANONICAL: [TableKind; 3] = [
        TableKind::Projects,
        TableKind::Phases,
        TableKind::StepProgress,
    ];

    /// Tables carried in a schema export bundle.
    pub const BUNDLED: [TableKind; 4] = [
        TableKind::Projects,
        TableKind::Phases,
        TableKind::StepProgress,
        TableKind::GovernanceLogs,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            TableKind::Projects => "projects",
            TableKind::Phases => "phases",
            TableKind::StepProgress => "step_progress",
            TableKind::GovernanceLogs => "governance_logs",
            TableKind::ChangeHistory => "change_history",
        }
    }

    pub fn primary_key(&self) -> &'static str {
        match self {
            TableKind::Projects => "projectId",
            TableKind::Phases => "phaseid",
            TableKind::StepProgress => "stepId",
            TableKind::GovernanceLogs | TableKind::ChangeHistory => "id",
        }
    }

    /// Whether the primary key is assigned by the store on insert
    pub fn has_generated_key(&self) -> bool {
        matches!(self, TableKind::GovernanceLogs | TableKind::ChangeHistory)
    }

    /// Every column of the table in declaration order
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            TableKind::Projects => &[
                "projectId",
                "projectName",
                "owner",
                "status",
                "description",
                "goals",
                "tags",
                "createdAt",
                "updatedAt",
            ],
            TableKind::Phases => &[
                "phaseid",
                "phasename",
                "project_ref",
                "status",
                "RAG",
                "startDate",
                "endDate",
                "notes",
                "createdAt",
                "updatedAt",
            ],
            TableKind::StepProgress => &[
                "stepId",
                "phaseId",
                "stepName",
                "status",
                "outputNotes",
                "createdAt",
                "updatedAt",
            ],
            TableKind::GovernanceLogs => &[
                "id",
                "timestamp",
                "event_type",
                "user_id",
                "user_role",
                "resource_type",
                "resource_id",
                "action",
                "success",
                "details",
                "runtime_context",
                "archived",
            ],
            TableKind::ChangeHistory => &[
                "id",
                "table_name",
                "record_id",
                "field_name",
                "old_value",
                "new_value",
                "changed_by",
                "transaction_id",
                "governance_log_id",
                "timestamp",
            ],
        }
    }

    /// Fields that must be non-empty in an uploaded row
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            TableKind::Projects => &["projectId", "projectName"],
            TableKind::Phases => &["phaseid", "phasename", "project_ref"],
            TableKind::StepProgress => &["stepId", "phaseId"],
            TableKind::GovernanceLogs => &["timestamp", "event_type"],
            TableKind::ChangeHistory => &["table_name", "record_id", "field_name"],
        }
    }

    pub fn foreign_key(&self) -> Option<ForeignKey> {
        match self {
            TableKind::Phases => Some(ForeignKey {
                field: "project_ref",
                parent: TableKind::Projects,
            }),
            TableKind::StepProgress => Some(ForeignKey {
                field: "phaseId",
                parent: TableKind::Phases,
            }),
            _ => None,
        }
    }

    /// Non-key attributes a live row is expected to carry (e.g. project owner)
    pub fn required_attributes(&self) -> &'static [&'static str] {
        match self {
            TableKind::Projects => &["projectName", "owner"],
            _ => &[],
        }
    }

    /// Sensitive tables are exported truncated and stripped to an allow-list
    pub fn is_sensitive(&self) -> bool {
        matches!(self, TableKind::GovernanceLogs)
    }

    pub fn export_fields(&self) -> Option<&'static [&'static str]> {
        match self {
            TableKind::GovernanceLogs => Some(&[
                "timestamp",
                "event_type",
                "user_id",
                "resource_type",
                "resource_id",
                "action",
                "success",
            ]),
            _ => None,
        }
    }

    /// Only business tables can be replaced by an upload
    pub fn is_importable(&self) -> bool {
        Self::CANONICAL.contains(self)
    }

    /// Columns maintained by the store itself
    pub fn is_managed_column(&self, column: &str) -> bool {
        match self {
            TableKind::GovernanceLogs | TableKind::ChangeHistory => column == "id",
            _ => column == "createdAt" || column == "updatedAt",
        }
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns().contains(&column)
    }

    /// Stringified primary key of a record, if present and non-empty
    pub fn key_of(&self, record: &Record) -> Option<String> {
        record
            .get(self.primary_key())
            .and_then(value_as_text)
            .filter(|k| !k.is_empty())
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TableKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "projects" => Ok(TableKind::Projects),
            "phases" => Ok(TableKind::Phases),
            "step_progress" => Ok(TableKind::StepProgress),
            "governance_logs" => Ok(TableKind::GovernanceLogs),
            "change_history" => Ok(TableKind::ChangeHistory),
            other => Err(format!("Unknown table '{}'", other)),
        }
    }
}

/// Column names must be plain identifiers before they reach a statement
pub fn validate_identifier(name: &str) -> Result<(), validator::ValidationError> {
    if IDENTIFIER.is_match(name) {
        return Ok(());
    }
    let mut err = validator::ValidationError::new("invalid_identifier");
    err.message = Some(
        format!(
            "Invalid field name '{}'. Must start with a letter or underscore and contain only letters, digits, underscores.",
            name
        )
        .into(),
    );
    Err(err)
}

/// Render a scalar JSON value as text; `None` for null.
///
/// Strings are returned without quotes, numbers and booleans in their JSON
/// form, nested values as compact JSON.
pub fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

/// True when a field is absent, null, or an empty/whitespace string
pub fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_table_names_round_trip() {
        for table in TableKind::BUNDLED {
            assert_eq!(table.name().parse::<TableKind>().unwrap(), table);
        }
        assert!("users".parse::<TableKind>().is_err());
    }

    #[test]
    fn test_relations() {
        assert_eq!(
            TableKind::Phases.foreign_key().map(|fk| fk.parent),
            Some(TableKind::Projects)
        );
        assert_eq!(
            TableKind::StepProgress.foreign_key().map(|fk| fk.field),
            Some("phaseId")
        );
        assert!(TableKind::Projects.foreign_key().is_none());
    }

    #[test]
    fn test_key_of_stringifies_numbers() {
        let record = json!({"projectId": 42, "projectName": "x"});
        let record = record.as_object().unwrap();
        assert_eq!(TableKind::Projects.key_of(record), Some("42".to_string()));

        let empty = json!({"projectId": ""});
        assert_eq!(TableKind::Projects.key_of(empty.as_object().unwrap()), None);
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("project_ref").is_ok());
        assert!(validate_identifier("RAG").is_ok());
        assert!(validate_identifier("owner; DROP TABLE projects").is_err());
        assert!(validate_identifier("1st").is_err());
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn test_is_blank() {
        assert!(is_blank(None));
        assert!(is_blank(Some(&Value::Null)));
        assert!(is_blank(Some(&json!("  "))));
        assert!(!is_blank(Some(&json!(0))));
        assert!(!is_blank(Some(&json!("alice"))));
    }
}
