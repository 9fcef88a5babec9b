//! Governance log and change-history models

use crate::models::tables::{value_as_text, Record};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};

/// Who performed an operation. Authentication happens upstream; the
/// identity arrives as request headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub user_id: String,
    pub role: String,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: role.into(),
        }
    }

    /// Identity used by background jobs such as the periodic log sync
    pub fn system() -> Self {
        Self::new("system", "system")
    }
}

/// Dedup key for governance log rows
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NaturalKey {
    pub timestamp: String,
    pub event_type: String,
    pub resource_id: Option<String>,
}

/// One governance event, as written to JSONL files and stored in `governance_logs`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernanceLogEntry {
    pub timestamp: String,
    pub event_type: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub user_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub user_role: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub resource_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub resource_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub action: Option<String>,
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub details: Value,
    #[serde(default)]
    pub runtime_context: Value,
}

fn default_success() -> bool {
    true
}

/// Producers are inconsistent about ids: accept strings, numbers and null.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_as_text))
}

impl GovernanceLogEntry {
    /// Start an entry stamped with the current time
    pub fn new(event_type: impl Into<String>, actor: &Actor) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            event_type: event_type.into(),
            user_id: Some(actor.user_id.clone()),
            user_role: Some(actor.role.clone()),
            resource_type: None,
            resource_id: None,
            action: None,
            success: true,
            details: Value::Null,
            runtime_context: json!({
                "service": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            }),
        }
    }

    pub fn resource(mut self, resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    /// Add one key to an object-valued `details`
    pub fn details_with(mut self, key: &str, value: Value) -> Self {
        match &mut self.details {
            Value::Object(map) => {
                map.insert(key.to_string(), value);
            }
            other => {
                *other = json!({ key: value });
            }
        }
        self
    }

    /// Mark the entry as describing a failed operation
    pub fn failed(mut self, reason: impl Into<String>) -> Self {
        self.success = false;
        let reason = Value::String(reason.into());
        match &mut self.details {
            Value::Object(map) => {
                map.insert("error".to_string(), reason);
            }
            other => {
                *other = json!({ "error": reason });
            }
        }
        self
    }

    /// A blank resource id keys the same as a missing one
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey {
            timestamp: self.timestamp.clone(),
            event_type: self.event_type.clone(),
            resource_id: self.resource_id.clone().filter(|r| !r.is_empty()),
        }
    }

    /// Row shape for the `governance_logs` table (id assigned by the store)
    pub fn to_record(&self) -> Record {
        let mut record = Record::new();
        record.insert("timestamp".into(), json!(self.timestamp));
        record.insert("event_type".into(), json!(self.event_type));
        record.insert("user_id".into(), json!(self.user_id));
        record.insert("user_role".into(), json!(self.user_role));
        record.insert("resource_type".into(), json!(self.resource_type));
        record.insert("resource_id".into(), json!(self.resource_id));
        record.insert("action".into(), json!(self.action));
        record.insert("success".into(), json!(self.success));
        record.insert("details".into(), self.details.clone());
        record.insert("runtime_context".into(), self.runtime_context.clone());
        record.insert("archived".into(), json!(false));
        record
    }

    /// Parse a stored or bundled row back into an entry
    pub fn from_record(record: &Record) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(record.clone()))
    }
}

/// One field-level change, as recorded in `change_history`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeHistoryRecord {
    #[serde(default)]
    pub id: Option<i64>,
    pub table_name: String,
    pub record_id: String,
    pub field_name: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub changed_by: String,
    pub transaction_id: Option<String>,
    pub governance_log_id: Option<i64>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl ChangeHistoryRecord {
    pub fn to_record(&self) -> Record {
        let mut record = Record::new();
        record.insert("table_name".into(), json!(self.table_name));
        record.insert("record_id".into(), json!(self.record_id));
        record.insert("field_name".into(), json!(self.field_name));
        record.insert("old_value".into(), json!(self.old_value));
        record.insert("new_value".into(), json!(self.new_value));
        record.insert("changed_by".into(), json!(self.changed_by));
        record.insert("transaction_id".into(), json!(self.transaction_id));
        record.insert("governance_log_id".into(), json!(self.governance_log_id));
        record.insert(
            "timestamp".into(),
            json!(self
                .timestamp
                .clone()
                .unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true))),
        );
        record
    }
}

/// Before/after pair for one field, returned to API callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldChange {
    pub field: String,
    pub old_value: Value,
    pub new_value: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_jsonl_line_with_numeric_ids() {
        let line = r#"{"timestamp":"2025-08-02T10:00:00Z","event_type":"phase_update","user_id":7,"resource_id":12,"success":false,"details":{"k":"v"}}"#;
        let entry: GovernanceLogEntry = serde_json::from_str(line).unwrap();
        assert_eq!(entry.user_id.as_deref(), Some("7"));
        assert_eq!(entry.resource_id.as_deref(), Some("12"));
        assert!(!entry.success);
        assert_eq!(entry.runtime_context, Value::Null);
    }

    #[test]
    fn test_missing_event_type_is_rejected() {
        let line = r#"{"timestamp":"2025-08-02T10:00:00Z"}"#;
        assert!(serde_json::from_str::<GovernanceLogEntry>(line).is_err());
    }

    #[test]
    fn test_failed_merges_into_details() {
        let actor = Actor::new("alice", "admin");
        let entry = GovernanceLogEntry::new("data_import", &actor)
            .details(json!({"table": "projects"}))
            .failed("boom");
        assert!(!entry.success);
        assert_eq!(entry.details["table"], "projects");
        assert_eq!(entry.details["error"], "boom");
    }

    #[test]
    fn test_record_round_trip() {
        let actor = Actor::new("alice", "admin");
        let entry = GovernanceLogEntry::new("orphan_fix", &actor)
            .resource("phases", "P-1")
            .action("update");
        let mut record = entry.to_record();
        record.insert("id".into(), json!(5));
        let parsed = GovernanceLogEntry::from_record(&record).unwrap();
        assert_eq!(parsed.natural_key(), entry.natural_key());
    }
}
