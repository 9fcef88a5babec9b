//! Schema export bundle
//!
//! `{metadata, tables}` where `metadata.hash` is the SHA-256 of the canonical
//! form of `tables`: object keys sorted at every depth, no whitespace.

use crate::error::AppError;
use crate::models::tables::{Record, TableKind};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

pub const BUNDLE_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleMetadata {
    pub timestamp: String,
    #[serde(default)]
    pub version: String,
    pub hash: String,
    #[serde(default)]
    pub record_counts: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaExportBundle {
    pub metadata: BundleMetadata,
    pub tables: Map<String, Value>,
}

/// Rebuild a value with object keys in sorted order
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> = map.iter().map(|(k, v)| (k, canonicalize(v))).collect();
            let mut out = Map::new();
            for (k, v) in sorted {
                out.insert(k.clone(), v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Compact JSON with recursively sorted keys
pub fn canonical_json(value: &Value) -> String {
    canonicalize(value).to_string()
}

/// Lowercase hex SHA-256 over the canonical form of `tables`
pub fn compute_hash(tables: &Map<String, Value>) -> String {
    let canonical = canonical_json(&Value::Object(tables.clone()));
    format!("{:x}", Sha256::digest(canonical.as_bytes()))
}

impl SchemaExportBundle {
    /// Assemble a bundle and stamp it with counts and hash
    pub fn build(tables: Vec<(TableKind, Vec<Record>)>) -> Self {
        let mut payload = Map::new();
        let mut record_counts = BTreeMap::new();
        for (table, rows) in tables {
            record_counts.insert(table.name().to_string(), rows.len());
            payload.insert(
                table.name().to_string(),
                Value::Array(rows.into_iter().map(Value::Object).collect()),
            );
        }
        let hash = compute_hash(&payload);
        Self {
            metadata: BundleMetadata {
                timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
                version: BUNDLE_VERSION.to_string(),
                hash,
                record_counts,
            },
            tables: payload,
        }
    }

    /// Parse an uploaded bundle and check its structure (not its hash)
    pub fn parse(bytes: &[u8]) -> Result<Self, AppError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| AppError::MalformedBundle(format!("Invalid JSON: {}", e)))?;
        let Value::Object(mut root) = value else {
            return Err(AppError::MalformedBundle("Bundle must be a JSON object".to_string()));
        };

        let metadata = root
            .remove("metadata")
            .ok_or_else(|| AppError::MalformedBundle("Missing 'metadata'".to_string()))?;
        let metadata: BundleMetadata = serde_json::from_value(metadata)
            .map_err(|e| AppError::MalformedBundle(format!("Invalid 'metadata': {}", e)))?;

        let tables = match root.remove("tables") {
            Some(Value::Object(tables)) => tables,
            Some(_) => return Err(AppError::MalformedBundle("'tables' must be an object".to_string())),
            None => return Err(AppError::MalformedBundle("Missing 'tables'".to_string())),
        };

        for table in TableKind::BUNDLED {
            match tables.get(table.name()) {
                None => {}
                Some(Value::Array(rows)) => {
                    if let Some(position) = rows.iter().position(|r| !r.is_object()) {
                        return Err(AppError::MalformedBundle(format!(
                            "'tables.{}[{}]' is not an object",
                            table, position
                        )));
                    }
                }
                Some(_) => {
                    return Err(AppError::MalformedBundle(format!(
                        "'tables.{}' must be an array",
                        table
                    )))
                }
            }
        }

        Ok(Self { metadata, tables })
    }

    pub fn computed_hash(&self) -> String {
        compute_hash(&self.tables)
    }

    /// Fail with `IntegrityCheckFailed` when `metadata.hash` does not match `tables`
    pub fn verify(&self) -> Result<(), AppError> {
        let actual = self.computed_hash();
        if actual.eq_ignore_ascii_case(&self.metadata.hash) {
            Ok(())
        } else {
            Err(AppError::IntegrityCheckFailed {
                expected: self.metadata.hash.clone(),
                actual,
            })
        }
    }

    /// Whether the bundle carries an entry for `table`
    pub fn contains(&self, table: TableKind) -> bool {
        self.tables.contains_key(table.name())
    }

    /// Rows for one table; empty when the table is absent
    pub fn rows(&self, table: TableKind) -> Vec<Record> {
        match self.tables.get(table.name()) {
            Some(Value::Array(rows)) => rows.iter().filter_map(|r| r.as_object().cloned()).collect(),
            _ => Vec::new(),
        }
    }

    pub fn record_counts(&self) -> BTreeMap<String, usize> {
        TableKind::BUNDLED
            .iter()
            .filter(|t| self.contains(**t))
            .map(|t| (t.name().to_string(), self.rows(*t).len()))
            .collect()
    }
}
