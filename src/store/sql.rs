//! SQL constants and builders
//!
//! DDL for the managed tables and the statement renderer used by the
//! PostgreSQL backend. Column names are camelCase in places, so every
//! identifier goes through `quote_ident`.

use crate::models::tables::TableKind;

pub const CREATE_PROJECTS: &str = r#"
    CREATE TABLE IF NOT EXISTS projects (
        "projectId" TEXT PRIMARY KEY,
        "projectName" TEXT,
        owner TEXT,
        status TEXT,
        description TEXT,
        goals TEXT,
        tags TEXT,
        "createdAt" TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        "updatedAt" TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
"#;

/// No FOREIGN KEY clause: orphans are reported and repaired, not prevented
pub const CREATE_PHASES: &str = r#"
    CREATE TABLE IF NOT EXISTS phases (
        phaseid TEXT PRIMARY KEY,
        phasename TEXT,
        project_ref TEXT,
        status TEXT,
        "RAG" TEXT,
        "startDate" TEXT,
        "endDate" TEXT,
        notes TEXT,
        "createdAt" TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        "updatedAt" TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
"#;

pub const CREATE_STEP_PROGRESS: &str = r#"
    CREATE TABLE IF NOT EXISTS step_progress (
        "stepId" TEXT PRIMARY KEY,
        "phaseId" TEXT,
        "stepName" TEXT,
        status TEXT,
        "outputNotes" TEXT,
        "createdAt" TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        "updatedAt" TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
"#;

/// `timestamp` stays TEXT so the dedup key compares exactly what producers wrote
pub const CREATE_GOVERNANCE_LOGS: &str = r#"
    CREATE TABLE IF NOT EXISTS governance_logs (
        id BIGSERIAL PRIMARY KEY,
        "timestamp" TEXT NOT NULL,
        event_type TEXT NOT NULL,
        user_id TEXT,
        user_role TEXT,
        resource_type TEXT,
        resource_id TEXT,
        action TEXT,
        success BOOLEAN NOT NULL DEFAULT TRUE,
        details JSONB,
        runtime_context JSONB,
        archived BOOLEAN NOT NULL DEFAULT FALSE
    )
"#;

pub const CREATE_CHANGE_HISTORY: &str = r#"
    CREATE TABLE IF NOT EXISTS change_history (
        id BIGSERIAL PRIMARY KEY,
        table_name TEXT NOT NULL,
        record_id TEXT NOT NULL,
        field_name TEXT NOT NULL,
        old_value TEXT,
        new_value TEXT,
        changed_by TEXT NOT NULL,
        transaction_id TEXT,
        governance_log_id BIGINT REFERENCES governance_logs(id),
        "timestamp" TEXT NOT NULL
    )
"#;

pub const CREATE_INDEXES: &[&str] = &[
    r#"CREATE UNIQUE INDEX IF NOT EXISTS idx_governance_logs_natural_key
        ON governance_logs ("timestamp", event_type, COALESCE(resource_id, ''))"#,
    "CREATE INDEX IF NOT EXISTS idx_phases_project_ref ON phases(project_ref)",
    r#"CREATE INDEX IF NOT EXISTS idx_step_progress_phase_id ON step_progress("phaseId")"#,
    "CREATE INDEX IF NOT EXISTS idx_change_history_record ON change_history(table_name, record_id)",
];

/// All DDL in dependency order
pub fn schema_statements() -> Vec<&'static str> {
    let mut statements = vec![
        CREATE_PROJECTS,
        CREATE_PHASES,
        CREATE_STEP_PROGRESS,
        CREATE_GOVERNANCE_LOGS,
        CREATE_CHANGE_HISTORY,
    ];
    statements.extend_from_slice(CREATE_INDEXES);
    statements
}

pub const FIND_GOVERNANCE_LOG: &str = r#"
    SELECT row_to_json(t) FROM governance_logs t
    WHERE t."timestamp" = $1
        AND t.event_type = $2
        AND COALESCE(t.resource_id, '') = COALESCE($3::text, '')
    LIMIT 1
"#;

pub const ARCHIVE_GOVERNANCE_LOG: &str = "UPDATE governance_logs SET archived = TRUE WHERE id = $1";

/// SQL builder for safe identifier quoting
pub struct SqlBuilder;

impl SqlBuilder {
    /// Quote an identifier (table/column name) safely
    pub fn quote_ident(ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn table(table: TableKind) -> String {
        Self::quote_ident(table.name())
    }

    fn primary_key(table: TableKind) -> String {
        Self::quote_ident(table.primary_key())
    }

    /// `SELECT row_to_json(t) FROM table t ORDER BY pk`
    pub fn select_all(table: TableKind) -> String {
        format!(
            "SELECT row_to_json(t) FROM {} t ORDER BY t.{}",
            Self::table(table),
            Self::primary_key(table)
        )
    }

    /// Newest first; `$1` is the row limit
    pub fn select_recent(table: TableKind) -> String {
        let order = if table.has_column("timestamp") {
            format!("t.\"timestamp\" DESC, t.{} DESC", Self::primary_key(table))
        } else {
            format!("t.{} DESC", Self::primary_key(table))
        };
        format!(
            "SELECT row_to_json(t) FROM {} t ORDER BY {} LIMIT $1",
            Self::table(table),
            order
        )
    }

    /// `$1` is the primary key as text
    pub fn select_one(table: TableKind) -> String {
        format!(
            "SELECT row_to_json(t) FROM {} t WHERE t.{}::text = $1 LIMIT 1",
            Self::table(table),
            Self::primary_key(table)
        )
    }

    /// Insert the given columns from a JSON object bound to `$1`.
    ///
    /// Columns are populated through `json_populate_record` so PostgreSQL
    /// performs the type coercion for each column.
    pub fn insert(table: TableKind, columns: &[&str]) -> String {
        let cols = columns
            .iter()
            .map(|c| Self::quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let returning = if table.has_generated_key() {
            " RETURNING id"
        } else {
            ""
        };
        format!(
            "INSERT INTO {table} ({cols}) SELECT {cols} FROM json_populate_record(NULL::{table}, $1::json){returning}",
            table = Self::table(table),
            cols = cols,
            returning = returning
        )
    }

    /// Update one column from a JSON object bound to `$1`; `$2` is the key
    pub fn update_field(table: TableKind, field: &str) -> String {
        let column = Self::quote_ident(field);
        let touch = if table.has_column("updatedAt") {
            ", \"updatedAt\" = NOW()"
        } else {
            ""
        };
        format!(
            "UPDATE {table} SET {column} = j.{column}{touch} \
             FROM json_populate_record(NULL::{table}, $1::json) j \
             WHERE {table}.{pk}::text = $2",
            table = Self::table(table),
            column = column,
            touch = touch,
            pk = Self::primary_key(table)
        )
    }

    pub fn delete_one(table: TableKind) -> String {
        format!(
            "DELETE FROM {} WHERE {}::text = $1",
            Self::table(table),
            Self::primary_key(table)
        )
    }

    pub fn delete_all(table: TableKind) -> String {
        format!("DELETE FROM {}", Self::table(table))
    }

    /// Change history query; filters bind in order after the limit (`$1`)
    pub fn select_history(by_table: bool, by_record: bool) -> String {
        let mut conditions = Vec::new();
        let mut next = 2;
        if by_table {
            conditions.push(format!("t.table_name = ${}", next));
            next += 1;
        }
        if by_record {
            conditions.push(format!("t.record_id = ${}", next));
        }
        let filter = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };
        format!(
            "SELECT row_to_json(t) FROM change_history t{} ORDER BY t.id DESC LIMIT $1",
            filter
        )
    }
}
