// Schema migration operation list and identifier safety, per §4.8/§4.9.
//
// Grounded in migration-handler.py / migration-worker.py: both share a
// `SAFE_IDENT` regex and the same four DDL ops (`CREATE_TABLE`, `DROP_TABLE`,
// `RENAME_TABLE`, `ADD_COLUMN`). `apply_ops` below is the corrected version
// of `apply_ops_to_tenant_db`: a single outer transaction, one final commit,
// skipped only when the last operation is `CREATE_TABLE` (matching the
// worker's behavior, not the coordinator's buggy intermediate commits).

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::engine::Engine;
use crate::error::{DbError, Result};

static SAFE_IDENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"));

/// Validate a table/column identifier against the safety pattern. Returns
/// the identifier itself (not a quoted form) so callers decide how to embed
/// it in SQL.
pub fn qident(name: &str) -> Result<&str> {
    if SAFE_IDENT.is_match(name) {
        Ok(name)
    } else {
        Err(DbError::UnsafeIdentifier(name.to_string()))
    }
}

/// `ADD_COLUMN`'s column descriptor: `{name, type, nullable?, default?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub type_sql: String,
    #[serde(default)]
    pub nullable: Option<bool>,
    #[serde(default)]
    pub default: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationOp {
    /// Caller-trusted raw DDL — identifier safety is the caller's
    /// responsibility (§4.8: "Execute raw DDL; caller-trusted identifier
    /// safety"), so `sql` is run as-is, not re-derived from a table name.
    CreateTable { sql: String },
    DropTable { table: String },
    RenameTable { table: String, new_name: String },
    AddColumn { table: String, column: ColumnSpec },
}

impl MigrationOp {
    pub fn is_create_table(&self) -> bool {
        matches!(self, MigrationOp::CreateTable { .. })
    }

    /// Validate identifier safety and the `nullable=false` ⇒ `default`
    /// requirement, without touching any database. Called before any op in
    /// the list is applied (property 6: "rejected before any file is
    /// touched").
    fn validate(&self) -> Result<()> {
        match self {
            MigrationOp::CreateTable { .. } => Ok(()),
            MigrationOp::DropTable { table } => qident(table).map(|_| ()),
            MigrationOp::RenameTable { table, new_name } => {
                qident(table)?;
                qident(new_name)?;
                Ok(())
            }
            MigrationOp::AddColumn { table, column } => {
                qident(table)?;
                qident(&column.name)?;
                if column.nullable == Some(false) && column.default.is_none() {
                    return Err(DbError::BadRequest(format!(
                        "ADD_COLUMN {table}.{}: nullable=false requires a default",
                        column.name
                    )));
                }
                Ok(())
            }
        }
    }
}

/// Check whether `table` already exists in the schema, for idempotent op
/// application (e.g. skip `RENAME_TABLE` if its target already exists).
pub fn table_exists(engine: &Engine, table: &str) -> Result<bool> {
    let table = qident(table)?;
    let count: i64 = engine.query_scalar(
        "SELECT count(*) FROM sqlite_master WHERE type='table' AND name = ?1",
        &[table],
    )?;
    Ok(count > 0)
}

/// Check whether `column` exists on `table`.
pub fn column_exists(engine: &Engine, table: &str, column: &str) -> Result<bool> {
    let table = qident(table)?;
    let rows = engine.query_rows(&format!("PRAGMA table_info({table})"), &[])?;
    Ok(rows.iter().any(|row| {
        row.get("name")
            .and_then(|v| v.as_str())
            .map(|n| n == column)
            .unwrap_or(false)
    }))
}

/// Apply a sequence of migration operations to `engine` idempotently, inside
/// a single outer transaction. The final commit is skipped only when the
/// last operation is `CREATE_TABLE` — matching the worker's
/// `apply_ops_to_tenant_db`, which leaves a bare `CREATE TABLE` to its own
/// implicit auto-commit rather than wrapping it again.
///
/// This intentionally does NOT replicate the coordinator-side bug of issuing
/// an intermediate `COMMIT` after every op inside an outer `BEGIN` — that
/// leaves the transaction half-committed if a later op fails.
pub fn apply_ops(engine: &Engine, ops: &[MigrationOp]) -> Result<()> {
    if ops.is_empty() {
        return Ok(());
    }

    // Validate the whole list up front so an unsafe identifier anywhere in
    // the list rejects before the first op is applied, not mid-transaction.
    for op in ops {
        op.validate()?;
    }

    let skip_final_commit = ops.last().map(MigrationOp::is_create_table).unwrap_or(false);

    engine.execute_batch_transaction(
        |tx| {
            for op in ops {
                apply_one(tx, op)?;
            }
            Ok(())
        },
        skip_final_commit,
    )
}

fn apply_one(tx: &rusqlite::Transaction<'_>, op: &MigrationOp) -> Result<()> {
    match op {
        MigrationOp::CreateTable { sql } => {
            tx.execute_batch(sql)?;
        }
        MigrationOp::DropTable { table } => {
            let table = qident(table)?;
            tx.execute(&format!("DROP TABLE IF EXISTS {table}"), [])?;
        }
        MigrationOp::RenameTable { table, new_name } => {
            let from = qident(table)?;
            let to = qident(new_name)?;
            if !table_exists_tx(tx, from)? {
                return Err(DbError::QueryFailed(format!("RENAME_TABLE source missing: {from}")));
            }
            if table_exists_tx(tx, to)? {
                // Destination already exists: treated as redundant, no-op.
                return Ok(());
            }
            tx.execute(&format!("ALTER TABLE {from} RENAME TO {to}"), [])?;
        }
        MigrationOp::AddColumn { table, column } => {
            let table_ident = qident(table)?;
            let column_ident = qident(&column.name)?;
            if column_exists_tx(tx, table_ident, column_ident)? {
                return Ok(());
            }
            let mut sql = format!("ALTER TABLE {table_ident} ADD COLUMN {column_ident} {}", column.type_sql);
            if column.nullable == Some(false) {
                sql.push_str(" NOT NULL");
            }
            if let Some(default) = &column.default {
                sql.push_str(" DEFAULT ");
                sql.push_str(default);
            }
            tx.execute(&sql, [])?;
        }
    }
    Ok(())
}

fn table_exists_tx(tx: &rusqlite::Transaction<'_>, table: &str) -> Result<bool> {
    let table = qident(table)?;
    let count: i64 = tx.query_row(
        "SELECT count(*) FROM sqlite_master WHERE type='table' AND name = ?1",
        [table],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}

fn column_exists_tx(tx: &rusqlite::Transaction<'_>, table: &str, column: &str) -> Result<bool> {
    let table = qident(table)?;
    let mut stmt = tx.prepare(&format!("PRAGMA table_info({table})"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get("name")?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
