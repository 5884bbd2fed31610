// Embedded SQL engine wrapper, per §1: "a tenant's schema is an embedded SQL
// database file; the service does not parse or validate tenant SQL — the
// embedded engine does." Backed by `rusqlite` (bundled SQLite), not a
// hand-rolled engine.
//
// `rusqlite::Connection` is `Send` but not `Sync`; components hold an
// `Engine` inside a `ScopedConnection` for the lifetime of a single request
// rather than sharing one connection across concurrent callers.

use parking_lot::Mutex;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::Value;
use std::path::Path;

use crate::error::Result;

/// One result row, as an ordered sequence of `(column name, value)` pairs —
/// ordered because callers sometimes care about column order (e.g. building
/// a JSON array-of-arrays response), but also queryable by name.
#[derive(Debug, Clone, Default)]
pub struct QueryRow(Vec<(String, Value)>);

impl QueryRow {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.iter().find(|(name, _)| name == column).map(|(_, v)| v)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(name, _)| name.as_str())
    }

    pub fn as_json_object(&self) -> Value {
        let map = self
            .0
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<serde_json::Map<_, _>>();
        Value::Object(map)
    }
}

/// A tenant schema's embedded database connection.
pub struct Engine {
    conn: Mutex<Connection>,
}

impl Engine {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Execute a single statement (INSERT/UPDATE/DELETE/DDL), returning the
    /// number of rows affected. Used for the write path (§4.5 step 3).
    pub fn execute(&self, sql: &str, params: &[&str]) -> Result<usize> {
        let conn = self.conn.lock();
        let affected = conn.execute(sql, rusqlite::params_from_iter(params))?;
        Ok(affected)
    }

    /// Run a read-only query, returning every matched row. Used by the query
    /// executor (§4.4) for cacheable reads.
    pub fn query_rows(&self, sql: &str, params: &[&str]) -> Result<Vec<QueryRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

        let rows = stmt.query_map(rusqlite::params_from_iter(params), move |row| {
            let mut cols = Vec::with_capacity(column_names.len());
            for (idx, name) in column_names.iter().enumerate() {
                let value = value_ref_to_json(row.get_ref(idx)?);
                cols.push((name.clone(), value));
            }
            Ok(QueryRow(cols))
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Run a query expected to return exactly one scalar column in one row.
    pub fn query_scalar<T: rusqlite::types::FromSql>(&self, sql: &str, params: &[&str]) -> Result<T> {
        let conn = self.conn.lock();
        let value = conn.query_row(sql, rusqlite::params_from_iter(params), |row| row.get(0))?;
        Ok(value)
    }

    /// Run `body` inside a single transaction. `skip_final_commit` matches
    /// the migration worker's behavior of leaving a trailing bare
    /// `CREATE TABLE` to SQLite's own auto-commit instead of wrapping it a
    /// second time.
    pub fn execute_batch_transaction<F>(&self, body: F, skip_final_commit: bool) -> Result<()>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<()>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        body(&tx)?;
        if !skip_final_commit {
            tx.commit()?;
        }
        Ok(())
    }

    /// Execute a multi-statement SQL script (e.g. replaying a schema
    /// artifact's existing DDL before applying new migration operations).
    pub fn execute_script(&self, sql: &str) -> Result<()> {
        let trimmed = sql.trim();
        if trimmed.is_empty() {
            return Ok(());
        }
        let conn = self.conn.lock();
        conn.execute_batch(trimmed)?;
        Ok(())
    }

    /// Reconstruct a schema's DDL as a flat SQL script, the way the
    /// migration coordinator persists a rewritten schema artifact.
    pub fn dump_schema(&self) -> Result<String> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT sql FROM sqlite_master WHERE sql IS NOT NULL ORDER BY rowid")?;
        let mut rows = stmt.query([])?;
        let mut out = String::new();
        while let Some(row) = rows.next()? {
            let sql: String = row.get(0)?;
            out.push_str(sql.trim_end());
            if !sql.trim_end().ends_with(';') {
                out.push(';');
            }
            out.push('\n');
        }
        Ok(out)
    }

    /// Snapshot the current database state to `dest` via `VACUUM INTO`,
    /// matching the write pipeline's point-in-time snapshot step (§4.5 step
    /// 4): a single consistent file, independent of any concurrent writers.
    pub fn vacuum_into(&self, dest: &Path) -> Result<()> {
        let conn = self.conn.lock();
        let dest_str = dest.to_string_lossy();
        conn.execute(&format!("VACUUM INTO '{dest_str}'"), [])?;
        Ok(())
    }
}

fn value_ref_to_json(v: ValueRef<'_>) -> Value {
    match v {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(base64_lite(b)),
    }
}

/// Minimal base64 encode for blob columns — tenant schemas are expected to
/// be relational/text-oriented (§1 Non-goals exclude BLOB/large-object
/// handling as a first-class concern), so this only needs to round-trip
/// opaque bytes into a JSON-safe string, not be fast.
fn base64_lite(bytes: &[u8]) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::with_capacity((bytes.len() + 2) / 3 * 4);
    for chunk in bytes.chunks(3) {
        let b0 = chunk[0];
        let b1 = *chunk.get(1).unwrap_or(&0);
        let b2 = *chunk.get(2).unwrap_or(&0);
        out.push(ALPHABET[(b0 >> 2) as usize] as char);
        out.push(ALPHABET[(((b0 & 0x03) << 4) | (b1 >> 4)) as usize] as char);
        out.push(if chunk.len() > 1 {
            ALPHABET[(((b1 & 0x0f) << 2) | (b2 >> 6)) as usize] as char
        } else {
            '='
        });
        out.push(if chunk.len() > 2 {
            ALPHABET[(b2 & 0x3f) as usize] as char
        } else {
            '='
        });
    }
    out
}
