// Query Result Cache (C7), per §4.7.
//
// Grounded in read_handler.py: `_is_cacheable_read` (only bare SELECTs
// without side-effecting keywords are cacheable), `_normalize_sql`
// (collapse whitespace, lowercase), `_tenant_ver_key`/`_cache_key` (SHA-256
// of `tenant_id:ver:normalized_sql`), and `_cache_set_json`'s
// `REDIS_MAX_VALUE_BYTES` guard — oversized payloads are simply not cached,
// never an error.

use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use crate::collaborators::CacheBackend;
use crate::error::Result;

/// Whether `sql` is eligible for caching: a read-only `SELECT` or `WITH`
/// (CTE) statement, no side-effecting keywords anywhere in the statement.
pub fn is_cacheable_read(sql: &str) -> bool {
    let normalized = normalize_sql(sql);
    if !normalized.starts_with("select") && !normalized.starts_with("with") {
        return false;
    }
    const FORBIDDEN: &[&str] = &[
        "insert", "update", "delete", "drop", "alter", "create", "replace", "pragma", "attach", "vacuum",
    ];
    !FORBIDDEN.iter().any(|kw| contains_word(&normalized, kw))
}

fn contains_word(haystack: &str, word: &str) -> bool {
    haystack.split(|c: char| !c.is_alphanumeric() && c != '_').any(|tok| tok == word)
}

/// Collapse consecutive whitespace, lowercase, and strip a trailing
/// semicolon, so cosmetically different but semantically identical queries
/// (including a query with/without its trailing `;`) share a cache key.
pub fn normalize_sql(sql: &str) -> String {
    sql.trim_end_matches(|c: char| c == ';' || c.is_whitespace())
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub fn tenant_version_key(tenant_id: &str) -> String {
    format!("tenant/{tenant_id}/ver")
}

fn cache_key(tenant_id: &str, version: i64, sql: &str) -> String {
    let normalized = normalize_sql(sql);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    let digest = hasher.finalize();
    let hash_hex = hex_encode(&digest);
    format!("tenant/{tenant_id}/v{version}/q/{hash_hex}")
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

pub struct QueryCache {
    backend: Arc<dyn CacheBackend>,
    enabled: bool,
    ttl: Duration,
    max_value_bytes: usize,
}

impl QueryCache {
    pub fn new(backend: Arc<dyn CacheBackend>, enabled: bool, ttl: Duration, max_value_bytes: usize) -> Self {
        Self {
            backend,
            enabled,
            ttl,
            max_value_bytes,
        }
    }

    /// Monotonically bump the tenant's cache version, called by the write
    /// pipeline (C5) after every committed write (I3: "the tenant-scoped
    /// cache version is strictly greater than before the write"). Returns
    /// the new version, or `None` if caching is disabled.
    pub async fn bump_version(&self, tenant_id: &str) -> Result<Option<i64>> {
        if !self.enabled {
            return Ok(None);
        }
        let version = self.backend.incr(&tenant_version_key(tenant_id)).await?;
        Ok(Some(version))
    }

    /// Read the current tenant version, defaulting to 0 (treated as the
    /// first version) when the counter hasn't been created yet.
    async fn current_version(&self, tenant_id: &str) -> Result<i64> {
        match self.backend.get(&tenant_version_key(tenant_id)).await? {
            Some(bytes) => Ok(std::str::from_utf8(&bytes).ok().and_then(|s| s.parse().ok()).unwrap_or(0)),
            None => Ok(0),
        }
    }

    /// Look up a cached payload for `sql` at the tenant's current version.
    /// Returns `None` on a miss, a disabled cache, or a non-cacheable query
    /// — never an error; the caller always falls through to live execution.
    pub async fn get(&self, tenant_id: &str, sql: &str) -> Option<serde_json::Value> {
        if !self.enabled || !is_cacheable_read(sql) {
            return None;
        }
        let version = self.current_version(tenant_id).await.ok()?;
        let key = cache_key(tenant_id, version, sql);
        let bytes = self.backend.get(&key).await.ok()??;
        serde_json::from_slice(&bytes).ok()
    }

    /// Populate the cache for `sql` at the tenant's current version.
    /// Payloads larger than `max_value_bytes` are silently skipped, matching
    /// the original's `REDIS_MAX_VALUE_BYTES` guard.
    pub async fn put(&self, tenant_id: &str, sql: &str, payload: &serde_json::Value) {
        if !self.enabled || !is_cacheable_read(sql) {
            return;
        }
        let Ok(version) = self.current_version(tenant_id).await else {
            return;
        };
        let key = cache_key(tenant_id, version, sql);
        let Ok(bytes) = serde_json::to_vec(payload) else {
            return;
        };
        if bytes.len() > self.max_value_bytes {
            tracing::debug!(tenant_id, bytes = bytes.len(), "query_cache: payload exceeds max size, skipping cache write");
            return;
        }
        if let Err(err) = self.backend.set_ex(&key, bytes, self.ttl).await {
            tracing::debug!(tenant_id, error = %err, "query_cache: write failed, continuing uncached");
        }
    }
}
