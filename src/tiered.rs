// Tiered Storage Manager (C3), per §4.2.
//
// Grounded in rehydration_handler.py (rehydrate-on-demand: download to the
// mount, verify, then `mark_hot` with only-if-absent `current_db_path`
// semantics) and cold_storage_manager.py (idle-tenant demotion loop:
// upload-then-delete, abort on upload failure per invariant I4 — "leave HOT
// on any failure").

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;

use crate::collaborators::ObjectStore;
use crate::directory::{StorageTier, Tenant, TenantDirectory};
use crate::error::{DbError, Result};
use crate::metrics::Metrics;

/// An object-store key scoped to a tenant database file. A thin newtype so
/// call sites don't confuse a bare object key with an arbitrary string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DbKey(String);

impl DbKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The local hot-cache path for this key under `mount_root`.
    pub fn hot_cache_path(&self, mount_root: &str) -> PathBuf {
        PathBuf::from(mount_root).join(&self.0)
    }
}

impl std::fmt::Display for DbKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which bucket a read should be sourced from, used when deciding whether
/// rehydration is even attemptable (primary only, per §4.2 step 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceBucket {
    Primary,
    ReadOnly,
}

pub struct TieredStorageManager {
    object_store: Arc<dyn ObjectStore>,
    tenants: Arc<dyn TenantDirectory>,
    mount_root: String,
    cold_threshold_hours: f64,
    metrics: Arc<Metrics>,
}

impl TieredStorageManager {
    pub fn new(
        object_store: Arc<dyn ObjectStore>,
        tenants: Arc<dyn TenantDirectory>,
        mount_root: String,
        cold_threshold_hours: f64,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            object_store,
            tenants,
            mount_root,
            cold_threshold_hours,
            metrics,
        }
    }

    /// Materialize `db_key` onto the hot cache from `bucket`, then transition
    /// the tenant to HOT. Per §4.2: "current_db_path is set only if
    /// previously unset," and on any download/verification failure the tier
    /// is left unchanged (I4).
    pub async fn rehydrate(
        &self,
        tenant_id: &str,
        bucket: &str,
        db_key: &DbKey,
        now: DateTime<Utc>,
    ) -> Result<PathBuf> {
        let target = db_key.hot_cache_path(&self.mount_root);

        self.object_store
            .download_to(bucket, db_key.as_str(), &target)
            .await
            .map_err(|e| DbError::RehydrationFailed(e.to_string()))?;

        if !tokio::fs::try_exists(&target).await.unwrap_or(false) {
            return Err(DbError::RehydrationFailed(format!(
                "download reported success but {} does not exist",
                target.display()
            )));
        }

        self.tenants
            .mark_hot(tenant_id, &now.to_rfc3339(), db_key.as_str())
            .await
            .map_err(|e| DbError::RehydrationFailed(e.to_string()))?;

        self.metrics.record_rehydration();
        Ok(target)
    }

    /// True if the hot-cache file for `db_key` is already present locally —
    /// callers check this before deciding whether `rehydrate` is needed
    /// (I2: HOT never implies an up-to-date hot file, only that one can be
    /// materialized on demand).
    pub async fn hot_file_exists(&self, db_key: &DbKey) -> bool {
        tokio::fs::try_exists(db_key.hot_cache_path(&self.mount_root))
            .await
            .unwrap_or(false)
    }

    /// One pass of the idle-tenant demotion loop (§4.2 step "For every tenant
    /// in HOT..."). Returns the number of tenants successfully demoted.
    /// Each tenant is handled independently; a failure for one tenant never
    /// aborts the cycle for others.
    pub async fn run_demotion_cycle(&self, candidates: &[DemotionCandidate], now: DateTime<Utc>) -> usize {
        let mut demoted = 0;
        for candidate in candidates {
            if self.try_demote_one(candidate, now).await {
                demoted += 1;
            }
        }
        demoted
    }

    async fn try_demote_one(&self, candidate: &DemotionCandidate, now: DateTime<Utc>) -> bool {
        if candidate.tenant.storage_tier != StorageTier::Hot {
            return false;
        }

        let Some(last_accessed) = candidate
            .tenant
            .last_accessed_at
            .as_deref()
            .and_then(crate::timestamp::parse_utc)
        else {
            tracing::warn!(tenant_id = %candidate.tenant.tenant_id, "demotion: unparseable last_accessed_at, skipping");
            return false;
        };

        let age_hours = (now - last_accessed).num_seconds() as f64 / 3600.0;
        if age_hours < self.cold_threshold_hours {
            return false;
        }

        let Some(db_key) = candidate.tenant.current_db_path.as_deref() else {
            tracing::warn!(tenant_id = %candidate.tenant.tenant_id, "demotion: db_key unresolved, skipping");
            return false;
        };
        let db_key = DbKey::new(db_key);
        let local_path = db_key.hot_cache_path(&self.mount_root);

        if !tokio::fs::try_exists(&local_path).await.unwrap_or(false) {
            return false;
        }

        let bytes = match tokio::fs::read(&local_path).await {
            Ok(b) => b,
            Err(err) => {
                tracing::warn!(tenant_id = %candidate.tenant.tenant_id, error = %err, "demotion: read failed, aborting demotion");
                return false;
            }
        };

        // Upload failure aborts demotion for this tenant: do not delete the
        // local file, do not change tier (I4).
        if let Err(err) = self
            .object_store
            .put(&candidate.primary_bucket, db_key.as_str(), bytes)
            .await
        {
            tracing::warn!(tenant_id = %candidate.tenant.tenant_id, error = %err, "demotion: upload failed, leaving tenant HOT");
            return false;
        }

        if let Err(err) = tokio::fs::remove_file(&local_path).await {
            tracing::warn!(tenant_id = %candidate.tenant.tenant_id, error = %err, "demotion: local cleanup failed after successful upload");
        }

        if let Err(err) = self.tenants.mark_demoted(&candidate.tenant.tenant_id, &now.to_rfc3339()).await {
            tracing::warn!(tenant_id = %candidate.tenant.tenant_id, error = %err, "demotion: metadata update failed");
            return false;
        }

        self.metrics.record_demotion();
        true
    }
}

/// One HOT tenant eligible for demotion consideration, with the `primary_bucket`
/// resolved from the Replica Directory by the caller (the demotion loop
/// itself only needs directory + object-store access, per §4.2).
pub struct DemotionCandidate {
    pub tenant: Tenant,
    pub primary_bucket: String,
}
