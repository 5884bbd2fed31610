// Write Pipeline (C5), per §4.4.
//
// Grounded directly in write_handler.py's commit protocol: execute+commit,
// `VACUUM INTO` snapshot, dual upload (working file then snapshot), SNS
// publish, replica timestamp bump, cache-version bump, with a `finally`
// block guaranteeing temp-file cleanup — expressed here via `TempFileGuard`
// instead of try/finally.

use chrono::Utc;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::collaborators::{MessageBus, ObjectStore, ReplicationEvent};
use crate::directory::{Replica, ReplicaDirectory, StorageTier, Tenant, TenantDirectory};
use crate::engine::Engine;
use crate::error::{DbError, Result};
use crate::metrics::Metrics;
use crate::query_cache::QueryCache;
use crate::tiered::{DbKey, TieredStorageManager};
use crate::timestamp::format_snapshot_suffix;
use crate::util::TempFileGuard;

#[derive(Debug, Clone)]
pub struct WriteResponse {
    pub tenant_name: String,
    pub tenant_id: String,
    pub snapshot_bucket: String,
    pub snapshot_s3_key: String,
    pub snapshot_filename: String,
    pub primary_bucket: String,
    pub db_path: String,
    pub read_only_bucket: String,
    pub standby_bucket: String,
    pub timestamp: String,
    pub rows_affected: usize,
    pub storage_tier: StorageTier,
    pub db_source: &'static str,
}

pub struct WritePipeline {
    tenants: Arc<dyn TenantDirectory>,
    replicas: Arc<dyn ReplicaDirectory>,
    tiered: Arc<TieredStorageManager>,
    object_store: Arc<dyn ObjectStore>,
    message_bus: Arc<dyn MessageBus>,
    cache: Arc<QueryCache>,
    metrics: Arc<Metrics>,
    replication_topic: String,
    scratch_dir: String,
    mount_root: String,
}

impl WritePipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tenants: Arc<dyn TenantDirectory>,
        replicas: Arc<dyn ReplicaDirectory>,
        tiered: Arc<TieredStorageManager>,
        object_store: Arc<dyn ObjectStore>,
        message_bus: Arc<dyn MessageBus>,
        cache: Arc<QueryCache>,
        metrics: Arc<Metrics>,
        replication_topic: String,
        scratch_dir: String,
        mount_root: String,
    ) -> Self {
        Self {
            tenants,
            replicas,
            tiered,
            object_store,
            message_bus,
            cache,
            metrics,
            replication_topic,
            scratch_dir,
            mount_root,
        }
    }

    pub async fn commit(&self, tenant_name: &str, api_key: &str, sql: &str) -> Result<WriteResponse> {
        if tenant_name.is_empty() || api_key.is_empty() || sql.trim().is_empty() {
            return Err(DbError::BadRequest("tenant_name, api_key, and sql are required".to_string()));
        }

        let tenant = self.authorize(tenant_name, api_key).await?;
        let now = Utc::now();
        let now_str = now.to_rfc3339();

        // Step 1: telemetry, never fails the request.
        self.tenants.touch_access(&tenant.tenant_id, &now_str).await;

        let replica = self.replicas.load_replica(&tenant.tenant_id).await?;
        let db_key_str = crate::directory::resolve_db_key(&tenant, &replica)
            .ok_or_else(|| DbError::NotFound("tenant database location unresolved".to_string()))?
            .to_string();

        // Step 2: select working path. Temp guard is `None` when writing
        // directly to the hot-cache file in place.
        let (working_path, db_source, _temp_guard) = self.select_working_path(&tenant, &replica, &db_key_str).await?;
        // The local snapshot file always needs cleanup regardless of which
        // branch produced the working path.
        let snapshot_filename = format!("{}_snapshot_{}.db", tenant.tenant_id, format_snapshot_suffix(now));
        let snapshot_scratch_path = std::path::PathBuf::from(&self.scratch_dir).join(&snapshot_filename);
        let _snapshot_guard = TempFileGuard::new(snapshot_scratch_path.clone());

        // Step 3: execute and commit.
        let engine = Engine::open(&working_path)?;
        let rows_affected = engine.execute(sql, &[]).map_err(|e| DbError::QueryFailed(e.to_string()))?;

        // Step 4: point-in-time snapshot.
        engine.vacuum_into(&snapshot_scratch_path)?;

        // Step 5: upload working file back to the primary bucket (overwrite).
        self.object_store
            .upload_from(&replica.primary_bucket, &db_key_str, &working_path)
            .await?;

        // Step 6: upload the snapshot.
        let snapshot_s3_key = format!("replication_snapshots/{snapshot_filename}");
        self.object_store
            .upload_from(&replica.primary_bucket, &snapshot_s3_key, &snapshot_scratch_path)
            .await?;

        // Step 7: publish replication event. MAY occur only after step 6.
        // Per §7, a failure here (steps 4-8) is terminal for the request,
        // not logged-and-ignored telemetry.
        let event = ReplicationEvent {
            tenant_id: tenant.tenant_id.clone(),
            schema_id: tenant.schema_version.clone().unwrap_or_default(),
            snapshot_s3_key: snapshot_s3_key.clone(),
            source_region: replica.primary_bucket.clone(),
            updated_at: now_str.clone(),
        };
        let payload = serde_json::to_vec(&event)?;
        self.message_bus.publish(&self.replication_topic, &payload).await?;
        self.metrics.record_replication_published();

        // Step 8: bump replica timestamp. Fatal on failure per §4.4/§7.
        self.replicas.bump_replica_updated(&tenant.tenant_id, &now_str).await?;

        // Step 9: invalidate cache. Must occur after step 5; failure is
        // logged, never fatal.
        if let Err(err) = self.cache.bump_version(&tenant.tenant_id).await {
            tracing::warn!(tenant_id = %tenant.tenant_id, error = %err, "cache version bump failed");
        }

        self.metrics.record_write_committed();

        Ok(WriteResponse {
            tenant_name: tenant.tenant_name,
            tenant_id: tenant.tenant_id,
            snapshot_bucket: replica.primary_bucket.clone(),
            snapshot_s3_key,
            snapshot_filename,
            primary_bucket: replica.primary_bucket,
            db_path: db_key_str,
            read_only_bucket: replica.read_only_bucket,
            standby_bucket: replica.standby_bucket,
            timestamp: now_str,
            rows_affected,
            storage_tier: tenant.storage_tier,
            db_source,
        })
    }

    async fn authorize(&self, tenant_name: &str, api_key: &str) -> Result<Tenant> {
        let tenant = self
            .tenants
            .find_tenant_by_name(tenant_name)
            .await
            .map_err(|_| DbError::AuthFailed)?;
        let matches: bool = tenant.api_key.as_bytes().ct_eq(api_key.as_bytes()).into();
        if !matches {
            return Err(DbError::AuthFailed);
        }
        Ok(tenant)
    }

    /// §4.4 step 2: if HOT and the hot file exists (or can be rehydrated),
    /// write in place; otherwise download `primary_bucket/db_path` to a
    /// scoped temp file.
    async fn select_working_path(
        &self,
        tenant: &Tenant,
        replica: &Replica,
        db_key_str: &str,
    ) -> Result<(std::path::PathBuf, &'static str, Option<TempFileGuard>)> {
        let db_key = DbKey::new(db_key_str);

        if tenant.storage_tier == StorageTier::Hot {
            if self.tiered.hot_file_exists(&db_key).await {
                return Ok((db_key.hot_cache_path(&self.mount_root), "EFS", None));
            }
            if let Ok(path) = self
                .tiered
                .rehydrate(&tenant.tenant_id, &replica.primary_bucket, &db_key, Utc::now())
                .await
            {
                return Ok((path, "EFS", None));
            }
        }

        let temp_path = std::path::PathBuf::from(&self.scratch_dir).join(format!("{}.db", Uuid::new_v4()));
        self.object_store
            .download_to(&replica.primary_bucket, db_key_str, &temp_path)
            .await?;
        let guard = TempFileGuard::new(temp_path.clone());
        Ok((temp_path, "S3_PRIMARY", Some(guard)))
    }
}
