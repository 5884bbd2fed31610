// Query Executor (C4), per §4.3.
//
// Grounded in read_handler.py's auth-then-resolve-then-source-select flow,
// and in this codebase's own `middleware.rs`, which documents (in a comment
// about a historical auth-bypass CVE) why API keys must be compared via
// `subtle::ConstantTimeEq` rather than `==`.

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::collaborators::ObjectStore;
use crate::directory::{Replica, ReplicaDirectory, StorageTier, Tenant, TenantDirectory};
use crate::engine::Engine;
use crate::error::{DbError, Result};
use crate::metrics::Metrics;
use crate::query_cache::QueryCache;
use crate::tiered::{DbKey, TieredStorageManager};
use crate::util::TempFileGuard;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbSource {
    Efs,
    S3Primary,
    S3ReadReplica,
    Redis,
}

impl DbSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DbSource::Efs => "EFS",
            DbSource::S3Primary => "S3_PRIMARY",
            DbSource::S3ReadReplica => "S3_READ_REPLICA",
            DbSource::Redis => "REDIS",
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryResponse {
    pub success: bool,
    pub data: Vec<Value>,
    pub row_count: usize,
    pub db_source: DbSource,
    pub storage_tier: StorageTier,
    pub cache_hit: bool,
}

pub struct QueryExecutor {
    tenants: Arc<dyn TenantDirectory>,
    replicas: Arc<dyn ReplicaDirectory>,
    tiered: Arc<TieredStorageManager>,
    object_store: Arc<dyn ObjectStore>,
    cache: Arc<QueryCache>,
    metrics: Arc<Metrics>,
    scratch_dir: String,
    mount_root: String,
}

impl QueryExecutor {
    pub fn new(
        tenants: Arc<dyn TenantDirectory>,
        replicas: Arc<dyn ReplicaDirectory>,
        tiered: Arc<TieredStorageManager>,
        object_store: Arc<dyn ObjectStore>,
        cache: Arc<QueryCache>,
        metrics: Arc<Metrics>,
        scratch_dir: String,
        mount_root: String,
    ) -> Self {
        Self {
            tenants,
            replicas,
            tiered,
            object_store,
            cache,
            metrics,
            scratch_dir,
            mount_root,
        }
    }

    pub async fn execute(&self, tenant_name: &str, api_key: &str, sql: &str) -> Result<QueryResponse> {
        if tenant_name.is_empty() || api_key.is_empty() || sql.trim().is_empty() {
            return Err(DbError::BadRequest("tenant_name, api_key, and sql are required".to_string()));
        }

        let tenant = self.authorize(tenant_name, api_key).await?;
        let now = Utc::now();
        self.tenants.touch_access(&tenant.tenant_id, &now.to_rfc3339()).await;

        let replica = self.replicas.load_replica(&tenant.tenant_id).await?;
        let db_key_str = crate::directory::resolve_db_key(&tenant, &replica)
            .ok_or_else(|| DbError::NotFound("tenant database location unresolved".to_string()))?
            .to_string();
        if replica.read_only_bucket.is_empty() {
            return Err(DbError::NotFound("replica metadata incomplete".to_string()));
        }

        if let Some(cached) = self.cache.get(&tenant.tenant_id, sql).await {
            self.metrics.record_cache_hit();
            return Ok(self.response_from_cached(cached, tenant.storage_tier)?);
        }
        self.metrics.record_cache_miss();

        let (open_path, db_source, _guard) = self.select_source(&tenant, &replica, &db_key_str).await?;

        let engine = Engine::open(&open_path)?;
        let rows = engine.query_rows(sql, &[]).map_err(|e| DbError::QueryFailed(e.to_string()))?;
        let data: Vec<Value> = rows.iter().map(|r| r.as_json_object()).collect();

        let payload = serde_json::json!({
            "success": true,
            "data": data,
            "row_count": data.len(),
        });
        self.cache.put(&tenant.tenant_id, sql, &payload).await;

        Ok(QueryResponse {
            success: true,
            row_count: data.len(),
            data,
            db_source,
            storage_tier: tenant.storage_tier,
            cache_hit: false,
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

    fn response_from_cached(&self, cached: Value, storage_tier: StorageTier) -> Result<QueryResponse> {
        let data = cached
            .get("data")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        Ok(QueryResponse {
            success: true,
            row_count: data.len(),
            data,
            db_source: DbSource::Redis,
            storage_tier,
            cache_hit: true,
        })
    }

    /// Resolve the filesystem path to open for this read, per §4.3's source
    /// selection: hot cache (rehydrating if needed) or a scoped temp
    /// download from the read-replica bucket. Returns the guard alongside
    /// the path so the temp file (if any) outlives the query.
    async fn select_source(
        &self,
        tenant: &Tenant,
        replica: &Replica,
        db_key_str: &str,
    ) -> Result<(std::path::PathBuf, DbSource, Option<TempFileGuard>)> {
        let db_key = DbKey::new(db_key_str);

        if tenant.storage_tier == StorageTier::Hot {
            if self.tiered.hot_file_exists(&db_key).await {
                return Ok((db_key.hot_cache_path(&self.mount_root), DbSource::Efs, None));
            }
            if let Ok(path) = self
                .tiered
                .rehydrate(&tenant.tenant_id, &replica.primary_bucket, &db_key, Utc::now())
                .await
            {
                return Ok((path, DbSource::Efs, None));
            }
            tracing::warn!(tenant_id = %tenant.tenant_id, "rehydration failed, falling back to cold read path");
        }

        let temp_path = std::path::PathBuf::from(&self.scratch_dir).join(format!("{}.db", Uuid::new_v4()));
        self.object_store
            .download_to(&replica.read_only_bucket, db_key_str, &temp_path)
            .await?;
        let guard = TempFileGuard::new(temp_path.clone());
        Ok((temp_path, DbSource::S3ReadReplica, Some(guard)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{InMemoryCacheBackend, InMemoryMetadataStore, InMemoryObjectStore};
    use crate::directory::{MetadataReplicaDirectory, MetadataTenantDirectory};
    use std::time::Duration;

    async fn seed_tenant_and_replica(
        tenant_store: &Arc<dyn crate::collaborators::MetadataStore>,
        replica_store: &Arc<dyn crate::collaborators::MetadataStore>,
        storage_tier: &str,
    ) {
        tenant_store
            .put_item(
                "tenants",
                "t-1",
                serde_json::json!({
                    "tenant_id": "t-1", "tenant_name": "acme", "api_key": "sk_test",
                    "storage_tier": storage_tier, "parent_schema_ref": "NULL",
                    "current_db_path": "databases/db_x.db"
                }),
            )
            .await
            .unwrap();
        replica_store
            .put_item(
                "replicas",
                "t-1",
                serde_json::json!({
                    "tenant_id": "t-1", "primary_bucket": "primary",
                    "read_only_bucket": "replica", "standby_bucket": "standby",
                    "db_path": "databases/db_x.db"
                }),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn cold_read_downloads_from_read_replica_bucket() {
        let tenant_store: Arc<dyn crate::collaborators::MetadataStore> = Arc::new(InMemoryMetadataStore::new());
        let replica_store = tenant_store.clone();
        seed_tenant_and_replica(&tenant_store, &replica_store, "COLD").await;

        let object_store = InMemoryObjectStore::new();
        let engine = Engine::open_in_memory().unwrap();
        engine.execute("CREATE TABLE t (n INTEGER)", &[]).unwrap();
        engine.execute("INSERT INTO t (n) VALUES (1)", &[]).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let seed_path = dir.path().join("seed.db");
        engine.vacuum_into(&seed_path).unwrap();
        object_store.seed("replica", "databases/db_x.db", std::fs::read(&seed_path).unwrap());
        let object_store: Arc<dyn ObjectStore> = Arc::new(object_store);

        let tenants: Arc<dyn TenantDirectory> =
            Arc::new(MetadataTenantDirectory::new(tenant_store.clone(), "tenants".to_string(), "idx".to_string()));
        let replicas: Arc<dyn ReplicaDirectory> =
            Arc::new(MetadataReplicaDirectory::new(replica_store, "replicas".to_string()));
        let metrics = Arc::new(Metrics::new());
        let tiered = Arc::new(TieredStorageManager::new(
            object_store.clone(),
            tenants.clone(),
            dir.path().to_string_lossy().to_string(),
            24.0,
            metrics.clone(),
        ));
        let cache = Arc::new(QueryCache::new(
            Arc::new(InMemoryCacheBackend::new()),
            true,
            Duration::from_secs(30),
            4096,
        ));

        let executor = QueryExecutor::new(
            tenants,
            replicas,
            tiered,
            object_store,
            cache,
            metrics,
            dir.path().to_string_lossy().to_string(),
            dir.path().to_string_lossy().to_string(),
        );

        let response = executor.execute("acme", "sk_test", "SELECT n FROM t").await.unwrap();
        assert_eq!(response.db_source, DbSource::S3ReadReplica);
        assert_eq!(response.row_count, 1);
    }

    #[tokio::test]
    async fn wrong_api_key_is_auth_failed() {
        let tenant_store: Arc<dyn crate::collaborators::MetadataStore> = Arc::new(InMemoryMetadataStore::new());
        seed_tenant_and_replica(&tenant_store, &tenant_store, "COLD").await;

        let object_store: Arc<dyn ObjectStore> = Arc::new(InMemoryObjectStore::new());
        let tenants: Arc<dyn TenantDirectory> =
            Arc::new(MetadataTenantDirectory::new(tenant_store.clone(), "tenants".to_string(), "idx".to_string()));
        let replicas: Arc<dyn ReplicaDirectory> =
            Arc::new(MetadataReplicaDirectory::new(tenant_store, "replicas".to_string()));
        let metrics = Arc::new(Metrics::new());
        let dir = tempfile::tempdir().unwrap();
        let tiered = Arc::new(TieredStorageManager::new(
            object_store.clone(),
            tenants.clone(),
            dir.path().to_string_lossy().to_string(),
            24.0,
            metrics.clone(),
        ));
        let cache = Arc::new(QueryCache::new(
            Arc::new(InMemoryCacheBackend::new()),
            false,
            Duration::from_secs(30),
            4096,
        ));
        let executor = QueryExecutor::new(
            tenants,
            replicas,
            tiered,
            object_store,
            cache,
            metrics,
            dir.path().to_string_lossy().to_string(),
            dir.path().to_string_lossy().to_string(),
        );

        let err = executor.execute("acme", "wrong-key", "SELECT 1").await.unwrap_err();
        assert_eq!(err.status_code(), 401);
    }
}
