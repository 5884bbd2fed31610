// Standby Read Path (C10), per §4.6.
//
// Grounded in standby-read-handler.py: identical auth/lookup flow to the
// primary query executor, but sourced from the standby bucket/region and
// with the cache bypassed entirely (a degraded-mode path, used when the
// primary region is unreachable).

use std::sync::Arc;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::collaborators::ObjectStore;
use crate::directory::{ReplicaDirectory, TenantDirectory};
use crate::engine::Engine;
use crate::error::{DbError, Result};
use crate::query_executor::QueryResponse;
use crate::util::TempFileGuard;

pub struct StandbyReadPath {
    tenants: Arc<dyn TenantDirectory>,
    replicas: Arc<dyn ReplicaDirectory>,
    object_store: Arc<dyn ObjectStore>,
    scratch_dir: String,
}

impl StandbyReadPath {
    pub fn new(
        tenants: Arc<dyn TenantDirectory>,
        replicas: Arc<dyn ReplicaDirectory>,
        object_store: Arc<dyn ObjectStore>,
        scratch_dir: String,
    ) -> Self {
        Self {
            tenants,
            replicas,
            object_store,
            scratch_dir,
        }
    }

    pub async fn execute(&self, tenant_name: &str, api_key: &str, sql: &str) -> Result<QueryResponse> {
        if tenant_name.is_empty() || api_key.is_empty() || sql.trim().is_empty() {
            return Err(DbError::BadRequest("tenant_name, api_key, and sql are required".to_string()));
        }

        let tenant = self
            .tenants
            .find_tenant_by_name(tenant_name)
            .await
            .map_err(|_| DbError::AuthFailed)?;
        let matches: bool = tenant.api_key.as_bytes().ct_eq(api_key.as_bytes()).into();
        if !matches {
            return Err(DbError::AuthFailed);
        }

        let replica = self.replicas.load_replica(&tenant.tenant_id).await?;
        let db_path = crate::directory::resolve_db_key(&tenant, &replica)
            .ok_or_else(|| DbError::NotFound("tenant database location unresolved".to_string()))?
            .to_string();

        let temp_path = std::path::PathBuf::from(&self.scratch_dir).join(format!("{}.db", Uuid::new_v4()));
        self.object_store
            .download_to(&replica.standby_bucket, &db_path, &temp_path)
            .await?;
        let _guard = TempFileGuard::new(temp_path.clone());

        let engine = Engine::open(&temp_path)?;
        let rows = engine.query_rows(sql, &[]).map_err(|e| DbError::QueryFailed(e.to_string()))?;
        let data = rows.iter().map(|r| r.as_json_object()).collect::<Vec<_>>();

        Ok(QueryResponse {
            success: true,
            row_count: data.len(),
            data,
            db_source: crate::query_executor::DbSource::S3ReadReplica,
            storage_tier: tenant.storage_tier,
            cache_hit: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{InMemoryMetadataStore, InMemoryObjectStore};
    use crate::directory::{MetadataReplicaDirectory, MetadataTenantDirectory};

    #[tokio::test]
    async fn standby_read_sources_from_standby_bucket() {
        let store: Arc<dyn crate::collaborators::MetadataStore> = Arc::new(InMemoryMetadataStore::new());
        store
            .put_item(
                "tenants",
                "t-1",
                serde_json::json!({
                    "tenant_id": "t-1", "tenant_name": "acme", "api_key": "sk_test",
                    "parent_schema_ref": "NULL", "current_db_path": "databases/db_x.db"
                }),
            )
            .await
            .unwrap();
        store
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

        let engine = Engine::open_in_memory().unwrap();
        engine.execute("CREATE TABLE t (n INTEGER)", &[]).unwrap();
        engine.execute("INSERT INTO t (n) VALUES (7)", &[]).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let seed_path = dir.path().join("seed.db");
        engine.vacuum_into(&seed_path).unwrap();

        let fake_store = InMemoryObjectStore::new();
        fake_store.seed("standby", "databases/db_x.db", std::fs::read(&seed_path).unwrap());
        let object_store: Arc<dyn ObjectStore> = Arc::new(fake_store);

        let tenants: Arc<dyn TenantDirectory> =
            Arc::new(MetadataTenantDirectory::new(store.clone(), "tenants".to_string(), "idx".to_string()));
        let replicas: Arc<dyn ReplicaDirectory> =
            Arc::new(MetadataReplicaDirectory::new(store, "replicas".to_string()));

        let standby = StandbyReadPath::new(tenants, replicas, object_store, dir.path().to_string_lossy().to_string());
        let response = standby.execute("acme", "sk_test", "SELECT n FROM t").await.unwrap();
        assert_eq!(response.row_count, 1);
        assert!(!response.cache_hit);
    }
}
