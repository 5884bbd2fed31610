// Schema Migration Worker (C9), per §4.9.
//
// Grounded in migration-worker.py: download the tenant database referenced
// by the message, turn on foreign keys, apply the operation list inside one
// transaction, re-upload, and — only for the primary-bucket copy, only if
// the tenant is HOT, and only if the message asked for it — refresh the hot
// cache. A rehydration failure here is logged, never fatal: the migration
// itself already succeeded once the rewritten file is back in the bucket.

use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::collaborators::{MigrationMessage, ObjectStore};
use crate::directory::{ReplicaDirectory, StorageTier, TenantDirectory};
use crate::engine::Engine;
use crate::error::Result;
use crate::migration::ops::apply_ops;
use crate::tiered::{DbKey, TieredStorageManager};
use crate::util::TempFileGuard;

pub struct MigrationWorker {
    object_store: Arc<dyn ObjectStore>,
    tenants: Arc<dyn TenantDirectory>,
    replicas: Arc<dyn ReplicaDirectory>,
    tiered: Arc<TieredStorageManager>,
    scratch_dir: String,
}

impl MigrationWorker {
    pub fn new(
        object_store: Arc<dyn ObjectStore>,
        tenants: Arc<dyn TenantDirectory>,
        replicas: Arc<dyn ReplicaDirectory>,
        tiered: Arc<TieredStorageManager>,
        scratch_dir: String,
    ) -> Self {
        Self {
            object_store,
            tenants,
            replicas,
            tiered,
            scratch_dir,
        }
    }

    /// Apply one queued migration job. Errors propagate for the queue's own
    /// retry/redrive policy (§7), matching the replication worker's
    /// "never swallow, let the queue retry" stance.
    pub async fn handle(&self, message: &MigrationMessage) -> Result<()> {
        let scratch_path = PathBuf::from(&self.scratch_dir).join(format!("{}.db", Uuid::new_v4()));
        self.object_store
            .download_to(&message.bucket, &message.tenant_s3_key, &scratch_path)
            .await?;
        let guard = TempFileGuard::new(scratch_path.clone());

        {
            let engine = Engine::open(&scratch_path)?;
            engine.execute("PRAGMA foreign_keys = ON", &[])?;
            apply_ops(&engine, &message.operations)?;
        }

        self.object_store
            .upload_from(&message.bucket, &message.tenant_s3_key, &scratch_path)
            .await?;
        drop(guard);

        if message.refresh_hot_cache {
            self.maybe_refresh_hot_cache(message).await;
        }

        Ok(())
    }

    /// Best-effort: only refreshes the hot cache when this job targeted the
    /// tenant's primary bucket and the tenant is currently HOT. Any failure
    /// is logged and otherwise ignored — the migration already committed.
    async fn maybe_refresh_hot_cache(&self, message: &MigrationMessage) {
        let replica = match self.replicas.load_replica(&message.tenant_id).await {
            Ok(replica) => replica,
            Err(err) => {
                tracing::warn!(tenant_id = %message.tenant_id, error = %err, "hot cache refresh skipped: replica lookup failed");
                return;
            }
        };
        if message.bucket != replica.primary_bucket {
            return;
        }

        let tenant = match self.tenants.load_tenant(&message.tenant_id).await {
            Ok(tenant) => tenant,
            Err(err) => {
                tracing::warn!(tenant_id = %message.tenant_id, error = %err, "hot cache refresh skipped: tenant lookup failed");
                return;
            }
        };
        if tenant.storage_tier != StorageTier::Hot {
            return;
        }

        let db_key = DbKey::new(&message.tenant_s3_key);
        if let Err(err) = self
            .tiered
            .rehydrate(&message.tenant_id, &replica.primary_bucket, &db_key, chrono::Utc::now())
            .await
        {
            tracing::warn!(tenant_id = %message.tenant_id, error = %err, "post-migration rehydration failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{InMemoryMetadataStore, InMemoryObjectStore};
    use crate::directory::{MetadataReplicaDirectory, MetadataTenantDirectory};
    use crate::metrics::Metrics;
    use crate::migration::ops::{ColumnSpec, MigrationOp};

    async fn seed(storage_tier: &str) -> (Arc<InMemoryMetadataStore>, Arc<InMemoryObjectStore>, tempfile::TempDir) {
        let store = Arc::new(InMemoryMetadataStore::new());
        store
            .put_item(
                "tenants",
                "t-1",
                serde_json::json!({
                    "tenant_id": "t-1", "tenant_name": "acme", "api_key": "sk",
                    "storage_tier": storage_tier, "parent_schema_ref": "NULL",
                    "current_db_path": "databases/db_x.db"
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

        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open_in_memory().unwrap();
        engine.execute("CREATE TABLE widgets (id INTEGER)", &[]).unwrap();
        let seed_path = dir.path().join("seed.db");
        engine.vacuum_into(&seed_path).unwrap();

        let object_store = Arc::new(InMemoryObjectStore::new());
        object_store.seed("primary", "databases/db_x.db", std::fs::read(&seed_path).unwrap());
        (store, object_store, dir)
    }

    fn build_worker(
        store: Arc<InMemoryMetadataStore>,
        object_store: Arc<InMemoryObjectStore>,
        dir: &tempfile::TempDir,
    ) -> MigrationWorker {
        let metadata_store: Arc<dyn crate::collaborators::MetadataStore> = store.clone();
        let tenants: Arc<dyn TenantDirectory> =
            Arc::new(MetadataTenantDirectory::new(metadata_store.clone(), "tenants".to_string(), "idx".to_string()));
        let replicas: Arc<dyn ReplicaDirectory> =
            Arc::new(MetadataReplicaDirectory::new(metadata_store, "replicas".to_string()));
        let object_store_trait: Arc<dyn ObjectStore> = object_store.clone();
        let metrics = Arc::new(Metrics::new());
        let tiered = Arc::new(TieredStorageManager::new(
            object_store_trait.clone(),
            tenants.clone(),
            dir.path().to_string_lossy().to_string(),
            24.0,
            metrics,
        ));
        MigrationWorker::new(
            object_store_trait,
            tenants,
            replicas,
            tiered,
            dir.path().to_string_lossy().to_string(),
        )
    }

    fn message(bucket: &str, refresh_hot_cache: bool) -> MigrationMessage {
        MigrationMessage {
            migration_id: "mig_1".to_string(),
            requested_at: "2026-01-01T00:00:00Z".to_string(),
            bucket: bucket.to_string(),
            schema_s3_key: "schemas/schema-1.sql".to_string(),
            tenant_s3_key: "databases/db_x.db".to_string(),
            operations: vec![MigrationOp::AddColumn {
                table: "widgets".to_string(),
                column: ColumnSpec {
                    name: "label".to_string(),
                    type_sql: "TEXT".to_string(),
                    nullable: None,
                    default: None,
                },
            }],
            tenant_id: "t-1".to_string(),
            tenant_name: "acme".to_string(),
            refresh_hot_cache,
        }
    }

    #[tokio::test]
    async fn handle_applies_ops_and_reuploads() {
        let (store, object_store, dir) = seed("COLD").await;
        let worker = build_worker(store, object_store.clone(), &dir);
        worker.handle(&message("primary", false)).await.unwrap();

        let bytes = object_store.get("primary", "databases/db_x.db").await.unwrap();
        let scratch = dir.path().join("verify.db");
        std::fs::write(&scratch, bytes).unwrap();
        let engine = Engine::open(&scratch).unwrap();
        assert!(crate::migration::ops::column_exists(&engine, "widgets", "label").unwrap());
    }

    #[tokio::test]
    async fn handle_skips_hot_cache_refresh_for_non_primary_bucket() {
        let (store, object_store, dir) = seed("HOT").await;
        let worker = build_worker(store, object_store, &dir);
        // read_only_bucket target, refresh_hot_cache would normally be false
        // for this bucket anyway, but this exercises the bucket-mismatch guard
        // directly even when the flag is set.
        worker.handle(&message("replica", true)).await.unwrap();
        assert!(!dir.path().join("databases").join("db_x.db").exists());
    }

    #[tokio::test]
    async fn handle_refreshes_hot_cache_for_primary_bucket_when_requested() {
        let (store, object_store, dir) = seed("HOT").await;
        let worker = build_worker(store, object_store, &dir);
        worker.handle(&message("primary", true)).await.unwrap();
        let hot_path = dir.path().join("databases").join("db_x.db");
        assert!(hot_path.exists());
    }
}
