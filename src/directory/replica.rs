// Replica Directory (C2), per §4.1.
//
// Grounded in write_handler.py's replica-metadata lookup and its
// `last_updated_at` bump after a committed write.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::collaborators::MetadataStore;
use crate::error::{DbError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Replica {
    pub tenant_id: String,
    pub primary_bucket: String,
    pub read_only_bucket: String,
    pub standby_bucket: String,
    #[serde(default)]
    pub db_path: Option<String>,
    #[serde(default)]
    pub last_updated_at: Option<String>,
}

impl Replica {
    pub fn key(tenant_id: &str) -> String {
        tenant_id.to_string()
    }
}

#[async_trait]
pub trait ReplicaDirectory: Send + Sync {
    async fn load_replica(&self, tenant_id: &str) -> Result<Replica>;
    async fn bump_replica_updated(&self, tenant_id: &str, now: &str) -> Result<()>;
}

pub struct MetadataReplicaDirectory {
    store: Arc<dyn MetadataStore>,
    table: String,
}

impl MetadataReplicaDirectory {
    pub fn new(store: Arc<dyn MetadataStore>, table: String) -> Self {
        Self { store, table }
    }
}

#[async_trait]
impl ReplicaDirectory for MetadataReplicaDirectory {
    async fn load_replica(&self, tenant_id: &str) -> Result<Replica> {
        let item = self
            .store
            .get_item(&self.table, &Replica::key(tenant_id))
            .await?
            .ok_or_else(|| DbError::NotFound(format!("replica not found: {tenant_id}")))?;
        Ok(serde_json::from_value(item)?)
    }

    /// Called only by the write pipeline (C5), after a commit.
    async fn bump_replica_updated(&self, tenant_id: &str, now: &str) -> Result<()> {
        let mut replica = self.load_replica(tenant_id).await?;
        replica.last_updated_at = Some(now.to_string());
        let value = serde_json::to_value(&replica)?;
        self.store.put_item(&self.table, &Replica::key(tenant_id), value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::InMemoryMetadataStore;

    fn sample_replica() -> Replica {
        Replica {
            tenant_id: "t-1".to_string(),
            primary_bucket: "primary".to_string(),
            read_only_bucket: "replica".to_string(),
            standby_bucket: "standby".to_string(),
            db_path: Some("databases/db_abc.db".to_string()),
            last_updated_at: None,
        }
    }

    #[tokio::test]
    async fn load_replica_missing_is_not_found() {
        let store: Arc<dyn MetadataStore> = Arc::new(InMemoryMetadataStore::new());
        let dir = MetadataReplicaDirectory::new(store, "replicas".to_string());
        let err = dir.load_replica("nope").await.unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn bump_replica_updated_sets_timestamp() {
        let store: Arc<dyn MetadataStore> = Arc::new(InMemoryMetadataStore::new());
        store
            .put_item("replicas", "t-1", serde_json::to_value(sample_replica()).unwrap())
            .await
            .unwrap();
        let dir = MetadataReplicaDirectory::new(store, "replicas".to_string());
        dir.bump_replica_updated("t-1", "2026-07-27T00:00:00Z").await.unwrap();
        let loaded = dir.load_replica("t-1").await.unwrap();
        assert_eq!(loaded.last_updated_at.as_deref(), Some("2026-07-27T00:00:00Z"));
    }
}
