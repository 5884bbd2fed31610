// Metadata-store collaborator trait.
//
// Stands in for the concrete metadata-store SDK (§1 out-of-scope). The real
// deployment backs tenant/replica/schema records with a managed key-value
// table per §6 (`TENANT_METADATA_TABLE` etc); here the trait is item-level so
// both a real table-backed client and `InMemoryMetadataStore` can implement
// it without the core caring which.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::error::Result;

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get_item(&self, table: &str, key: &str) -> Result<Option<Value>>;

    async fn put_item(&self, table: &str, key: &str, item: Value) -> Result<()>;

    async fn delete_item(&self, table: &str, key: &str) -> Result<()>;

    /// Lookup via a secondary index (e.g. `TENANT_NAME_INDEX`). Returns the
    /// first match, matching the Python original's `Limit(1)` query.
    async fn query_index(&self, table: &str, index: &str, value: &str) -> Result<Option<Value>>;
}

#[async_trait]
pub trait MetadataStoreExt: MetadataStore {
    async fn get_typed<T: DeserializeOwned>(&self, table: &str, key: &str) -> Result<Option<T>> {
        match self.get_item(table, key).await? {
            Some(v) => Ok(Some(serde_json::from_value(v)?)),
            None => Ok(None),
        }
    }

    async fn put_typed<T: Serialize + Sync>(&self, table: &str, key: &str, item: &T) -> Result<()> {
        let value = serde_json::to_value(item)?;
        self.put_item(table, key, value).await
    }
}

impl<T: MetadataStore + ?Sized> MetadataStoreExt for T {}

#[derive(Default)]
pub struct InMemoryMetadataStore {
    // table -> (key -> item)
    tables: DashMap<String, DashMap<String, Value>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn get_item(&self, table: &str, key: &str) -> Result<Option<Value>> {
        Ok(self
            .tables
            .get(table)
            .and_then(|t| t.get(key).map(|v| v.clone())))
    }

    async fn put_item(&self, table: &str, key: &str, item: Value) -> Result<()> {
        self.tables
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), item);
        Ok(())
    }

    async fn delete_item(&self, table: &str, key: &str) -> Result<()> {
        if let Some(t) = self.tables.get(table) {
            t.remove(key);
        }
        Ok(())
    }

    /// This fake only ever backs one secondary index (`TENANT_NAME_INDEX`),
    /// so it matches against the underlying `tenant_name` attribute
    /// directly rather than modeling a configurable index-name-to-attribute
    /// mapping the way a real managed table client would.
    async fn query_index(&self, table: &str, _index: &str, value: &str) -> Result<Option<Value>> {
        let Some(t) = self.tables.get(table) else {
            return Ok(None);
        };
        for entry in t.iter() {
            if entry.value().get("tenant_name").and_then(|v| v.as_str()) == Some(value) {
                return Ok(Some(entry.value().clone()));
            }
        }
        Ok(None)
    }
}
