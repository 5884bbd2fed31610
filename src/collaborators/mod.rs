//! External collaborator seams (§1: object store, metadata store, message
//! bus). The core depends only on these traits; concrete SDK-backed
//! implementations are wired in by the embedding application.

pub mod cache_backend;
pub mod message_bus;
pub mod metadata_store;
pub mod object_store;

pub use cache_backend::{CacheBackend, InMemoryCacheBackend};
pub use message_bus::{DeliveredMessage, InMemoryMessageBus, MessageBus, MigrationMessage, ReplicationEvent};
pub use metadata_store::{InMemoryMetadataStore, MetadataStore, MetadataStoreExt};
pub use object_store::{InMemoryObjectStore, ObjectStore};

use std::sync::Arc;

/// Bundle of external collaborators a component needs. Passed by `Arc`
/// clone into each component's constructor rather than reached for via a
/// global client.
#[derive(Clone)]
pub struct Collaborators {
    pub object_store: Arc<dyn ObjectStore>,
    pub metadata_store: Arc<dyn MetadataStore>,
    pub message_bus: Arc<dyn MessageBus>,
    pub cache_backend: Arc<dyn CacheBackend>,
}
