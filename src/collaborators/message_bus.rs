// Message-bus collaborator trait.
//
// Stands in for the concrete pub/sub + queue SDKs (§1 out-of-scope: "the
// concrete ... message bus SDKs"). The write pipeline (C5) publishes
// replication events fire-and-forget; the migration coordinator (C8) needs
// FIFO ordering plus dedup per tenant, grounded in
// `send_tenant_migration_job_to_sqs` (migration-handler.py), which sets
// `MessageGroupId=tenant_id` and `MessageDeduplicationId=f"{group}:{id}"`.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Payload published to the replication topic after a committed write.
/// Mirrors the SNS message body built in `write_handler.py`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationEvent {
    pub tenant_id: String,
    pub schema_id: String,
    pub snapshot_s3_key: String,
    #[serde(default)]
    pub source_region: String,
    #[serde(default)]
    pub updated_at: String,
}

/// Payload enqueued by the migration coordinator (C8) for the migration
/// worker (C9) to consume, one per `(tenant, bucket)` pair. Wire shape per
/// §6: `{migrationId, requestedAt, bucket, schemaS3Key, tenantS3Key,
/// operations, tenantId, tenantName, refreshHotCache}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationMessage {
    pub migration_id: String,
    pub requested_at: String,
    pub bucket: String,
    pub schema_s3_key: String,
    pub tenant_s3_key: String,
    pub operations: Vec<crate::migration::ops::MigrationOp>,
    pub tenant_id: String,
    pub tenant_name: String,
    pub refresh_hot_cache: bool,
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<()>;

    /// Publish with FIFO-queue ordering/dedup semantics: all messages sharing
    /// `group_key` are delivered in publish order, and a message whose
    /// `dedup_key` has already been seen on this queue is silently dropped.
    async fn publish_fifo(
        &self,
        queue: &str,
        group_key: &str,
        dedup_key: &str,
        payload: &[u8],
    ) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct DeliveredMessage {
    pub topic_or_queue: String,
    pub group_key: Option<String>,
    pub payload: Vec<u8>,
}

/// In-memory fake. Preserves FIFO order per `(queue, group_key)` and drops
/// duplicate `dedup_key`s, the same guarantees the real queue provides.
#[derive(Default)]
pub struct InMemoryMessageBus {
    messages: Mutex<Vec<DeliveredMessage>>,
    seen_dedup: Mutex<std::collections::HashSet<(String, String)>>,
}

impl InMemoryMessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<DeliveredMessage> {
        std::mem::take(&mut self.messages.lock())
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }
}

#[async_trait]
impl MessageBus for InMemoryMessageBus {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        self.messages.lock().push(DeliveredMessage {
            topic_or_queue: topic.to_string(),
            group_key: None,
            payload: payload.to_vec(),
        });
        Ok(())
    }

    async fn publish_fifo(
        &self,
        queue: &str,
        group_key: &str,
        dedup_key: &str,
        payload: &[u8],
    ) -> Result<()> {
        let mut seen = self.seen_dedup.lock();
        let full_key = (queue.to_string(), dedup_key.to_string());
        if seen.contains(&full_key) {
            return Ok(());
        }
        seen.insert(full_key);
        drop(seen);

        self.messages.lock().push(DeliveredMessage {
            topic_or_queue: queue.to_string(),
            group_key: Some(group_key.to_string()),
            payload: payload.to_vec(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_appends_message() {
        let bus = InMemoryMessageBus::new();
        bus.publish("topic", b"hi").await.unwrap();
        assert_eq!(bus.len(), 1);
    }

    #[tokio::test]
    async fn publish_fifo_drops_duplicate_dedup_key() {
        let bus = InMemoryMessageBus::new();
        bus.publish_fifo("q", "tenant-1", "mig-1:tenant-1", b"a")
            .await
            .unwrap();
        bus.publish_fifo("q", "tenant-1", "mig-1:tenant-1", b"b")
            .await
            .unwrap();
        assert_eq!(bus.len(), 1);
    }

    #[tokio::test]
    async fn publish_fifo_preserves_order_per_group() {
        let bus = InMemoryMessageBus::new();
        bus.publish_fifo("q", "tenant-1", "d1", b"first").await.unwrap();
        bus.publish_fifo("q", "tenant-1", "d2", b"second").await.unwrap();
        let delivered = bus.drain();
        assert_eq!(delivered[0].payload, b"first");
        assert_eq!(delivered[1].payload, b"second");
    }
}
