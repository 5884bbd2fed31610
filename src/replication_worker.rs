// Replication Fan-out Worker (C6), per §4.5.
//
// Grounded in r2_replica_handler.py: each queue record is an SNS
// notification wrapped in an SQS envelope (`Records[].body` is the SNS
// envelope JSON, whose `Message` field is itself the JSON-encoded
// `ReplicationEvent`); download the snapshot from the primary region,
// upload it to the standby bucket at a fixed key, and re-raise on any
// failure so the bus retries the whole message (§7 propagation policy).

use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::collaborators::{ObjectStore, ReplicationEvent};
use crate::error::{DbError, Result};
use crate::metrics::Metrics;

#[derive(Debug, Deserialize)]
struct SqsEnvelope {
    #[serde(rename = "Records")]
    records: Vec<SqsRecord>,
}

#[derive(Debug, Deserialize)]
struct SqsRecord {
    body: String,
}

#[derive(Debug, Deserialize)]
struct SnsEnvelope {
    #[serde(rename = "Message")]
    message: String,
}

/// Unwrap a raw queue payload into its `ReplicationEvent`s. Accepts either
/// the full SNS-in-SQS envelope or (for tests and simpler transports) a bare
/// JSON-encoded `ReplicationEvent`.
pub fn decode_events(raw: &[u8]) -> Result<Vec<ReplicationEvent>> {
    if let Ok(envelope) = serde_json::from_slice::<SqsEnvelope>(raw) {
        let mut events = Vec::with_capacity(envelope.records.len());
        for record in envelope.records {
            let event = decode_one_record(&record.body)?;
            events.push(event);
        }
        return Ok(events);
    }

    if let Ok(event) = serde_json::from_slice::<ReplicationEvent>(raw) {
        return Ok(vec![event]);
    }

    Err(DbError::BadRequest("unrecognized replication message envelope".to_string()))
}

fn decode_one_record(body: &str) -> Result<ReplicationEvent> {
    if let Ok(sns) = serde_json::from_str::<SnsEnvelope>(body) {
        return serde_json::from_str(&sns.message).map_err(DbError::from);
    }
    serde_json::from_str(body).map_err(DbError::from)
}

pub struct ReplicationWorker {
    object_store: Arc<dyn ObjectStore>,
    metrics: Arc<Metrics>,
}

impl ReplicationWorker {
    pub fn new(object_store: Arc<dyn ObjectStore>, metrics: Arc<Metrics>) -> Self {
        Self { object_store, metrics }
    }

    /// Mirror one replication event's snapshot to the standby bucket.
    /// `event.source_region` carries the primary bucket the snapshot lives
    /// in (set by the write pipeline); `standby_bucket`/`db_path` come from
    /// the tenant's Replica record, which the caller resolves before
    /// invoking this.
    pub async fn handle(&self, event: &ReplicationEvent, standby_bucket: &str, db_path: &str) -> Result<()> {
        let bytes = self
            .object_store
            .get(&event.source_region, &event.snapshot_s3_key)
            .await?;
        self.object_store.put(standby_bucket, db_path, bytes).await?;

        if let Some(written_at) = crate::timestamp::parse_utc(&event.updated_at) {
            let lag = (Utc::now() - written_at).to_std().unwrap_or(Duration::ZERO);
            self.metrics.record_replication_applied(lag);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::InMemoryObjectStore;

    fn sample_event() -> ReplicationEvent {
        ReplicationEvent {
            tenant_id: "t-1".to_string(),
            schema_id: "s-1".to_string(),
            snapshot_s3_key: "replication_snapshots/t-1_snapshot_20260727_000000.db".to_string(),
            source_region: "primary".to_string(),
            updated_at: Utc::now().to_rfc3339(),
        }
    }

    #[tokio::test]
    async fn handle_copies_snapshot_bytes_to_standby() {
        let store = InMemoryObjectStore::new();
        store.seed("primary", "replication_snapshots/t-1_snapshot_20260727_000000.db", b"snap".to_vec());
        let store: Arc<dyn ObjectStore> = Arc::new(store);
        let worker = ReplicationWorker::new(store.clone(), Arc::new(Metrics::new()));

        worker.handle(&sample_event(), "standby", "databases/db_x.db").await.unwrap();
        assert_eq!(store.get("standby", "databases/db_x.db").await.unwrap(), b"snap");
    }

    #[tokio::test]
    async fn handle_propagates_download_failure_for_retry() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemoryObjectStore::new());
        let worker = ReplicationWorker::new(store, Arc::new(Metrics::new()));
        let err = worker.handle(&sample_event(), "standby", "databases/db_x.db").await.unwrap_err();
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn decode_events_unwraps_sns_in_sqs_envelope() {
        let event = sample_event();
        let message = serde_json::to_string(&event).unwrap();
        let sns = serde_json::json!({"Message": message});
        let envelope = serde_json::json!({"Records": [{"body": sns.to_string()}]});
        let decoded = decode_events(envelope.to_string().as_bytes()).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].tenant_id, "t-1");
    }

    #[test]
    fn decode_events_accepts_bare_event_json() {
        let event = sample_event();
        let raw = serde_json::to_vec(&event).unwrap();
        let decoded = decode_events(&raw).unwrap();
        assert_eq!(decoded.len(), 1);
    }
}
