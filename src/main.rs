// Service entry point: wires the collaborator seams, the data-plane
// components, and the `/v1/query`/`/v1/write` router together and serves
// them. Concrete cloud SDK clients (object store, metadata store, message
// bus, cache) are out of scope (§1), so this binary runs against the
// in-memory collaborator fakes, seeded with one demo tenant — enough to
// exercise the full pipeline end to end without any external dependency.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use octodb_core::api::{build_router, AppState};
use octodb_core::collaborators::{
    InMemoryCacheBackend, InMemoryMessageBus, InMemoryMetadataStore, InMemoryObjectStore, MetadataStore, ObjectStore,
};
use octodb_core::directory::{MetadataReplicaDirectory, MetadataTenantDirectory, ReplicaDirectory, TenantDirectory};
use octodb_core::engine::Engine;
use octodb_core::metrics::Metrics;
use octodb_core::query_cache::QueryCache;
use octodb_core::query_executor::QueryExecutor;
use octodb_core::standby::StandbyReadPath;
use octodb_core::tiered::TieredStorageManager;
use octodb_core::write_pipeline::WritePipeline;
use octodb_core::Config;

const DEMO_TENANT_ID: &str = "t-demo";
const DEMO_TENANT_NAME: &str = "demo";
const DEMO_API_KEY: &str = "demo-key";
const DEMO_BUCKET: &str = "primary";
const DEMO_DB_PATH: &str = "databases/db_demo.db";

#[tokio::main]
async fn main() -> octodb_core::Result<()> {
    tracing_subscriber::fmt().with_target(false).with_level(true).init();

    let config = Config::from_env();
    info!(listen_addr = %config.listen_addr, port = config.port, "starting octodb-server");

    let scratch_dir = std::env::temp_dir().join("octodb-scratch");
    std::fs::create_dir_all(&scratch_dir)?;
    std::fs::create_dir_all(&config.efs_mount_dir).ok();

    let metadata_store: Arc<dyn MetadataStore> = Arc::new(InMemoryMetadataStore::new());
    let object_store: Arc<dyn ObjectStore> = Arc::new(InMemoryObjectStore::new());
    let message_bus: Arc<dyn octodb_core::collaborators::MessageBus> = Arc::new(InMemoryMessageBus::new());
    let cache_backend = Arc::new(InMemoryCacheBackend::new());

    seed_demo_tenant(&metadata_store, &object_store).await?;

    let tenants: Arc<dyn TenantDirectory> = Arc::new(MetadataTenantDirectory::new(
        metadata_store.clone(),
        config.tenant_metadata_table.clone(),
        config.tenant_name_index.clone(),
    ));
    let replicas: Arc<dyn ReplicaDirectory> = Arc::new(MetadataReplicaDirectory::new(
        metadata_store.clone(),
        config.replica_metadata_table.clone(),
    ));

    let metrics = Arc::new(Metrics::new());
    let tiered = Arc::new(TieredStorageManager::new(
        object_store.clone(),
        tenants.clone(),
        config.efs_mount_dir.clone(),
        config.cold_threshold_hours,
        metrics.clone(),
    ));
    let cache = Arc::new(QueryCache::new(
        cache_backend,
        config.redis_enabled,
        config.redis_ttl,
        config.redis_max_value_bytes,
    ));

    let query_executor = Arc::new(QueryExecutor::new(
        tenants.clone(),
        replicas.clone(),
        tiered.clone(),
        object_store.clone(),
        cache.clone(),
        metrics.clone(),
        scratch_dir.to_string_lossy().to_string(),
        config.efs_mount_dir.clone(),
    ));
    let write_pipeline = Arc::new(WritePipeline::new(
        tenants.clone(),
        replicas.clone(),
        tiered,
        object_store.clone(),
        message_bus,
        cache,
        metrics,
        config.replication_topic.clone(),
        scratch_dir.to_string_lossy().to_string(),
        config.efs_mount_dir.clone(),
    ));
    let standby = Arc::new(StandbyReadPath::new(
        tenants,
        replicas,
        object_store,
        scratch_dir.to_string_lossy().to_string(),
    ));

    let state = Arc::new(AppState {
        query_executor,
        write_pipeline,
        standby,
    });
    let router = build_router(state, Duration::from_secs(30), 2 * 1024 * 1024);

    let addr = format!("{}:{}", config.listen_addr, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "octodb-server listening");
    axum::serve(listener, router).await?;

    Ok(())
}

/// Seeds a single demo tenant/replica/database so the service is
/// immediately exercisable (`POST /v1/query` with `tenant_name: "demo"`,
/// `api_key: "demo-key"`) without any external provisioning step.
async fn seed_demo_tenant(
    metadata_store: &Arc<dyn MetadataStore>,
    object_store: &Arc<dyn ObjectStore>,
) -> octodb_core::Result<()> {
    metadata_store
        .put_item(
            "octodb-tenants",
            DEMO_TENANT_ID,
            serde_json::json!({
                "tenant_id": DEMO_TENANT_ID,
                "tenant_name": DEMO_TENANT_NAME,
                "api_key": DEMO_API_KEY,
                "storage_tier": "COLD",
                "parent_schema_ref": "NULL",
                "current_db_path": DEMO_DB_PATH,
            }),
        )
        .await?;
    metadata_store
        .put_item(
            "tenant-metadata",
            DEMO_TENANT_ID,
            serde_json::json!({
                "tenant_id": DEMO_TENANT_ID,
                "primary_bucket": DEMO_BUCKET,
                "read_only_bucket": DEMO_BUCKET,
                "standby_bucket": DEMO_BUCKET,
                "db_path": DEMO_DB_PATH,
            }),
        )
        .await?;

    let engine = Engine::open_in_memory()?;
    engine.execute("CREATE TABLE greetings (id INTEGER PRIMARY KEY, message TEXT)", &[])?;
    engine.execute("INSERT INTO greetings (message) VALUES ('hello from octodb')", &[])?;
    let scratch = std::env::temp_dir().join("octodb-demo-seed.db");
    engine.vacuum_into(&scratch)?;
    object_store.upload_from(DEMO_BUCKET, DEMO_DB_PATH, &scratch).await?;

    Ok(())
}
