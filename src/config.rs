// Environment-scoped configuration, per §6.
//
// Every field here corresponds to an environment variable named in the
// external interface section below. There is no config file: like
// `DatabaseConfig`, this is a plain struct with a constructor, just
// sourced from `std::env` instead of a TOML file, since every variable
// it reads is already environment-scoped in the source deployment.

use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub tenant_metadata_table: String,
    pub replica_metadata_table: String,
    pub schema_metadata_table: String,
    pub tenant_name_index: String,

    /// Mount root of the shared file system hot cache (`EFS_MOUNT_DIR`).
    pub efs_mount_dir: String,

    pub cold_threshold_hours: f64,

    /// Topic the write pipeline publishes replication events to.
    pub replication_topic: String,
    /// Queue the migration coordinator enqueues jobs on.
    pub migration_queue_url: String,

    pub redis_enabled: bool,
    pub redis_ttl: Duration,
    pub redis_connect_timeout: Duration,
    pub redis_socket_timeout: Duration,
    pub redis_max_value_bytes: usize,

    pub listen_addr: String,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tenant_metadata_table: "octodb-tenants".to_string(),
            replica_metadata_table: "tenant-metadata".to_string(),
            schema_metadata_table: "octodb-schemas".to_string(),
            tenant_name_index: "Tenant_Name_Index".to_string(),
            efs_mount_dir: "/mnt/efs".to_string(),
            cold_threshold_hours: 24.0,
            replication_topic: String::new(),
            migration_queue_url: String::new(),
            redis_enabled: false,
            redis_ttl: Duration::from_secs(30),
            redis_connect_timeout: Duration::from_millis(50),
            redis_socket_timeout: Duration::from_millis(50),
            redis_max_value_bytes: 256 * 1024,
            listen_addr: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Config {
    /// Load configuration from the process environment, falling back to
    /// the defaults above for anything unset. Parse failures for numeric
    /// fields fall back to the default rather than panicking — a malformed
    /// env var should degrade, not crash the process at startup.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            tenant_metadata_table: env_or("TENANT_METADATA_TABLE", defaults.tenant_metadata_table),
            replica_metadata_table: env_or("REPLICA_METADATA_TABLE", defaults.replica_metadata_table),
            schema_metadata_table: env_or("SCHEMA_METADATA_TABLE", defaults.schema_metadata_table),
            tenant_name_index: env_or("TENANT_NAME_INDEX", defaults.tenant_name_index),
            efs_mount_dir: env_or("EFS_MOUNT_DIR", defaults.efs_mount_dir),
            cold_threshold_hours: env_parse_or("COLD_THRESHOLD_HOURS", defaults.cold_threshold_hours),
            replication_topic: env_or("SNS_TOPIC_ARN", defaults.replication_topic),
            migration_queue_url: env_or("MIGRATION_QUEUE_URL", defaults.migration_queue_url),
            redis_enabled: env_bool_or("REDIS_ENABLED", defaults.redis_enabled),
            redis_ttl: Duration::from_secs(env_parse_or("REDIS_TTL_SECONDS", defaults.redis_ttl.as_secs())),
            redis_connect_timeout: Duration::from_millis(env_parse_or(
                "REDIS_CONNECT_TIMEOUT_MS",
                defaults.redis_connect_timeout.as_millis() as u64,
            )),
            redis_socket_timeout: Duration::from_millis(env_parse_or(
                "REDIS_SOCKET_TIMEOUT_MS",
                defaults.redis_socket_timeout.as_millis() as u64,
            )),
            redis_max_value_bytes: env_parse_or("REDIS_MAX_VALUE_BYTES", defaults.redis_max_value_bytes),
            listen_addr: env_or("LISTEN_ADDR", defaults.listen_addr),
            port: env_parse_or("PORT", defaults.port),
        }
    }
}

fn env_or(key: &str, default: String) -> String {
    env::var(key).unwrap_or(default)
}

fn env_bool_or(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

fn env_parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
