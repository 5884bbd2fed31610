//! Tenant and Replica Directories (C1/C2), plus schema records.

pub mod replica;
pub mod schema;
pub mod tenant;

pub use replica::{MetadataReplicaDirectory, Replica, ReplicaDirectory};
pub use schema::{SchemaRecord, SchemaType};
pub use tenant::{
    delete_tenant_objects, BucketKind, DeletionReport, MetadataTenantDirectory, StorageTier, Tenant, TenantDirectory,
};

/// Single resolver for the `current_db_path`/`db_path` duplication flagged
/// in §6 REDESIGN FLAGS: the Tenant and Replica records must be kept equal
/// after every write and migration rename, but in case they drift, prefer
/// the tenant's `current_db_path` and fall back to the replica's `db_path`.
pub fn resolve_db_key<'a>(tenant: &'a Tenant, replica: &'a Replica) -> Option<&'a str> {
    tenant
        .current_db_path
        .as_deref()
        .or(replica.db_path.as_deref())
}
