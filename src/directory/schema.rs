// Schema record, per §4.1 data model. Consumed by the migration coordinator
// (C8) and worker (C9).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SchemaType {
    Application,
    Custom,
    Template,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaRecord {
    pub schema_id: String,
    pub schema_name: String,
    pub schema_type: SchemaType,
    /// The DDL artifact, inline or referenced. Large templates prefer
    /// `s3_path`; callers should check `s3_path` first.
    #[serde(default)]
    pub schema_sql: Option<String>,
    #[serde(default)]
    pub s3_path: Option<String>,
    /// Set for CUSTOM; empty for APPLICATION/TEMPLATE.
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub parent_schema_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
}

impl SchemaRecord {
    pub fn key(schema_id: &str) -> String {
        schema_id.to_string()
    }

    /// The artifact's storage location, preferring `s3_path` over an
    /// inline `schema_sql` — the former scales to large templates.
    pub fn artifact_key(&self) -> Option<&str> {
        self.s3_path.as_deref().or(self.schema_sql.as_deref())
    }
}
