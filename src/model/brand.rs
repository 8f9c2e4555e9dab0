use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A brand groups tenants commercially. Optional: tenants may exist without
/// one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Brand {
    pub id: String,
    /// Unique short code, e.g. "acme".
    pub code: String,
    pub name: String,
    pub active: bool,
    #[serde(default)]
    pub metadata: Value,
    pub created_at: i64,
    pub updated_at: i64,
}

/// The unit of isolation: every entity in the platform is scoped by
/// `tenant_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Tenant {
    pub id: String,
    /// Unique short code, e.g. "t1".
    pub code: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand_id: Option<String>,
    pub active: bool,
    #[serde(default)]
    pub metadata: Value,
    pub created_at: i64,
    pub updated_at: i64,
}
