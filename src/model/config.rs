use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A dynamic configuration entry. Scope narrows left to right:
/// `(service, brand, tenant)` beats `(service, tenant)` beats
/// `(service, brand)` beats `(service)` beats registered defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ConfigEntry {
    pub service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    pub key: String,
    pub value: Value,
    /// Dotted paths inside `value` that are redacted from summaries.
    #[serde(default)]
    pub sensitive_paths: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
}
