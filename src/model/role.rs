use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A named role granting a set of `resource:action:scope` permissions.
/// Roles may inherit from other roles; resolution is transitive and
/// cycle-safe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Role {
    /// Unique role name, e.g. "support-agent".
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    /// Permissions as `resource:action:scope` tuples; `*` is a wildcard in
    /// any segment.
    pub permissions: Vec<String>,
    /// Names of roles whose permissions are included transitively.
    #[serde(default)]
    pub inherits: Vec<String>,
    #[serde(default)]
    pub priority: i32,
    pub active: bool,
}

/// The scope a role assignment applies in. A field left unset matches any
/// request; a set field must equal the request's value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RoleContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RoleAssignment {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<RoleContext>,
    pub assigned_at: i64,
    pub assigned_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    pub active: bool,
}
