use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::role::RoleAssignment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Active,
    Suspended,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct User {
    pub id: String,
    pub tenant_id: String,
    /// Normalized (lowercased, trimmed) email, unique per tenant.
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    #[serde(default)]
    pub roles: Vec<RoleAssignment>,
    /// User-level permissions, unioned with role permissions at resolution.
    #[serde(default)]
    pub permissions: Vec<String>,
    /// AES-256-GCM ciphertext of the TOTP secret, if 2FA setup has started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub two_factor_secret: Option<String>,
    #[serde(default)]
    pub two_factor_enabled: bool,
    /// Free-form per-user metadata: has_made_first_deposit,
    /// has_made_first_purchase, backup_codes, ...
    #[serde(default)]
    pub metadata: Value,
    pub status: UserStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

impl User {
    pub fn metadata_flag(&self, path: &str) -> bool {
        super::json_get_bool(&self.metadata, path).unwrap_or(false)
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}
