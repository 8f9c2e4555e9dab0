use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A normalized internal domain event. `(event_type, id)` is unique; the
/// audit table enforces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DomainEvent {
    pub id: String,
    /// Dotted type, e.g. `bonus.awarded` or `wallet.deposit.completed`.
    #[serde(rename = "type")]
    pub event_type: String,
    pub tenant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Unix seconds. Rendered as ISO-8601 at the webhook boundary.
    pub occurred_at: i64,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

/// An outbound webhook registration for a tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WebhookSubscription {
    pub id: String,
    pub tenant_id: String,
    pub url: String,
    /// Event types to deliver. A trailing `*` matches a prefix, e.g.
    /// `bonus.*`.
    pub event_types: Vec<String>,
    /// HMAC-SHA256 signing secret for `X-Signature`.
    pub secret: String,
    pub active: bool,
    /// Extra headers attached to every delivery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Value>,
}

impl WebhookSubscription {
    /// Whether this subscription wants the given event type.
    pub fn wants(&self, event_type: &str) -> bool {
        self.event_types.iter().any(|pattern| {
            if pattern == "*" {
                true
            } else if let Some(prefix) = pattern.strip_suffix(".*") {
                event_type == prefix || event_type.starts_with(&format!("{prefix}."))
            } else {
                pattern == event_type
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(types: &[&str]) -> WebhookSubscription {
        WebhookSubscription {
            id: "w1".into(),
            tenant_id: "t1".into(),
            url: "http://example.test/hook".into(),
            event_types: types.iter().map(|s| s.to_string()).collect(),
            secret: "s".into(),
            active: true,
            headers: None,
        }
    }

    #[test]
    fn subscription_matching() {
        assert!(sub(&["*"]).wants("bonus.awarded"));
        assert!(sub(&["bonus.*"]).wants("bonus.awarded"));
        assert!(sub(&["bonus.awarded"]).wants("bonus.awarded"));
        assert!(!sub(&["bonus.*"]).wants("wallet.deposit.completed"));
        assert!(!sub(&["bonus.awarded"]).wants("bonus.forfeited"));
    }
}
