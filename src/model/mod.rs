pub mod brand;
pub mod config;
pub mod event;
pub mod money;
pub mod reference;
pub mod role;
pub mod user;

pub use brand::{Brand, Tenant};
pub use config::ConfigEntry;
pub use event::{DomainEvent, WebhookSubscription};
pub use money::Money;
pub use reference::{EntityRef, RefKind};
pub use role::{Role, RoleAssignment, RoleContext};
pub use user::User;

use serde_json::Value;

// ── JSON metadata accessors ─────────────────────────────────────────
// Metadata and config values are free-form JSON. Accessors walk a dotted
// path and return Option<T>; a wrong type is None, never a coercion.

fn json_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

pub fn json_get_bool(value: &Value, path: &str) -> Option<bool> {
    json_path(value, path)?.as_bool()
}

pub fn json_get_str<'a>(value: &'a Value, path: &str) -> Option<&'a str> {
    json_path(value, path)?.as_str()
}

pub fn json_get_i64(value: &Value, path: &str) -> Option<i64> {
    json_path(value, path)?.as_i64()
}

pub fn json_get_f64(value: &Value, path: &str) -> Option<f64> {
    json_path(value, path)?.as_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_accessors_walk_dotted_paths() {
        let v = json!({ "a": { "b": { "flag": true, "n": 7 } } });
        assert_eq!(json_get_bool(&v, "a.b.flag"), Some(true));
        assert_eq!(json_get_i64(&v, "a.b.n"), Some(7));
        assert_eq!(json_get_bool(&v, "a.b.n"), None);
        assert_eq!(json_get_str(&v, "a.missing"), None);
    }
}
