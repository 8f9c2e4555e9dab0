use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::db::Db;
use crate::error::{CoreError, CoreResult};
use crate::model::ConfigEntry;

/// Dynamic configuration over the core database with per-service defaults
/// registered at startup.
///
/// Read precedence: `(service, brand, tenant)` > `(service, tenant)` >
/// `(service, brand)` > `(service)` > registered defaults. The first
/// non-empty value wins; nothing is merged.
pub struct ConfigStore {
    core: Db,
    defaults: Mutex<HashMap<(String, String), Value>>,
}

impl ConfigStore {
    pub fn new(core: Db) -> Self {
        ConfigStore {
            core,
            defaults: Mutex::new(HashMap::new()),
        }
    }

    /// Register every tunable a service reads so introspection can list
    /// them. Called once per service during startup.
    pub async fn register_defaults(&self, service: &str, defaults: Value) {
        let Value::Object(map) = defaults else {
            return;
        };
        let mut store = self.defaults.lock().await;
        for (key, value) in map {
            store.insert((service.to_string(), key), value);
        }
    }

    pub async fn get(
        &self,
        service: &str,
        key: &str,
        brand: Option<&str>,
        tenant: Option<&str>,
    ) -> CoreResult<Value> {
        // Without a brand or tenant some scopes collapse into each other;
        // query each distinct one once, narrowest first.
        let mut scopes: Vec<(Option<&str>, Option<&str>)> = Vec::with_capacity(4);
        for scope in [(brand, tenant), (None, tenant), (brand, None), (None, None)] {
            if !scopes.contains(&scope) {
                scopes.push(scope);
            }
        }
        {
            let conn = self.core.lock().await;
            let mut stmt = conn.prepare(
                "SELECT value FROM config_entries
                 WHERE service = ?1 AND brand = ?2 AND tenant = ?3 AND key = ?4",
            )?;
            for (b, t) in scopes {
                let raw: Option<String> = stmt
                    .query_row(
                        rusqlite::params![service, b.unwrap_or(""), t.unwrap_or(""), key],
                        |row| row.get(0),
                    )
                    .map(Some)
                    .or_else(super::ignore_not_found)?;
                if let Some(raw) = raw {
                    return Ok(serde_json::from_str(&raw)?);
                }
            }
        }
        if let Some(default) = self
            .defaults
            .lock()
            .await
            .get(&(service.to_string(), key.to_string()))
        {
            return Ok(default.clone());
        }
        Err(CoreError::not_found("config", format!("{service}.{key}")))
    }

    /// Like `get`, but falls back to the supplied value instead of failing.
    pub async fn get_or(
        &self,
        service: &str,
        key: &str,
        brand: Option<&str>,
        tenant: Option<&str>,
        fallback: Value,
    ) -> Value {
        match self.get(service, key, brand, tenant).await {
            Ok(v) => v,
            Err(_) => fallback,
        }
    }

    pub async fn set(
        &self,
        service: &str,
        key: &str,
        value: Value,
        brand: Option<&str>,
        tenant: Option<&str>,
        sensitive_paths: &[String],
    ) -> CoreResult<()> {
        let conn = self.core.lock().await;
        conn.execute(
            "INSERT INTO config_entries (service, brand, tenant, key, value, sensitive_paths)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(service, brand, tenant, key)
             DO UPDATE SET value = ?5, sensitive_paths = ?6, updated_at = unixepoch()",
            rusqlite::params![
                service,
                brand.unwrap_or(""),
                tenant.unwrap_or(""),
                key,
                value.to_string(),
                serde_json::to_string(sensitive_paths)?,
            ],
        )?;
        Ok(())
    }

    pub async fn delete(
        &self,
        service: &str,
        key: &str,
        brand: Option<&str>,
        tenant: Option<&str>,
    ) -> CoreResult<bool> {
        let conn = self.core.lock().await;
        let affected = conn.execute(
            "DELETE FROM config_entries
             WHERE service = ?1 AND brand = ?2 AND tenant = ?3 AND key = ?4",
            rusqlite::params![service, brand.unwrap_or(""), tenant.unwrap_or(""), key],
        )?;
        Ok(affected > 0)
    }

    /// All entries for a service with sensitive paths redacted, plus
    /// registered defaults for keys with no stored entry.
    pub async fn summarize(&self, service: &str) -> CoreResult<Vec<ConfigEntry>> {
        let mut entries = {
            let conn = self.core.lock().await;
            let mut stmt = conn.prepare(
                "SELECT service, brand, tenant, key, value, sensitive_paths, created_at, updated_at
                 FROM config_entries WHERE service = ?1 ORDER BY key",
            )?;
            let rows = stmt
                .query_map([service], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, i64>(6)?,
                        row.get::<_, i64>(7)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter()
                .map(|(service, brand, tenant, key, value, paths, created_at, updated_at)| {
                    let sensitive_paths: Vec<String> =
                        serde_json::from_str(&paths).unwrap_or_default();
                    let mut value: Value = serde_json::from_str(&value).unwrap_or(Value::Null);
                    for path in &sensitive_paths {
                        redact(&mut value, path);
                    }
                    ConfigEntry {
                        service,
                        brand: non_empty(brand),
                        tenant: non_empty(tenant),
                        key,
                        value,
                        sensitive_paths,
                        created_at,
                        updated_at,
                    }
                })
                .collect::<Vec<_>>()
        };

        let seen: std::collections::HashSet<String> =
            entries.iter().map(|e| e.key.clone()).collect();
        let defaults = self.defaults.lock().await;
        for ((svc, key), value) in defaults.iter() {
            if svc == service && !seen.contains(key) {
                entries.push(ConfigEntry {
                    service: service.to_string(),
                    brand: None,
                    tenant: None,
                    key: key.clone(),
                    value: value.clone(),
                    sensitive_paths: Vec::new(),
                    created_at: 0,
                    updated_at: 0,
                });
            }
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() { None } else { Some(s) }
}

/// Replace the value at a dotted path with "***". A path that points at
/// nothing is left alone. An empty path redacts the whole value.
fn redact(value: &mut Value, path: &str) {
    if path.is_empty() {
        *value = Value::String("***".into());
        return;
    }
    let mut current = value;
    let segments: Vec<&str> = path.split('.').collect();
    for (i, segment) in segments.iter().enumerate() {
        let Some(next) = current.get_mut(*segment) else {
            return;
        };
        if i == segments.len() - 1 {
            *next = Value::String("***".into());
            return;
        }
        current = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn redaction_walks_paths() {
        let mut v = json!({ "provider": { "api_key": "secret", "url": "u" } });
        redact(&mut v, "provider.api_key");
        assert_eq!(v["provider"]["api_key"], "***");
        assert_eq!(v["provider"]["url"], "u");

        let mut whole = json!("secret");
        redact(&mut whole, "");
        assert_eq!(whole, "***");
    }
}
