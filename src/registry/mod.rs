pub mod config;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rusqlite::Connection;
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::db::Db;
use crate::error::{CoreError, CoreResult};
use crate::model::{Brand, Tenant};

// ── TTL cache ───────────────────────────────────────────────────────

/// A small TTL cache with explicit invalidation. Reads are eventually
/// consistent; writers invalidate the keys they touch.
pub struct TtlCache<V: Clone> {
    entries: Mutex<HashMap<String, (Instant, V)>>,
    ttl: Duration,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        TtlCache {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((at, v)) if at.elapsed() < self.ttl => Some(v.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub async fn insert(&self, key: impl Into<String>, value: V) {
        self.entries
            .lock()
            .await
            .insert(key.into(), (Instant::now(), value));
    }

    pub async fn invalidate(&self, key: &str) {
        self.entries.lock().await.remove(key);
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }
}

// ── Brand / tenant registry ─────────────────────────────────────────

const REGISTRY_TTL: Duration = Duration::from_secs(3600);

/// Brand and tenant lookups over the core database, cached for an hour.
/// Lookups accept either the canonical id or the short code.
pub struct IdentityRegistry {
    core: Db,
    brands: TtlCache<Brand>,
    tenants: TtlCache<Tenant>,
}

impl IdentityRegistry {
    pub fn new(core: Db) -> Self {
        Self::with_ttl(core, REGISTRY_TTL)
    }

    pub fn with_ttl(core: Db, ttl: Duration) -> Self {
        IdentityRegistry {
            core,
            brands: TtlCache::new(ttl),
            tenants: TtlCache::new(ttl),
        }
    }

    pub async fn get_brand(&self, key: &str) -> CoreResult<Brand> {
        if let Some(brand) = self.brands.get(key).await {
            return Ok(brand);
        }
        let brand = {
            let conn = self.core.lock().await;
            load_brand(&conn, key)?
        };
        let brand = brand.ok_or_else(|| CoreError::not_found("brand", key))?;
        self.brands.insert(brand.id.clone(), brand.clone()).await;
        self.brands.insert(brand.code.clone(), brand.clone()).await;
        Ok(brand)
    }

    pub async fn get_tenant(&self, key: &str) -> CoreResult<Tenant> {
        if let Some(tenant) = self.tenants.get(key).await {
            return Ok(tenant);
        }
        let tenant = {
            let conn = self.core.lock().await;
            load_tenant(&conn, key)?
        };
        let tenant = tenant.ok_or_else(|| CoreError::not_found("tenant", key))?;
        self.tenants.insert(tenant.id.clone(), tenant.clone()).await;
        self.tenants
            .insert(tenant.code.clone(), tenant.clone())
            .await;
        Ok(tenant)
    }

    pub async fn create_brand(&self, code: &str, name: &str, metadata: Value) -> CoreResult<Brand> {
        let id = Uuid::new_v4().to_string();
        {
            let conn = self.core.lock().await;
            conn.execute(
                "INSERT INTO brands (id, code, name, metadata) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id, code, name, metadata.to_string()],
            )?;
        }
        self.get_brand(&id).await
    }

    pub async fn create_tenant(
        &self,
        code: &str,
        name: &str,
        brand_id: Option<&str>,
        metadata: Value,
    ) -> CoreResult<Tenant> {
        let id = Uuid::new_v4().to_string();
        {
            let conn = self.core.lock().await;
            conn.execute(
                "INSERT INTO tenants (id, code, name, brand_id, metadata) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, code, name, brand_id, metadata.to_string()],
            )?;
        }
        self.get_tenant(&id).await
    }

    /// Invalidate by id, by code, or everything when `key` is None.
    pub async fn invalidate(&self, key: Option<&str>) {
        match key {
            Some(key) => {
                self.brands.invalidate(key).await;
                self.tenants.invalidate(key).await;
            }
            None => {
                self.brands.clear().await;
                self.tenants.clear().await;
            }
        }
    }
}

fn load_brand(conn: &Connection, key: &str) -> CoreResult<Option<Brand>> {
    let row = conn
        .query_row(
            "SELECT id, code, name, active, metadata, created_at, updated_at
             FROM brands WHERE id = ?1 OR code = ?1",
            [key],
            |row| {
                Ok(Brand {
                    id: row.get(0)?,
                    code: row.get(1)?,
                    name: row.get(2)?,
                    active: row.get::<_, i64>(3)? != 0,
                    metadata: parse_json(row.get::<_, String>(4)?),
                    created_at: row.get(5)?,
                    updated_at: row.get(6)?,
                })
            },
        )
        .map(Some)
        .or_else(ignore_not_found)?;
    Ok(row)
}

fn load_tenant(conn: &Connection, key: &str) -> CoreResult<Option<Tenant>> {
    let row = conn
        .query_row(
            "SELECT id, code, name, brand_id, active, metadata, created_at, updated_at
             FROM tenants WHERE id = ?1 OR code = ?1",
            [key],
            |row| {
                Ok(Tenant {
                    id: row.get(0)?,
                    code: row.get(1)?,
                    name: row.get(2)?,
                    brand_id: row.get(3)?,
                    active: row.get::<_, i64>(4)? != 0,
                    metadata: parse_json(row.get::<_, String>(5)?),
                    created_at: row.get(6)?,
                    updated_at: row.get(7)?,
                })
            },
        )
        .map(Some)
        .or_else(ignore_not_found)?;
    Ok(row)
}

pub(crate) fn parse_json(raw: String) -> Value {
    serde_json::from_str(&raw).unwrap_or(Value::Null)
}

pub(crate) fn ignore_not_found<T>(err: rusqlite::Error) -> Result<Option<T>, rusqlite::Error> {
    match err {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(other),
    }
}
