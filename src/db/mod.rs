pub mod migrate;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{CoreError, CoreResult};

/// One bounded handle per physical database file. Callers lock for the
/// duration of a statement batch, never across other awaits.
pub type Db = Arc<Mutex<Connection>>;

/// A resolved physical database: its sanitized name plus the shared handle.
#[derive(Clone)]
pub struct DbHandle {
    pub name: String,
    pub db: Db,
}

/// The database the `shared` strategy always resolves to.
pub const CORE_DATABASE: &str = "core_service";

// ── Strategies ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DbStrategy {
    Shared,
    PerService,
    PerBrand,
    PerBrandService,
    PerTenant,
    PerTenantService,
    PerShard,
}

impl DbStrategy {
    /// Unknown strategy strings fall back to `per-service`.
    pub fn parse_or_default(s: &str) -> DbStrategy {
        match s {
            "shared" => DbStrategy::Shared,
            "per-service" => DbStrategy::PerService,
            "per-brand" => DbStrategy::PerBrand,
            "per-brand-service" => DbStrategy::PerBrandService,
            "per-tenant" => DbStrategy::PerTenant,
            "per-tenant-service" => DbStrategy::PerTenantService,
            "per-shard" => DbStrategy::PerShard,
            _ => DbStrategy::PerService,
        }
    }
}

/// Per-service database policy, read from config under the `database` key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub strategy: DbStrategy,
    /// Optional name template with `{service}` / `{brand}` / `{tenant}`
    /// placeholders (the `{tenantId}` / `{brandId}` spellings are accepted
    /// too).
    #[serde(default)]
    pub db_name_template: Option<String>,
    #[serde(default = "default_num_shards")]
    pub num_shards: u32,
}

fn default_num_shards() -> u32 {
    4
}

impl Default for StrategyConfig {
    fn default() -> Self {
        StrategyConfig {
            strategy: DbStrategy::PerService,
            db_name_template: None,
            num_shards: default_num_shards(),
        }
    }
}

impl StrategyConfig {
    pub fn from_value(value: &serde_json::Value) -> StrategyConfig {
        let strategy = value
            .get("strategy")
            .and_then(|v| v.as_str())
            .map(DbStrategy::parse_or_default)
            .unwrap_or(DbStrategy::PerService);
        StrategyConfig {
            strategy,
            db_name_template: value
                .get("dbNameTemplate")
                .or_else(|| value.get("db_name_template"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            num_shards: value
                .get("num_shards")
                .and_then(|v| v.as_u64())
                .map(|n| n.max(1) as u32)
                .unwrap_or_else(default_num_shards),
        }
    }

    /// Startup check: a template must carry every placeholder its strategy
    /// varies on, so a bad template fails here and never at request time.
    pub fn validate(&self) -> CoreResult<()> {
        let Some(template) = &self.db_name_template else {
            return Ok(());
        };
        let required: &[&str] = match self.strategy {
            DbStrategy::Shared => &[],
            DbStrategy::PerService | DbStrategy::PerShard => &["service"],
            DbStrategy::PerBrand => &["brand"],
            DbStrategy::PerBrandService => &["brand", "service"],
            DbStrategy::PerTenant => &["tenant"],
            DbStrategy::PerTenantService => &["tenant", "service"],
        };
        for placeholder in required {
            if !has_placeholder(template, placeholder) {
                return Err(CoreError::Configuration(format!(
                    "database template '{template}' is missing the {{{placeholder}}} placeholder"
                )));
            }
        }
        Ok(())
    }
}

fn has_placeholder(template: &str, name: &str) -> bool {
    if template.contains(&format!("{{{name}}}")) {
        return true;
    }
    // Alternate camelCase spellings used by tenant-facing config.
    match name {
        "tenant" => template.contains("{tenantId}"),
        "brand" => template.contains("{brandId}"),
        "service" => template.contains("{serviceId}"),
        _ => false,
    }
}

// ── Name derivation ─────────────────────────────────────────────────

/// Restrict identifiers to `[a-z0-9_]`; hyphens become underscores, anything
/// else is dropped.
pub fn sanitize(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter_map(|c| match c {
            'a'..='z' | '0'..='9' | '_' => Some(c),
            'A'..='Z' => Some(c.to_ascii_lowercase()),
            '-' => Some('_'),
            _ => None,
        })
        .collect()
}

fn fnv1a64(s: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in s.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

fn substitute(template: &str, service: &str, brand: Option<&str>, tenant: Option<&str>) -> String {
    let mut out = template.to_string();
    for (key, value) in [
        ("{service}", Some(service)),
        ("{serviceId}", Some(service)),
        ("{brand}", brand),
        ("{brandId}", brand),
        ("{tenant}", tenant),
        ("{tenantId}", tenant),
    ] {
        if let Some(v) = value {
            out = out.replace(key, &sanitize(v));
        }
    }
    out
}

/// Map `(service, brand, tenant)` to a physical database name under the
/// configured strategy. Pure and deterministic.
pub fn database_name(
    cfg: &StrategyConfig,
    service: &str,
    brand: Option<&str>,
    tenant: Option<&str>,
) -> CoreResult<String> {
    if let Some(template) = &cfg.db_name_template {
        let name = sanitize(&substitute(template, service, brand, tenant));
        if name.is_empty() {
            return Err(CoreError::Configuration(format!(
                "database template '{template}' produced an empty name"
            )));
        }
        return Ok(name);
    }

    let service_name = sanitize(service);
    let need_brand = || {
        brand.map(sanitize).filter(|b| !b.is_empty()).ok_or_else(|| {
            CoreError::Validation(format!("strategy {:?} requires a brand", cfg.strategy))
        })
    };
    let need_tenant = || {
        tenant.map(sanitize).filter(|t| !t.is_empty()).ok_or_else(|| {
            CoreError::Validation(format!("strategy {:?} requires a tenant", cfg.strategy))
        })
    };

    Ok(match cfg.strategy {
        DbStrategy::Shared => CORE_DATABASE.to_string(),
        DbStrategy::PerService => service_name,
        DbStrategy::PerBrand => format!("brand_{}", need_brand()?),
        DbStrategy::PerBrandService => format!("brand_{}_{}", need_brand()?, service_name),
        DbStrategy::PerTenant => format!("tenant_{}", need_tenant()?),
        DbStrategy::PerTenantService => format!("tenant_{}_{}", need_tenant()?, service_name),
        DbStrategy::PerShard => {
            let key = tenant.or(brand).ok_or_else(|| {
                CoreError::Validation("per-shard strategy requires a tenant or brand".into())
            })?;
            let shard = fnv1a64(key) % cfg.num_shards.max(1) as u64;
            format!("{service_name}_shard_{shard}")
        }
    })
}

// ── Router ──────────────────────────────────────────────────────────

/// Resolves logical coordinates to physical database handles, opening and
/// migrating SQLite files lazily, one shared handle per physical name.
pub struct DbRouter {
    data_dir: PathBuf,
    pools: Mutex<HashMap<String, Db>>,
    resolutions: Mutex<HashMap<ResolutionKey, String>>,
}

type ResolutionKey = (String, Option<String>, Option<String>);

impl DbRouter {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        DbRouter {
            data_dir: data_dir.into(),
            pools: Mutex::new(HashMap::new()),
            resolutions: Mutex::new(HashMap::new()),
        }
    }

    pub fn db_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(format!("{name}.db"))
    }

    /// Resolve and open. Resolutions are cached per tuple until the service
    /// config changes.
    pub async fn resolve(
        &self,
        cfg: &StrategyConfig,
        service: &str,
        brand: Option<&str>,
        tenant: Option<&str>,
    ) -> CoreResult<DbHandle> {
        let key: ResolutionKey = (
            service.to_string(),
            brand.map(|s| s.to_string()),
            tenant.map(|s| s.to_string()),
        );
        let cached = { self.resolutions.lock().await.get(&key).cloned() };
        let name = match cached {
            Some(name) => name,
            None => {
                let name = database_name(cfg, service, brand, tenant)?;
                self.resolutions.lock().await.insert(key, name.clone());
                name
            }
        };
        self.open(&name).await
    }

    /// Open (or reuse) the handle for a physical database name.
    pub async fn open(&self, name: &str) -> CoreResult<DbHandle> {
        let mut pools = self.pools.lock().await;
        if let Some(db) = pools.get(name) {
            return Ok(DbHandle {
                name: name.to_string(),
                db: db.clone(),
            });
        }
        let path = self.db_path(name);
        let db = open_database(&path)?;
        pools.insert(name.to_string(), db.clone());
        Ok(DbHandle {
            name: name.to_string(),
            db,
        })
    }

    /// Drop cached resolutions for one service (config change) or all.
    pub async fn invalidate(&self, service: Option<&str>) {
        let mut resolutions = self.resolutions.lock().await;
        match service {
            Some(service) => resolutions.retain(|(s, _, _), _| s != service),
            None => resolutions.clear(),
        }
    }

    /// Names of every physical database opened so far.
    pub async fn list_open(&self) -> Vec<String> {
        let pools = self.pools.lock().await;
        let mut names: Vec<String> = pools.keys().cloned().collect();
        names.sort();
        names
    }
}

fn open_database(path: &Path) -> CoreResult<Db> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| CoreError::Configuration(format!("creating {}: {e}", parent.display())))?;
    }
    let conn = Connection::open(path)
        .map_err(|e| CoreError::Configuration(format!("opening {}: {e}", path.display())))?;
    conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    migrate::migrate(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(strategy: DbStrategy) -> StrategyConfig {
        StrategyConfig {
            strategy,
            db_name_template: None,
            num_shards: 4,
        }
    }

    #[test]
    fn names_per_strategy() {
        assert_eq!(
            database_name(&cfg(DbStrategy::Shared), "payment-service", None, None).unwrap(),
            "core_service"
        );
        assert_eq!(
            database_name(&cfg(DbStrategy::PerService), "payment-service", None, None).unwrap(),
            "payment_service"
        );
        assert_eq!(
            database_name(&cfg(DbStrategy::PerBrand), "x", Some("Acme"), None).unwrap(),
            "brand_acme"
        );
        assert_eq!(
            database_name(&cfg(DbStrategy::PerTenantService), "pay", None, Some("t7")).unwrap(),
            "tenant_t7_pay"
        );
    }

    #[test]
    fn shard_is_deterministic() {
        let c = cfg(DbStrategy::PerShard);
        let a = database_name(&c, "pay", None, Some("t42")).unwrap();
        let b = database_name(&c, "pay", None, Some("t42")).unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("pay_shard_"));
    }

    #[test]
    fn template_substitution() {
        let c = StrategyConfig {
            strategy: DbStrategy::PerTenant,
            db_name_template: Some("tenant_{tenantId}_pay".into()),
            num_shards: 4,
        };
        c.validate().unwrap();
        assert_eq!(
            database_name(&c, "payment-service", None, Some("t7")).unwrap(),
            "tenant_t7_pay"
        );
    }

    #[test]
    fn template_missing_placeholder_fails_validation() {
        let c = StrategyConfig {
            strategy: DbStrategy::PerTenant,
            db_name_template: Some("static_name".into()),
            num_shards: 4,
        };
        assert!(matches!(
            c.validate(),
            Err(CoreError::Configuration(_))
        ));
    }

    #[test]
    fn unknown_strategy_falls_back() {
        assert_eq!(
            DbStrategy::parse_or_default("per-galaxy"),
            DbStrategy::PerService
        );
    }

    #[test]
    fn sanitize_strips() {
        assert_eq!(sanitize("payment-service"), "payment_service");
        assert_eq!(sanitize("T7; DROP TABLE"), "t7droptable");
    }
}
