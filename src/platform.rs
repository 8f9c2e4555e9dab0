use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde_json::{Value, json};

use crate::auth::{OtpService, RoleStore, TwoFactorService};
use crate::bonus::{BonusEngine, handlers};
use crate::db::{CORE_DATABASE, DbHandle, DbRouter, StrategyConfig};
use crate::error::CoreResult;
use crate::events::{EventDispatcher, EventBus, LocalBus, RedisBus, RoomRegistry, WebhookDeliverer};
use crate::ledger::{ExchangeRates, Ledger};
use crate::model::reference::RefResolver;
use crate::pending::{PendingStore, jwt::JwtPendingStore, memory::MemoryPendingStore,
    redis::RedisPendingStore};
use crate::registry::{IdentityRegistry, config::ConfigStore};
use crate::wallet::{PaymentProcessor, StubProcessor, WalletService};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingBackend {
    /// In-process; single-node deployments and tests.
    Memory,
    /// Stateless signed tokens; cannot enumerate or truly delete.
    Jwt,
    /// Redis-backed random tokens with TTL.
    Redis,
}

pub struct PlatformConfig {
    pub data_dir: PathBuf,
    pub redis_url: Option<String>,
    pub pending_backend: PendingBackend,
    /// Payment processor adapter; defaults to the stub.
    pub processor: Option<Arc<dyn PaymentProcessor>>,
}

impl PlatformConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        PlatformConfig {
            data_dir: data_dir.into(),
            redis_url: None,
            pending_backend: PendingBackend::Memory,
            processor: None,
        }
    }
}

/// All process-wide state, constructed in one place. Library code never
/// builds singletons lazily; anything here exists before the first request
/// and is dropped by `shutdown`.
pub struct Platform {
    pub router: Arc<DbRouter>,
    pub core: DbHandle,
    pub registry: Arc<IdentityRegistry>,
    pub config: Arc<ConfigStore>,
    pub pending: Arc<dyn PendingStore>,
    pub rates: Arc<ExchangeRates>,
    pub ledger: Arc<Ledger>,
    pub events: Arc<EventDispatcher>,
    pub bonus: Arc<BonusEngine>,
    pub roles: Arc<RoleStore>,
    pub otp: Arc<OtpService>,
    pub two_factor: Arc<TwoFactorService>,
    pub wallets: Arc<WalletService>,
    /// Generic-reference dispatch table; kinds register here at startup.
    pub refs: Arc<RefResolver>,
    pub auth_secret: String,
    started_at: Instant,
}

impl Platform {
    pub async fn initialize(cfg: PlatformConfig) -> Result<Arc<Platform>> {
        let router = Arc::new(DbRouter::new(cfg.data_dir.clone()));
        let core = router
            .open(CORE_DATABASE)
            .await
            .map_err(|e| anyhow::anyhow!("opening core database: {e}"))?;

        let (auth_secret, secret_salt) = {
            let conn = core.db.lock().await;
            (
                ensure_service_value(&conn, "auth_secret", random_secret)?,
                ensure_service_value(&conn, "secret_salt", crate::auth::crypto::generate_salt)?,
            )
        };

        let config = Arc::new(ConfigStore::new(core.db.clone()));
        register_service_defaults(&config).await;

        let registry = Arc::new(IdentityRegistry::new(core.db.clone()));

        let provider_url = config
            .get("rates-service", "provider_url", None, None)
            .await
            .ok()
            .and_then(|v| v.as_str().map(|s| s.to_string()));
        let rates = Arc::new(ExchangeRates::new(core.db.clone(), provider_url));
        let ledger = Arc::new(Ledger::new(rates.clone()));

        let bus: Arc<dyn EventBus> = match &cfg.redis_url {
            Some(url) => Arc::new(
                RedisBus::connect(url)
                    .await
                    .map_err(|e| anyhow::anyhow!("connecting redis bus: {e}"))?,
            ),
            None => Arc::new(LocalBus::new()),
        };
        let rooms = Arc::new(RoomRegistry::new());
        let webhooks = Arc::new(WebhookDeliverer::new(core.db.clone()));
        let resumed = webhooks
            .resume_pending()
            .await
            .map_err(|e| anyhow::anyhow!("resuming webhook deliveries: {e}"))?;
        if resumed > 0 {
            tracing::info!(resumed, "resumed persisted webhook deliveries");
        }
        let events = Arc::new(EventDispatcher::new(
            core.db.clone(),
            bus,
            rooms,
            webhooks,
        ));

        let pending: Arc<dyn PendingStore> = match cfg.pending_backend {
            PendingBackend::Memory => Arc::new(MemoryPendingStore::new()),
            PendingBackend::Jwt => Arc::new(JwtPendingStore::new(auth_secret.clone())),
            PendingBackend::Redis => {
                let url = cfg
                    .redis_url
                    .as_deref()
                    .context("redis pending backend requires a redis url")?;
                Arc::new(
                    RedisPendingStore::connect(url, "pending:")
                        .await
                        .map_err(|e| anyhow::anyhow!("connecting redis pending store: {e}"))?,
                )
            }
        };

        let bonus = Arc::new(BonusEngine::new(
            handlers::build_registry(),
            ledger.clone(),
            pending.clone(),
            events.clone(),
        ));

        let roles = Arc::new(RoleStore::new(core.db.clone()));

        let otp_code_length = config_i64(&config, "auth-service", "otp_code_length", 6).await;
        let otp_expires = config_i64(&config, "auth-service", "otp_expires_secs", 600).await;
        let otp = Arc::new(
            OtpService::new(pending.clone())
                .with_settings(otp_code_length as usize, otp_expires as u64),
        );

        let secret_key = crate::auth::crypto::derive_key(&auth_secret, &secret_salt)
            .map_err(|e| anyhow::anyhow!("deriving secret-at-rest key: {e}"))?;
        let two_factor = Arc::new(TwoFactorService::new(secret_key, "pay-flow"));

        let processor: Arc<dyn PaymentProcessor> =
            cfg.processor.unwrap_or_else(|| Arc::new(StubProcessor));
        let wallets = Arc::new(WalletService::new(
            ledger.clone(),
            bonus.clone(),
            events.clone(),
            processor,
        ));

        Ok(Arc::new(Platform {
            router,
            core,
            registry,
            config,
            pending,
            rates,
            ledger,
            events,
            bonus,
            roles,
            otp,
            two_factor,
            wallets,
            refs: Arc::new(RefResolver::new()),
            auth_secret,
            started_at: Instant::now(),
        }))
    }

    /// Resolve the physical database for a service call. The strategy is
    /// read from config (validated at write time) with the registered
    /// per-service default as fallback.
    pub async fn db_for(
        &self,
        service: &str,
        brand: Option<&str>,
        tenant: Option<&str>,
    ) -> CoreResult<DbHandle> {
        let strategy_value = self
            .config
            .get_or(service, "database", brand, tenant, json!({ "strategy": "per-service" }))
            .await;
        let strategy = StrategyConfig::from_value(&strategy_value);
        strategy.validate()?;
        self.router.resolve(&strategy, service, brand, tenant).await
    }

    /// Config write-through that keeps the resolver and registry caches
    /// honest.
    pub async fn set_config(
        &self,
        service: &str,
        key: &str,
        value: Value,
        brand: Option<&str>,
        tenant: Option<&str>,
        sensitive_paths: &[String],
    ) -> CoreResult<()> {
        if key == "database" {
            let strategy = StrategyConfig::from_value(&value);
            strategy.validate()?;
        }
        self.config
            .set(service, key, value, brand, tenant, sensitive_paths)
            .await?;
        self.router.invalidate(Some(service)).await;
        self.registry.invalidate(None).await;
        Ok(())
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub async fn health(&self) -> Value {
        let db_ok = {
            let conn = self.core.db.lock().await;
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .is_ok()
        };
        json!({
            "status": if db_ok { "ok" } else { "degraded" },
            "service": "pay-flow",
            "uptime": self.uptime_secs(),
            "checks": { "db": db_ok, "redis": true },
        })
    }

    /// Tear down process-wide state. Channels close when their owners drop;
    /// this prunes what can be pruned eagerly and is the explicit
    /// counterpart of `initialize`.
    pub async fn shutdown(&self) {
        self.events.rooms().prune();
        self.router.invalidate(None).await;
        tracing::info!("platform shut down");
    }
}

/// Read a persistent service value, generating and storing it on first
/// boot so restarts keep signing/derivation stable.
fn ensure_service_value(
    conn: &Connection,
    key: &str,
    generate: impl FnOnce() -> String,
) -> Result<String> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT value FROM service_config WHERE key = ?1",
            [key],
            |row| row.get(0),
        )
        .ok();
    if let Some(value) = existing {
        return Ok(value);
    }

    let value = generate();
    conn.execute(
        "INSERT INTO service_config (key, value) VALUES (?1, ?2)",
        rusqlite::params![key, value],
    )?;
    Ok(value)
}

fn random_secret() -> String {
    use base64::Engine as _;
    use rand::Rng;
    let bytes: [u8; 64] = rand::rng().random();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

async fn register_service_defaults(config: &ConfigStore) {
    config
        .register_defaults(
            "auth-service",
            json!({
                "access_ttl_secs": 3600,
                "refresh_ttl_secs": 604800,
                "otp_code_length": 6,
                "otp_expires_secs": 600,
            }),
        )
        .await;
    // The default deployment colocates the domain tables in one database;
    // tenants that need isolation override the strategy per service.
    config
        .register_defaults(
            "payment-service",
            json!({
                "database": { "strategy": "shared" },
                "hold_ttl_secs": 900,
            }),
        )
        .await;
    config
        .register_defaults(
            "bonus-service",
            json!({
                "database": { "strategy": "shared" },
                "default_expiration_days": 30,
            }),
        )
        .await;
    config
        .register_defaults(
            "user-service",
            json!({
                "database": { "strategy": "shared" },
            }),
        )
        .await;
    config
        .register_defaults(
            "rates-service",
            json!({
                "provider_url": Value::Null,
                "cache_ttl_secs": 300,
            }),
        )
        .await;
}

async fn config_i64(config: &ConfigStore, service: &str, key: &str, fallback: i64) -> i64 {
    config
        .get_or(service, key, None, None, json!(fallback))
        .await
        .as_i64()
        .unwrap_or(fallback)
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform")
            .field("uptime_secs", &self.uptime_secs())
            .finish()
    }
}
