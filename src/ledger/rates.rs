use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::Mutex;

use crate::db::Db;
use crate::error::{CoreError, CoreResult};
use crate::model::money::normalize_currency;

const CACHE_TTL: Duration = Duration::from_secs(300);
const BREAKER_FAILURES: usize = 5;
const BREAKER_WINDOW: Duration = Duration::from_secs(120);
const BREAKER_RESET: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateSource {
    Identity,
    Override,
    Cache,
    Provider,
}

#[derive(Debug, Clone)]
pub struct RateQuote {
    pub rate: f64,
    /// Unix seconds the rate was obtained; the ledger enforces freshness.
    pub obtained_at: i64,
    pub source: RateSource,
}

struct Breaker {
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
}

impl Breaker {
    fn new() -> Self {
        Breaker {
            failures: VecDeque::new(),
            opened_at: None,
        }
    }

    /// Open after BREAKER_FAILURES failures inside BREAKER_WINDOW; allow a
    /// probe again after BREAKER_RESET.
    fn is_open(&mut self) -> bool {
        match self.opened_at {
            Some(at) if at.elapsed() >= BREAKER_RESET => {
                self.opened_at = None;
                self.failures.clear();
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    fn record_failure(&mut self) {
        let now = Instant::now();
        self.failures.push_back(now);
        while self
            .failures
            .front()
            .is_some_and(|t| now.duration_since(*t) > BREAKER_WINDOW)
        {
            self.failures.pop_front();
        }
        if self.failures.len() >= BREAKER_FAILURES {
            self.opened_at = Some(now);
        }
    }

    fn record_success(&mut self) {
        self.failures.clear();
        self.opened_at = None;
    }
}

#[derive(Debug, Deserialize)]
struct ProviderRate {
    rate: f64,
}

/// Exchange-rate resolution: persistent manual overrides beat a 5-minute
/// cache beats the external provider behind a circuit breaker. When every
/// source is unavailable the caller's cross-currency posting fails; a rate
/// is never guessed.
pub struct ExchangeRates {
    core: Db,
    http: reqwest::Client,
    provider_url: Option<String>,
    cache: Mutex<HashMap<(String, String), (Instant, f64)>>,
    breaker: Mutex<Breaker>,
}

impl ExchangeRates {
    pub fn new(core: Db, provider_url: Option<String>) -> Self {
        ExchangeRates {
            core,
            http: reqwest::Client::new(),
            provider_url,
            cache: Mutex::new(HashMap::new()),
            breaker: Mutex::new(Breaker::new()),
        }
    }

    pub async fn get_rate(&self, from: &str, to: &str) -> CoreResult<RateQuote> {
        let from = normalize_currency(from);
        let to = normalize_currency(to);
        let now = chrono::Utc::now().timestamp();

        if from == to {
            return Ok(RateQuote {
                rate: 1.0,
                obtained_at: now,
                source: RateSource::Identity,
            });
        }

        if let Some(rate) = self.load_override(&from, &to).await? {
            return Ok(RateQuote {
                rate,
                obtained_at: now,
                source: RateSource::Override,
            });
        }

        {
            let cache = self.cache.lock().await;
            if let Some((at, rate)) = cache.get(&(from.clone(), to.clone())) {
                if at.elapsed() < CACHE_TTL {
                    return Ok(RateQuote {
                        rate: *rate,
                        obtained_at: now,
                        source: RateSource::Cache,
                    });
                }
            }
        }

        let Some(url) = &self.provider_url else {
            return Err(CoreError::UpstreamUnavailable(format!(
                "no exchange-rate source for {from}->{to}: no provider configured and no manual override"
            )));
        };

        {
            let mut breaker = self.breaker.lock().await;
            if breaker.is_open() {
                return Err(CoreError::UpstreamUnavailable(format!(
                    "exchange-rate provider circuit breaker is open ({BREAKER_FAILURES} recent failures)"
                )));
            }
        }

        match self.fetch(url, &from, &to).await {
            Ok(rate) => {
                self.breaker.lock().await.record_success();
                self.cache
                    .lock()
                    .await
                    .insert((from, to), (Instant::now(), rate));
                Ok(RateQuote {
                    rate,
                    obtained_at: now,
                    source: RateSource::Provider,
                })
            }
            Err(e) => {
                self.breaker.lock().await.record_failure();
                Err(CoreError::UpstreamUnavailable(format!(
                    "exchange-rate provider failed for {from}->{to}: {e}"
                )))
            }
        }
    }

    async fn fetch(&self, url: &str, from: &str, to: &str) -> Result<f64, String> {
        let response = self
            .http
            .get(url)
            .query(&[("from", from), ("to", to)])
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("status {}", response.status()));
        }
        let body: ProviderRate = response.json().await.map_err(|e| e.to_string())?;
        if body.rate <= 0.0 || !body.rate.is_finite() {
            return Err(format!("provider returned invalid rate {}", body.rate));
        }
        Ok(body.rate)
    }

    async fn load_override(&self, from: &str, to: &str) -> CoreResult<Option<f64>> {
        let conn = self.core.lock().await;
        let rate: Option<f64> = conn
            .query_row(
                "SELECT rate FROM rate_overrides WHERE from_currency = ?1 AND to_currency = ?2",
                [from, to],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(crate::registry::ignore_not_found)?;
        Ok(rate)
    }

    pub async fn set_override(&self, from: &str, to: &str, rate: f64) -> CoreResult<()> {
        if rate <= 0.0 || !rate.is_finite() {
            return Err(CoreError::Validation("override rate must be positive".into()));
        }
        let conn = self.core.lock().await;
        conn.execute(
            "INSERT INTO rate_overrides (from_currency, to_currency, rate)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(from_currency, to_currency)
             DO UPDATE SET rate = ?3, updated_at = unixepoch()",
            rusqlite::params![normalize_currency(from), normalize_currency(to), rate],
        )?;
        Ok(())
    }

    pub async fn clear_override(&self, from: &str, to: &str) -> CoreResult<bool> {
        let conn = self.core.lock().await;
        let affected = conn.execute(
            "DELETE FROM rate_overrides WHERE from_currency = ?1 AND to_currency = ?2",
            [normalize_currency(from), normalize_currency(to)],
        )?;
        Ok(affected > 0)
    }
}
