pub mod account;
pub mod rates;
pub mod reconcile;

use std::collections::HashMap;
use std::sync::Arc;

use rusqlite::Connection;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::db::DbHandle;
use crate::error::{CoreError, CoreResult};
use crate::model::money::{Money, convert_amount, normalize_currency};

pub use account::{AccountSpec, LedgerAccount, OwnerType, account_id, conversion_float, open_account};
pub use rates::{ExchangeRates, RateQuote};

/// How long a fetched exchange rate stays usable for a posting.
pub const RATE_FRESHNESS_SECS: i64 = 300;

// ── Types ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Committed,
    Reversed,
}

impl TxStatus {
    fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Committed => "committed",
            TxStatus::Reversed => "reversed",
        }
    }

    fn parse(s: &str) -> CoreResult<TxStatus> {
        match s {
            "pending" => Ok(TxStatus::Pending),
            "committed" => Ok(TxStatus::Committed),
            "reversed" => Ok(TxStatus::Reversed),
            other => Err(CoreError::Fatal(format!("unknown tx status {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LedgerTransaction {
    pub id: String,
    pub tx_type: String,
    pub from_account_id: String,
    pub to_account_id: String,
    /// Debit amount in `currency` minor units.
    pub amount: i64,
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange_rate: Option<f64>,
    /// Credit amount when the posting converts currency.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub converted_amount: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,
    pub status: TxStatus,
    pub metadata: Value,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum HoldStatus {
    Active,
    Released,
    Captured,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Hold {
    pub id: String,
    pub account_id: String,
    pub amount: i64,
    pub currency: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    pub status: HoldStatus,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct BalanceView {
    pub balance: i64,
    /// `balance` minus the sum of active holds.
    pub available_balance: i64,
    pub pending_in: i64,
    pub pending_out: i64,
}

/// An explicitly-resolved conversion attached to a cross-currency posting.
/// A posting without one must be single-currency; there is no implicit
/// rate lookup inside `post`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversion {
    pub from_currency: String,
    pub to_currency: String,
    pub rate: f64,
    /// Unix seconds the rate was obtained; must be inside the freshness
    /// window at posting time.
    pub obtained_at: i64,
}

#[derive(Debug, Clone)]
pub struct PostRequest {
    pub from: AccountSpec,
    pub to: AccountSpec,
    pub amount: i64,
    pub currency: String,
    pub tx_type: String,
    pub external_ref: Option<String>,
    pub description: Option<String>,
    pub metadata: Value,
    pub conversion: Option<Conversion>,
}

impl PostRequest {
    pub fn transfer(from: AccountSpec, to: AccountSpec, amount: i64, currency: &str) -> Self {
        PostRequest {
            from,
            to,
            amount,
            currency: normalize_currency(currency),
            tx_type: "transfer".to_string(),
            external_ref: None,
            description: None,
            metadata: Value::Null,
            conversion: None,
        }
    }

    pub fn with_type(mut self, tx_type: &str) -> Self {
        self.tx_type = tx_type.to_string();
        self
    }

    pub fn with_external_ref(mut self, external_ref: impl Into<String>) -> Self {
        self.external_ref = Some(external_ref.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_conversion(mut self, conversion: Conversion) -> Self {
        self.conversion = Some(conversion);
        self
    }
}

#[derive(Debug, Clone)]
pub struct HoldRequest {
    pub account: AccountSpec,
    pub amount: i64,
    pub currency: String,
    pub reason: String,
    pub expires_at: Option<i64>,
}

// ── Advisory account locks ──────────────────────────────────────────

/// Serializes concurrent postings per account. Locks are acquired in
/// sorted id order so a posting touching two accounts can never deadlock
/// against another.
pub struct LockManager {
    locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LockManager {
    pub fn new() -> Self {
        LockManager {
            locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn entry(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().expect("lock manager poisoned");
        locks.entry(key.to_string()).or_default().clone()
    }

    pub async fn acquire(&self, key: &str) -> tokio::sync::OwnedMutexGuard<()> {
        self.entry(key).lock_owned().await
    }

    pub async fn acquire_pair(
        &self,
        namespace: &str,
        a: &str,
        b: &str,
    ) -> Vec<tokio::sync::OwnedMutexGuard<()>> {
        let mut keys = vec![format!("{namespace}/{a}"), format!("{namespace}/{b}")];
        keys.sort();
        keys.dedup();
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.entry(&key).lock_owned().await);
        }
        guards
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

// ── Posting core (sync, runs under one connection lock) ─────────────

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn active_holds_sum(conn: &Connection, account_id: &str, at: i64) -> CoreResult<i64> {
    let sum: i64 = conn.query_row(
        "SELECT COALESCE(SUM(amount), 0) FROM holds
         WHERE account_id = ?1 AND status = 'active'
           AND (expires_at IS NULL OR expires_at > ?2)",
        rusqlite::params![account_id, at],
        |row| row.get(0),
    )?;
    Ok(sum)
}

fn available_balance(conn: &Connection, account: &LedgerAccount, at: i64) -> CoreResult<i64> {
    Ok(account.balance - active_holds_sum(conn, &account.id, at)?)
}

fn adjust_balance(conn: &Connection, account_id: &str, delta: i64) -> CoreResult<()> {
    conn.execute(
        "UPDATE ledger_accounts SET balance = balance + ?1, updated_at = unixepoch() WHERE id = ?2",
        rusqlite::params![delta, account_id],
    )?;
    Ok(())
}

pub fn find_by_external_ref(
    conn: &Connection,
    external_ref: &str,
) -> CoreResult<Option<LedgerTransaction>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM ledger_transactions WHERE external_ref = ?1",
    )?;
    let id: Option<String> = stmt
        .query_row([external_ref], |row| row.get(0))
        .map(Some)
        .or_else(crate::registry::ignore_not_found)?;
    match id {
        Some(id) => get_transaction(conn, &id),
        None => Ok(None),
    }
}

pub fn get_transaction(conn: &Connection, id: &str) -> CoreResult<Option<LedgerTransaction>> {
    let row = conn
        .query_row(
            "SELECT id, tx_type, from_account_id, to_account_id, amount, currency,
                    from_currency, to_currency, exchange_rate, converted_amount,
                    description, external_ref, status, metadata, created_at
             FROM ledger_transactions WHERE id = ?1",
            [id],
            map_tx_row,
        )
        .map(Some)
        .or_else(crate::registry::ignore_not_found)?;
    Ok(row)
}

fn map_tx_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LedgerTransaction> {
    Ok(LedgerTransaction {
        id: row.get(0)?,
        tx_type: row.get(1)?,
        from_account_id: row.get(2)?,
        to_account_id: row.get(3)?,
        amount: row.get(4)?,
        currency: row.get(5)?,
        from_currency: row.get(6)?,
        to_currency: row.get(7)?,
        exchange_rate: row.get(8)?,
        converted_amount: row.get(9)?,
        description: row.get(10)?,
        external_ref: row.get(11)?,
        status: TxStatus::parse(&row.get::<_, String>(12)?)
            .unwrap_or(TxStatus::Committed),
        metadata: crate::registry::parse_json(row.get::<_, String>(13)?),
        created_at: row.get(14)?,
    })
}

/// Whether the debit side may go below zero for this posting.
fn authorize_debit(
    account: &LedgerAccount,
    available: i64,
    amount: i64,
    ctx: &RequestContext,
) -> CoreResult<()> {
    if account.allow_negative || ctx.has_privilege("allowNegative") {
        if let Some(limit) = account.credit_limit {
            if available - amount < -limit {
                return Err(CoreError::Precondition(format!(
                    "credit limit exceeded on account {}",
                    account.id
                )));
            }
        }
        return Ok(());
    }
    if available - amount < 0 {
        return Err(CoreError::Precondition(format!(
            "insufficient funds on account {} ({} available, {} required)",
            account.id, available, amount
        )));
    }
    Ok(())
}

/// Write a double-entry posting. Synchronous; the caller holds the
/// connection (and, on the concurrent path, the account locks).
pub fn post_tx(
    conn: &Connection,
    req: &PostRequest,
    ctx: &RequestContext,
) -> CoreResult<LedgerTransaction> {
    post_internal(conn, req, ctx, true)
}

/// Run a multi-statement mutation under a savepoint so it applies fully or
/// not at all, whether or not an outer transaction is open.
fn with_savepoint<R>(
    conn: &Connection,
    name: &str,
    f: impl FnOnce(&Connection) -> CoreResult<R>,
) -> CoreResult<R> {
    conn.execute_batch(&format!("SAVEPOINT {name};"))?;
    match f(conn) {
        Ok(value) => {
            conn.execute_batch(&format!("RELEASE {name};"))?;
            Ok(value)
        }
        Err(err) => {
            let _ = conn.execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name};"));
            Err(err)
        }
    }
}

fn post_internal(
    conn: &Connection,
    req: &PostRequest,
    ctx: &RequestContext,
    enforce_funds: bool,
) -> CoreResult<LedgerTransaction> {
    with_savepoint(conn, "posting", |conn| post_apply(conn, req, ctx, enforce_funds))
}

fn post_apply(
    conn: &Connection,
    req: &PostRequest,
    ctx: &RequestContext,
    enforce_funds: bool,
) -> CoreResult<LedgerTransaction> {
    if req.amount <= 0 {
        return Err(CoreError::Validation("posting amount must be positive".into()));
    }

    // Idempotency: a redelivered saga re-posts with the same external_ref
    // and gets the original transaction back.
    if let Some(external_ref) = &req.external_ref {
        if let Some(existing) = find_by_external_ref(conn, external_ref)? {
            return Ok(existing);
        }
    }

    let at = now();
    let currency = normalize_currency(&req.currency);
    let from = open_account(conn, &req.from)?;
    let to = open_account(conn, &req.to)?;

    if from.id == to.id {
        return Err(CoreError::Validation(format!(
            "posting from an account to itself: {}",
            from.id
        )));
    }

    let conversion = match &req.conversion {
        None => {
            if from.currency != currency || to.currency != currency {
                return Err(CoreError::Validation(format!(
                    "cross-currency posting ({} -> {}) requires an explicit conversion",
                    from.currency, to.currency
                )));
            }
            None
        }
        Some(c) => {
            let from_currency = normalize_currency(&c.from_currency);
            let to_currency = normalize_currency(&c.to_currency);
            if from.currency != from_currency || to.currency != to_currency {
                return Err(CoreError::Validation(
                    "conversion currencies do not match the posting accounts".into(),
                ));
            }
            if from_currency == to_currency {
                return Err(CoreError::Validation(
                    "conversion between identical currencies".into(),
                ));
            }
            if c.rate <= 0.0 {
                return Err(CoreError::Validation("exchange rate must be positive".into()));
            }
            if at - c.obtained_at > RATE_FRESHNESS_SECS {
                return Err(CoreError::Precondition(
                    "exchange rate is stale; fetch a fresh one".into(),
                ));
            }
            Some((from_currency, to_currency, c.rate))
        }
    };

    if enforce_funds {
        let available = available_balance(conn, &from, at)?;
        authorize_debit(&from, available, req.amount, ctx)?;
    }

    let id = Uuid::new_v4().to_string();
    let (from_currency, to_currency, rate, credited) = match &conversion {
        None => (None, None, None, req.amount),
        Some((f, t, rate)) => (
            Some(f.clone()),
            Some(t.clone()),
            Some(*rate),
            convert_amount(req.amount, *rate),
        ),
    };

    conn.execute(
        "INSERT INTO ledger_transactions
             (id, tx_type, from_account_id, to_account_id, amount, currency,
              from_currency, to_currency, exchange_rate, converted_amount,
              description, external_ref, status, metadata, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 'committed', ?13, ?14)",
        rusqlite::params![
            id,
            req.tx_type,
            from.id,
            to.id,
            req.amount,
            conversion
                .as_ref()
                .map(|(f, _, _)| f.clone())
                .unwrap_or(currency),
            from_currency,
            to_currency,
            rate,
            conversion.as_ref().map(|_| credited),
            req.description,
            req.external_ref,
            if req.metadata.is_null() {
                "{}".to_string()
            } else {
                req.metadata.to_string()
            },
            at,
        ],
    )?;

    // Balance effects. Cross-currency routes through the per-currency
    // conversion floats so debits equal credits in every currency.
    adjust_balance(conn, &from.id, -req.amount)?;
    match &conversion {
        None => adjust_balance(conn, &to.id, req.amount)?,
        Some((from_ccy, to_ccy, _)) => {
            let float_from = open_account(conn, &conversion_float(from_ccy))?;
            let float_to = open_account(conn, &conversion_float(to_ccy))?;
            adjust_balance(conn, &float_from.id, req.amount)?;
            adjust_balance(conn, &float_to.id, -credited)?;
            adjust_balance(conn, &to.id, credited)?;
        }
    }

    get_transaction(conn, &id)?.ok_or_else(|| CoreError::Fatal("posting vanished".into()))
}

// ── Holds ───────────────────────────────────────────────────────────

pub fn hold_tx(conn: &Connection, req: &HoldRequest, ctx: &RequestContext) -> CoreResult<Hold> {
    if req.amount <= 0 {
        return Err(CoreError::Validation("hold amount must be positive".into()));
    }
    let at = now();
    let account = open_account(conn, &req.account)?;
    let currency = normalize_currency(&req.currency);
    if account.currency != currency {
        return Err(CoreError::Validation(format!(
            "hold currency {currency} does not match account currency {}",
            account.currency
        )));
    }

    if !account.allow_negative && !ctx.has_privilege("allowNegative") {
        let available = available_balance(conn, &account, at)?;
        if available - req.amount < 0 {
            return Err(CoreError::Precondition(format!(
                "insufficient available funds to hold {} on account {}",
                req.amount, account.id
            )));
        }
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO holds (id, account_id, amount, currency, reason, expires_at, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'active', ?7)",
        rusqlite::params![id, account.id, req.amount, currency, req.reason, req.expires_at, at],
    )?;
    get_hold(conn, &id)?.ok_or_else(|| CoreError::Fatal("hold vanished".into()))
}

pub fn get_hold(conn: &Connection, id: &str) -> CoreResult<Option<Hold>> {
    let row = conn
        .query_row(
            "SELECT id, account_id, amount, currency, reason, expires_at, status, created_at
             FROM holds WHERE id = ?1",
            [id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<i64>>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, i64>(7)?,
                ))
            },
        )
        .map(Some)
        .or_else(crate::registry::ignore_not_found)?;
    let Some((id, account_id, amount, currency, reason, expires_at, status, created_at)) = row
    else {
        return Ok(None);
    };
    let status = match status.as_str() {
        "active" => HoldStatus::Active,
        "released" => HoldStatus::Released,
        "captured" => HoldStatus::Captured,
        other => return Err(CoreError::Fatal(format!("unknown hold status {other}"))),
    };
    Ok(Some(Hold {
        id,
        account_id,
        amount,
        currency,
        reason,
        expires_at,
        status,
        created_at,
    }))
}

fn take_active_hold(conn: &Connection, hold_id: &str, to_status: &str) -> CoreResult<Hold> {
    let hold = get_hold(conn, hold_id)?
        .ok_or_else(|| CoreError::not_found("hold", hold_id))?;
    if hold.status != HoldStatus::Active {
        return Err(CoreError::Precondition(format!(
            "hold {hold_id} is not active"
        )));
    }
    if let Some(expires_at) = hold.expires_at {
        if expires_at <= now() {
            return Err(CoreError::Precondition(format!("hold {hold_id} has expired")));
        }
    }
    let affected = conn.execute(
        "UPDATE holds SET status = ?1 WHERE id = ?2 AND status = 'active'",
        rusqlite::params![to_status, hold_id],
    )?;
    if affected == 0 {
        return Err(CoreError::Conflict(format!("hold {hold_id} was closed concurrently")));
    }
    Ok(hold)
}

/// Convert an active hold into a posting to the target supplied now. The
/// reservation made the funds-availability decision at hold time, so the
/// capture posting does not re-check.
pub fn capture_tx(
    conn: &Connection,
    hold_id: &str,
    to: &AccountSpec,
    tx_type: &str,
    external_ref: Option<String>,
    ctx: &RequestContext,
) -> CoreResult<LedgerTransaction> {
    // Idempotency must win over hold state: a redelivered capture finds the
    // hold already captured but the posting already written.
    if let Some(external_ref) = &external_ref {
        if let Some(existing) = find_by_external_ref(conn, external_ref)? {
            return Ok(existing);
        }
    }

    let hold = get_hold(conn, hold_id)?
        .ok_or_else(|| CoreError::not_found("hold", hold_id))?;
    if hold.status != HoldStatus::Active {
        return Err(CoreError::Precondition(format!("hold {hold_id} is not active")));
    }
    if let Some(expires_at) = hold.expires_at {
        if expires_at <= now() {
            return Err(CoreError::Precondition(format!("hold {hold_id} has expired")));
        }
    }

    let from_account = account::get_account(conn, &hold.account_id)?
        .ok_or_else(|| CoreError::not_found("ledger account", hold.account_id.clone()))?;
    let from_spec = AccountSpec {
        owner_type: from_account.owner_type,
        owner_id: from_account.owner_id.clone(),
        subtype: from_account.subtype.clone(),
        currency: from_account.currency.clone(),
        allow_negative: from_account.allow_negative,
        credit_limit: from_account.credit_limit,
        tenant_id: from_account.tenant_id.clone(),
    };
    let mut req = PostRequest::transfer(from_spec, to.clone(), hold.amount, &hold.currency)
        .with_type(tx_type);
    req.external_ref = external_ref;
    req.metadata = serde_json::json!({ "hold_id": hold.id });
    let posted = post_internal(conn, &req, ctx, false)?;

    conn.execute(
        "UPDATE holds SET status = 'captured' WHERE id = ?1 AND status = 'active'",
        [hold_id],
    )?;
    Ok(posted)
}

pub fn release_tx(conn: &Connection, hold_id: &str) -> CoreResult<Hold> {
    take_active_hold(conn, hold_id, "released")?;
    get_hold(conn, hold_id)?.ok_or_else(|| CoreError::not_found("hold", hold_id))
}

/// Release every hold past its expiry. Returns the number released.
pub fn sweep_expired_holds(conn: &Connection) -> CoreResult<usize> {
    let affected = conn.execute(
        "UPDATE holds SET status = 'released'
         WHERE status = 'active' AND expires_at IS NOT NULL AND expires_at <= ?1",
        [now()],
    )?;
    Ok(affected)
}

// ── Balances ────────────────────────────────────────────────────────

pub fn balance_tx(conn: &Connection, account_id: &str) -> CoreResult<BalanceView> {
    let account = account::get_account(conn, account_id)?
        .ok_or_else(|| CoreError::not_found("ledger account", account_id))?;
    let at = now();
    let pending_out = active_holds_sum(conn, account_id, at)?;
    let pending_in: i64 = conn.query_row(
        "SELECT COALESCE(SUM(COALESCE(converted_amount, amount)), 0)
         FROM ledger_transactions WHERE to_account_id = ?1 AND status = 'pending'",
        [account_id],
        |row| row.get(0),
    )?;
    Ok(BalanceView {
        balance: account.balance,
        available_balance: account.balance - pending_out,
        pending_in,
        pending_out,
    })
}

// ── Reversal ────────────────────────────────────────────────────────

/// Write an opposing posting and mark the original reversed. Both rows are
/// retained forever; reversing twice is a precondition failure.
pub fn reverse_tx(
    conn: &Connection,
    tx_id: &str,
    description: Option<String>,
) -> CoreResult<LedgerTransaction> {
    with_savepoint(conn, "reversal", |conn| reverse_apply(conn, tx_id, description))
}

fn reverse_apply(
    conn: &Connection,
    tx_id: &str,
    description: Option<String>,
) -> CoreResult<LedgerTransaction> {
    let original = get_transaction(conn, tx_id)?
        .ok_or_else(|| CoreError::not_found("ledger transaction", tx_id))?;
    if original.status != TxStatus::Committed {
        return Err(CoreError::Precondition(format!(
            "transaction {tx_id} is not committed"
        )));
    }

    let at = now();
    let id = Uuid::new_v4().to_string();
    let credited = original.converted_amount.unwrap_or(original.amount);

    conn.execute(
        "INSERT INTO ledger_transactions
             (id, tx_type, from_account_id, to_account_id, amount, currency,
              from_currency, to_currency, exchange_rate, converted_amount,
              description, external_ref, status, metadata, created_at)
         VALUES (?1, 'reversal', ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 'committed', ?12, ?13)",
        rusqlite::params![
            id,
            original.to_account_id,
            original.from_account_id,
            credited,
            original
                .to_currency
                .clone()
                .unwrap_or_else(|| original.currency.clone()),
            original.to_currency,
            original.from_currency,
            original.exchange_rate.map(|r| if r != 0.0 { 1.0 / r } else { r }),
            original.converted_amount.map(|_| original.amount),
            description,
            Some(format!("reversal:{}", original.id)),
            serde_json::json!({ "reverses": original.id }).to_string(),
            at,
        ],
    )?;

    // Undo the original's balance effects exactly.
    adjust_balance(conn, &original.from_account_id, original.amount)?;
    match (&original.from_currency, &original.to_currency) {
        (Some(from_ccy), Some(to_ccy)) => {
            let float_from = open_account(conn, &conversion_float(from_ccy))?;
            let float_to = open_account(conn, &conversion_float(to_ccy))?;
            adjust_balance(conn, &float_from.id, -original.amount)?;
            adjust_balance(conn, &float_to.id, credited)?;
            adjust_balance(conn, &original.to_account_id, -credited)?;
        }
        _ => adjust_balance(conn, &original.to_account_id, -original.amount)?,
    }

    conn.execute(
        "UPDATE ledger_transactions SET status = 'reversed' WHERE id = ?1",
        [tx_id],
    )?;

    get_transaction(conn, &id)?.ok_or_else(|| CoreError::Fatal("reversal vanished".into()))
}

// ── Async service ───────────────────────────────────────────────────

/// The ledger service. Operations take the already-resolved database
/// handle; the concurrent path serializes per account through the lock
/// manager, acquiring both locks in sorted order.
pub struct Ledger {
    locks: LockManager,
    rates: Arc<ExchangeRates>,
}

impl Ledger {
    pub fn new(rates: Arc<ExchangeRates>) -> Self {
        Ledger {
            locks: LockManager::new(),
            rates,
        }
    }

    pub fn rates(&self) -> &ExchangeRates {
        &self.rates
    }

    pub async fn post(
        &self,
        handle: &DbHandle,
        req: PostRequest,
        ctx: &RequestContext,
    ) -> CoreResult<LedgerTransaction> {
        ctx.check_cancelled()?;
        let from_id = req.from.id();
        let to_id = req.to.id();
        let _guards = self.locks.acquire_pair(&handle.name, &from_id, &to_id).await;
        let conn = handle.db.lock().await;
        post_tx(&conn, &req, ctx)
    }

    /// Resolve a fresh rate and post across currencies in one call.
    pub async fn post_converted(
        &self,
        handle: &DbHandle,
        mut req: PostRequest,
        ctx: &RequestContext,
    ) -> CoreResult<LedgerTransaction> {
        let quote = self
            .rates
            .get_rate(&req.from.currency, &req.to.currency)
            .await?;
        req.conversion = Some(Conversion {
            from_currency: req.from.currency.clone(),
            to_currency: req.to.currency.clone(),
            rate: quote.rate,
            obtained_at: quote.obtained_at,
        });
        self.post(handle, req, ctx).await
    }

    pub async fn hold(
        &self,
        handle: &DbHandle,
        req: HoldRequest,
        ctx: &RequestContext,
    ) -> CoreResult<Hold> {
        ctx.check_cancelled()?;
        let account_id = req.account.id();
        let _guard = self
            .locks
            .acquire(&format!("{}/{}", handle.name, account_id))
            .await;
        let conn = handle.db.lock().await;
        hold_tx(&conn, &req, ctx)
    }

    pub async fn capture(
        &self,
        handle: &DbHandle,
        hold_id: &str,
        to: AccountSpec,
        tx_type: &str,
        external_ref: Option<String>,
        ctx: &RequestContext,
    ) -> CoreResult<LedgerTransaction> {
        ctx.check_cancelled()?;
        let conn = handle.db.lock().await;
        capture_tx(&conn, hold_id, &to, tx_type, external_ref, ctx)
    }

    pub async fn release(&self, handle: &DbHandle, hold_id: &str) -> CoreResult<Hold> {
        let conn = handle.db.lock().await;
        release_tx(&conn, hold_id)
    }

    pub async fn get_balance(&self, handle: &DbHandle, account_id: &str) -> CoreResult<BalanceView> {
        let conn = handle.db.lock().await;
        balance_tx(&conn, account_id)
    }

    pub async fn reverse(
        &self,
        handle: &DbHandle,
        tx_id: &str,
        description: Option<String>,
    ) -> CoreResult<LedgerTransaction> {
        let conn = handle.db.lock().await;
        reverse_tx(&conn, tx_id, description)
    }

    /// Convert an amount between currencies using the rate subservice.
    pub async fn convert(
        &self,
        amount: i64,
        from: &str,
        to: &str,
    ) -> CoreResult<(Money, RateQuote)> {
        let quote = self.rates.get_rate(from, to).await?;
        Ok((Money::new(convert_amount(amount, quote.rate), to), quote))
    }

    pub async fn sweep_expired_holds(&self, handle: &DbHandle) -> CoreResult<usize> {
        let conn = handle.db.lock().await;
        sweep_expired_holds(&conn)
    }
}
