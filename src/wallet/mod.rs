use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::Connection;
use schemars::JsonSchema;
use serde::Serialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::bonus::{BonusEngine, BonusOutcome, BonusType, TriggerData};
use crate::context::RequestContext;
use crate::db::DbHandle;
use crate::error::{CoreError, CoreResult};
use crate::events::EventDispatcher;
use crate::ledger::{
    AccountSpec, HoldRequest, Ledger, LedgerTransaction, capture_tx, hold_tx, release_tx,
};
use crate::model::User;
use crate::model::money::normalize_currency;
use crate::saga::{SagaContext, SagaOptions, SagaResult, SagaStep, execute_saga};

/// Hold lifetime while a deposit or withdrawal talks to the processor.
const PAYMENT_HOLD_SECS: i64 = 900;

/// The treasury float: counterparty of money entering or leaving the
/// platform, allowed negative by construction.
pub fn treasury(currency: &str) -> AccountSpec {
    AccountSpec::system("treasury", "main", currency)
}

// ── External processor seam ─────────────────────────────

/// The payment processor is an external collaborator; the core only knows
/// this interface.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn charge(
        &self,
        user_id: &str,
        amount: i64,
        currency: &str,
        reference: &str,
    ) -> CoreResult<String>;

    async fn refund(&self, processor_ref: &str) -> CoreResult<()>;

    async fn payout(
        &self,
        user_id: &str,
        amount: i64,
        currency: &str,
        reference: &str,
    ) -> CoreResult<String>;
}

/// Always-approving processor for development and tests.
pub struct StubProcessor;

#[async_trait]
impl PaymentProcessor for StubProcessor {
    async fn charge(
        &self,
        _user_id: &str,
        _amount: i64,
        _currency: &str,
        reference: &str,
    ) -> CoreResult<String> {
        Ok(format!("stub-charge:{reference}"))
    }

    async fn refund(&self, _processor_ref: &str) -> CoreResult<()> {
        Ok(())
    }

    async fn payout(
        &self,
        _user_id: &str,
        _amount: i64,
        _currency: &str,
        reference: &str,
    ) -> CoreResult<String> {
        Ok(format!("stub-payout:{reference}"))
    }
}

// ── Projection ──────────────────────────────────────────

/// The user-facing view over the ledger: real, bonus and locked balances
/// plus lifetime stats from the wallets table.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct Wallet {
    pub id: String,
    pub user_id: String,
    pub tenant_id: String,
    pub currency: String,
    pub category: String,
    pub balance: i64,
    pub bonus_balance: i64,
    pub locked_balance: i64,
    pub available_balance: i64,
    pub status: String,
    pub allow_negative: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credit_limit: Option<i64>,
    pub lifetime_deposited: i64,
    pub lifetime_withdrawn: i64,
    pub lifetime_bonus: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity_at: Option<i64>,
}

fn ensure_wallet_row(
    conn: &Connection,
    user_id: &str,
    tenant_id: &str,
    currency: &str,
) -> CoreResult<String> {
    conn.execute(
        "INSERT OR IGNORE INTO wallets (id, user_id, tenant_id, currency) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![Uuid::new_v4().to_string(), user_id, tenant_id, currency],
    )?;
    let id: String = conn.query_row(
        "SELECT id FROM wallets WHERE user_id = ?1 AND currency = ?2 AND category = 'main'",
        [user_id, currency],
        |row| row.get(0),
    )?;
    Ok(id)
}

fn bump_wallet_stats(
    conn: &Connection,
    user_id: &str,
    tenant_id: &str,
    currency: &str,
    column: &str,
    delta: i64,
) -> CoreResult<()> {
    ensure_wallet_row(conn, user_id, tenant_id, currency)?;
    let sql = format!(
        "UPDATE wallets SET {column} = {column} + ?1, last_activity_at = unixepoch(),
                updated_at = unixepoch()
         WHERE user_id = ?2 AND currency = ?3 AND category = 'main'"
    );
    conn.execute(&sql, rusqlite::params![delta, user_id, currency])?;
    Ok(())
}

pub fn get_wallet(
    conn: &Connection,
    user_id: &str,
    tenant_id: &str,
    currency: &str,
) -> CoreResult<Wallet> {
    let currency = normalize_currency(currency);
    let id = ensure_wallet_row(conn, user_id, tenant_id, &currency)?;

    let main = AccountSpec::user(user_id, "main", &currency, tenant_id);
    let bonus = AccountSpec::user(user_id, "bonus", &currency, tenant_id);
    let (balance, locked) = match crate::ledger::account::get_account(conn, &main.id())? {
        Some(account) => {
            let view = crate::ledger::balance_tx(conn, &account.id)?;
            (view.balance, view.pending_out)
        }
        None => (0, 0),
    };
    let bonus_balance = crate::ledger::account::get_account(conn, &bonus.id())?
        .map(|a| a.balance)
        .unwrap_or(0);

    let row = conn.query_row(
        "SELECT status, allow_negative, credit_limit, lifetime_deposited, lifetime_withdrawn,
                lifetime_bonus, last_activity_at
         FROM wallets WHERE id = ?1",
        [&id],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Option<i64>>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, Option<i64>>(6)?,
            ))
        },
    )?;
    let (status, allow_negative, credit_limit, deposited, withdrawn, lifetime_bonus, last_activity) =
        row;

    Ok(Wallet {
        id,
        user_id: user_id.to_string(),
        tenant_id: tenant_id.to_string(),
        currency,
        category: "main".to_string(),
        balance,
        bonus_balance,
        locked_balance: locked,
        available_balance: balance - locked + if allow_negative != 0 { credit_limit.unwrap_or(0) } else { 0 },
        status,
        allow_negative: allow_negative != 0,
        credit_limit,
        lifetime_deposited: deposited,
        lifetime_withdrawn: withdrawn,
        lifetime_bonus,
        last_activity_at: last_activity,
    })
}

// ── Saga steps ──────────────────────────────────────────

struct ReserveFloatStep {
    account: AccountSpec,
    amount: i64,
    currency: String,
    reason: String,
}

#[async_trait]
impl SagaStep for ReserveFloatStep {
    fn name(&self) -> &str {
        "reserve-hold"
    }

    async fn execute(&self, ctx: &mut SagaContext) -> CoreResult<()> {
        let request = ctx.request.clone();
        let req = HoldRequest {
            account: self.account.clone(),
            amount: self.amount,
            currency: self.currency.clone(),
            reason: self.reason.clone(),
            expires_at: Some(chrono::Utc::now().timestamp() + PAYMENT_HOLD_SECS),
        };
        let hold = ctx.with_db(move |conn| hold_tx(conn, &req, &request)).await?;
        ctx.put("hold_id", Value::String(hold.id));
        Ok(())
    }

    async fn compensate(&self, ctx: &mut SagaContext) -> CoreResult<()> {
        let Some(hold_id) = ctx.get_str("hold_id").map(|s| s.to_string()) else {
            return Ok(());
        };
        ctx.with_db(move |conn| release_tx(conn, &hold_id).map(|_| ()))
            .await
    }
}

struct ProcessorStep {
    processor: Arc<dyn PaymentProcessor>,
    user_id: String,
    amount: i64,
    currency: String,
    payout: bool,
}

#[async_trait]
impl SagaStep for ProcessorStep {
    fn name(&self) -> &str {
        if self.payout { "processor-payout" } else { "processor-charge" }
    }

    async fn execute(&self, ctx: &mut SagaContext) -> CoreResult<()> {
        let reference = ctx.saga_id.clone();
        let processor_ref = if self.payout {
            self.processor
                .payout(&self.user_id, self.amount, &self.currency, &reference)
                .await?
        } else {
            self.processor
                .charge(&self.user_id, self.amount, &self.currency, &reference)
                .await?
        };
        ctx.put("processor_ref", Value::String(processor_ref));
        Ok(())
    }

    async fn compensate(&self, ctx: &mut SagaContext) -> CoreResult<()> {
        if let Some(processor_ref) = ctx.get_str("processor_ref").map(|s| s.to_string()) {
            self.processor.refund(&processor_ref).await?;
        }
        Ok(())
    }
}

struct CaptureStep {
    to: AccountSpec,
    tx_type: String,
    event_type: String,
    user_id: String,
    tenant_id: String,
    amount: i64,
    currency: String,
    stats_column: &'static str,
}

#[async_trait]
impl SagaStep for CaptureStep {
    fn name(&self) -> &str {
        "capture-posting"
    }

    async fn execute(&self, ctx: &mut SagaContext) -> CoreResult<()> {
        let hold_id = ctx
            .get_str("hold_id")
            .ok_or_else(|| CoreError::Fatal("capture without a hold".into()))?
            .to_string();
        let request = ctx.request.clone();
        let to = self.to.clone();
        let tx_type = self.tx_type.clone();
        let external_ref = ctx.saga_id.clone();
        let (user_id, tenant_id, currency, amount, column) = (
            self.user_id.clone(),
            self.tenant_id.clone(),
            self.currency.clone(),
            self.amount,
            self.stats_column,
        );
        let posted = ctx
            .with_db(move |conn| {
                let posted =
                    capture_tx(conn, &hold_id, &to, &tx_type, Some(external_ref), &request)?;
                bump_wallet_stats(conn, &user_id, &tenant_id, &currency, column, amount)?;
                Ok(posted)
            })
            .await?;
        ctx.put("transaction_id", Value::String(posted.id.clone()));
        ctx.queue_event(
            self.event_type.clone(),
            json!({
                "transaction_id": posted.id,
                "user_id": self.user_id,
                "amount": self.amount,
                "currency": self.currency,
            }),
        );
        Ok(())
    }
    // A completed capture only unwinds with the whole saga when it runs
    // inside a transaction; on the compensation path it is the final step.
}

// ── Service ─────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub user_id: String,
    pub tenant_id: String,
    pub amount: i64,
    pub currency: String,
    /// Caller-supplied idempotency key; defaults to a fresh saga id.
    pub saga_id: Option<String>,
}

#[derive(Debug)]
pub struct PaymentOutcome {
    pub saga: SagaResult,
    pub transaction: Option<LedgerTransaction>,
    pub bonuses: Vec<BonusOutcome>,
}

pub struct WalletService {
    ledger: Arc<Ledger>,
    bonus: Arc<BonusEngine>,
    dispatcher: Arc<EventDispatcher>,
    processor: Arc<dyn PaymentProcessor>,
}

impl WalletService {
    pub fn new(
        ledger: Arc<Ledger>,
        bonus: Arc<BonusEngine>,
        dispatcher: Arc<EventDispatcher>,
        processor: Arc<dyn PaymentProcessor>,
    ) -> Self {
        WalletService {
            ledger,
            bonus,
            dispatcher,
            processor,
        }
    }

    /// Deposit saga: earmark treasury float, charge the processor, capture
    /// into the user's main balance, then run the deposit-triggered bonus
    /// pipeline.
    pub async fn deposit(
        &self,
        handle: &DbHandle,
        user: &User,
        req: PaymentRequest,
        request: RequestContext,
    ) -> CoreResult<PaymentOutcome> {
        if req.amount <= 0 {
            return Err(CoreError::Validation("deposit amount must be positive".into()));
        }
        let currency = normalize_currency(&req.currency);

        // A redelivered saga id returns the committed outcome untouched.
        if let Some(existing) = self.replayed(handle, req.saga_id.as_deref()).await? {
            return Ok(existing);
        }

        let steps: Vec<Box<dyn SagaStep>> = vec![
            Box::new(ReserveFloatStep {
                account: treasury(&currency),
                amount: req.amount,
                currency: currency.clone(),
                reason: format!("deposit for {}", req.user_id),
            }),
            Box::new(ProcessorStep {
                processor: self.processor.clone(),
                user_id: req.user_id.clone(),
                amount: req.amount,
                currency: currency.clone(),
                payout: false,
            }),
            Box::new(CaptureStep {
                to: AccountSpec::user(&req.user_id, "main", &currency, &req.tenant_id),
                tx_type: "deposit".to_string(),
                event_type: "wallet.deposit.completed".to_string(),
                user_id: req.user_id.clone(),
                tenant_id: req.tenant_id.clone(),
                amount: req.amount,
                currency: currency.clone(),
                stats_column: "lifetime_deposited",
            }),
        ];

        let saga = execute_saga(
            &steps,
            json!({ "user_id": req.user_id, "amount": req.amount, "currency": currency }),
            req.saga_id.clone(),
            handle.db.clone(),
            request.clone(),
            SagaOptions::default(),
        )
        .await;

        if !saga.success {
            return Ok(PaymentOutcome {
                saga,
                transaction: None,
                bonuses: Vec::new(),
            });
        }

        let was_first_deposit = !user.metadata_flag("has_made_first_deposit");
        let transaction = {
            let conn = handle.db.lock().await;
            crate::auth::users::set_metadata_flag(
                &conn,
                &req.user_id,
                "has_made_first_deposit",
                true,
            )?;
            saga.context
                .get("transaction_id")
                .and_then(|v| v.as_str())
                .map(|id| crate::ledger::get_transaction(&conn, id))
                .transpose()?
                .flatten()
        };

        let mut saga = saga;
        let queued = std::mem::take(&mut saga.queued_events);
        self.dispatcher
            .emit_queued(&request, &req.tenant_id, Some(&req.user_id), queued)
            .await?;

        let bonuses = self
            .run_deposit_bonuses(handle, user, &req, &currency, was_first_deposit, &request, transaction.as_ref())
            .await?;

        Ok(PaymentOutcome {
            saga,
            transaction,
            bonuses,
        })
    }

    /// The in-process consumer of `wallet.deposit.completed`: evaluates
    /// deposit-triggered bonus types in priority order. First-deposit and
    /// welcome exclude each other, so the first award of the pair wins.
    async fn run_deposit_bonuses(
        &self,
        handle: &DbHandle,
        user: &User,
        req: &PaymentRequest,
        currency: &str,
        was_first_deposit: bool,
        request: &RequestContext,
        transaction: Option<&LedgerTransaction>,
    ) -> CoreResult<Vec<BonusOutcome>> {
        let mut candidates: Vec<BonusType> = Vec::new();
        if was_first_deposit {
            candidates.push(BonusType::FirstDeposit);
            candidates.push(BonusType::Welcome);
        }
        candidates.push(BonusType::Reload);
        candidates.push(BonusType::Deposit);

        let mut outcomes = Vec::new();
        let mut welcome_family_awarded = false;
        for bonus_type in candidates {
            let exclusive = matches!(bonus_type, BonusType::FirstDeposit | BonusType::Welcome);
            if exclusive && welcome_family_awarded {
                continue;
            }
            let trigger = TriggerData::deposit(
                req.amount,
                currency,
                transaction.map(|t| t.id.clone()),
            );
            // The deposit is already committed; a failed award degrades to
            // "no bonus" instead of failing the whole mutation.
            let outcome = match self
                .bonus
                .process(
                    handle,
                    user.clone(),
                    &req.tenant_id,
                    bonus_type,
                    trigger,
                    request.clone(),
                )
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!(
                        bonus_type = bonus_type.as_str(),
                        user_id = %req.user_id,
                        error = %e,
                        "bonus evaluation failed after deposit"
                    );
                    continue;
                }
            };
            if exclusive && matches!(outcome, BonusOutcome::Awarded(_)) {
                welcome_family_awarded = true;
            }
            if !matches!(outcome, BonusOutcome::NotEligible { .. }) {
                outcomes.push(outcome);
            }
        }
        Ok(outcomes)
    }

    /// Withdrawal saga: hold the user's funds, pay out, capture to
    /// treasury.
    pub async fn withdraw(
        &self,
        handle: &DbHandle,
        req: PaymentRequest,
        request: RequestContext,
    ) -> CoreResult<PaymentOutcome> {
        if req.amount <= 0 {
            return Err(CoreError::Validation("withdrawal amount must be positive".into()));
        }
        let currency = normalize_currency(&req.currency);

        if let Some(existing) = self.replayed(handle, req.saga_id.as_deref()).await? {
            return Ok(existing);
        }

        let steps: Vec<Box<dyn SagaStep>> = vec![
            Box::new(ReserveFloatStep {
                account: AccountSpec::user(&req.user_id, "main", &currency, &req.tenant_id),
                amount: req.amount,
                currency: currency.clone(),
                reason: format!("withdrawal for {}", req.user_id),
            }),
            Box::new(ProcessorStep {
                processor: self.processor.clone(),
                user_id: req.user_id.clone(),
                amount: req.amount,
                currency: currency.clone(),
                payout: true,
            }),
            Box::new(CaptureStep {
                to: treasury(&currency),
                tx_type: "withdrawal".to_string(),
                event_type: "wallet.withdrawal.completed".to_string(),
                user_id: req.user_id.clone(),
                tenant_id: req.tenant_id.clone(),
                amount: req.amount,
                currency: currency.clone(),
                stats_column: "lifetime_withdrawn",
            }),
        ];

        let mut saga = execute_saga(
            &steps,
            json!({ "user_id": req.user_id, "amount": req.amount, "currency": currency }),
            req.saga_id.clone(),
            handle.db.clone(),
            request.clone(),
            SagaOptions::default(),
        )
        .await;

        let transaction = if saga.success {
            let queued = std::mem::take(&mut saga.queued_events);
            self.dispatcher
                .emit_queued(&request, &req.tenant_id, Some(&req.user_id), queued)
                .await?;
            let conn = handle.db.lock().await;
            saga.context
                .get("transaction_id")
                .and_then(|v| v.as_str())
                .map(|id| crate::ledger::get_transaction(&conn, id))
                .transpose()?
                .flatten()
        } else {
            None
        };

        Ok(PaymentOutcome {
            saga,
            transaction,
            bonuses: Vec::new(),
        })
    }

    /// The committed outcome for a saga id that already ran, if any.
    async fn replayed(
        &self,
        handle: &DbHandle,
        saga_id: Option<&str>,
    ) -> CoreResult<Option<PaymentOutcome>> {
        let Some(saga_id) = saga_id else {
            return Ok(None);
        };
        let existing = {
            let conn = handle.db.lock().await;
            crate::ledger::find_by_external_ref(&conn, saga_id)?
        };
        Ok(existing.map(|transaction| PaymentOutcome {
            saga: SagaResult {
                success: true,
                saga_id: saga_id.to_string(),
                context: json!({ "replayed": true }),
                error: None,
                error_code: None,
                execution_time_ms: 0,
                queued_events: Vec::new(),
            },
            transaction: Some(transaction),
            bonuses: Vec::new(),
        }))
    }

    /// Reverse a committed deposit: opposing posting, both rows retained,
    /// `wallet.deposit.reversed` emitted.
    pub async fn reverse_deposit(
        &self,
        handle: &DbHandle,
        tx_id: &str,
        tenant_id: &str,
        user_id: &str,
        request: &RequestContext,
    ) -> CoreResult<LedgerTransaction> {
        let reversal = self
            .ledger
            .reverse(handle, tx_id, Some("deposit reversal".to_string()))
            .await?;
        self.dispatcher
            .emit(
                request,
                "wallet.deposit.reversed",
                tenant_id,
                Some(user_id),
                json!({
                    "original_transaction_id": tx_id,
                    "reversal_transaction_id": reversal.id,
                    "amount": reversal.amount,
                    "currency": reversal.currency,
                }),
            )
            .await?;
        Ok(reversal)
    }

    pub async fn wallet(
        &self,
        handle: &DbHandle,
        user_id: &str,
        tenant_id: &str,
        currency: &str,
    ) -> CoreResult<Wallet> {
        let conn = handle.db.lock().await;
        get_wallet(&conn, user_id, tenant_id, currency)
    }
}
