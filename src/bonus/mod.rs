pub mod handler;
pub mod handlers;
pub mod template;
pub mod user_bonus;

use std::sync::Arc;

use rusqlite::Connection;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::context::RequestContext;
use crate::db::DbHandle;
use crate::error::{CoreError, CoreResult};
use crate::events::EventDispatcher;
use crate::ledger::{AccountSpec, Ledger, PostRequest, post_tx};
use crate::model::User;
use crate::model::money::normalize_currency;
use crate::pending::{CreateOptions, PendingStore};

pub use handler::{BonusContext, BonusHandler, Calculated, Eligibility, HandlerRegistry, TriggerData};
pub use template::{BonusTemplate, BonusType, ValueType};
pub use user_bonus::{BonusStatus, BonusTransaction, BonusTxType, UserBonus};

/// Pending-operation type for bonuses awaiting manual approval.
pub const PENDING_BONUS_OP: &str = "bonus";
const PENDING_BONUS_TTL_SECS: u64 = 72 * 3600;

#[derive(Debug, Clone)]
pub enum BonusOutcome {
    Awarded(UserBonus),
    PendingApproval { token: String },
    NotEligible { reason: String },
}

#[derive(Debug, Clone, Copy)]
pub struct PoolCheck {
    pub sufficient: bool,
    pub available: i64,
    pub required: i64,
}

#[derive(Debug, Clone)]
pub struct ActivityRequest {
    pub user_bonus_id: String,
    pub amount: i64,
    pub currency: String,
    pub transaction_id: Option<String>,
    pub activity_category: Option<String>,
}

/// Template-driven bonus evaluation: eligibility → calculation → award,
/// with the award sequence atomic against the service database and the
/// ledger inside it.
pub struct BonusEngine {
    registry: HandlerRegistry,
    ledger: Arc<Ledger>,
    pending: Arc<dyn PendingStore>,
    dispatcher: Arc<EventDispatcher>,
}

impl BonusEngine {
    pub fn new(
        registry: HandlerRegistry,
        ledger: Arc<Ledger>,
        pending: Arc<dyn PendingStore>,
        dispatcher: Arc<EventDispatcher>,
    ) -> Self {
        BonusEngine {
            registry,
            ledger,
            pending,
            dispatcher,
        }
    }

    // ── Pipeline ────────────────────────────────────────────────────

    pub async fn process(
        &self,
        handle: &DbHandle,
        user: User,
        tenant_id: &str,
        bonus_type: BonusType,
        trigger: TriggerData,
        request: RequestContext,
    ) -> CoreResult<BonusOutcome> {
        request.check_cancelled()?;
        let now = chrono::Utc::now().timestamp();

        let template = {
            let conn = handle.db.lock().await;
            template::find_active_template(&conn, tenant_id, bonus_type, now)?
        };
        let Some(template) = template else {
            return Ok(BonusOutcome::NotEligible {
                reason: format!("No active {} template", bonus_type.as_str()),
            });
        };

        let ctx = BonusContext {
            template,
            user,
            tenant_id: tenant_id.to_string(),
            trigger,
            request,
        };
        let handler = self.registry.get(bonus_type);

        if let Eligibility::NotEligible(reason) =
            self.check_eligibility(handle, handler.as_ref(), &ctx).await?
        {
            return Ok(BonusOutcome::NotEligible { reason });
        }

        let calc = calculate(handler.as_ref(), &ctx)?;
        if calc.value <= 0 {
            return Ok(BonusOutcome::NotEligible {
                reason: "Calculated bonus value is zero".to_string(),
            });
        }

        if ctx.template.requires_approval
            && calc.value >= ctx.template.approval_threshold.unwrap_or(0)
        {
            let token = self.create_pending_bonus(&ctx).await?;
            return Ok(BonusOutcome::PendingApproval { token });
        }

        let bonus = self.award(handle, handler.as_ref(), &ctx, None).await?;
        Ok(BonusOutcome::Awarded(bonus))
    }

    /// Common validators in spec order, then the handler's own.
    pub async fn check_eligibility(
        &self,
        handle: &DbHandle,
        handler: &dyn BonusHandler,
        ctx: &BonusContext,
    ) -> CoreResult<Eligibility> {
        let conn = handle.db.lock().await;

        if !ctx.template.supports_currency(&ctx.trigger.currency) {
            return Ok(Eligibility::not_eligible(format!(
                "Currency {} is not supported by this template",
                ctx.trigger.currency
            )));
        }

        if let Some(min_deposit) = ctx.template.min_deposit {
            if ctx.trigger.base_amount.unwrap_or(0) < min_deposit {
                return Ok(Eligibility::not_eligible(format!(
                    "Minimum qualifying amount is {min_deposit}"
                )));
            }
        }

        if let Some(max_per_user) = ctx.template.max_uses_per_user {
            let uses =
                user_bonus::user_uses_of_template(&conn, &ctx.user.id, &ctx.template.id)?;
            if uses >= max_per_user {
                return Ok(Eligibility::not_eligible("Per-user usage limit reached"));
            }
        }

        if let Some(max_total) = ctx.template.max_uses_total {
            if ctx.template.current_uses_total >= max_total {
                return Ok(Eligibility::not_eligible("Template usage limit reached"));
            }
        }

        if let Eligibility::NotEligible(reason) = check_rules(ctx) {
            return Ok(Eligibility::NotEligible(reason));
        }

        handler.validate_specific(&conn, ctx)
    }

    // ── Award ───────────────────────────────────────────────────────

    /// The atomic award sequence. `fixed_id` pins the UserBonus id so a
    /// retried approval re-applies idempotently.
    pub async fn award(
        &self,
        handle: &DbHandle,
        handler: &dyn BonusHandler,
        ctx: &BonusContext,
        fixed_id: Option<String>,
    ) -> CoreResult<UserBonus> {
        let guard = handle.db.clone().lock_owned().await;
        guard.execute_batch("BEGIN IMMEDIATE;")?;
        let outcome = award_tx(&guard, handler, ctx, fixed_id);
        match outcome {
            Ok(bonus) => {
                guard.execute_batch("COMMIT;")?;
                drop(guard);
                self.dispatcher
                    .emit(
                        &ctx.request,
                        "bonus.awarded",
                        &ctx.tenant_id,
                        Some(&ctx.user.id),
                        json!({
                            "user_bonus_id": bonus.id,
                            "template_code": bonus.template_code,
                            "bonus_type": bonus.bonus_type,
                            "value": bonus.original_value,
                            "currency": bonus.currency,
                            "turnover_required": bonus.turnover_required,
                            "expires_at": bonus.expires_at,
                        }),
                    )
                    .await?;
                Ok(bonus)
            }
            Err(err) => {
                if let Err(e) = guard.execute_batch("ROLLBACK;") {
                    tracing::error!(error = %e, "award rollback failed");
                }
                Err(err)
            }
        }
    }

    // ── Approval workflow ───────────────────────────────────────────

    async fn create_pending_bonus(&self, ctx: &BonusContext) -> CoreResult<String> {
        let data = json!({
            "template_id": ctx.template.id,
            "tenant_id": ctx.tenant_id,
            "user_id": ctx.user.id,
            // Pre-generated so a retried approval awards exactly once.
            "award_id": Uuid::new_v4().to_string(),
            "trigger": {
                "base_amount": ctx.trigger.base_amount,
                "currency": ctx.trigger.currency,
                "transaction_id": ctx.trigger.transaction_id,
                "metadata": ctx.trigger.metadata,
            },
        });
        self.pending
            .create(
                PENDING_BONUS_OP,
                data,
                CreateOptions {
                    expires_in_secs: PENDING_BONUS_TTL_SECS,
                    metadata: json!({ "correlation_id": ctx.request.correlation_id }),
                },
            )
            .await
    }

    /// Re-run the award from the stored payload. Safe to retry: the payload
    /// is applied against its original template and pinned award id.
    pub async fn approve_pending(
        &self,
        handle: &DbHandle,
        token: &str,
        request: RequestContext,
    ) -> CoreResult<UserBonus> {
        let verified = self
            .pending
            .verify(token, PENDING_BONUS_OP)
            .await?
            .ok_or_else(|| CoreError::not_found("pending bonus", token))?;

        let data = verified.data;
        let template_id = field_str(&data, "template_id")?;
        let tenant_id = field_str(&data, "tenant_id")?;
        let user_id = field_str(&data, "user_id")?;
        let award_id = field_str(&data, "award_id")?;
        let trigger_value = data.get("trigger").cloned().unwrap_or(Value::Null);

        let (template, user) = {
            let conn = handle.db.lock().await;
            let template = template::get_template(&conn, &template_id)?
                .ok_or_else(|| CoreError::not_found("bonus template", template_id.clone()))?;
            let user = crate::auth::users::get_user(&conn, &user_id)?
                .ok_or_else(|| CoreError::not_found("user", user_id.clone()))?;
            (template, user)
        };

        let trigger = TriggerData {
            base_amount: trigger_value.get("base_amount").and_then(|v| v.as_i64()),
            currency: trigger_value
                .get("currency")
                .and_then(|v| v.as_str())
                .map(normalize_currency)
                .unwrap_or_else(|| template.currency.clone()),
            transaction_id: trigger_value
                .get("transaction_id")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            metadata: trigger_value.get("metadata").cloned().unwrap_or(Value::Null),
        };

        let bonus_type = template.bonus_type;
        let ctx = BonusContext {
            template,
            user,
            tenant_id,
            trigger,
            request,
        };
        let handler = self.registry.get(bonus_type);
        let bonus = self
            .award(handle, handler.as_ref(), &ctx, Some(award_id))
            .await?;

        if let Err(e) = self.pending.delete(token, PENDING_BONUS_OP).await {
            tracing::warn!(error = %e, "failed to delete approved pending bonus token");
        }
        Ok(bonus)
    }

    pub async fn reject_pending(&self, token: &str) -> CoreResult<bool> {
        self.pending.delete(token, PENDING_BONUS_OP).await
    }

    // ── Activity / turnover ─────────────────────────────────────────

    pub async fn record_activity(
        &self,
        handle: &DbHandle,
        req: ActivityRequest,
        request: &RequestContext,
    ) -> CoreResult<UserBonus> {
        request.check_cancelled()?;
        let bonus = {
            let conn = handle.db.lock().await;
            user_bonus::get_user_bonus(&conn, &req.user_bonus_id)?
                .ok_or_else(|| CoreError::not_found("user bonus", req.user_bonus_id.clone()))?
        };
        if !matches!(bonus.status, BonusStatus::Active | BonusStatus::InProgress) {
            return Err(CoreError::Precondition(format!(
                "bonus {} is {} and no longer accrues turnover",
                bonus.id,
                bonus.status.as_str()
            )));
        }

        // Convert before taking any lock; the rate call is remote.
        let currency = normalize_currency(&req.currency);
        let amount = if currency == bonus.currency {
            req.amount
        } else {
            self.ledger
                .convert(req.amount, &currency, &bonus.currency)
                .await?
                .0
                .amount
        };

        let template = {
            let conn = handle.db.lock().await;
            template::get_template(&conn, &bonus.template_id)?
        };
        let percent = template
            .as_ref()
            .and_then(|t| {
                req.activity_category
                    .as_ref()
                    .and_then(|c| t.activity_contributions.get(c).copied())
            })
            .unwrap_or(100.0);
        let contribution = ((amount as f64) * percent / 100.0).floor() as i64;

        let (updated, requirements_met) = {
            let conn = handle.db.lock().await;
            if bonus.status == BonusStatus::Active {
                user_bonus::transition(&conn, &bonus.id, BonusStatus::InProgress, Some("activity"))?;
            }
            let before = bonus.turnover_progress;
            // Progress is clamped at the requirement; overshoot carries no
            // further meaning.
            let after = (before + contribution).min(bonus.turnover_required);
            conn.execute(
                "UPDATE user_bonuses SET turnover_progress = ?1, updated_at = unixepoch() WHERE id = ?2",
                rusqlite::params![after, bonus.id],
            )?;
            user_bonus::insert_bonus_transaction(
                &conn,
                &BonusTransaction {
                    id: Uuid::new_v4().to_string(),
                    user_bonus_id: bonus.id.clone(),
                    user_id: bonus.user_id.clone(),
                    tx_type: BonusTxType::Turnover,
                    amount,
                    balance_before: bonus.current_value,
                    balance_after: bonus.current_value,
                    turnover_before: Some(before),
                    turnover_after: Some(after),
                    turnover_contribution: Some(contribution),
                    activity_category: req.activity_category.clone(),
                    related_transaction_id: req.transaction_id.clone(),
                    created_at: chrono::Utc::now().timestamp(),
                },
            )?;
            let requirements_met = after >= bonus.turnover_required;
            let updated = if requirements_met {
                user_bonus::transition(&conn, &bonus.id, BonusStatus::RequirementsMet, None)?
            } else {
                user_bonus::get_user_bonus(&conn, &bonus.id)?
                    .ok_or_else(|| CoreError::not_found("user bonus", bonus.id.clone()))?
            };
            (updated, requirements_met)
        };

        if requirements_met {
            self.dispatcher
                .emit(
                    request,
                    "bonus.requirements_met",
                    &updated.tenant_id,
                    Some(&updated.user_id),
                    json!({ "user_bonus_id": updated.id }),
                )
                .await?;
        }
        Ok(updated)
    }

    // ── Conversion / forfeiture / expiry ────────────────────────────

    /// Move the matured bonus value into the user's main balance.
    pub async fn convert_bonus(
        &self,
        handle: &DbHandle,
        user_bonus_id: &str,
        request: &RequestContext,
    ) -> CoreResult<UserBonus> {
        let updated = {
            let conn = handle.db.lock().await;
            let bonus = user_bonus::get_user_bonus(&conn, user_bonus_id)?
                .ok_or_else(|| CoreError::not_found("user bonus", user_bonus_id))?;
            if bonus.status != BonusStatus::RequirementsMet {
                return Err(CoreError::Precondition(format!(
                    "bonus {user_bonus_id} has not met its requirements"
                )));
            }
            if bonus.current_value > 0 {
                let from = AccountSpec::user(&bonus.user_id, "bonus", &bonus.currency, &bonus.tenant_id);
                let to = AccountSpec::user(&bonus.user_id, "main", &bonus.currency, &bonus.tenant_id);
                post_tx(
                    &conn,
                    &PostRequest::transfer(from, to, bonus.current_value, &bonus.currency)
                        .with_type("bonus_conversion")
                        .with_external_ref(format!("bonus-convert:{}", bonus.id)),
                    request,
                )?;
            }
            user_bonus::insert_bonus_transaction(
                &conn,
                &BonusTransaction {
                    id: Uuid::new_v4().to_string(),
                    user_bonus_id: bonus.id.clone(),
                    user_id: bonus.user_id.clone(),
                    tx_type: BonusTxType::Conversion,
                    amount: bonus.current_value,
                    balance_before: bonus.current_value,
                    balance_after: 0,
                    turnover_before: None,
                    turnover_after: None,
                    turnover_contribution: None,
                    activity_category: None,
                    related_transaction_id: None,
                    created_at: chrono::Utc::now().timestamp(),
                },
            )?;
            conn.execute(
                "UPDATE user_bonuses SET current_value = 0, updated_at = unixepoch() WHERE id = ?1",
                [&bonus.id],
            )?;
            user_bonus::transition(&conn, &bonus.id, BonusStatus::Converted, None)?
        };

        self.dispatcher
            .emit(
                request,
                "bonus.converted",
                &updated.tenant_id,
                Some(&updated.user_id),
                json!({
                    "user_bonus_id": updated.id,
                    "value": updated.original_value,
                    "currency": updated.currency,
                }),
            )
            .await?;
        Ok(updated)
    }

    pub async fn claim(
        &self,
        handle: &DbHandle,
        user_bonus_id: &str,
        _request: &RequestContext,
    ) -> CoreResult<UserBonus> {
        let conn = handle.db.lock().await;
        user_bonus::transition(&conn, user_bonus_id, BonusStatus::Claimed, None)
    }

    /// Return the remaining value to the pool and close the bonus.
    pub async fn forfeit(
        &self,
        handle: &DbHandle,
        user_bonus_id: &str,
        reason: &str,
        request: &RequestContext,
    ) -> CoreResult<UserBonus> {
        let updated = {
            let conn = handle.db.lock().await;
            let bonus = user_bonus::get_user_bonus(&conn, user_bonus_id)?
                .ok_or_else(|| CoreError::not_found("user bonus", user_bonus_id))?;
            if !bonus.status.is_live() {
                return Err(CoreError::Precondition(format!(
                    "bonus {user_bonus_id} is {} and cannot be forfeited",
                    bonus.status.as_str()
                )));
            }
            forfeit_tx(&conn, &bonus, reason, request, BonusStatus::Forfeited)?
        };
        self.dispatcher
            .emit(
                request,
                "bonus.forfeited",
                &updated.tenant_id,
                Some(&updated.user_id),
                json!({ "user_bonus_id": updated.id, "reason": reason }),
            )
            .await?;
        Ok(updated)
    }

    /// Expire every live bonus past its deadline, returning value to the
    /// pool. Returns the expired ids.
    pub async fn expire_due(
        &self,
        handle: &DbHandle,
        request: &RequestContext,
    ) -> CoreResult<Vec<String>> {
        let now = chrono::Utc::now().timestamp();
        let due: Vec<UserBonus> = {
            let conn = handle.db.lock().await;
            let sql = "SELECT id FROM user_bonuses
                       WHERE status IN ('active', 'in_progress', 'requirements_met')
                         AND expires_at <= ?1";
            let mut stmt = conn.prepare(sql)?;
            let ids: Vec<String> = stmt
                .query_map([now], |row| row.get(0))?
                .collect::<Result<Vec<_>, _>>()?;
            let mut bonuses = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(b) = user_bonus::get_user_bonus(&conn, &id)? {
                    bonuses.push(b);
                }
            }
            bonuses
        };

        let mut expired = Vec::with_capacity(due.len());
        for bonus in due {
            let updated = {
                let conn = handle.db.lock().await;
                forfeit_tx(&conn, &bonus, "expired", request, BonusStatus::Expired)?
            };
            self.dispatcher
                .emit(
                    request,
                    "bonus.expired",
                    &updated.tenant_id,
                    Some(&updated.user_id),
                    json!({ "user_bonus_id": updated.id }),
                )
                .await?;
            expired.push(updated.id);
        }
        Ok(expired)
    }
}

// ── Free functions (sync, run under a connection lock) ──────────────

pub fn calculate(handler: &dyn BonusHandler, ctx: &BonusContext) -> CoreResult<Calculated> {
    let now = chrono::Utc::now().timestamp();
    let value = handler.calculate_value(ctx)?;
    Ok(Calculated {
        value,
        turnover_required: handler.calculate_turnover(ctx, value),
        expires_at: handler.calculate_expiration(ctx, now),
    })
}

/// Template eligibility rules against the user profile.
fn check_rules(ctx: &BonusContext) -> Eligibility {
    let rules = &ctx.template.eligibility;
    if let Some(tiers) = &rules.allowed_tiers {
        let tier = crate::model::json_get_str(&ctx.user.metadata, "tier").unwrap_or("standard");
        if !tiers.iter().any(|t| t == tier) {
            return Eligibility::not_eligible(format!("Tier {tier} is not eligible"));
        }
    }
    if let Some(countries) = &rules.allowed_countries {
        let country = crate::model::json_get_str(&ctx.user.metadata, "country").unwrap_or("");
        if !countries.iter().any(|c| c == country) {
            return Eligibility::not_eligible("Country is not eligible");
        }
    }
    if let Some(min_age_days) = rules.min_account_age_days {
        let age_days = (chrono::Utc::now().timestamp() - ctx.user.created_at) / 86_400;
        if age_days < min_age_days {
            return Eligibility::not_eligible(format!(
                "Account must be at least {min_age_days} days old"
            ));
        }
    }
    if rules.requires_verification && !ctx.user.metadata_flag("verified") {
        return Eligibility::not_eligible("Account verification required");
    }
    Eligibility::Eligible
}

pub fn check_pool_balance(
    conn: &Connection,
    tenant_id: &str,
    currency: &str,
    required: i64,
) -> CoreResult<PoolCheck> {
    let pool = AccountSpec::pool(tenant_id, currency, tenant_id);
    let available = match crate::ledger::account::get_account(conn, &pool.id())? {
        Some(account) => crate::ledger::balance_tx(conn, &account.id)?.available_balance,
        None => 0,
    };
    Ok(PoolCheck {
        sufficient: available >= required,
        available,
        required,
    })
}

fn award_tx(
    conn: &Connection,
    handler: &dyn BonusHandler,
    ctx: &BonusContext,
    fixed_id: Option<String>,
) -> CoreResult<UserBonus> {
    // 1. Recalculate under the lock; the trigger may have gone stale.
    let calc = calculate(handler, ctx)?;
    if calc.value <= 0 {
        return Err(CoreError::Precondition("bonus value is zero".into()));
    }

    let currency = ctx.template.currency.clone();

    // Idempotent re-apply for retried approvals.
    let mut bonus = handler.build_user_bonus(ctx, &calc);
    if let Some(id) = fixed_id {
        if let Some(existing) = user_bonus::get_user_bonus(conn, &id)? {
            return Ok(existing);
        }
        bonus.id = id;
    }

    // 2. Pool guard before touching the ledger.
    let pool_check = check_pool_balance(conn, &ctx.tenant_id, &currency, calc.value)?;
    if !pool_check.sufficient {
        return Err(CoreError::Precondition(format!(
            "bonus pool has {} but {} is required",
            pool_check.available, pool_check.required
        )));
    }

    // 3. Ledger first: if this fails nothing else was written.
    let pool = AccountSpec::pool(&ctx.tenant_id, &currency, &ctx.tenant_id);
    let user_account = AccountSpec::user(&ctx.user.id, "bonus", &currency, &ctx.tenant_id);
    let posting = post_tx(
        conn,
        &PostRequest::transfer(pool, user_account, calc.value, &currency)
            .with_type("bonus_award")
            .with_external_ref(bonus.id.clone())
            .with_description(format!("bonus {}", ctx.template.code)),
        &ctx.request,
    )?;

    // 4. Persist the bonus.
    bonus.wallet_id = Some(posting.to_account_id.clone());
    user_bonus::insert_user_bonus(conn, &bonus)?;
    user_bonus::insert_bonus_transaction(
        conn,
        &BonusTransaction {
            id: Uuid::new_v4().to_string(),
            user_bonus_id: bonus.id.clone(),
            user_id: bonus.user_id.clone(),
            tx_type: BonusTxType::Credit,
            amount: calc.value,
            balance_before: 0,
            balance_after: calc.value,
            turnover_before: Some(0),
            turnover_after: Some(0),
            turnover_contribution: None,
            activity_category: None,
            related_transaction_id: Some(posting.id.clone()),
            created_at: chrono::Utc::now().timestamp(),
        },
    )?;

    // 5. Consume a template use.
    template::increment_uses(conn, &ctx.template.id)?;

    // 6/7. The dispatcher emits after commit; the hook runs inside it.
    handler.on_awarded(conn, ctx, &bonus)?;
    Ok(bonus)
}

/// Shared by forfeit and expiry: return remaining value to the pool,
/// record the bonus transaction, close the bonus.
fn forfeit_tx(
    conn: &Connection,
    bonus: &UserBonus,
    reason: &str,
    request: &RequestContext,
    to_status: BonusStatus,
) -> CoreResult<UserBonus> {
    if bonus.current_value > 0 {
        let from = AccountSpec::user(&bonus.user_id, "bonus", &bonus.currency, &bonus.tenant_id);
        let pool = AccountSpec::pool(&bonus.tenant_id, &bonus.currency, &bonus.tenant_id);
        post_tx(
            conn,
            &PostRequest::transfer(from, pool, bonus.current_value, &bonus.currency)
                .with_type("bonus_forfeit")
                .with_external_ref(format!("bonus-close:{}:{}", to_status.as_str(), bonus.id)),
            request,
        )?;
    }
    user_bonus::insert_bonus_transaction(
        conn,
        &BonusTransaction {
            id: Uuid::new_v4().to_string(),
            user_bonus_id: bonus.id.clone(),
            user_id: bonus.user_id.clone(),
            tx_type: BonusTxType::Forfeit,
            amount: bonus.current_value,
            balance_before: bonus.current_value,
            balance_after: 0,
            turnover_before: None,
            turnover_after: None,
            turnover_contribution: None,
            activity_category: None,
            related_transaction_id: None,
            created_at: chrono::Utc::now().timestamp(),
        },
    )?;
    conn.execute(
        "UPDATE user_bonuses SET current_value = 0, updated_at = unixepoch() WHERE id = ?1",
        [&bonus.id],
    )?;
    user_bonus::transition(conn, &bonus.id, to_status, Some(reason))
}

fn field_str(value: &Value, key: &str) -> CoreResult<String> {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| CoreError::Validation(format!("pending payload missing {key}")))
}
