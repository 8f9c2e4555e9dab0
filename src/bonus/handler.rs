use std::collections::HashMap;
use std::sync::Arc;

use rusqlite::Connection;
use serde_json::Value;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::error::{CoreError, CoreResult};
use crate::model::User;
use crate::model::money::normalize_currency;

use super::template::{BonusTemplate, BonusType, ValueType};
use super::user_bonus::{BonusStatus, StatusHistoryEntry, UserBonus};

/// What triggered the bonus evaluation: a deposit, a purchase, a tournament
/// result. Type-specific inputs ride in `metadata`.
#[derive(Debug, Clone)]
pub struct TriggerData {
    /// Deposit / purchase amount in `currency` minor units, when the
    /// trigger carries one.
    pub base_amount: Option<i64>,
    pub currency: String,
    pub transaction_id: Option<String>,
    pub metadata: Value,
}

impl TriggerData {
    pub fn deposit(amount: i64, currency: &str, transaction_id: Option<String>) -> Self {
        TriggerData {
            base_amount: Some(amount),
            currency: normalize_currency(currency),
            transaction_id,
            metadata: Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key)?.as_str()
    }

    pub fn meta_i64(&self, key: &str) -> Option<i64> {
        self.metadata.get(key)?.as_i64()
    }
}

/// Everything a handler needs to evaluate one candidate award.
#[derive(Debug, Clone)]
pub struct BonusContext {
    pub template: BonusTemplate,
    pub user: User,
    pub tenant_id: String,
    pub trigger: TriggerData,
    pub request: RequestContext,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Eligibility {
    Eligible,
    NotEligible(String),
}

impl Eligibility {
    pub fn not_eligible(reason: impl Into<String>) -> Self {
        Eligibility::NotEligible(reason.into())
    }
}

/// Output of the calculation phase, re-run inside `award`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calculated {
    pub value: i64,
    pub turnover_required: i64,
    pub expires_at: i64,
}

const DEFAULT_EXPIRATION_DAYS: i64 = 30;

/// The template method every bonus type runs: shared behaviour lives in
/// these default bodies, a concrete handler overrides only the hooks it
/// needs.
pub trait BonusHandler: Send + Sync {
    /// Type-specific eligibility beyond the common validators.
    fn validate_specific(
        &self,
        _conn: &Connection,
        _ctx: &BonusContext,
    ) -> CoreResult<Eligibility> {
        Ok(Eligibility::Eligible)
    }

    fn calculate_value(&self, ctx: &BonusContext) -> CoreResult<i64> {
        Ok(default_value(&ctx.template, ctx.trigger.base_amount.unwrap_or(0)))
    }

    fn calculate_turnover(&self, ctx: &BonusContext, value: i64) -> i64 {
        (value as f64 * ctx.template.turnover_multiplier).floor() as i64
    }

    fn calculate_expiration(&self, ctx: &BonusContext, now: i64) -> i64 {
        let days = ctx.template.expiration_days.unwrap_or(DEFAULT_EXPIRATION_DAYS);
        now + days * 86_400
    }

    fn build_user_bonus(&self, ctx: &BonusContext, calc: &Calculated) -> UserBonus {
        default_user_bonus(ctx, calc)
    }

    /// Runs inside the award transaction, after the bonus row is written.
    fn on_awarded(
        &self,
        _conn: &Connection,
        _ctx: &BonusContext,
        _bonus: &UserBonus,
    ) -> CoreResult<()> {
        Ok(())
    }
}

/// Shared value math: percentages and multipliers scale the trigger amount
/// and respect `max_value`; fixed-style types pay the template value.
pub fn default_value(template: &BonusTemplate, base: i64) -> i64 {
    let raw = match template.value_type {
        ValueType::Percentage => ((base as f64) * template.value / 100.0).floor() as i64,
        ValueType::Multiplier => ((base as f64) * template.value).floor() as i64,
        ValueType::Fixed | ValueType::Credit | ValueType::Points => template.value.floor() as i64,
    };
    match (template.value_type, template.max_value) {
        (ValueType::Percentage | ValueType::Multiplier, Some(cap)) => raw.min(cap),
        _ => raw,
    }
}

pub fn default_user_bonus(ctx: &BonusContext, calc: &Calculated) -> UserBonus {
    let now = chrono::Utc::now().timestamp();
    UserBonus {
        id: Uuid::new_v4().to_string(),
        user_id: ctx.user.id.clone(),
        tenant_id: ctx.tenant_id.clone(),
        template_id: ctx.template.id.clone(),
        template_code: ctx.template.code.clone(),
        bonus_type: ctx.template.bonus_type,
        domain: ctx.template.domain.clone(),
        status: BonusStatus::Active,
        currency: ctx.template.currency.clone(),
        original_value: calc.value,
        current_value: calc.value,
        turnover_required: calc.turnover_required,
        turnover_progress: 0,
        wallet_id: None,
        trigger_transaction_id: ctx.trigger.transaction_id.clone(),
        referrer_id: ctx.trigger.meta_str("referrer_id").map(|s| s.to_string()),
        referee_id: ctx.trigger.meta_str("referee_id").map(|s| s.to_string()),
        qualified_at: Some(now),
        claimed_at: None,
        activated_at: Some(now),
        completed_at: None,
        converted_at: None,
        forfeited_at: None,
        expires_at: calc.expires_at,
        history: vec![StatusHistoryEntry {
            status: BonusStatus::Active,
            at: now,
            note: Some("awarded".to_string()),
        }],
        metadata: ctx.trigger.metadata.clone(),
        created_at: now,
        updated_at: now,
    }
}

/// Fallback for every type without a dedicated handler.
pub struct DefaultHandler;

impl BonusHandler for DefaultHandler {}

/// Handlers keyed on `BonusType`, built once at startup.
pub struct HandlerRegistry {
    handlers: HashMap<BonusType, Arc<dyn BonusHandler>>,
    fallback: Arc<dyn BonusHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        HandlerRegistry {
            handlers: HashMap::new(),
            fallback: Arc::new(DefaultHandler),
        }
    }

    pub fn register(&mut self, bonus_type: BonusType, handler: Arc<dyn BonusHandler>) {
        self.handlers.insert(bonus_type, handler);
    }

    pub fn get(&self, bonus_type: BonusType) -> Arc<dyn BonusHandler> {
        self.handlers
            .get(&bonus_type)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Position/rank-multiplier math shared by the tournament and leaderboard
/// handlers.
pub fn ranked_value(template: &BonusTemplate, position: i64) -> CoreResult<i64> {
    if position < 1 {
        return Err(CoreError::Validation(format!(
            "position must be >= 1, got {position}"
        )));
    }
    let base = template.value.floor() as i64;
    let multiplier = template.position_multiplier(position);
    Ok(((base as f64) * multiplier).floor() as i64)
}
