use std::collections::HashMap;

use rusqlite::Connection;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::model::money::normalize_currency;

/// Every bonus type the platform awards. Most run on the default handler;
/// the types with their own eligibility or value rules have dedicated
/// handlers in `bonus::handlers`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BonusType {
    FirstDeposit,
    Welcome,
    Deposit,
    Reload,
    Cashback,
    Rakeback,
    FirstPurchase,
    FirstAction,
    FreeSpins,
    FreeBet,
    RiskFree,
    Tournament,
    Leaderboard,
    Referral,
    Referee,
    Loyalty,
    Vip,
    Birthday,
    Anniversary,
    Milestone,
    Achievement,
    Streak,
    Combo,
    Insurance,
    OddsBoost,
    Accumulator,
    Registration,
    EmailVerification,
    PhoneVerification,
    KycComplete,
    Retention,
    Winback,
    Seasonal,
    Promotional,
    Airdrop,
    Custom,
}

impl BonusType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BonusType::FirstDeposit => "first_deposit",
            BonusType::Welcome => "welcome",
            BonusType::Deposit => "deposit",
            BonusType::Reload => "reload",
            BonusType::Cashback => "cashback",
            BonusType::Rakeback => "rakeback",
            BonusType::FirstPurchase => "first_purchase",
            BonusType::FirstAction => "first_action",
            BonusType::FreeSpins => "free_spins",
            BonusType::FreeBet => "free_bet",
            BonusType::RiskFree => "risk_free",
            BonusType::Tournament => "tournament",
            BonusType::Leaderboard => "leaderboard",
            BonusType::Referral => "referral",
            BonusType::Referee => "referee",
            BonusType::Loyalty => "loyalty",
            BonusType::Vip => "vip",
            BonusType::Birthday => "birthday",
            BonusType::Anniversary => "anniversary",
            BonusType::Milestone => "milestone",
            BonusType::Achievement => "achievement",
            BonusType::Streak => "streak",
            BonusType::Combo => "combo",
            BonusType::Insurance => "insurance",
            BonusType::OddsBoost => "odds_boost",
            BonusType::Accumulator => "accumulator",
            BonusType::Registration => "registration",
            BonusType::EmailVerification => "email_verification",
            BonusType::PhoneVerification => "phone_verification",
            BonusType::KycComplete => "kyc_complete",
            BonusType::Retention => "retention",
            BonusType::Winback => "winback",
            BonusType::Seasonal => "seasonal",
            BonusType::Promotional => "promotional",
            BonusType::Airdrop => "airdrop",
            BonusType::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> CoreResult<BonusType> {
        serde_json::from_value(Value::String(s.to_string()))
            .map_err(|_| CoreError::Validation(format!("unknown bonus type {s}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Fixed,
    Percentage,
    Multiplier,
    Credit,
    Points,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Fixed => "fixed",
            ValueType::Percentage => "percentage",
            ValueType::Multiplier => "multiplier",
            ValueType::Credit => "credit",
            ValueType::Points => "points",
        }
    }

    pub fn parse(s: &str) -> CoreResult<ValueType> {
        match s {
            "fixed" => Ok(ValueType::Fixed),
            "percentage" => Ok(ValueType::Percentage),
            "multiplier" => Ok(ValueType::Multiplier),
            "credit" => Ok(ValueType::Credit),
            "points" => Ok(ValueType::Points),
            other => Err(CoreError::Validation(format!("unknown value type {other}"))),
        }
    }
}

/// Who may qualify for a template, independent of the trigger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EligibilityRules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tiers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_countries: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_account_age_days: Option<i64>,
    #[serde(default)]
    pub requires_verification: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BonusTemplate {
    pub id: String,
    pub tenant_id: String,
    /// Unique per tenant.
    pub code: String,
    pub name: String,
    pub bonus_type: BonusType,
    pub domain: String,
    pub value_type: ValueType,
    /// Interpreted per `value_type`: percent, multiplier, or minor units.
    pub value: f64,
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supported_currencies: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_deposit: Option<i64>,
    pub turnover_multiplier: f64,
    /// Activity category -> percent of the activity amount that counts
    /// toward turnover. Missing categories count 100%.
    #[serde(default)]
    pub activity_contributions: HashMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_uses_total: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_uses_per_user: Option<i64>,
    #[serde(default)]
    pub current_uses_total: i64,
    #[serde(default)]
    pub eligibility: EligibilityRules,
    #[serde(default)]
    pub stackable: bool,
    #[serde(default)]
    pub excluded_bonus_types: Vec<BonusType>,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_threshold: Option<i64>,
    #[serde(default)]
    pub priority: i32,
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_days: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_hours: Option<i64>,
    /// Tournament position / leaderboard rank -> payout multiplier.
    #[serde(default)]
    pub position_multipliers: HashMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referral_config: Option<Value>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl BonusTemplate {
    /// A minimal template; callers set the type-specific fields they need.
    pub fn new(
        tenant_id: &str,
        code: &str,
        bonus_type: BonusType,
        value_type: ValueType,
        value: f64,
        currency: &str,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        BonusTemplate {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            code: code.to_string(),
            name: code.to_string(),
            bonus_type,
            domain: "payments".to_string(),
            value_type,
            value,
            currency: normalize_currency(currency),
            supported_currencies: None,
            max_value: None,
            min_deposit: None,
            turnover_multiplier: 0.0,
            activity_contributions: HashMap::new(),
            valid_from: None,
            valid_until: None,
            max_uses_total: None,
            max_uses_per_user: None,
            current_uses_total: 0,
            eligibility: EligibilityRules::default(),
            stackable: true,
            excluded_bonus_types: Vec::new(),
            requires_approval: false,
            approval_threshold: None,
            priority: 0,
            is_active: true,
            expiration_days: None,
            cooldown_hours: None,
            position_multipliers: HashMap::new(),
            referral_config: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn supports_currency(&self, currency: &str) -> bool {
        let currency = normalize_currency(currency);
        if self.currency == currency {
            return true;
        }
        self.supported_currencies
            .as_ref()
            .is_some_and(|list| list.iter().any(|c| normalize_currency(c) == currency))
    }

    pub fn in_window(&self, now: i64) -> bool {
        if let Some(from) = self.valid_from {
            if now < from {
                return false;
            }
        }
        if let Some(until) = self.valid_until {
            if now > until {
                return false;
            }
        }
        true
    }

    pub fn position_multiplier(&self, position: i64) -> f64 {
        self.position_multipliers
            .get(&position.to_string())
            .copied()
            .unwrap_or(0.0)
    }
}

// ── Storage ─────────────────────────────────────────────────────────

pub fn insert_template(conn: &Connection, t: &BonusTemplate) -> CoreResult<()> {
    conn.execute(
        "INSERT INTO bonus_templates
             (id, tenant_id, code, name, bonus_type, domain, value_type, value, currency,
              supported_currencies, max_value, min_deposit, turnover_multiplier,
              activity_contributions, valid_from, valid_until, max_uses_total,
              max_uses_per_user, current_uses_total, eligibility, stackable,
              excluded_bonus_types, requires_approval, approval_threshold, priority,
              is_active, expiration_days, cooldown_hours, position_multipliers,
              referral_config, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                 ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30,
                 ?31, ?32)",
        rusqlite::params![
            t.id,
            t.tenant_id,
            t.code,
            t.name,
            t.bonus_type.as_str(),
            t.domain,
            t.value_type.as_str(),
            t.value,
            t.currency,
            t.supported_currencies
                .as_ref()
                .map(|v| serde_json::to_string(v).unwrap_or_default()),
            t.max_value,
            t.min_deposit,
            t.turnover_multiplier,
            serde_json::to_string(&t.activity_contributions)?,
            t.valid_from,
            t.valid_until,
            t.max_uses_total,
            t.max_uses_per_user,
            t.current_uses_total,
            serde_json::to_string(&t.eligibility)?,
            t.stackable as i64,
            serde_json::to_string(&t.excluded_bonus_types)?,
            t.requires_approval as i64,
            t.approval_threshold,
            t.priority,
            t.is_active as i64,
            t.expiration_days,
            t.cooldown_hours,
            serde_json::to_string(&t.position_multipliers)?,
            t.referral_config.as_ref().map(|v| v.to_string()),
            t.created_at,
            t.updated_at,
        ],
    )?;
    Ok(())
}

fn map_template_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<BonusTemplate> {
    let bonus_type: String = row.get(4)?;
    let value_type: String = row.get(6)?;
    let supported: Option<String> = row.get(9)?;
    let contributions: String = row.get(13)?;
    let eligibility: String = row.get(19)?;
    let excluded: String = row.get(21)?;
    let positions: String = row.get(28)?;
    let referral: Option<String> = row.get(29)?;
    Ok(BonusTemplate {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        code: row.get(2)?,
        name: row.get(3)?,
        bonus_type: BonusType::parse(&bonus_type).unwrap_or(BonusType::Custom),
        domain: row.get(5)?,
        value_type: ValueType::parse(&value_type).unwrap_or(ValueType::Fixed),
        value: row.get(7)?,
        currency: row.get(8)?,
        supported_currencies: supported.and_then(|s| serde_json::from_str(&s).ok()),
        max_value: row.get(10)?,
        min_deposit: row.get(11)?,
        turnover_multiplier: row.get(12)?,
        activity_contributions: serde_json::from_str(&contributions).unwrap_or_default(),
        valid_from: row.get(14)?,
        valid_until: row.get(15)?,
        max_uses_total: row.get(16)?,
        max_uses_per_user: row.get(17)?,
        current_uses_total: row.get(18)?,
        eligibility: serde_json::from_str(&eligibility).unwrap_or_default(),
        stackable: row.get::<_, i64>(20)? != 0,
        excluded_bonus_types: serde_json::from_str(&excluded).unwrap_or_default(),
        requires_approval: row.get::<_, i64>(22)? != 0,
        approval_threshold: row.get(23)?,
        priority: row.get(24)?,
        is_active: row.get::<_, i64>(25)? != 0,
        expiration_days: row.get(26)?,
        cooldown_hours: row.get(27)?,
        position_multipliers: serde_json::from_str(&positions).unwrap_or_default(),
        referral_config: referral.and_then(|s| serde_json::from_str(&s).ok()),
        created_at: row.get(30)?,
        updated_at: row.get(31)?,
    })
}

const TEMPLATE_COLUMNS: &str =
    "id, tenant_id, code, name, bonus_type, domain, value_type, value, currency,
     supported_currencies, max_value, min_deposit, turnover_multiplier,
     activity_contributions, valid_from, valid_until, max_uses_total, max_uses_per_user,
     current_uses_total, eligibility, stackable, excluded_bonus_types, requires_approval,
     approval_threshold, priority, is_active, expiration_days, cooldown_hours,
     position_multipliers, referral_config, created_at, updated_at";

pub fn get_template(conn: &Connection, id: &str) -> CoreResult<Option<BonusTemplate>> {
    let sql = format!("SELECT {TEMPLATE_COLUMNS} FROM bonus_templates WHERE id = ?1");
    let row = conn
        .query_row(&sql, [id], map_template_row)
        .map(Some)
        .or_else(crate::registry::ignore_not_found)?;
    Ok(row)
}

pub fn get_template_by_code(
    conn: &Connection,
    tenant_id: &str,
    code: &str,
) -> CoreResult<Option<BonusTemplate>> {
    let sql =
        format!("SELECT {TEMPLATE_COLUMNS} FROM bonus_templates WHERE tenant_id = ?1 AND code = ?2");
    let row = conn
        .query_row(&sql, [tenant_id, code], map_template_row)
        .map(Some)
        .or_else(crate::registry::ignore_not_found)?;
    Ok(row)
}

/// The active template for a type, highest priority first. Window and
/// activity filters match `check_eligibility` step 1.
pub fn find_active_template(
    conn: &Connection,
    tenant_id: &str,
    bonus_type: BonusType,
    now: i64,
) -> CoreResult<Option<BonusTemplate>> {
    let sql = format!(
        "SELECT {TEMPLATE_COLUMNS} FROM bonus_templates
         WHERE tenant_id = ?1 AND bonus_type = ?2 AND is_active = 1
           AND (valid_from IS NULL OR valid_from <= ?3)
           AND (valid_until IS NULL OR valid_until >= ?3)
         ORDER BY priority DESC, created_at DESC LIMIT 1"
    );
    let row = conn
        .query_row(
            &sql,
            rusqlite::params![tenant_id, bonus_type.as_str(), now],
            map_template_row,
        )
        .map(Some)
        .or_else(crate::registry::ignore_not_found)?;
    Ok(row)
}

pub fn list_templates(conn: &Connection, tenant_id: &str) -> CoreResult<Vec<BonusTemplate>> {
    let sql = format!(
        "SELECT {TEMPLATE_COLUMNS} FROM bonus_templates
         WHERE tenant_id = ?1 ORDER BY priority DESC, code"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([tenant_id], map_template_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Bump total uses, guarded against the cap so two racing awards cannot
/// both take the last slot.
pub fn increment_uses(conn: &Connection, template_id: &str) -> CoreResult<()> {
    let affected = conn.execute(
        "UPDATE bonus_templates
         SET current_uses_total = current_uses_total + 1, updated_at = unixepoch()
         WHERE id = ?1
           AND (max_uses_total IS NULL OR current_uses_total < max_uses_total)",
        [template_id],
    )?;
    if affected == 0 {
        return Err(CoreError::Precondition(format!(
            "template {template_id} has no uses left"
        )));
    }
    Ok(())
}
