use rusqlite::Connection;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, CoreResult};

use super::template::BonusType;

/// Lifecycle of an awarded bonus.
///
/// ```text
///  pending → active → in_progress → requirements_met → converted → claimed
///                \         \               \
///                 \         +→ forfeited    +→ forfeited / expired
///                  +→ locked ⇄ (active | in_progress | requirements_met)
///                        \
///                         +→ cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BonusStatus {
    Pending,
    Active,
    InProgress,
    RequirementsMet,
    Converted,
    Claimed,
    Forfeited,
    Expired,
    Cancelled,
    Locked,
}

impl BonusStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BonusStatus::Pending => "pending",
            BonusStatus::Active => "active",
            BonusStatus::InProgress => "in_progress",
            BonusStatus::RequirementsMet => "requirements_met",
            BonusStatus::Converted => "converted",
            BonusStatus::Claimed => "claimed",
            BonusStatus::Forfeited => "forfeited",
            BonusStatus::Expired => "expired",
            BonusStatus::Cancelled => "cancelled",
            BonusStatus::Locked => "locked",
        }
    }

    pub fn parse(s: &str) -> CoreResult<BonusStatus> {
        serde_json::from_value(Value::String(s.to_string()))
            .map_err(|_| CoreError::Validation(format!("unknown bonus status {s}")))
    }

    /// States in which the bonus still accrues turnover and counts against
    /// the user's balance-affecting invariants.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            BonusStatus::Active | BonusStatus::InProgress | BonusStatus::RequirementsMet
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BonusStatus::Claimed
                | BonusStatus::Forfeited
                | BonusStatus::Expired
                | BonusStatus::Cancelled
        )
    }

    pub fn can_transition(&self, to: BonusStatus) -> bool {
        use BonusStatus::*;
        match self {
            Pending => matches!(to, Active | Cancelled | Expired),
            Active => matches!(to, InProgress | RequirementsMet | Locked | Forfeited | Expired | Cancelled),
            InProgress => matches!(to, RequirementsMet | Locked | Forfeited | Expired | Cancelled),
            RequirementsMet => matches!(to, Converted | Locked | Forfeited | Expired | Cancelled),
            Converted => matches!(to, Claimed),
            // Locked returns to the state it came from, or is cancelled.
            Locked => matches!(to, Active | InProgress | RequirementsMet | Cancelled),
            Claimed | Forfeited | Expired | Cancelled => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StatusHistoryEntry {
    pub status: BonusStatus,
    pub at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UserBonus {
    pub id: String,
    pub user_id: String,
    pub tenant_id: String,
    pub template_id: String,
    pub template_code: String,
    pub bonus_type: BonusType,
    pub domain: String,
    pub status: BonusStatus,
    pub currency: String,
    pub original_value: i64,
    pub current_value: i64,
    pub turnover_required: i64,
    pub turnover_progress: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referee_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qualified_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activated_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub converted_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forfeited_at: Option<i64>,
    pub expires_at: i64,
    pub history: Vec<StatusHistoryEntry>,
    #[serde(default)]
    pub metadata: Value,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BonusTxType {
    Credit,
    Debit,
    Turnover,
    Conversion,
    Forfeit,
    Adjustment,
}

impl BonusTxType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BonusTxType::Credit => "credit",
            BonusTxType::Debit => "debit",
            BonusTxType::Turnover => "turnover",
            BonusTxType::Conversion => "conversion",
            BonusTxType::Forfeit => "forfeit",
            BonusTxType::Adjustment => "adjustment",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct BonusTransaction {
    pub id: String,
    pub user_bonus_id: String,
    pub user_id: String,
    pub tx_type: BonusTxType,
    pub amount: i64,
    pub balance_before: i64,
    pub balance_after: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turnover_before: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turnover_after: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turnover_contribution: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_transaction_id: Option<String>,
    pub created_at: i64,
}

// ── Storage ─────────────────────────────────────────────────────────

const USER_BONUS_COLUMNS: &str =
    "id, user_id, tenant_id, template_id, template_code, bonus_type, domain, status, currency,
     original_value, current_value, turnover_required, turnover_progress, wallet_id,
     trigger_transaction_id, referrer_id, referee_id, qualified_at, claimed_at, activated_at,
     completed_at, converted_at, forfeited_at, expires_at, history, metadata, created_at,
     updated_at";

fn map_user_bonus_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserBonus> {
    let bonus_type: String = row.get(5)?;
    let status: String = row.get(7)?;
    let history: String = row.get(24)?;
    let metadata: String = row.get(25)?;
    Ok(UserBonus {
        id: row.get(0)?,
        user_id: row.get(1)?,
        tenant_id: row.get(2)?,
        template_id: row.get(3)?,
        template_code: row.get(4)?,
        bonus_type: BonusType::parse(&bonus_type).unwrap_or(BonusType::Custom),
        domain: row.get(6)?,
        status: BonusStatus::parse(&status).unwrap_or(BonusStatus::Cancelled),
        currency: row.get(8)?,
        original_value: row.get(9)?,
        current_value: row.get(10)?,
        turnover_required: row.get(11)?,
        turnover_progress: row.get(12)?,
        wallet_id: row.get(13)?,
        trigger_transaction_id: row.get(14)?,
        referrer_id: row.get(15)?,
        referee_id: row.get(16)?,
        qualified_at: row.get(17)?,
        claimed_at: row.get(18)?,
        activated_at: row.get(19)?,
        completed_at: row.get(20)?,
        converted_at: row.get(21)?,
        forfeited_at: row.get(22)?,
        expires_at: row.get(23)?,
        history: serde_json::from_str(&history).unwrap_or_default(),
        metadata: serde_json::from_str(&metadata).unwrap_or(Value::Null),
        created_at: row.get(26)?,
        updated_at: row.get(27)?,
    })
}

pub fn insert_user_bonus(conn: &Connection, b: &UserBonus) -> CoreResult<()> {
    conn.execute(
        "INSERT INTO user_bonuses
             (id, user_id, tenant_id, template_id, template_code, bonus_type, domain, status,
              currency, original_value, current_value, turnover_required, turnover_progress,
              wallet_id, trigger_transaction_id, referrer_id, referee_id, qualified_at,
              claimed_at, activated_at, completed_at, converted_at, forfeited_at, expires_at,
              history, metadata, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                 ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28)",
        rusqlite::params![
            b.id,
            b.user_id,
            b.tenant_id,
            b.template_id,
            b.template_code,
            b.bonus_type.as_str(),
            b.domain,
            b.status.as_str(),
            b.currency,
            b.original_value,
            b.current_value,
            b.turnover_required,
            b.turnover_progress,
            b.wallet_id,
            b.trigger_transaction_id,
            b.referrer_id,
            b.referee_id,
            b.qualified_at,
            b.claimed_at,
            b.activated_at,
            b.completed_at,
            b.converted_at,
            b.forfeited_at,
            b.expires_at,
            serde_json::to_string(&b.history)?,
            if b.metadata.is_null() {
                "{}".to_string()
            } else {
                b.metadata.to_string()
            },
            b.created_at,
            b.updated_at,
        ],
    )?;
    Ok(())
}

pub fn get_user_bonus(conn: &Connection, id: &str) -> CoreResult<Option<UserBonus>> {
    let sql = format!("SELECT {USER_BONUS_COLUMNS} FROM user_bonuses WHERE id = ?1");
    let row = conn
        .query_row(&sql, [id], map_user_bonus_row)
        .map(Some)
        .or_else(crate::registry::ignore_not_found)?;
    Ok(row)
}

pub fn list_user_bonuses(conn: &Connection, user_id: &str) -> CoreResult<Vec<UserBonus>> {
    let sql = format!(
        "SELECT {USER_BONUS_COLUMNS} FROM user_bonuses WHERE user_id = ?1 ORDER BY created_at DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([user_id], map_user_bonus_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// How many bonuses this user already took from a template. Every row
/// counts: even a cancelled bonus consumed an award.
pub fn user_uses_of_template(conn: &Connection, user_id: &str, template_id: &str) -> CoreResult<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM user_bonuses WHERE user_id = ?1 AND template_id = ?2",
        [user_id, template_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn user_has_bonus_of_types(
    conn: &Connection,
    user_id: &str,
    types: &[BonusType],
) -> CoreResult<bool> {
    if types.is_empty() {
        return Ok(false);
    }
    let placeholders = vec!["?"; types.len()].join(", ");
    let sql = format!(
        "SELECT COUNT(*) FROM user_bonuses WHERE user_id = ?1 AND bonus_type IN ({placeholders})"
    );
    let mut params: Vec<String> = vec![user_id.to_string()];
    params.extend(types.iter().map(|t| t.as_str().to_string()));
    let count: i64 = conn.query_row(
        &sql,
        rusqlite::params_from_iter(params.iter()),
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Whether the user already claimed a bonus of `bonus_type` whose metadata
/// matches every `(json path, value)` pair. Used for tournament /
/// leaderboard one-shot checks.
pub fn user_claimed_with_metadata(
    conn: &Connection,
    user_id: &str,
    bonus_type: BonusType,
    keys: &[(&str, &str)],
) -> CoreResult<bool> {
    let mut sql = String::from(
        "SELECT COUNT(*) FROM user_bonuses WHERE user_id = ?1 AND bonus_type = ?2",
    );
    let mut params: Vec<String> = vec![user_id.to_string(), bonus_type.as_str().to_string()];
    for (path, value) in keys {
        sql.push_str(&format!(
            " AND json_extract(metadata, '$.{path}') = ?{}",
            params.len() + 1
        ));
        params.push((*value).to_string());
    }
    let count: i64 = conn.query_row(
        &sql,
        rusqlite::params_from_iter(params.iter()),
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn last_bonus_at(
    conn: &Connection,
    user_id: &str,
    bonus_type: BonusType,
) -> CoreResult<Option<i64>> {
    let at: Option<i64> = conn.query_row(
        "SELECT MAX(created_at) FROM user_bonuses WHERE user_id = ?1 AND bonus_type = ?2",
        [user_id, bonus_type.as_str()],
        |row| row.get(0),
    )?;
    Ok(at)
}

/// Validated status transition with history append and timestamp columns.
pub fn transition(
    conn: &Connection,
    id: &str,
    to: BonusStatus,
    note: Option<&str>,
) -> CoreResult<UserBonus> {
    let bonus =
        get_user_bonus(conn, id)?.ok_or_else(|| CoreError::not_found("user bonus", id))?;
    if !bonus.status.can_transition(to) {
        return Err(CoreError::Precondition(format!(
            "bonus {id} cannot go from {} to {}",
            bonus.status.as_str(),
            to.as_str()
        )));
    }
    let now = chrono::Utc::now().timestamp();
    let mut history = bonus.history.clone();
    history.push(StatusHistoryEntry {
        status: to,
        at: now,
        note: note.map(|s| s.to_string()),
    });

    let timestamp_column = match to {
        BonusStatus::Active => Some("activated_at"),
        BonusStatus::RequirementsMet => Some("completed_at"),
        BonusStatus::Converted => Some("converted_at"),
        BonusStatus::Claimed => Some("claimed_at"),
        BonusStatus::Forfeited => Some("forfeited_at"),
        _ => None,
    };
    let sql = match timestamp_column {
        Some(col) => format!(
            "UPDATE user_bonuses SET status = ?1, history = ?2, {col} = ?3, updated_at = ?3 WHERE id = ?4"
        ),
        None => {
            "UPDATE user_bonuses SET status = ?1, history = ?2, updated_at = ?3 WHERE id = ?4"
                .to_string()
        }
    };
    conn.execute(
        &sql,
        rusqlite::params![to.as_str(), serde_json::to_string(&history)?, now, id],
    )?;
    get_user_bonus(conn, id)?.ok_or_else(|| CoreError::not_found("user bonus", id))
}

pub fn insert_bonus_transaction(conn: &Connection, tx: &BonusTransaction) -> CoreResult<()> {
    conn.execute(
        "INSERT INTO bonus_transactions
             (id, user_bonus_id, user_id, tx_type, amount, balance_before, balance_after,
              turnover_before, turnover_after, turnover_contribution, activity_category,
              related_transaction_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        rusqlite::params![
            tx.id,
            tx.user_bonus_id,
            tx.user_id,
            tx.tx_type.as_str(),
            tx.amount,
            tx.balance_before,
            tx.balance_after,
            tx.turnover_before,
            tx.turnover_after,
            tx.turnover_contribution,
            tx.activity_category,
            tx.related_transaction_id,
            tx.created_at,
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_graph() {
        use BonusStatus::*;
        assert!(Pending.can_transition(Active));
        assert!(Active.can_transition(InProgress));
        assert!(InProgress.can_transition(RequirementsMet));
        assert!(RequirementsMet.can_transition(Converted));
        assert!(Converted.can_transition(Claimed));
        assert!(Active.can_transition(Locked));
        assert!(Locked.can_transition(Active));
        assert!(Locked.can_transition(Cancelled));
        assert!(!Claimed.can_transition(Active));
        assert!(!Converted.can_transition(Forfeited));
        assert!(!Pending.can_transition(Converted));
    }
}
