use rusqlite::Connection;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CoreError, CoreResult};
use crate::model::money::normalize_currency;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OwnerType {
    User,
    System,
    Pool,
    Provider,
}

impl OwnerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OwnerType::User => "user",
            OwnerType::System => "system",
            OwnerType::Pool => "pool",
            OwnerType::Provider => "provider",
        }
    }

    pub fn parse(s: &str) -> CoreResult<OwnerType> {
        match s {
            "user" => Ok(OwnerType::User),
            "system" => Ok(OwnerType::System),
            "pool" => Ok(OwnerType::Pool),
            "provider" => Ok(OwnerType::Provider),
            other => Err(CoreError::Validation(format!("unknown owner type {other}"))),
        }
    }
}

/// A double-entry account. Accounts are opened lazily on first posting and
/// identified deterministically by `(owner_type, owner_id, subtype,
/// currency)`, so two services computing the id independently agree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LedgerAccount {
    pub id: String,
    pub owner_id: String,
    pub owner_type: OwnerType,
    /// e.g. "main", "bonus", "bonus-pool", "fees", "float".
    pub subtype: String,
    pub currency: String,
    pub allow_negative: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credit_limit: Option<i64>,
    pub balance: i64,
    pub tenant_id: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// The coordinates of an account, sufficient to open it lazily.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AccountSpec {
    pub owner_type: OwnerType,
    pub owner_id: String,
    pub subtype: String,
    pub currency: String,
    #[serde(default)]
    pub allow_negative: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credit_limit: Option<i64>,
    #[serde(default)]
    pub tenant_id: String,
}

impl AccountSpec {
    pub fn user(user_id: &str, subtype: &str, currency: &str, tenant_id: &str) -> Self {
        AccountSpec {
            owner_type: OwnerType::User,
            owner_id: user_id.to_string(),
            subtype: subtype.to_string(),
            currency: normalize_currency(currency),
            allow_negative: false,
            credit_limit: None,
            tenant_id: tenant_id.to_string(),
        }
    }

    /// System accounts (treasury float, conversion float) may go negative:
    /// they are the counterparty to money entering and leaving the ledger.
    pub fn system(owner_id: &str, subtype: &str, currency: &str) -> Self {
        AccountSpec {
            owner_type: OwnerType::System,
            owner_id: owner_id.to_string(),
            subtype: subtype.to_string(),
            currency: normalize_currency(currency),
            allow_negative: true,
            credit_limit: None,
            tenant_id: String::new(),
        }
    }

    pub fn pool(owner_id: &str, currency: &str, tenant_id: &str) -> Self {
        AccountSpec {
            owner_type: OwnerType::Pool,
            owner_id: owner_id.to_string(),
            subtype: "bonus-pool".to_string(),
            currency: normalize_currency(currency),
            allow_negative: false,
            credit_limit: None,
            tenant_id: tenant_id.to_string(),
        }
    }

    pub fn id(&self) -> String {
        account_id(
            self.owner_type,
            &self.owner_id,
            &self.subtype,
            &self.currency,
        )
    }
}

/// Deterministic account id: truncated SHA-256 over the identifying tuple.
pub fn account_id(owner_type: OwnerType, owner_id: &str, subtype: &str, currency: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(owner_type.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(owner_id.as_bytes());
    hasher.update(b"|");
    hasher.update(subtype.as_bytes());
    hasher.update(b"|");
    hasher.update(normalize_currency(currency).as_bytes());
    let digest = hasher.finalize();
    format!("acct_{}", hex::encode(&digest[..16]))
}

/// The conversion float for one currency, the internal counterparty of
/// every cross-currency posting leg.
pub fn conversion_float(currency: &str) -> AccountSpec {
    AccountSpec::system("conversion", "float", currency)
}

/// Open an account if it does not exist yet and return it. The request's
/// flags only apply on creation; an existing account keeps its own.
pub fn open_account(conn: &Connection, spec: &AccountSpec) -> CoreResult<LedgerAccount> {
    let id = spec.id();
    conn.execute(
        "INSERT OR IGNORE INTO ledger_accounts
             (id, owner_id, owner_type, subtype, currency, allow_negative, credit_limit, tenant_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            id,
            spec.owner_id,
            spec.owner_type.as_str(),
            spec.subtype,
            normalize_currency(&spec.currency),
            spec.allow_negative as i64,
            spec.credit_limit,
            spec.tenant_id,
        ],
    )?;
    get_account(conn, &id)?.ok_or_else(|| CoreError::not_found("ledger account", id))
}

pub fn get_account(conn: &Connection, id: &str) -> CoreResult<Option<LedgerAccount>> {
    let row = conn
        .query_row(
            "SELECT id, owner_id, owner_type, subtype, currency, allow_negative, credit_limit,
                    balance, tenant_id, created_at, updated_at
             FROM ledger_accounts WHERE id = ?1",
            [id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, Option<i64>>(6)?,
                    row.get::<_, i64>(7)?,
                    row.get::<_, String>(8)?,
                    row.get::<_, i64>(9)?,
                    row.get::<_, i64>(10)?,
                ))
            },
        )
        .map(Some)
        .or_else(crate::registry::ignore_not_found)?;

    let Some((
        id,
        owner_id,
        owner_type,
        subtype,
        currency,
        allow_negative,
        credit_limit,
        balance,
        tenant_id,
        created_at,
        updated_at,
    )) = row
    else {
        return Ok(None);
    };

    Ok(Some(LedgerAccount {
        id,
        owner_id,
        owner_type: OwnerType::parse(&owner_type)?,
        subtype,
        currency,
        allow_negative: allow_negative != 0,
        credit_limit,
        balance,
        tenant_id,
        created_at,
        updated_at,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_id_is_deterministic() {
        let a = account_id(OwnerType::User, "u1", "main", "EUR");
        let b = account_id(OwnerType::User, "u1", "main", "eur");
        assert_eq!(a, b);
        assert!(a.starts_with("acct_"));
        assert_ne!(a, account_id(OwnerType::User, "u1", "bonus", "EUR"));
    }
}
