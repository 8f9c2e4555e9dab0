use axum::Json;
use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::bonus::BonusOutcome;
use crate::ledger::{LedgerTransaction, account_id};
use crate::wallet::{PaymentRequest, Wallet};

use crate::api::error::ApiError;
use crate::api::middleware::AuthUser;
use crate::api::pagination::{Page, PageArgs, paginate};
use crate::api::state::AppState;

const PAYMENT_SERVICE: &str = "payment-service";

/// Money mutations answer with the saga envelope: either the entity or
/// error codes, never a partial entity.
#[derive(Serialize)]
pub struct SagaEnvelope<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<T>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub bonuses: Vec<Value>,
    pub saga_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
    pub execution_time_ms: u64,
}

fn bonus_outcome_json(outcome: &BonusOutcome) -> Value {
    match outcome {
        BonusOutcome::Awarded(bonus) => json!({
            "status": "awarded",
            "user_bonus_id": bonus.id,
            "value": bonus.original_value,
            "currency": bonus.currency,
            "template_code": bonus.template_code,
        }),
        BonusOutcome::PendingApproval { token } => json!({
            "status": "pending_approval",
            "token": token,
        }),
        BonusOutcome::NotEligible { reason } => json!({
            "status": "not_eligible",
            "reason": reason,
        }),
    }
}

#[derive(Deserialize)]
pub struct CurrencyQuery {
    pub currency: String,
}

pub async fn get_wallet(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<CurrencyQuery>,
) -> Result<Json<Wallet>, ApiError> {
    let handle = state
        .platform
        .db_for(PAYMENT_SERVICE, None, Some(&auth.tenant_id))
        .await?;
    let wallet = state
        .platform
        .wallets
        .wallet(&handle, &auth.user_id, &auth.tenant_id, &query.currency)
        .await?;
    Ok(Json(wallet))
}

#[derive(Deserialize)]
pub struct PaymentBody {
    pub amount: i64,
    pub currency: String,
    pub saga_id: Option<String>,
}

pub async fn deposit(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(body): Json<PaymentBody>,
) -> Result<Json<SagaEnvelope<LedgerTransaction>>, ApiError> {
    let ctx = auth.context();
    let handle = state
        .platform
        .db_for(PAYMENT_SERVICE, None, Some(&auth.tenant_id))
        .await?;
    let user = {
        let conn = handle.db.lock().await;
        crate::auth::users::get_user(&conn, &auth.user_id)?
    }
    .ok_or_else(|| ApiError::unauthorized("user no longer exists"))?;

    let outcome = state
        .platform
        .wallets
        .deposit(
            &handle,
            &user,
            PaymentRequest {
                user_id: auth.user_id.clone(),
                tenant_id: auth.tenant_id.clone(),
                amount: body.amount,
                currency: body.currency,
                saga_id: body.saga_id,
            },
            ctx.clone(),
        )
        .await
        .map_err(|e| ApiError::from(e).with_correlation(&ctx.correlation_id))?;

    Ok(Json(SagaEnvelope {
        success: outcome.saga.success,
        transaction: outcome.transaction,
        bonuses: outcome.bonuses.iter().map(bonus_outcome_json).collect(),
        saga_id: outcome.saga.saga_id,
        errors: outcome
            .saga
            .error_code
            .map(|code| vec![code.to_string()]),
        execution_time_ms: outcome.saga.execution_time_ms,
    }))
}

pub async fn withdraw(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(body): Json<PaymentBody>,
) -> Result<Json<SagaEnvelope<LedgerTransaction>>, ApiError> {
    let ctx = auth.context();
    let handle = state
        .platform
        .db_for(PAYMENT_SERVICE, None, Some(&auth.tenant_id))
        .await?;

    let outcome = state
        .platform
        .wallets
        .withdraw(
            &handle,
            PaymentRequest {
                user_id: auth.user_id.clone(),
                tenant_id: auth.tenant_id.clone(),
                amount: body.amount,
                currency: body.currency,
                saga_id: body.saga_id,
            },
            ctx.clone(),
        )
        .await
        .map_err(|e| ApiError::from(e).with_correlation(&ctx.correlation_id))?;

    Ok(Json(SagaEnvelope {
        success: outcome.saga.success,
        transaction: outcome.transaction,
        bonuses: Vec::new(),
        saga_id: outcome.saga.saga_id,
        errors: outcome
            .saga
            .error_code
            .map(|code| vec![code.to_string()]),
        execution_time_ms: outcome.saga.execution_time_ms,
    }))
}

pub async fn reverse(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(tx_id): Path<String>,
) -> Result<Json<LedgerTransaction>, ApiError> {
    auth.require("wallets:reverse:any")?;
    let ctx = auth.context();
    let handle = state
        .platform
        .db_for(PAYMENT_SERVICE, None, Some(&auth.tenant_id))
        .await?;

    // The recipient of the original posting owns the reversal event.
    let owner = {
        let conn = handle.db.lock().await;
        let tx = crate::ledger::get_transaction(&conn, &tx_id)?
            .ok_or(crate::error::CoreError::not_found("ledger transaction", tx_id.clone()))?;
        crate::ledger::account::get_account(&conn, &tx.to_account_id)?
            .map(|a| a.owner_id)
            .unwrap_or_default()
    };

    let reversal = state
        .platform
        .wallets
        .reverse_deposit(&handle, &tx_id, &auth.tenant_id, &owner, &ctx)
        .await?;
    Ok(Json(reversal))
}

#[derive(Deserialize)]
pub struct TransactionsQuery {
    pub currency: String,
    pub first: Option<usize>,
    pub after: Option<String>,
    pub last: Option<usize>,
    pub before: Option<String>,
}

pub async fn list_transactions(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<TransactionsQuery>,
) -> Result<Json<Page<LedgerTransaction>>, ApiError> {
    let handle = state
        .platform
        .db_for(PAYMENT_SERVICE, None, Some(&auth.tenant_id))
        .await?;
    let main = account_id(
        crate::ledger::OwnerType::User,
        &auth.user_id,
        "main",
        &query.currency,
    );
    let bonus = account_id(
        crate::ledger::OwnerType::User,
        &auth.user_id,
        "bonus",
        &query.currency,
    );

    let transactions: Vec<LedgerTransaction> = {
        let conn = handle.db.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT id FROM ledger_transactions
                 WHERE from_account_id IN (?1, ?2) OR to_account_id IN (?1, ?2)
                 ORDER BY created_at DESC, id",
            )
            .map_err(crate::error::CoreError::from)?;
        let ids: Vec<String> = stmt
            .query_map([&main, &bonus], |row| row.get(0))
            .map_err(crate::error::CoreError::from)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(crate::error::CoreError::from)?;
        let mut txs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(tx) = crate::ledger::get_transaction(&conn, &id)? {
                txs.push(tx);
            }
        }
        txs
    };

    let page = PageArgs {
        first: query.first,
        after: query.after,
        last: query.last,
        before: query.before,
    };
    Ok(Json(paginate(transactions, &page)))
}
