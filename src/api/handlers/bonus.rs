use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use serde_json::Value;

use crate::bonus::{ActivityRequest, BonusOutcome, BonusType, TriggerData, UserBonus, user_bonus};
use crate::model::money::normalize_currency;

use crate::api::error::ApiError;
use crate::api::middleware::AuthUser;
use crate::api::pagination::{Page, PageArgs, paginate};
use crate::api::state::AppState;

use super::otp::OkResponse;

const PAYMENT_SERVICE: &str = "payment-service";

pub async fn list(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(page): Query<PageArgs>,
) -> Result<Json<Page<UserBonus>>, ApiError> {
    let handle = state
        .platform
        .db_for(PAYMENT_SERVICE, None, Some(&auth.tenant_id))
        .await?;
    let bonuses = {
        let conn = handle.db.lock().await;
        user_bonus::list_user_bonuses(&conn, &auth.user_id)?
    };
    Ok(Json(paginate(bonuses, &page)))
}

async fn owned_bonus(
    state: &AppState,
    auth: &AuthUser,
    bonus_id: &str,
) -> Result<(crate::db::DbHandle, UserBonus), ApiError> {
    let handle = state
        .platform
        .db_for(PAYMENT_SERVICE, None, Some(&auth.tenant_id))
        .await?;
    let bonus = {
        let conn = handle.db.lock().await;
        user_bonus::get_user_bonus(&conn, bonus_id)?
    }
    .ok_or_else(|| ApiError::not_found("Bonus not found"))?;
    if bonus.user_id != auth.user_id {
        return Err(ApiError::forbidden("not your bonus"));
    }
    Ok((handle, bonus))
}

#[derive(Deserialize)]
pub struct ActivityBody {
    pub amount: i64,
    pub currency: String,
    pub activity_category: Option<String>,
    pub transaction_id: Option<String>,
}

pub async fn record_activity(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(bonus_id): Path<String>,
    Json(body): Json<ActivityBody>,
) -> Result<Json<UserBonus>, ApiError> {
    let ctx = auth.context();
    let (handle, bonus) = owned_bonus(&state, &auth, &bonus_id).await?;
    let updated = state
        .platform
        .bonus
        .record_activity(
            &handle,
            ActivityRequest {
                user_bonus_id: bonus.id,
                amount: body.amount,
                currency: normalize_currency(&body.currency),
                transaction_id: body.transaction_id,
                activity_category: body.activity_category,
            },
            &ctx,
        )
        .await?;
    Ok(Json(updated))
}

pub async fn convert(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(bonus_id): Path<String>,
) -> Result<Json<UserBonus>, ApiError> {
    let ctx = auth.context();
    let (handle, bonus) = owned_bonus(&state, &auth, &bonus_id).await?;
    let updated = state
        .platform
        .bonus
        .convert_bonus(&handle, &bonus.id, &ctx)
        .await?;
    Ok(Json(updated))
}

pub async fn claim(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(bonus_id): Path<String>,
) -> Result<Json<UserBonus>, ApiError> {
    let ctx = auth.context();
    let (handle, bonus) = owned_bonus(&state, &auth, &bonus_id).await?;
    let updated = state.platform.bonus.claim(&handle, &bonus.id, &ctx).await?;
    Ok(Json(updated))
}

#[derive(Deserialize)]
pub struct ForfeitBody {
    pub reason: Option<String>,
}

pub async fn forfeit(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(bonus_id): Path<String>,
    Json(body): Json<ForfeitBody>,
) -> Result<Json<UserBonus>, ApiError> {
    auth.require("bonus:forfeit:any")?;
    let ctx = auth.context();
    let handle = state
        .platform
        .db_for(PAYMENT_SERVICE, None, Some(&auth.tenant_id))
        .await?;
    let updated = state
        .platform
        .bonus
        .forfeit(
            &handle,
            &bonus_id,
            body.reason.as_deref().unwrap_or("forfeited by operator"),
            &ctx,
        )
        .await?;
    Ok(Json(updated))
}

#[derive(Deserialize)]
pub struct TriggerBody {
    pub bonus_type: BonusType,
    pub user_id: String,
    pub amount: Option<i64>,
    pub currency: String,
    pub metadata: Option<Value>,
}

/// Evaluate a bonus for a user from a non-deposit trigger (tournament
/// results, leaderboard settlement, manual promos). Internal surface.
pub async fn trigger(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(body): Json<TriggerBody>,
) -> Result<Json<Value>, ApiError> {
    auth.require("bonus:trigger:any")?;
    let ctx = auth.context();
    let handle = state
        .platform
        .db_for(PAYMENT_SERVICE, None, Some(&auth.tenant_id))
        .await?;
    let user = {
        let conn = handle.db.lock().await;
        crate::auth::users::get_user(&conn, &body.user_id)?
    }
    .ok_or_else(|| ApiError::not_found("User not found"))?;

    let trigger = TriggerData {
        base_amount: body.amount,
        currency: normalize_currency(&body.currency),
        transaction_id: None,
        metadata: body.metadata.unwrap_or(Value::Null),
    };
    let outcome = state
        .platform
        .bonus
        .process(&handle, user, &auth.tenant_id, body.bonus_type, trigger, ctx)
        .await?;

    Ok(Json(match outcome {
        BonusOutcome::Awarded(bonus) => serde_json::json!({
            "status": "awarded",
            "bonus": bonus,
        }),
        BonusOutcome::PendingApproval { token } => serde_json::json!({
            "status": "pending_approval",
            "token": token,
        }),
        BonusOutcome::NotEligible { reason } => serde_json::json!({
            "status": "not_eligible",
            "reason": reason,
        }),
    }))
}

pub async fn approve(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<UserBonus>, ApiError> {
    auth.require("bonus:approve:any")?;
    let ctx = auth.context();
    let handle = state
        .platform
        .db_for(PAYMENT_SERVICE, None, Some(&auth.tenant_id))
        .await?;
    let bonus = state
        .platform
        .bonus
        .approve_pending(&handle, &token, ctx)
        .await?;
    Ok(Json(bonus))
}

pub async fn reject(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<OkResponse>, ApiError> {
    auth.require("bonus:approve:any")?;
    let removed = state.platform.bonus.reject_pending(&token).await?;
    if !removed {
        return Err(ApiError::not_found("Pending bonus not found"));
    }
    Ok(Json(OkResponse { ok: true }))
}
