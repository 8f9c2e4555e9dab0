use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::bonus::template::{self, BonusTemplate, BonusType, EligibilityRules, ValueType};
use crate::events::webhook;
use crate::ledger::{AccountSpec, PostRequest, reconcile};
use crate::model::ConfigEntry;
use crate::pending::{PendingSummary, RawPending};
use crate::wallet::treasury;

use crate::api::error::ApiError;
use crate::api::middleware::{ADMIN_PERMISSION, AuthUser};
use crate::api::state::AppState;

use super::otp::OkResponse;

const PAYMENT_SERVICE: &str = "payment-service";

// ── Tenants / brands ────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateTenantRequest {
    pub code: String,
    pub name: String,
    pub brand_id: Option<String>,
    pub metadata: Option<Value>,
}

pub async fn create_tenant(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(req): Json<CreateTenantRequest>,
) -> Result<Json<crate::model::Tenant>, ApiError> {
    auth.require(ADMIN_PERMISSION)?;
    let tenant = state
        .platform
        .registry
        .create_tenant(
            &req.code,
            &req.name,
            req.brand_id.as_deref(),
            req.metadata.unwrap_or_else(|| json!({})),
        )
        .await?;
    Ok(Json(tenant))
}

#[derive(Deserialize)]
pub struct CreateBrandRequest {
    pub code: String,
    pub name: String,
    pub metadata: Option<Value>,
}

pub async fn create_brand(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(req): Json<CreateBrandRequest>,
) -> Result<Json<crate::model::Brand>, ApiError> {
    auth.require(ADMIN_PERMISSION)?;
    let brand = state
        .platform
        .registry
        .create_brand(&req.code, &req.name, req.metadata.unwrap_or_else(|| json!({})))
        .await?;
    Ok(Json(brand))
}

// ── Bonus templates ─────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateTemplateRequest {
    pub code: String,
    pub name: Option<String>,
    pub bonus_type: BonusType,
    pub value_type: ValueType,
    pub value: f64,
    pub currency: String,
    pub supported_currencies: Option<Vec<String>>,
    pub max_value: Option<i64>,
    pub min_deposit: Option<i64>,
    pub turnover_multiplier: Option<f64>,
    pub activity_contributions: Option<std::collections::HashMap<String, f64>>,
    pub valid_from: Option<i64>,
    pub valid_until: Option<i64>,
    pub max_uses_total: Option<i64>,
    pub max_uses_per_user: Option<i64>,
    pub eligibility: Option<EligibilityRules>,
    pub requires_approval: Option<bool>,
    pub approval_threshold: Option<i64>,
    pub priority: Option<i32>,
    pub expiration_days: Option<i64>,
    pub cooldown_hours: Option<i64>,
    pub position_multipliers: Option<std::collections::HashMap<String, f64>>,
    pub referral_config: Option<Value>,
}

pub async fn create_template(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(req): Json<CreateTemplateRequest>,
) -> Result<Json<BonusTemplate>, ApiError> {
    auth.require(ADMIN_PERMISSION)?;
    let mut t = BonusTemplate::new(
        &auth.tenant_id,
        &req.code,
        req.bonus_type,
        req.value_type,
        req.value,
        &req.currency,
    );
    if let Some(name) = req.name {
        t.name = name;
    }
    t.supported_currencies = req.supported_currencies;
    t.max_value = req.max_value;
    t.min_deposit = req.min_deposit;
    t.turnover_multiplier = req.turnover_multiplier.unwrap_or(0.0);
    t.activity_contributions = req.activity_contributions.unwrap_or_default();
    t.valid_from = req.valid_from;
    t.valid_until = req.valid_until;
    t.max_uses_total = req.max_uses_total;
    t.max_uses_per_user = req.max_uses_per_user;
    t.eligibility = req.eligibility.unwrap_or_default();
    t.requires_approval = req.requires_approval.unwrap_or(false);
    t.approval_threshold = req.approval_threshold;
    t.priority = req.priority.unwrap_or(0);
    t.expiration_days = req.expiration_days;
    t.cooldown_hours = req.cooldown_hours;
    t.position_multipliers = req.position_multipliers.unwrap_or_default();
    t.referral_config = req.referral_config;

    let handle = state
        .platform
        .db_for(PAYMENT_SERVICE, None, Some(&auth.tenant_id))
        .await?;
    {
        let conn = handle.db.lock().await;
        template::insert_template(&conn, &t)?;
    }
    Ok(Json(t))
}

pub async fn list_templates(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<BonusTemplate>>, ApiError> {
    auth.require(ADMIN_PERMISSION)?;
    let handle = state
        .platform
        .db_for(PAYMENT_SERVICE, None, Some(&auth.tenant_id))
        .await?;
    let templates = {
        let conn = handle.db.lock().await;
        template::list_templates(&conn, &auth.tenant_id)?
    };
    Ok(Json(templates))
}

// ── Pool / rates ────────────────────────────────────────

#[derive(Deserialize)]
pub struct FundPoolRequest {
    pub currency: String,
    pub amount: i64,
}

pub async fn fund_pool(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(req): Json<FundPoolRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    auth.require(ADMIN_PERMISSION)?;
    let ctx = auth.context();
    let handle = state
        .platform
        .db_for(PAYMENT_SERVICE, None, Some(&auth.tenant_id))
        .await?;
    let pool = AccountSpec::pool(&auth.tenant_id, &req.currency, &auth.tenant_id);
    state
        .platform
        .ledger
        .post(
            &handle,
            PostRequest::transfer(treasury(&req.currency), pool, req.amount, &req.currency)
                .with_type("pool_funding"),
            &ctx,
        )
        .await?;
    Ok(Json(OkResponse { ok: true }))
}

#[derive(Deserialize)]
pub struct RateOverrideRequest {
    pub from: String,
    pub to: String,
    pub rate: f64,
}

pub async fn set_rate_override(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(req): Json<RateOverrideRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    auth.require(ADMIN_PERMISSION)?;
    state
        .platform
        .rates
        .set_override(&req.from, &req.to, req.rate)
        .await?;
    Ok(Json(OkResponse { ok: true }))
}

// ── Webhooks ────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateWebhookRequest {
    pub url: String,
    pub event_types: Vec<String>,
    pub secret: String,
    pub headers: Option<Value>,
}

pub async fn create_webhook(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(req): Json<CreateWebhookRequest>,
) -> Result<Json<crate::model::WebhookSubscription>, ApiError> {
    auth.require(ADMIN_PERMISSION)?;
    let conn = state.platform.core.db.lock().await;
    let subscription = webhook::create_subscription(
        &conn,
        &auth.tenant_id,
        &req.url,
        &req.event_types,
        &req.secret,
        req.headers,
    )?;
    Ok(Json(subscription))
}

// ── Jobs / inspection ───────────────────────────────────

pub async fn run_reconcile(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<reconcile::ReconcileReport>, ApiError> {
    auth.require(ADMIN_PERMISSION)?;
    let handle = state
        .platform
        .db_for(PAYMENT_SERVICE, None, Some(&auth.tenant_id))
        .await?;
    let conn = handle.db.lock().await;
    Ok(Json(reconcile::reconcile(&conn)?))
}

pub async fn sweep_holds(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Value>, ApiError> {
    auth.require(ADMIN_PERMISSION)?;
    let handle = state
        .platform
        .db_for(PAYMENT_SERVICE, None, Some(&auth.tenant_id))
        .await?;
    let released = state.platform.ledger.sweep_expired_holds(&handle).await?;
    Ok(Json(json!({ "released": released })))
}

pub async fn expire_bonuses(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Value>, ApiError> {
    auth.require(ADMIN_PERMISSION)?;
    let ctx = auth.context();
    let handle = state
        .platform
        .db_for(PAYMENT_SERVICE, None, Some(&auth.tenant_id))
        .await?;
    let expired = state.platform.bonus.expire_due(&handle, &ctx).await?;
    Ok(Json(json!({ "expired": expired })))
}

#[derive(Deserialize)]
pub struct PendingQuery {
    pub op: Option<String>,
}

pub async fn list_pending(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<PendingQuery>,
) -> Result<Json<Vec<PendingSummary>>, ApiError> {
    auth.require(ADMIN_PERMISSION)?;
    let pending = state.platform.pending.list(query.op.as_deref()).await?;
    Ok(Json(pending))
}

pub async fn get_pending(
    auth: AuthUser,
    State(state): State<AppState>,
    Path((op, token)): Path<(String, String)>,
) -> Result<Json<RawPending>, ApiError> {
    auth.require(ADMIN_PERMISSION)?;
    let raw = state
        .platform
        .pending
        .get_raw(&token, &op)
        .await?
        .ok_or_else(|| ApiError::not_found("Pending operation not found"))?;
    Ok(Json(raw))
}

#[derive(Deserialize)]
pub struct ResolveRequest {
    pub refs: Vec<crate::model::EntityRef>,
}

/// Batch-resolve generic references against their owning tables, one query
/// per kind.
pub async fn resolve_refs(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(req): Json<ResolveRequest>,
) -> Result<Json<Vec<Value>>, ApiError> {
    auth.require(ADMIN_PERMISSION)?;
    let handle = state
        .platform
        .db_for(PAYMENT_SERVICE, None, Some(&auth.tenant_id))
        .await?;
    let resolved = {
        let conn = handle.db.lock().await;
        state.platform.refs.resolve_batch(&conn, &req.refs)?
    };
    Ok(Json(
        req.refs
            .iter()
            .map(|r| {
                json!({
                    "kind": r.kind,
                    "id": r.id,
                    "entity": resolved.get(r),
                })
            })
            .collect(),
    ))
}

// ── Config ──────────────────────────────────────────────

pub async fn config_summary(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> Result<Json<Vec<ConfigEntry>>, ApiError> {
    auth.require(ADMIN_PERMISSION)?;
    Ok(Json(state.platform.config.summarize(&service).await?))
}

#[derive(Deserialize)]
pub struct SetConfigRequest {
    pub value: Value,
    pub brand: Option<String>,
    pub tenant: Option<String>,
    pub sensitive_paths: Option<Vec<String>>,
}

pub async fn set_config(
    auth: AuthUser,
    State(state): State<AppState>,
    Path((service, key)): Path<(String, String)>,
    Json(req): Json<SetConfigRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    auth.require(ADMIN_PERMISSION)?;
    state
        .platform
        .set_config(
            &service,
            &key,
            req.value,
            req.brand.as_deref(),
            req.tenant.as_deref(),
            &req.sensitive_paths.unwrap_or_default(),
        )
        .await?;
    Ok(Json(OkResponse { ok: true }))
}

pub async fn list_databases(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<String>>, ApiError> {
    auth.require(ADMIN_PERMISSION)?;
    Ok(Json(state.platform.router.list_open().await))
}
