use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::api::middleware::AuthUser;
use crate::api::state::AppState;

use super::otp::OkResponse;

#[derive(Deserialize)]
pub struct EnableRequest {
    pub password: String,
}

#[derive(Serialize)]
pub struct EnableResponse {
    pub secret: String,
    pub otpauth_uri: String,
    pub backup_codes: Vec<String>,
}

pub async fn enable(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(req): Json<EnableRequest>,
) -> Result<Json<EnableResponse>, ApiError> {
    let handle = state
        .platform
        .db_for("user-service", None, Some(&auth.tenant_id))
        .await?;
    let conn = handle.db.lock().await;
    let setup = state
        .platform
        .two_factor
        .enable(&conn, &auth.user_id, &req.password)?;
    Ok(Json(EnableResponse {
        secret: setup.secret_base32,
        otpauth_uri: setup.otpauth_uri,
        backup_codes: setup.backup_codes,
    }))
}

#[derive(Deserialize)]
pub struct VerifyRequest {
    pub token: String,
}

pub async fn verify(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(req): Json<VerifyRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    let handle = state
        .platform
        .db_for("user-service", None, Some(&auth.tenant_id))
        .await?;
    let conn = handle.db.lock().await;
    state.platform.two_factor.verify(&conn, &auth.user_id, &req.token)?;
    Ok(Json(OkResponse { ok: true }))
}

#[derive(Deserialize)]
pub struct CodeRequest {
    pub code: String,
}

pub async fn verify_code(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(req): Json<CodeRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    let handle = state
        .platform
        .db_for("user-service", None, Some(&auth.tenant_id))
        .await?;
    let conn = handle.db.lock().await;
    state
        .platform
        .two_factor
        .verify_code(&conn, &auth.user_id, &req.code)?;
    Ok(Json(OkResponse { ok: true }))
}
