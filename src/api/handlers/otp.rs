use async_trait::async_trait;
use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::auth::{OtpRequest, OtpTransport};
use crate::error::CoreResult;

use crate::api::error::ApiError;
use crate::api::state::AppState;

/// Notification adapters (email/sms/...) are external collaborators; the
/// default transport only records that a delivery would have happened.
struct TracingTransport;

#[async_trait]
impl OtpTransport for TracingTransport {
    async fn deliver(&self, recipient: &str, channel: &str, code: &str) -> CoreResult<()> {
        tracing::info!(recipient, channel, "otp delivery handed to transport");
        // The code itself only surfaces at trace level for local debugging.
        tracing::trace!(code, "otp code");
        Ok(())
    }
}

#[derive(Deserialize)]
pub struct SendOtpRequest {
    pub tenant_code: String,
    pub recipient: String,
    pub channel: String,
    pub purpose: String,
}

#[derive(Serialize)]
pub struct SendOtpResponse {
    pub otp_token: String,
    pub expires_in: u64,
}

pub async fn send(
    State(state): State<AppState>,
    Json(req): Json<SendOtpRequest>,
) -> Result<Json<SendOtpResponse>, ApiError> {
    let tenant = state
        .platform
        .registry
        .get_tenant(&req.tenant_code)
        .await
        .map_err(|_| ApiError::not_found("Unknown tenant"))?;

    let issued = state
        .platform
        .otp
        .send(
            &OtpRequest {
                tenant_id: tenant.id,
                user_id: None,
                recipient: req.recipient,
                channel: req.channel,
                purpose: req.purpose,
            },
            &TracingTransport,
        )
        .await?;

    Ok(Json(SendOtpResponse {
        otp_token: issued.otp_token,
        expires_in: issued.expires_in,
    }))
}

#[derive(Deserialize)]
pub struct VerifyOtpRequest {
    pub tenant_code: String,
    pub otp_token: String,
    pub code: String,
}

#[derive(Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

pub async fn verify(
    State(state): State<AppState>,
    Json(req): Json<VerifyOtpRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    let tenant = state
        .platform
        .registry
        .get_tenant(&req.tenant_code)
        .await
        .map_err(|_| ApiError::not_found("Unknown tenant"))?;
    state
        .platform
        .otp
        .verify(&req.otp_token, &req.code, &tenant.id)
        .await?;
    Ok(Json(OkResponse { ok: true }))
}

#[derive(Deserialize)]
pub struct ResendOtpRequest {
    pub otp_token: String,
}

pub async fn resend(
    State(state): State<AppState>,
    Json(req): Json<ResendOtpRequest>,
) -> Result<Json<SendOtpResponse>, ApiError> {
    let issued = state
        .platform
        .otp
        .resend(&req.otp_token, &TracingTransport)
        .await?;
    Ok(Json(SendOtpResponse {
        otp_token: issued.otp_token,
        expires_in: issued.expires_in,
    }))
}
