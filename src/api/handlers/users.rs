use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::auth;
use crate::model::RoleContext;
use crate::model::user::User;

use crate::api::error::ApiError;
use crate::api::state::AppState;

const USER_SERVICE: &str = "user-service";

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub tenant_code: String,
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct UserView {
    pub id: String,
    pub tenant_id: String,
    pub email: String,
}

#[derive(Serialize)]
pub struct RegisterResponse {
    pub ok: bool,
    pub user: UserView,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, ApiError> {
    if !req.email.contains('@') {
        return Err(ApiError::bad_request("Invalid email"));
    }

    let tenant = state
        .platform
        .registry
        .get_tenant(&req.tenant_code)
        .await
        .map_err(|_| ApiError::not_found("Unknown tenant"))?;
    if !tenant.active {
        return Err(ApiError::forbidden("Tenant is inactive"));
    }

    let password_hash = auth::password::hash_password(&req.password)?;

    let handle = state
        .platform
        .db_for(USER_SERVICE, None, Some(&tenant.id))
        .await?;
    let user = {
        let conn = handle.db.lock().await;
        auth::users::create_user(&conn, &tenant.id, &req.email, Some(&password_hash), json!({}))?
    };

    Ok(Json(RegisterResponse {
        ok: true,
        user: UserView {
            id: user.id,
            tenant_id: user.tenant_id,
            email: user.email,
        },
    }))
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub tenant_code: String,
    pub email: String,
    pub password: String,
    pub two_factor_code: Option<String>,
}

#[derive(Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    #[serde(flatten)]
    pub tokens: TokenPair,
    pub user: UserView,
}

async fn issue_pair(state: &AppState, user: &User) -> Result<TokenPair, ApiError> {
    let access_ttl = state
        .platform
        .config
        .get_or("auth-service", "access_ttl_secs", None, None, json!(auth::jwt::DEFAULT_ACCESS_TTL_SECS))
        .await
        .as_i64()
        .unwrap_or(auth::jwt::DEFAULT_ACCESS_TTL_SECS);
    let refresh_ttl = state
        .platform
        .config
        .get_or("auth-service", "refresh_ttl_secs", None, None, json!(auth::jwt::DEFAULT_REFRESH_TTL_SECS))
        .await
        .as_i64()
        .unwrap_or(auth::jwt::DEFAULT_REFRESH_TTL_SECS);

    // Effective permissions are resolved once at issuance and ride in the
    // token.
    let context = RoleContext {
        tenant: Some(user.tenant_id.clone()),
        ..Default::default()
    };
    let permissions = state.platform.roles.resolve(user, &context).await?;
    let mut user = user.clone();
    user.permissions = permissions.into_iter().collect();
    user.permissions.sort();

    Ok(TokenPair {
        access_token: auth::issue_token(&user, &state.platform.auth_secret, "access", access_ttl)?,
        refresh_token: auth::issue_token(
            &user,
            &state.platform.auth_secret,
            "refresh",
            refresh_ttl,
        )?,
    })
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let tenant = state
        .platform
        .registry
        .get_tenant(&req.tenant_code)
        .await
        .map_err(|_| ApiError::unauthorized("Invalid credentials"))?;

    let handle = state
        .platform
        .db_for(USER_SERVICE, None, Some(&tenant.id))
        .await?;
    let user = {
        let conn = handle.db.lock().await;
        auth::users::get_user_by_email(&conn, &tenant.id, &req.email)?
    }
    .ok_or_else(|| ApiError::unauthorized("Invalid credentials"))?;

    let Some(hash) = &user.password_hash else {
        return Err(ApiError::unauthorized("Invalid credentials"));
    };
    if !auth::password::verify_password(&req.password, hash) {
        return Err(ApiError::unauthorized("Invalid credentials"));
    }

    if user.two_factor_enabled {
        let Some(code) = &req.two_factor_code else {
            return Err(ApiError::unauthorized("Two-factor code required"));
        };
        let conn = handle.db.lock().await;
        state
            .platform
            .two_factor
            .verify_code(&conn, &user.id, code)
            .map_err(|_| ApiError::unauthorized("Invalid two-factor code"))?;
    }

    let tokens = issue_pair(&state, &user).await?;
    Ok(Json(LoginResponse {
        tokens,
        user: UserView {
            id: user.id,
            tenant_id: user.tenant_id,
            email: user.email,
        },
    }))
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

pub async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let claims = auth::verify_token(&req.refresh_token, &state.platform.auth_secret, "refresh")
        .map_err(|_| ApiError::unauthorized("invalid or expired refresh token"))?;

    let handle = state
        .platform
        .db_for(USER_SERVICE, None, Some(&claims.tid))
        .await?;
    let user = {
        let conn = handle.db.lock().await;
        auth::users::get_user(&conn, &claims.sub)?
    }
    .ok_or_else(|| ApiError::unauthorized("user no longer exists"))?;

    let tokens = issue_pair(&state, &user).await?;
    Ok(Json(LoginResponse {
        tokens,
        user: UserView {
            id: user.id,
            tenant_id: user.tenant_id,
            email: user.email,
        },
    }))
}
