use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::auth;
use crate::context::RequestContext;

use super::error::ApiError;
use super::state::AppState;

/// Permission gating the admin surface.
pub const ADMIN_PERMISSION: &str = "platform:admin:any";

/// The authenticated caller, extracted from the bearer access token.
pub struct AuthUser {
    pub user_id: String,
    pub tenant_id: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

impl AuthUser {
    /// The explicit context threaded into every core call.
    pub fn context(&self) -> RequestContext {
        RequestContext::new(self.tenant_id.clone())
            .with_user(self.user_id.clone())
            .with_permissions(self.permissions.clone())
    }

    pub fn require(&self, permission: &str) -> Result<(), ApiError> {
        if auth::has_permission(self.permissions.iter(), permission) {
            Ok(())
        } else {
            Err(ApiError::forbidden(format!(
                "missing permission {permission}"
            )))
        }
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("missing authorization header"))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::unauthorized("invalid authorization format"))?;

        let claims = auth::verify_token(token, &state.platform.auth_secret, "access")
            .map_err(|_| ApiError::unauthorized("invalid or expired token"))?;

        Ok(AuthUser {
            user_id: claims.sub,
            tenant_id: claims.tid,
            roles: claims.roles,
            permissions: claims.permissions,
        })
    }
}
