use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

/// Per-request context threaded explicitly through every public operation.
///
/// Carries the correlation id, the caller's identity scope, an absolute
/// deadline, and a cooperative cancellation flag. There is no ambient
/// task-local equivalent; if a function needs any of this it takes the
/// context as an argument.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub correlation_id: String,
    pub tenant_id: Option<String>,
    pub user_id: Option<String>,
    pub brand_id: Option<String>,
    /// Caller permissions as `resource:action:scope` strings plus privilege
    /// flags such as `allowNegative`.
    pub permissions: Vec<String>,
    /// Unix millis after which the request is considered cancelled.
    pub deadline_ms: Option<i64>,
    cancelled: Arc<AtomicBool>,
}

impl RequestContext {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        RequestContext {
            correlation_id: Uuid::new_v4().to_string(),
            tenant_id: Some(tenant_id.into()),
            user_id: None,
            brand_id: None,
            permissions: Vec::new(),
            deadline_ms: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Context for internal jobs (sweeper, reconciliation) that run outside
    /// any tenant request.
    pub fn internal() -> Self {
        RequestContext {
            correlation_id: Uuid::new_v4().to_string(),
            tenant_id: None,
            user_id: None,
            brand_id: None,
            permissions: vec!["*:*:*".to_string()],
            deadline_ms: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_brand(mut self, brand_id: impl Into<String>) -> Self {
        self.brand_id = Some(brand_id.into());
        self
    }

    pub fn with_permissions(mut self, permissions: Vec<String>) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_deadline_ms(mut self, deadline_ms: i64) -> Self {
        self.deadline_ms = Some(deadline_ms);
        self
    }

    /// Request cooperative cancellation. Sagas check this between steps.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        if self.cancelled.load(Ordering::SeqCst) {
            return true;
        }
        match self.deadline_ms {
            Some(deadline) => chrono::Utc::now().timestamp_millis() >= deadline,
            None => false,
        }
    }

    pub fn check_cancelled(&self) -> CoreResult<()> {
        if self.is_cancelled() {
            Err(CoreError::Precondition("request cancelled".into()))
        } else {
            Ok(())
        }
    }

    /// Exact-match privilege check, used for flags like `allowNegative`.
    pub fn has_privilege(&self, privilege: &str) -> bool {
        self.permissions.iter().any(|p| p == privilege)
    }
}
