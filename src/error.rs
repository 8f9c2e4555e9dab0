use thiserror::Error;

/// Structured error kinds carried inside the core.
///
/// Handlers translate these to the wire envelope at the API boundary only;
/// saga steps look at the kind to decide retry vs abort.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{0}")]
    Conflict(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("{0}")]
    Precondition(String),

    #[error("rate limited, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{0}")]
    Fatal(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Wire error code, CapitalCamelCase.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "Validation",
            CoreError::NotFound { .. } => "NotFound",
            CoreError::Conflict(_) => "Conflict",
            CoreError::Unauthorized(_) => "Unauthorized",
            CoreError::Forbidden(_) => "Forbidden",
            CoreError::Precondition(_) => "Precondition",
            CoreError::RateLimited { .. } => "RateLimited",
            CoreError::UpstreamUnavailable(_) => "UpstreamUnavailable",
            CoreError::Transient(_) => "Transient",
            CoreError::Configuration(_) => "ConfigurationError",
            CoreError::Fatal(_) => "Fatal",
        }
    }

    /// Whether a saga should retry the failed step.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoreError::Transient(_) | CoreError::UpstreamUnavailable(_)
        )
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            // Busy/locked means another writer holds the file; safe to retry.
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::DatabaseBusy
                    || e.code == rusqlite::ErrorCode::DatabaseLocked =>
            {
                CoreError::Transient(err.to_string())
            }
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                CoreError::Conflict(err.to_string())
            }
            _ => CoreError::Fatal(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Validation(format!("invalid json: {err}"))
    }
}

impl From<redis::RedisError> for CoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() || err.is_connection_dropped() || err.is_connection_refusal() {
            CoreError::UpstreamUnavailable(format!("redis: {err}"))
        } else {
            CoreError::Transient(format!("redis: {err}"))
        }
    }
}
