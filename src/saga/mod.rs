use std::time::{Duration, Instant};

use async_trait::async_trait;
use rusqlite::Connection;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::context::RequestContext;
use crate::db::Db;
use crate::error::{CoreError, CoreResult};

/// One step of a saga. Steps execute strictly sequentially; `compensate`
/// undoes a completed step when a later one fails outside a transaction.
#[async_trait]
pub trait SagaStep: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, ctx: &mut SagaContext) -> CoreResult<()>;

    async fn compensate(&self, _ctx: &mut SagaContext) -> CoreResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SagaOptions {
    /// Run every step inside one exclusive database transaction. All writes
    /// become visible atomically on commit; a terminal failure rolls back.
    pub use_transaction: bool,
    /// Attempts per step for transient failures. Non-transient failures are
    /// terminal on the first occurrence.
    pub max_retries: u32,
}

impl Default for SagaOptions {
    fn default() -> Self {
        SagaOptions {
            use_transaction: false,
            max_retries: 3,
        }
    }
}

#[derive(Debug)]
pub struct SagaResult {
    pub success: bool,
    /// Idempotency key for the whole saga; ledger postings written inside
    /// use it as their `external_ref`.
    pub saga_id: String,
    /// Accumulated step data.
    pub context: Value,
    pub error: Option<String>,
    pub error_code: Option<&'static str>,
    pub execution_time_ms: u64,
    /// Events queued by steps, to be emitted by the caller after commit.
    pub queued_events: Vec<(String, Value)>,
}

enum SagaConn {
    Shared(Db),
    /// Transaction mode: the physical connection is held for the whole saga
    /// so no other writer can observe intermediate state.
    Exclusive(tokio::sync::OwnedMutexGuard<Connection>),
}

/// Carries accumulated data and injected dependencies through the steps.
pub struct SagaContext {
    pub saga_id: String,
    pub request: RequestContext,
    pub data: Map<String, Value>,
    conn: SagaConn,
    queued_events: Vec<(String, Value)>,
}

impl SagaContext {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key)?.as_str()
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.data.get(key)?.as_i64()
    }

    pub fn put(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    pub fn new_id(&self) -> String {
        Uuid::new_v4().to_string()
    }

    /// Queue an event for emission after the saga commits. Emitting from
    /// inside a step would leak events for work that later rolls back.
    pub fn queue_event(&mut self, event_type: impl Into<String>, payload: Value) {
        self.queued_events.push((event_type.into(), payload));
    }

    /// Run a closure against the saga's database connection. In transaction
    /// mode this is the exclusively-held connection; otherwise the shared
    /// handle is locked for the duration of the closure only.
    pub async fn with_db<R>(
        &self,
        f: impl FnOnce(&Connection) -> CoreResult<R> + Send,
    ) -> CoreResult<R> {
        match &self.conn {
            SagaConn::Exclusive(guard) => f(guard),
            SagaConn::Shared(db) => {
                let conn = db.lock().await;
                f(&conn)
            }
        }
    }
}

/// Execute a saga. See `SagaOptions` for transaction and retry behaviour;
/// cancellation is honored between steps and compensation still runs when
/// the caller has cancelled.
pub async fn execute_saga(
    steps: &[Box<dyn SagaStep>],
    input: Value,
    saga_id: Option<String>,
    db: Db,
    request: RequestContext,
    opts: SagaOptions,
) -> SagaResult {
    let started = Instant::now();
    let saga_id = saga_id.unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut data = Map::new();
    match input {
        Value::Object(map) => data.extend(map),
        Value::Null => {}
        other => {
            data.insert("input".to_string(), other);
        }
    }
    data.insert("saga_id".to_string(), Value::String(saga_id.clone()));

    let conn = if opts.use_transaction {
        let guard = db.clone().lock_owned().await;
        if let Err(e) = guard.execute_batch("BEGIN IMMEDIATE;") {
            return failure(saga_id, Value::Object(data), &e.into(), started, Vec::new());
        }
        SagaConn::Exclusive(guard)
    } else {
        SagaConn::Shared(db)
    };

    let mut ctx = SagaContext {
        saga_id: saga_id.clone(),
        request,
        data,
        conn,
        queued_events: Vec::new(),
    };

    let mut completed: Vec<usize> = Vec::new();
    let mut terminal: Option<CoreError> = None;

    'steps: for (index, step) in steps.iter().enumerate() {
        if ctx.request.is_cancelled() {
            terminal = Some(CoreError::Precondition("request cancelled".into()));
            break;
        }

        let attempts = opts.max_retries.max(1);
        for attempt in 1..=attempts {
            match step.execute(&mut ctx).await {
                Ok(()) => {
                    completed.push(index);
                    continue 'steps;
                }
                Err(e) if e.is_transient() && attempt < attempts => {
                    tracing::debug!(
                        saga_id = %ctx.saga_id,
                        step = step.name(),
                        attempt,
                        error = %e,
                        "retrying transient step failure"
                    );
                    tokio::time::sleep(Duration::from_millis(50 * u64::from(attempt))).await;
                }
                Err(e) => {
                    terminal = Some(e);
                    break 'steps;
                }
            }
        }
    }

    match terminal {
        None => {
            if let SagaConn::Exclusive(guard) = &ctx.conn {
                if let Err(e) = guard.execute_batch("COMMIT;") {
                    let err: CoreError = e.into();
                    let _ = guard.execute_batch("ROLLBACK;");
                    let context = Value::Object(std::mem::take(&mut ctx.data));
                    return failure(saga_id, context, &err, started, Vec::new());
                }
            }
            SagaResult {
                success: true,
                saga_id,
                context: Value::Object(std::mem::take(&mut ctx.data)),
                error: None,
                error_code: None,
                execution_time_ms: started.elapsed().as_millis() as u64,
                queued_events: std::mem::take(&mut ctx.queued_events),
            }
        }
        Some(err) => {
            if let SagaConn::Exclusive(guard) = &ctx.conn {
                // All writes roll back; compensations would double-undo.
                if let Err(e) = guard.execute_batch("ROLLBACK;") {
                    tracing::error!(saga_id = %ctx.saga_id, error = %e, "rollback failed");
                }
            } else {
                for index in completed.into_iter().rev() {
                    let step = &steps[index];
                    if let Err(e) = step.compensate(&mut ctx).await {
                        tracing::warn!(
                            saga_id = %ctx.saga_id,
                            step = step.name(),
                            error = %e,
                            "compensation failed"
                        );
                    }
                }
            }
            let context = Value::Object(std::mem::take(&mut ctx.data));
            failure(saga_id, context, &err, started, Vec::new())
        }
    }
}

fn failure(
    saga_id: String,
    context: Value,
    err: &CoreError,
    started: Instant,
    queued_events: Vec<(String, Value)>,
) -> SagaResult {
    SagaResult {
        success: false,
        saga_id,
        context,
        error: Some(err.to_string()),
        error_code: Some(err.code()),
        execution_time_ms: started.elapsed().as_millis() as u64,
        queued_events,
    }
}
