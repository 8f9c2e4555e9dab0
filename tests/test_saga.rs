mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Mutex;

use pay_flow::error::{CoreError, CoreResult};
use pay_flow::ledger::{AccountSpec, PostRequest, post_tx};
use pay_flow::saga::{SagaContext, SagaOptions, SagaStep, execute_saga};

use common::*;

// ── Step fixtures ───────────────────────────────────────────────────

/// Records execute/compensate calls so ordering can be asserted.
struct TracedStep {
    name: String,
    log: Arc<Mutex<Vec<String>>>,
    fail: bool,
}

#[async_trait]
impl SagaStep for TracedStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &mut SagaContext) -> CoreResult<()> {
        self.log.lock().await.push(format!("exec:{}", self.name));
        if self.fail {
            Err(CoreError::Fatal(format!("{} exploded", self.name)))
        } else {
            Ok(())
        }
    }

    async fn compensate(&self, _ctx: &mut SagaContext) -> CoreResult<()> {
        self.log.lock().await.push(format!("comp:{}", self.name));
        Ok(())
    }
}

/// Posts inside the saga's connection, so a transactional saga rolls the
/// posting back with everything else.
struct PostStep {
    from: AccountSpec,
    to: AccountSpec,
    amount: i64,
    currency: String,
}

#[async_trait]
impl SagaStep for PostStep {
    fn name(&self) -> &str {
        "post"
    }

    async fn execute(&self, ctx: &mut SagaContext) -> CoreResult<()> {
        let request = ctx.request.clone();
        let req = PostRequest::transfer(
            self.from.clone(),
            self.to.clone(),
            self.amount,
            &self.currency,
        )
        .with_external_ref(ctx.saga_id.clone());
        let posted = ctx.with_db(move |conn| post_tx(conn, &req, &request)).await?;
        ctx.put("transaction_id", Value::String(posted.id));
        Ok(())
    }
}

struct FlakyStep {
    attempts: Arc<AtomicU32>,
    fail_times: u32,
}

#[async_trait]
impl SagaStep for FlakyStep {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn execute(&self, _ctx: &mut SagaContext) -> CoreResult<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.fail_times {
            Err(CoreError::Transient("connection reset".into()))
        } else {
            Ok(())
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn transactional_failure_rolls_back_every_write() {
    let env = env().await;
    let a = create_user(&env, "a@example.com").await;
    let b = create_user(&env, "b@example.com").await;
    fund_user(&env, &a.id, 1_000, "EUR").await;

    let log = Arc::new(Mutex::new(Vec::new()));
    let steps: Vec<Box<dyn SagaStep>> = vec![
        Box::new(PostStep {
            from: AccountSpec::user(&a.id, "main", "EUR", &env.tenant.id),
            to: AccountSpec::user(&b.id, "main", "EUR", &env.tenant.id),
            amount: 100,
            currency: "EUR".into(),
        }),
        Box::new(TracedStep {
            name: "boom".into(),
            log: log.clone(),
            fail: true,
        }),
    ];

    let result = execute_saga(
        &steps,
        json!({}),
        None,
        env.handle.db.clone(),
        ctx(&env),
        SagaOptions {
            use_transaction: true,
            max_retries: 1,
        },
    )
    .await;

    assert!(!result.success);
    assert_eq!(result.error_code, Some("Fatal"));
    assert_eq!(main_balance(&env, &a.id, "EUR").await, 1_000);
    assert_eq!(main_balance(&env, &b.id, "EUR").await, 0);

    // No transaction row is visible either.
    let tx_id = result.context.get("transaction_id").and_then(|v| v.as_str());
    if let Some(tx_id) = tx_id {
        let conn = env.handle.db.lock().await;
        assert!(
            pay_flow::ledger::get_transaction(&conn, tx_id)
                .expect("lookup")
                .is_none()
        );
    }
    assert_ledger_clean(&env).await;
}

#[tokio::test]
async fn compensations_run_in_reverse_order() {
    let env = env().await;
    let log = Arc::new(Mutex::new(Vec::new()));

    let steps: Vec<Box<dyn SagaStep>> = vec![
        Box::new(TracedStep {
            name: "one".into(),
            log: log.clone(),
            fail: false,
        }),
        Box::new(TracedStep {
            name: "two".into(),
            log: log.clone(),
            fail: false,
        }),
        Box::new(TracedStep {
            name: "three".into(),
            log: log.clone(),
            fail: true,
        }),
    ];

    let result = execute_saga(
        &steps,
        json!({}),
        None,
        env.handle.db.clone(),
        ctx(&env),
        SagaOptions::default(),
    )
    .await;

    assert!(!result.success);
    let log = log.lock().await;
    assert_eq!(
        *log,
        vec![
            "exec:one".to_string(),
            "exec:two".to_string(),
            "exec:three".to_string(),
            "comp:two".to_string(),
            "comp:one".to_string(),
        ]
    );
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let env = env().await;
    let attempts = Arc::new(AtomicU32::new(0));
    let steps: Vec<Box<dyn SagaStep>> = vec![Box::new(FlakyStep {
        attempts: attempts.clone(),
        fail_times: 2,
    })];

    let result = execute_saga(
        &steps,
        json!({}),
        None,
        env.handle.db.clone(),
        ctx(&env),
        SagaOptions {
            use_transaction: false,
            max_retries: 3,
        },
    )
    .await;

    assert!(result.success);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn transient_failures_exhaust_retries() {
    let env = env().await;
    let attempts = Arc::new(AtomicU32::new(0));
    let steps: Vec<Box<dyn SagaStep>> = vec![Box::new(FlakyStep {
        attempts: attempts.clone(),
        fail_times: 10,
    })];

    let result = execute_saga(
        &steps,
        json!({}),
        None,
        env.handle.db.clone(),
        ctx(&env),
        SagaOptions {
            use_transaction: false,
            max_retries: 2,
        },
    )
    .await;

    assert!(!result.success);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(result.error_code, Some("Transient"));
}

#[tokio::test]
async fn cancellation_stops_before_the_next_step_and_compensates() {
    let env = env().await;
    let log = Arc::new(Mutex::new(Vec::new()));
    let request = ctx(&env);

    /// Cancels its own request context, simulating a caller timeout
    /// between steps.
    struct CancelStep {
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl SagaStep for CancelStep {
        fn name(&self) -> &str {
            "cancel"
        }

        async fn execute(&self, ctx: &mut SagaContext) -> CoreResult<()> {
            self.log.lock().await.push("exec:cancel".to_string());
            ctx.request.cancel();
            Ok(())
        }

        async fn compensate(&self, _ctx: &mut SagaContext) -> CoreResult<()> {
            self.log.lock().await.push("comp:cancel".to_string());
            Ok(())
        }
    }

    let steps: Vec<Box<dyn SagaStep>> = vec![
        Box::new(CancelStep { log: log.clone() }),
        Box::new(TracedStep {
            name: "never".into(),
            log: log.clone(),
            fail: false,
        }),
    ];

    let result = execute_saga(
        &steps,
        json!({}),
        None,
        env.handle.db.clone(),
        request,
        SagaOptions::default(),
    )
    .await;

    assert!(!result.success);
    let log = log.lock().await;
    assert_eq!(
        *log,
        vec!["exec:cancel".to_string(), "comp:cancel".to_string()]
    );
}

#[tokio::test]
async fn saga_id_is_stable_and_deposits_are_idempotent() {
    let env = env().await;
    let user = create_user(&env, "payer@example.com").await;

    let deposit = |saga_id: Option<String>| {
        env.platform.wallets.deposit(
            &env.handle,
            &user,
            pay_flow::wallet::PaymentRequest {
                user_id: user.id.clone(),
                tenant_id: env.tenant.id.clone(),
                amount: 5_000,
                currency: "EUR".into(),
                saga_id,
            },
            ctx(&env),
        )
    };

    let first = deposit(Some("dep-42".into())).await.expect("first deposit");
    assert!(first.saga.success);
    assert_eq!(first.saga.saga_id, "dep-42");
    assert_eq!(main_balance(&env, &user.id, "EUR").await, 5_000);

    // Redelivery with the same saga id must not double-post.
    let second = deposit(Some("dep-42".into())).await.expect("redelivery");
    assert!(second.saga.success);
    assert_eq!(
        first.transaction.as_ref().map(|t| t.id.clone()),
        second.transaction.as_ref().map(|t| t.id.clone()),
    );
    assert_eq!(main_balance(&env, &user.id, "EUR").await, 5_000);
}
