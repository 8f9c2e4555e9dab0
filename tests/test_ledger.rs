mod common;

use pay_flow::context::RequestContext;
use pay_flow::error::CoreError;
use pay_flow::ledger::{AccountSpec, Conversion, HoldRequest, PostRequest};
use pay_flow::wallet::treasury;

use common::*;

// ── Postings ────────────────────────────────────────────────────────

#[tokio::test]
async fn posting_moves_money_and_balances_sum_to_zero() {
    let env = env().await;
    let alice = create_user(&env, "alice@example.com").await;
    let bob = create_user(&env, "bob@example.com").await;
    fund_user(&env, &alice.id, 10_000, "EUR").await;

    let request = ctx(&env);
    env.platform
        .ledger
        .post(
            &env.handle,
            PostRequest::transfer(
                AccountSpec::user(&alice.id, "main", "EUR", &env.tenant.id),
                AccountSpec::user(&bob.id, "main", "EUR", &env.tenant.id),
                2_500,
                "EUR",
            ),
            &request,
        )
        .await
        .expect("transfer");

    assert_eq!(main_balance(&env, &alice.id, "EUR").await, 7_500);
    assert_eq!(main_balance(&env, &bob.id, "EUR").await, 2_500);
    assert_ledger_clean(&env).await;
}

#[tokio::test]
async fn posting_to_same_account_fails() {
    let env = env().await;
    let alice = create_user(&env, "alice@example.com").await;
    fund_user(&env, &alice.id, 1_000, "EUR").await;

    let spec = AccountSpec::user(&alice.id, "main", "EUR", &env.tenant.id);
    let err = env
        .platform
        .ledger
        .post(
            &env.handle,
            PostRequest::transfer(spec.clone(), spec, 100, "EUR"),
            &ctx(&env),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)), "{err}");
}

#[tokio::test]
async fn posting_requires_positive_amount() {
    let env = env().await;
    let alice = create_user(&env, "alice@example.com").await;
    let bob = create_user(&env, "bob@example.com").await;

    for amount in [0, -5] {
        let err = env
            .platform
            .ledger
            .post(
                &env.handle,
                PostRequest::transfer(
                    AccountSpec::user(&alice.id, "main", "EUR", &env.tenant.id),
                    AccountSpec::user(&bob.id, "main", "EUR", &env.tenant.id),
                    amount,
                    "EUR",
                ),
                &ctx(&env),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }
}

#[tokio::test]
async fn insufficient_funds_blocks_the_debit() {
    let env = env().await;
    let alice = create_user(&env, "alice@example.com").await;
    let bob = create_user(&env, "bob@example.com").await;
    fund_user(&env, &alice.id, 100, "EUR").await;

    let err = env
        .platform
        .ledger
        .post(
            &env.handle,
            PostRequest::transfer(
                AccountSpec::user(&alice.id, "main", "EUR", &env.tenant.id),
                AccountSpec::user(&bob.id, "main", "EUR", &env.tenant.id),
                101,
                "EUR",
            ),
            &ctx(&env),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Precondition(_)), "{err}");
    assert_eq!(main_balance(&env, &alice.id, "EUR").await, 100);
}

#[tokio::test]
async fn allow_negative_privilege_overrides_the_check() {
    let env = env().await;
    let alice = create_user(&env, "alice@example.com").await;
    let bob = create_user(&env, "bob@example.com").await;

    let privileged = ctx(&env).with_permissions(vec!["allowNegative".to_string()]);
    env.platform
        .ledger
        .post(
            &env.handle,
            PostRequest::transfer(
                AccountSpec::user(&alice.id, "main", "EUR", &env.tenant.id),
                AccountSpec::user(&bob.id, "main", "EUR", &env.tenant.id),
                500,
                "EUR",
            ),
            &privileged,
        )
        .await
        .expect("privileged overdraft");

    assert_eq!(main_balance(&env, &alice.id, "EUR").await, -500);
    assert_ledger_clean(&env).await;
}

#[tokio::test]
async fn credit_limit_caps_negative_accounts() {
    let env = env().await;
    let alice = create_user(&env, "alice@example.com").await;
    let bob = create_user(&env, "bob@example.com").await;

    let mut from = AccountSpec::user(&alice.id, "main", "EUR", &env.tenant.id);
    from.allow_negative = true;
    from.credit_limit = Some(1_000);

    let to = AccountSpec::user(&bob.id, "main", "EUR", &env.tenant.id);
    env.platform
        .ledger
        .post(
            &env.handle,
            PostRequest::transfer(from.clone(), to.clone(), 800, "EUR"),
            &ctx(&env),
        )
        .await
        .expect("within credit limit");

    let err = env
        .platform
        .ledger
        .post(
            &env.handle,
            PostRequest::transfer(from, to, 300, "EUR"),
            &ctx(&env),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Precondition(_)), "{err}");
}

// ── Idempotency ─────────────────────────────────────────────────────

#[tokio::test]
async fn external_ref_makes_posting_idempotent() {
    let env = env().await;
    let alice = create_user(&env, "alice@example.com").await;
    let bob = create_user(&env, "bob@example.com").await;
    fund_user(&env, &alice.id, 1_000, "EUR").await;

    let request = ctx(&env);
    let post = || {
        PostRequest::transfer(
            AccountSpec::user(&alice.id, "main", "EUR", &env.tenant.id),
            AccountSpec::user(&bob.id, "main", "EUR", &env.tenant.id),
            400,
            "EUR",
        )
        .with_external_ref("saga-123")
    };

    let first = env
        .platform
        .ledger
        .post(&env.handle, post(), &request)
        .await
        .expect("first");
    let second = env
        .platform
        .ledger
        .post(&env.handle, post(), &request)
        .await
        .expect("second");

    assert_eq!(first.id, second.id);
    assert_eq!(main_balance(&env, &alice.id, "EUR").await, 600);
    assert_eq!(main_balance(&env, &bob.id, "EUR").await, 400);
    assert_ledger_clean(&env).await;
}

// ── Holds ───────────────────────────────────────────────────────────

#[tokio::test]
async fn hold_reduces_available_but_not_balance() {
    let env = env().await;
    let alice = create_user(&env, "alice@example.com").await;
    fund_user(&env, &alice.id, 1_000, "EUR").await;

    let spec = AccountSpec::user(&alice.id, "main", "EUR", &env.tenant.id);
    let hold = env
        .platform
        .ledger
        .hold(
            &env.handle,
            HoldRequest {
                account: spec.clone(),
                amount: 300,
                currency: "EUR".into(),
                reason: "test".into(),
                expires_at: None,
            },
            &ctx(&env),
        )
        .await
        .expect("hold");

    let view = env
        .platform
        .ledger
        .get_balance(&env.handle, &spec.id())
        .await
        .expect("balance");
    assert_eq!(view.balance, 1_000);
    assert_eq!(view.available_balance, 700);
    assert_eq!(view.pending_out, 300);

    // Another debit can use at most the available part.
    let bob = create_user(&env, "bob@example.com").await;
    let err = env
        .platform
        .ledger
        .post(
            &env.handle,
            PostRequest::transfer(
                spec.clone(),
                AccountSpec::user(&bob.id, "main", "EUR", &env.tenant.id),
                800,
                "EUR",
            ),
            &ctx(&env),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Precondition(_)));

    env.platform
        .ledger
        .release(&env.handle, &hold.id)
        .await
        .expect("release");
    let view = env
        .platform
        .ledger
        .get_balance(&env.handle, &spec.id())
        .await
        .expect("balance");
    assert_eq!(view.available_balance, 1_000);
}

#[tokio::test]
async fn capture_turns_hold_into_posting() {
    let env = env().await;
    let alice = create_user(&env, "alice@example.com").await;
    let bob = create_user(&env, "bob@example.com").await;
    fund_user(&env, &alice.id, 1_000, "EUR").await;

    let spec = AccountSpec::user(&alice.id, "main", "EUR", &env.tenant.id);
    let hold = env
        .platform
        .ledger
        .hold(
            &env.handle,
            HoldRequest {
                account: spec,
                amount: 250,
                currency: "EUR".into(),
                reason: "payment".into(),
                expires_at: None,
            },
            &ctx(&env),
        )
        .await
        .expect("hold");

    let posted = env
        .platform
        .ledger
        .capture(
            &env.handle,
            &hold.id,
            AccountSpec::user(&bob.id, "main", "EUR", &env.tenant.id),
            "payment",
            Some("cap-1".into()),
            &ctx(&env),
        )
        .await
        .expect("capture");
    assert_eq!(posted.amount, 250);
    assert_eq!(main_balance(&env, &alice.id, "EUR").await, 750);
    assert_eq!(main_balance(&env, &bob.id, "EUR").await, 250);

    // A closed hold cannot be released or captured again.
    let err = env
        .platform
        .ledger
        .release(&env.handle, &hold.id)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Precondition(_)));
    assert_ledger_clean(&env).await;
}

#[tokio::test]
async fn sweeper_releases_expired_holds() {
    let env = env().await;
    let alice = create_user(&env, "alice@example.com").await;
    fund_user(&env, &alice.id, 500, "EUR").await;

    let spec = AccountSpec::user(&alice.id, "main", "EUR", &env.tenant.id);
    env.platform
        .ledger
        .hold(
            &env.handle,
            HoldRequest {
                account: spec.clone(),
                amount: 500,
                currency: "EUR".into(),
                reason: "stale".into(),
                expires_at: Some(chrono::Utc::now().timestamp() - 10),
            },
            &ctx(&env),
        )
        .await
        .expect("hold");

    let released = env
        .platform
        .ledger
        .sweep_expired_holds(&env.handle)
        .await
        .expect("sweep");
    assert_eq!(released, 1);

    let view = env
        .platform
        .ledger
        .get_balance(&env.handle, &spec.id())
        .await
        .expect("balance");
    assert_eq!(view.available_balance, 500);
}

// ── Currency conversion ─────────────────────────────────────────────

#[tokio::test]
async fn cross_currency_without_rate_fails() {
    let env = env().await;
    let alice = create_user(&env, "alice@example.com").await;
    let bob = create_user(&env, "bob@example.com").await;
    fund_user(&env, &alice.id, 1_000, "EUR").await;

    let err = env
        .platform
        .ledger
        .post(
            &env.handle,
            PostRequest::transfer(
                AccountSpec::user(&alice.id, "main", "EUR", &env.tenant.id),
                AccountSpec::user(&bob.id, "main", "USD", &env.tenant.id),
                100,
                "EUR",
            ),
            &ctx(&env),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)), "{err}");
}

#[tokio::test]
async fn no_provider_and_no_override_means_no_conversion() {
    let env = env().await;
    let err = env.platform.rates.get_rate("EUR", "USD").await.unwrap_err();
    assert!(matches!(err, CoreError::UpstreamUnavailable(_)), "{err}");
}

#[tokio::test]
async fn conversion_with_override_keeps_per_currency_balance() {
    let env = env().await;
    let alice = create_user(&env, "alice@example.com").await;
    let bob = create_user(&env, "bob@example.com").await;
    fund_user(&env, &alice.id, 1_000, "EUR").await;

    env.platform
        .rates
        .set_override("EUR", "USD", 1.1)
        .await
        .expect("override");

    let posted = env
        .platform
        .ledger
        .post_converted(
            &env.handle,
            PostRequest::transfer(
                AccountSpec::user(&alice.id, "main", "EUR", &env.tenant.id),
                AccountSpec::user(&bob.id, "main", "USD", &env.tenant.id),
                200,
                "EUR",
            ),
            &ctx(&env),
        )
        .await
        .expect("converted post");

    assert_eq!(posted.converted_amount, Some(220));
    assert_eq!(main_balance(&env, &alice.id, "EUR").await, 800);
    assert_eq!(main_balance(&env, &bob.id, "USD").await, 220);
    assert_ledger_clean(&env).await;
}

#[tokio::test]
async fn stale_rate_is_rejected() {
    let env = env().await;
    let alice = create_user(&env, "alice@example.com").await;
    let bob = create_user(&env, "bob@example.com").await;
    fund_user(&env, &alice.id, 1_000, "EUR").await;

    let err = env
        .platform
        .ledger
        .post(
            &env.handle,
            PostRequest::transfer(
                AccountSpec::user(&alice.id, "main", "EUR", &env.tenant.id),
                AccountSpec::user(&bob.id, "main", "USD", &env.tenant.id),
                100,
                "EUR",
            )
            .with_conversion(Conversion {
                from_currency: "EUR".into(),
                to_currency: "USD".into(),
                rate: 1.1,
                obtained_at: chrono::Utc::now().timestamp() - 3600,
            }),
            &ctx(&env),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Precondition(_)), "{err}");
}

// ── Reversal ────────────────────────────────────────────────────────

#[tokio::test]
async fn reversal_restores_balances_and_keeps_both_rows() {
    let env = env().await;
    let alice = create_user(&env, "alice@example.com").await;

    let request = RequestContext::internal();
    let deposit = env
        .platform
        .ledger
        .post(
            &env.handle,
            PostRequest::transfer(
                treasury("EUR"),
                AccountSpec::user(&alice.id, "main", "EUR", &env.tenant.id),
                10_000,
                "EUR",
            )
            .with_type("deposit")
            .with_external_ref("dep-1"),
            &request,
        )
        .await
        .expect("deposit");
    assert_eq!(main_balance(&env, &alice.id, "EUR").await, 10_000);

    let reversal = env
        .platform
        .ledger
        .reverse(&env.handle, &deposit.id, None)
        .await
        .expect("reverse");
    assert_eq!(reversal.tx_type, "reversal");
    assert_eq!(main_balance(&env, &alice.id, "EUR").await, 0);

    {
        let conn = env.handle.db.lock().await;
        let original = pay_flow::ledger::get_transaction(&conn, &deposit.id)
            .expect("lookup")
            .expect("original retained");
        assert_eq!(original.status, pay_flow::ledger::TxStatus::Reversed);
        let rev = pay_flow::ledger::get_transaction(&conn, &reversal.id)
            .expect("lookup")
            .expect("reversal retained");
        assert_eq!(rev.status, pay_flow::ledger::TxStatus::Committed);
    }

    // Reversing twice is a precondition failure.
    let err = env
        .platform
        .ledger
        .reverse(&env.handle, &deposit.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Precondition(_)));
    assert_ledger_clean(&env).await;
}

// ── Reconciliation ──────────────────────────────────────────────────

#[tokio::test]
async fn reconcile_reports_tampered_balances_without_fixing() {
    let env = env().await;
    let alice = create_user(&env, "alice@example.com").await;
    fund_user(&env, &alice.id, 777, "EUR").await;
    assert_ledger_clean(&env).await;

    let account_id = AccountSpec::user(&alice.id, "main", "EUR", &env.tenant.id).id();
    {
        let conn = env.handle.db.lock().await;
        conn.execute(
            "UPDATE ledger_accounts SET balance = balance + 5 WHERE id = ?1",
            [&account_id],
        )
        .expect("tamper");
    }

    let conn = env.handle.db.lock().await;
    let report = pay_flow::ledger::reconcile::reconcile(&conn).expect("reconcile");
    assert!(!report.clean());
    assert_eq!(report.drifts.len(), 1);
    assert_eq!(report.drifts[0].account_id, account_id);
    assert_eq!(report.drifts[0].recorded, 782);
    assert_eq!(report.drifts[0].recomputed, 777);

    // Still tampered afterwards: reporting never corrects.
    let balance: i64 = conn
        .query_row(
            "SELECT balance FROM ledger_accounts WHERE id = ?1",
            [&account_id],
            |row| row.get(0),
        )
        .expect("balance");
    assert_eq!(balance, 782);
}
