mod common;

use serde_json::json;

use pay_flow::bonus::{
    ActivityRequest, BonusOutcome, BonusStatus, BonusType, TriggerData, ValueType,
    template::{self, BonusTemplate},
    user_bonus,
};
use pay_flow::error::CoreError;
use pay_flow::wallet::PaymentRequest;

use common::*;

// ── Helpers ─────────────────────────────────────────────────────────

async fn install_template(env: &TestEnv, template: &BonusTemplate) {
    let conn = env.handle.db.lock().await;
    template::insert_template(&conn, template).expect("insert template");
}

fn welcome_template(env: &TestEnv) -> BonusTemplate {
    let mut t = BonusTemplate::new(
        &env.tenant.id,
        "welcome",
        BonusType::Welcome,
        ValueType::Percentage,
        100.0,
        "EUR",
    );
    t.max_value = Some(5_000);
    t.turnover_multiplier = 1.0;
    t
}

fn tournament_template(env: &TestEnv) -> BonusTemplate {
    let mut t = BonusTemplate::new(
        &env.tenant.id,
        "tournament-weekly",
        BonusType::Tournament,
        ValueType::Fixed,
        1_000.0,
        "EUR",
    );
    t.position_multipliers = [
        ("1".to_string(), 1.0),
        ("2".to_string(), 0.6),
        ("3".to_string(), 0.4),
    ]
    .into_iter()
    .collect();
    t
}

async fn deposit(env: &TestEnv, user: &pay_flow::model::User, amount: i64) -> Vec<BonusOutcome> {
    let outcome = env
        .platform
        .wallets
        .deposit(
            &env.handle,
            user,
            PaymentRequest {
                user_id: user.id.clone(),
                tenant_id: env.tenant.id.clone(),
                amount,
                currency: "EUR".into(),
                saga_id: None,
            },
            ctx(env),
        )
        .await
        .expect("deposit");
    assert!(outcome.saga.success, "{:?}", outcome.saga.error);
    outcome.bonuses
}

// ── Deposit + welcome bonus ─────────────────────────────────────────

#[tokio::test]
async fn deposit_awards_welcome_bonus_capped_by_percentage() {
    let env = env().await;
    let user = create_user(&env, "u1@example.com").await;
    fund_pool(&env, 100_000, "EUR").await;

    let mut template = welcome_template(&env);
    template.max_value = Some(50_00);
    install_template(&env, &template).await;

    let bonuses = deposit(&env, &user, 40_00).await;

    // Real balance credited.
    assert_eq!(main_balance(&env, &user.id, "EUR").await, 40_00);

    // 100% of 40 EUR, below the 50 EUR cap.
    let awarded = bonuses
        .iter()
        .find_map(|o| match o {
            BonusOutcome::Awarded(b) => Some(b.clone()),
            _ => None,
        })
        .expect("welcome bonus awarded");
    assert_eq!(awarded.bonus_type, BonusType::Welcome);
    assert_eq!(awarded.original_value, 40_00);
    assert_eq!(awarded.turnover_required, 40_00);
    assert_eq!(awarded.status, BonusStatus::Active);

    // Bonus sub-account credited from the pool.
    assert_eq!(bonus_balance(&env, &user.id, "EUR").await, 40_00);

    // Events audited, ledger balanced.
    assert_eq!(audit_events(&env, "bonus.awarded").await.unwrap(), 1);
    assert_eq!(
        audit_events(&env, "wallet.deposit.completed").await.unwrap(),
        1
    );
    assert_ledger_clean(&env).await;
}

#[tokio::test]
async fn percentage_value_is_capped_at_max_value() {
    let env = env().await;
    let user = create_user(&env, "big@example.com").await;
    fund_pool(&env, 100_000, "EUR").await;

    let mut template = welcome_template(&env);
    template.max_value = Some(50_00);
    install_template(&env, &template).await;

    let bonuses = deposit(&env, &user, 200_00).await;
    let awarded = bonuses
        .iter()
        .find_map(|o| match o {
            BonusOutcome::Awarded(b) => Some(b.clone()),
            _ => None,
        })
        .expect("awarded");
    assert_eq!(awarded.original_value, 50_00);
}

#[tokio::test]
async fn welcome_bonus_is_one_shot() {
    let env = env().await;
    let user = create_user(&env, "once@example.com").await;
    fund_pool(&env, 100_000, "EUR").await;
    install_template(&env, &welcome_template(&env)).await;

    let first = deposit(&env, &user, 10_00).await;
    assert!(matches!(first.as_slice(), [BonusOutcome::Awarded(_)]));

    // Second deposit: first-deposit family no longer eligible.
    let second = deposit(&env, &user, 10_00).await;
    assert!(second.is_empty(), "{second:?}");
    assert_eq!(bonus_balance(&env, &user.id, "EUR").await, 10_00);
}

// ── Tournament payouts ──────────────────────────────────────────────

#[tokio::test]
async fn tournament_position_scales_the_payout_and_claims_once() {
    let env = env().await;
    let user = create_user(&env, "pro@example.com").await;
    fund_pool(&env, 100_000, "EUR").await;
    install_template(&env, &tournament_template(&env)).await;

    let trigger = || TriggerData {
        base_amount: None,
        currency: "EUR".into(),
        transaction_id: None,
        metadata: json!({ "tournament_id": "T42", "position": 2 }),
    };

    let outcome = env
        .platform
        .bonus
        .process(
            &env.handle,
            user.clone(),
            &env.tenant.id,
            BonusType::Tournament,
            trigger(),
            ctx(&env),
        )
        .await
        .expect("process");
    let BonusOutcome::Awarded(bonus) = outcome else {
        panic!("expected an award, got {outcome:?}");
    };
    assert_eq!(bonus.original_value, 600);

    // Same tournament again: not eligible.
    let outcome = env
        .platform
        .bonus
        .process(
            &env.handle,
            user.clone(),
            &env.tenant.id,
            BonusType::Tournament,
            trigger(),
            ctx(&env),
        )
        .await
        .expect("process again");
    let BonusOutcome::NotEligible { reason } = outcome else {
        panic!("expected not eligible, got {outcome:?}");
    };
    assert_eq!(reason, "Tournament bonus already claimed");

    // A different tournament is fine.
    let outcome = env
        .platform
        .bonus
        .process(
            &env.handle,
            user,
            &env.tenant.id,
            BonusType::Tournament,
            TriggerData {
                base_amount: None,
                currency: "EUR".into(),
                transaction_id: None,
                metadata: json!({ "tournament_id": "T43", "position": 1 }),
            },
            ctx(&env),
        )
        .await
        .expect("other tournament");
    assert!(matches!(outcome, BonusOutcome::Awarded(_)));
    assert_ledger_clean(&env).await;
}

// ── Pool guard ──────────────────────────────────────────────────────

#[tokio::test]
async fn empty_pool_blocks_the_award_atomically() {
    let env = env().await;
    let user = create_user(&env, "poor@example.com").await;
    install_template(&env, &welcome_template(&env)).await;
    // No pool funding at all.

    let bonuses = deposit(&env, &user, 10_00).await;
    assert!(bonuses.is_empty(), "{bonuses:?}");

    // No partial award anywhere: no bonus row, no bonus balance.
    assert_eq!(bonus_balance(&env, &user.id, "EUR").await, 0);
    let conn = env.handle.db.lock().await;
    let rows = user_bonus::list_user_bonuses(&conn, &user.id).expect("list");
    assert!(rows.is_empty());
}

// ── Turnover lifecycle ──────────────────────────────────────────────

#[tokio::test]
async fn turnover_accrues_monotonically_then_converts() {
    let env = env().await;
    let user = create_user(&env, "grinder@example.com").await;
    fund_pool(&env, 100_000, "EUR").await;

    let mut template = welcome_template(&env);
    template.turnover_multiplier = 2.0;
    template.activity_contributions = [("slots".to_string(), 100.0), ("table".to_string(), 10.0)]
        .into_iter()
        .collect();
    install_template(&env, &template).await;

    let bonuses = deposit(&env, &user, 10_00).await;
    let BonusOutcome::Awarded(bonus) = &bonuses[0] else {
        panic!("expected award");
    };
    assert_eq!(bonus.turnover_required, 20_00);

    // Table play contributes 10%.
    let updated = env
        .platform
        .bonus
        .record_activity(
            &env.handle,
            ActivityRequest {
                user_bonus_id: bonus.id.clone(),
                amount: 10_00,
                currency: "EUR".into(),
                transaction_id: None,
                activity_category: Some("table".into()),
            },
            &ctx(&env),
        )
        .await
        .expect("activity");
    assert_eq!(updated.status, BonusStatus::InProgress);
    assert_eq!(updated.turnover_progress, 1_00);

    // Slots contribute in full and finish the requirement.
    let updated = env
        .platform
        .bonus
        .record_activity(
            &env.handle,
            ActivityRequest {
                user_bonus_id: bonus.id.clone(),
                amount: 19_00,
                currency: "EUR".into(),
                transaction_id: None,
                activity_category: Some("slots".into()),
            },
            &ctx(&env),
        )
        .await
        .expect("activity");
    assert_eq!(updated.status, BonusStatus::RequirementsMet);
    assert_eq!(updated.turnover_progress, 20_00);
    assert!(updated.turnover_progress <= updated.turnover_required);
    assert!(updated.current_value <= updated.original_value);

    // Conversion moves the value into the main balance.
    let before_main = main_balance(&env, &user.id, "EUR").await;
    let converted = env
        .platform
        .bonus
        .convert_bonus(&env.handle, &bonus.id, &ctx(&env))
        .await
        .expect("convert");
    assert_eq!(converted.status, BonusStatus::Converted);
    assert_eq!(
        main_balance(&env, &user.id, "EUR").await,
        before_main + bonus.original_value
    );
    assert_eq!(bonus_balance(&env, &user.id, "EUR").await, 0);

    let claimed = env
        .platform
        .bonus
        .claim(&env.handle, &bonus.id, &ctx(&env))
        .await
        .expect("claim");
    assert_eq!(claimed.status, BonusStatus::Claimed);

    // No further activity on a closed bonus.
    let err = env
        .platform
        .bonus
        .record_activity(
            &env.handle,
            ActivityRequest {
                user_bonus_id: bonus.id.clone(),
                amount: 5_00,
                currency: "EUR".into(),
                transaction_id: None,
                activity_category: None,
            },
            &ctx(&env),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Precondition(_)));
    assert_ledger_clean(&env).await;
}

#[tokio::test]
async fn forfeit_returns_remaining_value_to_the_pool() {
    let env = env().await;
    let user = create_user(&env, "quitter@example.com").await;
    fund_pool(&env, 100_000, "EUR").await;
    install_template(&env, &welcome_template(&env)).await;

    let bonuses = deposit(&env, &user, 10_00).await;
    let BonusOutcome::Awarded(bonus) = &bonuses[0] else {
        panic!("expected award");
    };

    let pool = pay_flow::ledger::AccountSpec::pool(&env.tenant.id, "EUR", &env.tenant.id);
    let pool_before = account_balance(&env, &pool).await;

    let forfeited = env
        .platform
        .bonus
        .forfeit(&env.handle, &bonus.id, "abuse", &ctx(&env))
        .await
        .expect("forfeit");
    assert_eq!(forfeited.status, BonusStatus::Forfeited);
    assert_eq!(forfeited.current_value, 0);
    assert_eq!(bonus_balance(&env, &user.id, "EUR").await, 0);
    assert_eq!(
        account_balance(&env, &pool).await,
        pool_before + bonus.original_value
    );
    assert_ledger_clean(&env).await;
}

// ── Usage limits ────────────────────────────────────────────────────

#[tokio::test]
async fn per_user_and_total_limits_are_enforced() {
    let env = env().await;
    fund_pool(&env, 100_000, "EUR").await;

    let mut template = BonusTemplate::new(
        &env.tenant.id,
        "reload-weekly",
        BonusType::Reload,
        ValueType::Percentage,
        10.0,
        "EUR",
    );
    template.max_uses_per_user = Some(1);
    template.max_uses_total = Some(2);
    install_template(&env, &template).await;

    let a = create_user(&env, "a@example.com").await;
    let b = create_user(&env, "b@example.com").await;
    let c = create_user(&env, "c@example.com").await;

    // Suppress the first-deposit path so only reload is evaluated.
    for user in [&a, &b, &c] {
        let conn = env.handle.db.lock().await;
        pay_flow::auth::users::set_metadata_flag(&conn, &user.id, "has_made_first_deposit", true)
            .expect("flag");
    }
    let a = reload_user(&env, &a.id).await;
    let b = reload_user(&env, &b.id).await;
    let c = reload_user(&env, &c.id).await;

    assert!(matches!(deposit(&env, &a, 100_00).await.as_slice(), [BonusOutcome::Awarded(_)]));
    // Same user again: per-user cap.
    assert!(deposit(&env, &a, 100_00).await.is_empty());
    // Second user takes the last total slot.
    assert!(matches!(deposit(&env, &b, 100_00).await.as_slice(), [BonusOutcome::Awarded(_)]));
    // Third user: template exhausted.
    assert!(deposit(&env, &c, 100_00).await.is_empty());
}

async fn reload_user(env: &TestEnv, user_id: &str) -> pay_flow::model::User {
    let conn = env.handle.db.lock().await;
    pay_flow::auth::users::get_user(&conn, user_id)
        .expect("get user")
        .expect("user exists")
}

// ── Approval workflow ───────────────────────────────────────────────

#[tokio::test]
async fn high_value_awards_wait_for_approval_and_apply_idempotently() {
    let env = env().await;
    let user = create_user(&env, "whale@example.com").await;
    fund_pool(&env, 1_000_000, "EUR").await;

    let mut template = welcome_template(&env);
    template.requires_approval = true;
    template.approval_threshold = Some(50_00);
    install_template(&env, &template).await;

    // Below the threshold: awarded directly.
    let small = deposit(&env, &user, 10_00).await;
    assert!(matches!(small.as_slice(), [BonusOutcome::Awarded(_)]));

    // Above the threshold with a fresh user: pending.
    let whale = create_user(&env, "whale2@example.com").await;
    let outcomes = deposit(&env, &whale, 100_00).await;
    let token = outcomes
        .iter()
        .find_map(|o| match o {
            BonusOutcome::PendingApproval { token } => Some(token.clone()),
            _ => None,
        })
        .expect("pending approval");
    assert_eq!(bonus_balance(&env, &whale.id, "EUR").await, 0);

    let approved = env
        .platform
        .bonus
        .approve_pending(&env.handle, &token, ctx(&env))
        .await
        .expect("approve");
    assert_eq!(approved.original_value, 100_00);
    assert_eq!(bonus_balance(&env, &whale.id, "EUR").await, 100_00);

    // The token is consumed; a second approval cannot re-apply.
    let err = env
        .platform
        .bonus
        .approve_pending(&env.handle, &token, ctx(&env))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound { .. }), "{err}");
    assert_eq!(bonus_balance(&env, &whale.id, "EUR").await, 100_00);
    assert_ledger_clean(&env).await;
}

#[tokio::test]
async fn rejection_deletes_the_pending_bonus() {
    let env = env().await;
    let user = create_user(&env, "denied@example.com").await;
    fund_pool(&env, 1_000_000, "EUR").await;

    let mut template = welcome_template(&env);
    template.requires_approval = true;
    template.approval_threshold = Some(0);
    install_template(&env, &template).await;

    let outcomes = deposit(&env, &user, 10_00).await;
    let token = outcomes
        .iter()
        .find_map(|o| match o {
            BonusOutcome::PendingApproval { token } => Some(token.clone()),
            _ => None,
        })
        .expect("pending");

    assert!(env.platform.bonus.reject_pending(&token).await.expect("reject"));
    let err = env
        .platform
        .bonus
        .approve_pending(&env.handle, &token, ctx(&env))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound { .. }));
    assert_eq!(bonus_balance(&env, &user.id, "EUR").await, 0);
}

// ── Expiry ──────────────────────────────────────────────────────────

#[tokio::test]
async fn overdue_bonuses_expire_and_refund_the_pool() {
    let env = env().await;
    let user = create_user(&env, "late@example.com").await;
    fund_pool(&env, 100_000, "EUR").await;

    let mut template = welcome_template(&env);
    template.expiration_days = Some(0);
    install_template(&env, &template).await;

    let bonuses = deposit(&env, &user, 10_00).await;
    let BonusOutcome::Awarded(bonus) = &bonuses[0] else {
        panic!("expected award");
    };

    let expired = env
        .platform
        .bonus
        .expire_due(&env.handle, &ctx(&env))
        .await
        .expect("expire");
    assert_eq!(expired, vec![bonus.id.clone()]);

    let conn = env.handle.db.lock().await;
    let row = user_bonus::get_user_bonus(&conn, &bonus.id)
        .expect("lookup")
        .expect("row");
    assert_eq!(row.status, BonusStatus::Expired);
}
