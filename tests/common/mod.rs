#![allow(dead_code)]

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use pay_flow::context::RequestContext;
use pay_flow::db::DbHandle;
use pay_flow::error::CoreResult;
use pay_flow::ledger::{AccountSpec, PostRequest};
use pay_flow::model::{Tenant, User};
use pay_flow::platform::{Platform, PlatformConfig};
use pay_flow::wallet::treasury;

/// A fully-wired platform on a scratch data dir: memory pending store,
/// in-process bus, stub processor.
pub struct TestEnv {
    pub platform: Arc<Platform>,
    pub tenant: Tenant,
    pub handle: DbHandle,
    _tmp: TempDir,
}

pub async fn env() -> TestEnv {
    let tmp = tempfile::tempdir().expect("tempdir");
    let platform = Platform::initialize(PlatformConfig::new(tmp.path()))
        .await
        .expect("platform init");
    let tenant = platform
        .registry
        .create_tenant("t1", "Tenant One", None, json!({}))
        .await
        .expect("tenant");
    let handle = platform
        .db_for("payment-service", None, Some(&tenant.id))
        .await
        .expect("payment db");
    TestEnv {
        platform,
        tenant,
        handle,
        _tmp: tmp,
    }
}

pub fn ctx(env: &TestEnv) -> RequestContext {
    RequestContext::new(env.tenant.id.clone())
}

pub async fn create_user(env: &TestEnv, email: &str) -> User {
    let conn = env.handle.db.lock().await;
    pay_flow::auth::users::create_user(&conn, &env.tenant.id, email, None, json!({}))
        .expect("create user")
}

/// Seed a user's main balance from the treasury float.
pub async fn fund_user(env: &TestEnv, user_id: &str, amount: i64, currency: &str) {
    let request = RequestContext::internal();
    env.platform
        .ledger
        .post(
            &env.handle,
            PostRequest::transfer(
                treasury(currency),
                AccountSpec::user(user_id, "main", currency, &env.tenant.id),
                amount,
                currency,
            )
            .with_type("seed"),
            &request,
        )
        .await
        .expect("funding user");
}

/// Seed the tenant's bonus pool.
pub async fn fund_pool(env: &TestEnv, amount: i64, currency: &str) {
    let request = RequestContext::internal();
    env.platform
        .ledger
        .post(
            &env.handle,
            PostRequest::transfer(
                treasury(currency),
                AccountSpec::pool(&env.tenant.id, currency, &env.tenant.id),
                amount,
                currency,
            )
            .with_type("pool_funding"),
            &request,
        )
        .await
        .expect("funding pool");
}

pub async fn main_balance(env: &TestEnv, user_id: &str, currency: &str) -> i64 {
    account_balance(env, &AccountSpec::user(user_id, "main", currency, &env.tenant.id)).await
}

pub async fn bonus_balance(env: &TestEnv, user_id: &str, currency: &str) -> i64 {
    account_balance(env, &AccountSpec::user(user_id, "bonus", currency, &env.tenant.id)).await
}

pub async fn account_balance(env: &TestEnv, spec: &AccountSpec) -> i64 {
    let conn = env.handle.db.lock().await;
    pay_flow::ledger::account::get_account(&conn, &spec.id())
        .expect("account lookup")
        .map(|a| a.balance)
        .unwrap_or(0)
}

/// Every currency must sum to zero over all accounts, and the recomputed
/// balances must match the materialized ones.
pub async fn assert_ledger_clean(env: &TestEnv) {
    let conn = env.handle.db.lock().await;
    let report = pay_flow::ledger::reconcile::reconcile(&conn).expect("reconcile");
    assert!(
        report.clean(),
        "ledger reconciliation found problems: {report:?}"
    );
}

/// Convenience wrapper so tests read as one call.
pub async fn audit_events(env: &TestEnv, event_type: &str) -> CoreResult<usize> {
    let conn = env.platform.core.db.lock().await;
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM events WHERE tenant_id = ?1 AND event_type = ?2",
            [&env.tenant.id, &event_type.to_string()],
            |row| row.get(0),
        )
        .map_err(pay_flow::error::CoreError::from)?;
    Ok(count as usize)
}
