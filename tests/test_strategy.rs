mod common;

use serde_json::json;

use common::*;

// ── Per-tenant isolation (the core multi-tenancy property) ──────────

#[tokio::test]
async fn per_tenant_strategy_isolates_tenants_physically() {
    let env = env().await;

    let t7 = env
        .platform
        .registry
        .create_tenant("t7", "Tenant Seven", None, json!({}))
        .await
        .expect("t7");
    env.platform
        .registry
        .create_tenant("t8", "Tenant Eight", None, json!({}))
        .await
        .expect("t8");

    env.platform
        .set_config(
            "payment-service",
            "database",
            json!({ "strategy": "per-tenant", "dbNameTemplate": "tenant_{tenantId}_pay" }),
            None,
            None,
            &[],
        )
        .await
        .expect("set strategy");

    let h7 = env
        .platform
        .db_for("payment-service", None, Some("t7"))
        .await
        .expect("resolve t7");
    let h8 = env
        .platform
        .db_for("payment-service", None, Some("t8"))
        .await
        .expect("resolve t8");
    assert_eq!(h7.name, "tenant_t7_pay");
    assert_eq!(h8.name, "tenant_t8_pay");

    // A write under t7 is invisible under t8.
    {
        let conn = h7.db.lock().await;
        pay_flow::auth::users::create_user(&conn, &t7.id, "only@t7.example", None, json!({}))
            .expect("user in t7");
    }
    {
        let conn = h8.db.lock().await;
        let found =
            pay_flow::auth::users::get_user_by_email(&conn, &t7.id, "only@t7.example")
                .expect("query");
        assert!(found.is_none(), "t7 write leaked into t8");
    }
}

#[tokio::test]
async fn resolution_is_deterministic_and_cache_stable() {
    let env = env().await;
    env.platform
        .set_config(
            "payment-service",
            "database",
            json!({ "strategy": "per-tenant-service" }),
            None,
            None,
            &[],
        )
        .await
        .expect("set strategy");

    let first = env
        .platform
        .db_for("payment-service", None, Some("t9"))
        .await
        .expect("resolve");
    for _ in 0..5 {
        let again = env
            .platform
            .db_for("payment-service", None, Some("t9"))
            .await
            .expect("resolve");
        assert_eq!(first.name, again.name);
    }
    assert_eq!(first.name, "tenant_t9_payment_service");
}

#[tokio::test]
async fn config_change_invalidates_cached_resolutions() {
    let env = env().await;

    let before = env
        .platform
        .db_for("payment-service", None, Some("t1"))
        .await
        .expect("resolve");
    assert_eq!(before.name, "core_service"); // shared default

    env.platform
        .set_config(
            "payment-service",
            "database",
            json!({ "strategy": "per-tenant" }),
            None,
            None,
            &[],
        )
        .await
        .expect("set strategy");

    let after = env
        .platform
        .db_for("payment-service", None, Some("t1"))
        .await
        .expect("resolve");
    assert_eq!(after.name, "tenant_t1");
}

#[tokio::test]
async fn bad_template_is_rejected_at_write_time() {
    let env = env().await;
    let err = env
        .platform
        .set_config(
            "payment-service",
            "database",
            json!({ "strategy": "per-tenant", "dbNameTemplate": "fixed_name" }),
            None,
            None,
            &[],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, pay_flow::error::CoreError::Configuration(_)), "{err}");
}

#[tokio::test]
async fn shard_assignment_is_stable_per_tenant() {
    let env = env().await;
    env.platform
        .set_config(
            "payment-service",
            "database",
            json!({ "strategy": "per-shard", "num_shards": 4 }),
            None,
            None,
            &[],
        )
        .await
        .expect("set strategy");

    let a = env
        .platform
        .db_for("payment-service", None, Some("tenant-a"))
        .await
        .expect("resolve");
    let b = env
        .platform
        .db_for("payment-service", None, Some("tenant-a"))
        .await
        .expect("resolve");
    assert_eq!(a.name, b.name);
    assert!(a.name.starts_with("payment_service_shard_"));
}

// ── Config precedence (the other half of component A) ───────────────

#[tokio::test]
async fn config_precedence_narrowest_scope_wins() {
    let env = env().await;
    let config = &env.platform.config;

    config
        .set("notif", "provider", json!("global"), None, None, &[])
        .await
        .expect("set");
    config
        .set("notif", "provider", json!("brand"), Some("b1"), None, &[])
        .await
        .expect("set");
    config
        .set("notif", "provider", json!("tenant"), None, Some("t1"), &[])
        .await
        .expect("set");
    config
        .set("notif", "provider", json!("both"), Some("b1"), Some("t1"), &[])
        .await
        .expect("set");

    let get = |brand: Option<&'static str>, tenant: Option<&'static str>| {
        config.get("notif", "provider", brand, tenant)
    };
    assert_eq!(get(Some("b1"), Some("t1")).await.unwrap(), json!("both"));
    assert_eq!(get(None, Some("t1")).await.unwrap(), json!("tenant"));
    assert_eq!(get(Some("b1"), None).await.unwrap(), json!("brand"));
    assert_eq!(get(None, None).await.unwrap(), json!("global"));
    // Unknown brand/tenant falls through to the service scope.
    assert_eq!(get(Some("b9"), Some("t9")).await.unwrap(), json!("global"));
}

#[tokio::test]
async fn unknown_keys_fail_and_registered_defaults_answer() {
    let env = env().await;
    let err = env
        .platform
        .config
        .get("notif", "missing", None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, pay_flow::error::CoreError::NotFound { .. }));

    // Registered at startup, so introspection and reads both see it.
    let ttl = env
        .platform
        .config
        .get("auth-service", "access_ttl_secs", None, None)
        .await
        .expect("default");
    assert_eq!(ttl, json!(3600));
}

// ── Generic references ──────────────────────────────────────────────

#[tokio::test]
async fn references_resolve_in_one_query_per_kind() {
    use pay_flow::model::{EntityRef, RefKind};

    let env = env().await;
    let user = create_user(&env, "ref@example.com").await;
    fund_user(&env, &user.id, 100, "EUR").await;

    let refs = vec![
        EntityRef::new(RefKind::User, user.id.clone()),
        EntityRef::new(RefKind::Tenant, env.tenant.id.clone()),
        EntityRef::new(RefKind::User, "no-such-user"),
    ];
    let resolved = {
        let conn = env.handle.db.lock().await;
        env.platform
            .refs
            .resolve_batch(&conn, &refs)
            .expect("resolve")
    };

    let user_entity = resolved
        .get(&EntityRef::new(RefKind::User, user.id.clone()))
        .expect("user resolved");
    assert_eq!(user_entity["email"], "ref@example.com");
    assert!(
        resolved
            .get(&EntityRef::new(RefKind::Tenant, env.tenant.id.clone()))
            .is_some()
    );
    // Unknown ids are simply absent, not errors.
    assert!(
        resolved
            .get(&EntityRef::new(RefKind::User, "no-such-user"))
            .is_none()
    );
}

#[tokio::test]
async fn sensitive_paths_are_redacted_in_summaries() {
    let env = env().await;
    env.platform
        .config
        .set(
            "notif",
            "smtp",
            json!({ "host": "mail.example.com", "password": "hunter2" }),
            None,
            None,
            &["password".to_string()],
        )
        .await
        .expect("set");

    let entries = env.platform.config.summarize("notif").await.expect("summarize");
    let smtp = entries.iter().find(|e| e.key == "smtp").expect("entry");
    assert_eq!(smtp.value["host"], "mail.example.com");
    assert_eq!(smtp.value["password"], "***");
}
