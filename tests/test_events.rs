mod common;

use serde_json::json;

use pay_flow::events::{event_channel, tenant_room, user_room, webhook};
use pay_flow::model::DomainEvent;

use common::*;

#[tokio::test]
async fn emit_persists_an_audit_row_before_fanning_out() {
    let env = env().await;
    let request = ctx(&env);

    let event = env
        .platform
        .events
        .emit(
            &request,
            "wallet.deposit.completed",
            &env.tenant.id,
            Some("u1"),
            json!({ "amount": 100 }),
        )
        .await
        .expect("emit");

    assert_eq!(event.tenant_id, env.tenant.id);
    assert_eq!(event.correlation_id.as_deref(), Some(request.correlation_id.as_str()));
    assert_eq!(
        audit_events(&env, "wallet.deposit.completed").await.unwrap(),
        1
    );
}

#[tokio::test]
async fn same_user_events_arrive_in_emission_order() {
    let env = env().await;
    let request = ctx(&env);
    let rooms = env.platform.events.rooms().clone();
    let mut rx = rooms.subscribe(&user_room("u1"));

    for i in 0..5 {
        env.platform
            .events
            .emit(
                &request,
                "bonus.awarded",
                &env.tenant.id,
                Some("u1"),
                json!({ "seq": i }),
            )
            .await
            .expect("emit");
    }

    for expected in 0..5 {
        let event = rx.recv().await.expect("recv");
        assert_eq!(event.payload["seq"], expected);
    }
}

#[tokio::test]
async fn tenant_room_sees_every_user_event() {
    let env = env().await;
    let request = ctx(&env);
    let rooms = env.platform.events.rooms().clone();
    let mut tenant_rx = rooms.subscribe(&tenant_room(&env.tenant.id));

    env.platform
        .events
        .emit(&request, "bonus.awarded", &env.tenant.id, Some("u1"), json!({}))
        .await
        .expect("emit");
    env.platform
        .events
        .emit(&request, "bonus.awarded", &env.tenant.id, Some("u2"), json!({}))
        .await
        .expect("emit");

    let first = tenant_rx.recv().await.expect("recv");
    let second = tenant_rx.recv().await.expect("recv");
    assert_eq!(first.user_id.as_deref(), Some("u1"));
    assert_eq!(second.user_id.as_deref(), Some("u2"));
}

#[tokio::test]
async fn bus_subscription_filters_by_tenant_prefix() {
    let env = env().await;
    let other = env
        .platform
        .registry
        .create_tenant("t2", "Other", None, json!({}))
        .await
        .expect("tenant");

    let bus = pay_flow::events::LocalBus::new();
    use pay_flow::events::EventBus;
    let mut rx = bus
        .subscribe(&format!("events:{}:*", env.tenant.id))
        .await
        .expect("subscribe");
    bus.publish(
        &event_channel(&env.tenant.id, "bonus.awarded"),
        "mine".to_string(),
    )
    .await
    .expect("publish");
    bus.publish(
        &event_channel(&other.id, "bonus.awarded"),
        "theirs".to_string(),
    )
    .await
    .expect("publish");

    let message = rx.recv().await.expect("message");
    assert_eq!(message.payload, "mine");
    assert!(rx.try_recv().is_err(), "cross-tenant event leaked");
}

#[tokio::test]
async fn replay_returns_critical_events_only() {
    let env = env().await;
    let request = ctx(&env);
    let since = chrono::Utc::now().timestamp() - 60;

    env.platform
        .events
        .emit(&request, "bonus.awarded", &env.tenant.id, Some("u1"), json!({}))
        .await
        .expect("emit");
    env.platform
        .events
        .emit(&request, "bonus.progress", &env.tenant.id, Some("u1"), json!({}))
        .await
        .expect("emit");

    let replay = env
        .platform
        .events
        .replay_critical(&env.tenant.id, "u1", since)
        .await
        .expect("replay");
    assert_eq!(replay.len(), 1);
    assert_eq!(replay[0].event_type, "bonus.awarded");
}

#[tokio::test]
async fn webhook_subscriptions_match_and_bodies_sign_deterministically() {
    let env = env().await;
    let conn = env.platform.core.db.lock().await;

    webhook::create_subscription(
        &conn,
        &env.tenant.id,
        "http://hooks.example/bonus",
        &["bonus.*".to_string()],
        "s3cret",
        None,
    )
    .expect("subscription");
    webhook::create_subscription(
        &conn,
        &env.tenant.id,
        "http://hooks.example/all",
        &["*".to_string()],
        "s3cret",
        None,
    )
    .expect("subscription");

    let for_bonus =
        webhook::subscriptions_for(&conn, &env.tenant.id, "bonus.awarded").expect("query");
    assert_eq!(for_bonus.len(), 2);
    let for_wallet =
        webhook::subscriptions_for(&conn, &env.tenant.id, "wallet.deposit.completed")
            .expect("query");
    assert_eq!(for_wallet.len(), 1);

    let event = DomainEvent {
        id: "e1".to_string(),
        event_type: "bonus.awarded".to_string(),
        tenant_id: env.tenant.id.clone(),
        user_id: Some("u1".to_string()),
        occurred_at: 1_700_000_000,
        payload: json!({ "value": 40 }),
        correlation_id: None,
    };
    let body = webhook::delivery_body(&event);
    assert!(body.contains("\"occurred_at\":\"2023-11-14T22:13:20+00:00\""));
    assert_eq!(webhook::sign(&body, "s3cret"), webhook::sign(&body, "s3cret"));
    assert_ne!(webhook::sign(&body, "s3cret"), webhook::sign(&body, "other"));
}
