use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;

use pay_flow::auth::{OtpRequest, OtpService, OtpTransport};
use pay_flow::error::{CoreError, CoreResult};
use pay_flow::pending::jwt::JwtPendingStore;
use pay_flow::pending::memory::MemoryPendingStore;
use pay_flow::pending::{CreateOptions, PendingStore};

// ── Store contract ──────────────────────────────────────────────────

#[tokio::test]
async fn verify_is_read_only_and_delete_signals_the_race_winner() {
    let store = MemoryPendingStore::new();
    let token = store
        .create(
            "kyc_approval",
            json!({ "document": "passport" }),
            CreateOptions {
                expires_in_secs: 60,
                metadata: json!({ "requested_by": "admin" }),
            },
        )
        .await
        .expect("create");

    // Verify any number of times without consuming.
    for _ in 0..3 {
        let verified = store
            .verify(&token, "kyc_approval")
            .await
            .expect("verify")
            .expect("present");
        assert_eq!(verified.data["document"], "passport");
    }

    // Wrong operation type never verifies.
    assert!(store.verify(&token, "otp_verification").await.expect("verify").is_none());

    // Exactly one caller wins the delete.
    assert!(store.delete(&token, "kyc_approval").await.expect("delete"));
    assert!(!store.delete(&token, "kyc_approval").await.expect("delete"));
    assert!(store.verify(&token, "kyc_approval").await.expect("verify").is_none());
}

#[tokio::test]
async fn list_and_raw_inspection() {
    let store = MemoryPendingStore::new();
    let token = store
        .create("bonus", json!({ "value": 100 }), CreateOptions::default())
        .await
        .expect("create");
    store
        .create("kyc_approval", json!({}), CreateOptions::default())
        .await
        .expect("create");

    let all = store.list(None).await.expect("list");
    assert_eq!(all.len(), 2);
    let bonuses = store.list(Some("bonus")).await.expect("list");
    assert_eq!(bonuses.len(), 1);
    assert_eq!(bonuses[0].token, token);

    let raw = store
        .get_raw(&token, "bonus")
        .await
        .expect("raw")
        .expect("present");
    assert!(raw.ttl_remaining_secs > 0 && raw.ttl_remaining_secs <= 600);
    assert_eq!(raw.data["value"], 100);
}

#[tokio::test]
async fn jwt_backend_is_time_bound_and_stateless() {
    let store = JwtPendingStore::new("test-secret");
    let token = store
        .create(
            "otp_verification",
            json!({ "code_hash": "abc" }),
            CreateOptions {
                expires_in_secs: 1,
                metadata: serde_json::Value::Null,
            },
        )
        .await
        .expect("create");

    // Within the window.
    assert!(store
        .verify(&token, "otp_verification")
        .await
        .expect("verify")
        .is_some());
    // Wrong op fails even with a valid signature.
    assert!(store.verify(&token, "bonus").await.expect("verify").is_none());
    // Delete is a no-op on a stateless backend.
    assert!(!store.delete(&token, "otp_verification").await.expect("delete"));
    // Listing is unsupported.
    assert!(store.list(None).await.is_err());

    tokio::time::sleep(std::time::Duration::from_millis(1_500)).await;
    assert!(store
        .verify(&token, "otp_verification")
        .await
        .expect("verify")
        .is_none());
}

#[tokio::test]
async fn tampered_jwt_tokens_never_verify() {
    let store = JwtPendingStore::new("test-secret");
    let token = store
        .create("bonus", json!({ "value": 1 }), CreateOptions::default())
        .await
        .expect("create");
    let mut tampered = token.clone();
    tampered.pop();
    tampered.push(if token.ends_with('A') { 'B' } else { 'A' });
    assert!(store.verify(&tampered, "bonus").await.expect("verify").is_none());
}

// ── OTP lifecycle (issue → verify → consume) ───────────────────────

/// Captures the delivered code instead of sending it anywhere.
struct CapturingTransport {
    codes: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl OtpTransport for CapturingTransport {
    async fn deliver(&self, _recipient: &str, _channel: &str, code: &str) -> CoreResult<()> {
        self.codes.lock().await.push(code.to_string());
        Ok(())
    }
}

fn otp_request() -> OtpRequest {
    OtpRequest {
        tenant_id: "t1".into(),
        user_id: None,
        recipient: "user1@example.com".into(),
        channel: "email".into(),
        purpose: "login".into(),
    }
}

#[tokio::test]
async fn otp_round_trip_and_single_use() {
    let store: Arc<dyn PendingStore> = Arc::new(MemoryPendingStore::new());
    let otp = OtpService::new(store);
    let codes = Arc::new(Mutex::new(Vec::new()));
    let transport = CapturingTransport { codes: codes.clone() };

    let issued = otp.send(&otp_request(), &transport).await.expect("send");
    assert_eq!(issued.expires_in, 600);
    let code = codes.lock().await[0].clone();
    assert_eq!(code.len(), 6);

    // Wrong code does not consume the token.
    let err = otp.verify(&issued.otp_token, "111111", "t1").await.unwrap_err();
    assert!(matches!(err, CoreError::Unauthorized(_)));
    // Wrong tenant does not consume either.
    let err = otp.verify(&issued.otp_token, &code, "t2").await.unwrap_err();
    assert!(matches!(err, CoreError::Unauthorized(_)));

    // Right code verifies once.
    otp.verify(&issued.otp_token, &code, "t1").await.expect("verify");

    // Second use: already consumed.
    let err = otp.verify(&issued.otp_token, &code, "t1").await.unwrap_err();
    assert!(matches!(err, CoreError::Unauthorized(_)), "{err}");
}

#[tokio::test]
async fn otp_expires_after_its_window() {
    let store: Arc<dyn PendingStore> = Arc::new(MemoryPendingStore::new());
    let otp = OtpService::new(store);
    let codes = Arc::new(Mutex::new(Vec::new()));
    let transport = CapturingTransport { codes: codes.clone() };

    let issued = otp
        .send_with_expiry(&otp_request(), &transport, 1)
        .await
        .expect("send");
    let code = codes.lock().await[0].clone();

    tokio::time::sleep(std::time::Duration::from_millis(1_200)).await;
    let err = otp.verify(&issued.otp_token, &code, "t1").await.unwrap_err();
    assert!(matches!(err, CoreError::Unauthorized(_)));
}

#[tokio::test]
async fn otp_resend_enforces_the_minimum_interval() {
    let store: Arc<dyn PendingStore> = Arc::new(MemoryPendingStore::new());
    let otp = OtpService::new(store);
    let codes = Arc::new(Mutex::new(Vec::new()));
    let transport = CapturingTransport { codes: codes.clone() };

    let issued = otp.send(&otp_request(), &transport).await.expect("send");
    let err = otp.resend(&issued.otp_token, &transport).await.unwrap_err();
    assert!(matches!(err, CoreError::RateLimited { .. }), "{err}");
    // The original token still works after the rejected resend.
    let code = codes.lock().await[0].clone();
    otp.verify(&issued.otp_token, &code, "t1").await.expect("verify");
}

#[tokio::test]
async fn otp_codes_vary_between_sends() {
    let store: Arc<dyn PendingStore> = Arc::new(MemoryPendingStore::new());
    let otp = OtpService::new(store);
    let codes = Arc::new(Mutex::new(Vec::new()));
    let transport = CapturingTransport { codes: codes.clone() };

    for _ in 0..8 {
        otp.send(&otp_request(), &transport).await.expect("send");
    }
    let codes = codes.lock().await;
    assert!(
        codes.iter().any(|c| c != &codes[0]),
        "eight OTP draws were identical: {codes:?}"
    );
}
