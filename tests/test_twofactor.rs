mod common;

use serde_json::json;

use pay_flow::auth::crypto::base32_decode;
use pay_flow::auth::totp::totp_at;
use pay_flow::error::CoreError;

use common::*;

async fn user_with_password(env: &TestEnv, email: &str, password: &str) -> String {
    let hash = pay_flow::auth::password::hash_password(password).expect("hash");
    let conn = env.handle.db.lock().await;
    pay_flow::auth::users::create_user(&conn, &env.tenant.id, email, Some(&hash), json!({}))
        .expect("create user")
        .id
}

#[tokio::test]
async fn enable_verify_and_use_totp() {
    let env = env().await;
    let user_id = user_with_password(&env, "mfa@example.com", "correct horse").await;

    let setup = {
        let conn = env.handle.db.lock().await;
        env.platform
            .two_factor
            .enable(&conn, &user_id, "correct horse")
            .expect("enable")
    };
    assert_eq!(setup.backup_codes.len(), 10);
    assert!(setup.otpauth_uri.starts_with("otpauth://totp/"));

    // Not active until a live code confirms the setup.
    {
        let conn = env.handle.db.lock().await;
        let user = pay_flow::auth::users::get_user(&conn, &user_id)
            .expect("get")
            .expect("user");
        assert!(!user.two_factor_enabled);
    }

    let secret = base32_decode(&setup.secret_base32).expect("secret");
    let code = totp_at(&secret, chrono::Utc::now().timestamp());
    {
        let conn = env.handle.db.lock().await;
        env.platform
            .two_factor
            .verify(&conn, &user_id, &code)
            .expect("verify");
        let user = pay_flow::auth::users::get_user(&conn, &user_id)
            .expect("get")
            .expect("user");
        assert!(user.two_factor_enabled);
    }

    // A live code passes the login-time check.
    let code = totp_at(&secret, chrono::Utc::now().timestamp());
    let conn = env.handle.db.lock().await;
    env.platform
        .two_factor
        .verify_code(&conn, &user_id, &code)
        .expect("live code");
}

#[tokio::test]
async fn wrong_password_blocks_enable() {
    let env = env().await;
    let user_id = user_with_password(&env, "mfa2@example.com", "correct horse").await;
    let conn = env.handle.db.lock().await;
    let err = env
        .platform
        .two_factor
        .enable(&conn, &user_id, "battery staple")
        .unwrap_err();
    assert!(matches!(err, CoreError::Unauthorized(_)));
}

#[tokio::test]
async fn backup_codes_are_single_use() {
    let env = env().await;
    let user_id = user_with_password(&env, "mfa3@example.com", "correct horse").await;

    let setup = {
        let conn = env.handle.db.lock().await;
        env.platform
            .two_factor
            .enable(&conn, &user_id, "correct horse")
            .expect("enable")
    };
    let secret = base32_decode(&setup.secret_base32).expect("secret");
    let code = totp_at(&secret, chrono::Utc::now().timestamp());
    {
        let conn = env.handle.db.lock().await;
        env.platform
            .two_factor
            .verify(&conn, &user_id, &code)
            .expect("activate");
    }

    let backup = setup.backup_codes[0].clone();
    let conn = env.handle.db.lock().await;
    env.platform
        .two_factor
        .verify_code(&conn, &user_id, &backup)
        .expect("backup code");
    let err = env
        .platform
        .two_factor
        .verify_code(&conn, &user_id, &backup)
        .unwrap_err();
    assert!(matches!(err, CoreError::Unauthorized(_)), "{err}");
}
