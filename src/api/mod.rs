pub mod error;
pub mod handlers;
pub mod middleware;
pub mod pagination;
pub mod state;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::routing::{get, post, put};
use tower_http::cors::{Any, CorsLayer};

use crate::platform::Platform;

use state::AppState;

async fn health(State(state): State<AppState>) -> axum::Json<serde_json::Value> {
    axum::Json(state.platform.health().await)
}

pub fn router(platform: Arc<Platform>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health
        .route("/health", get(health))
        // Auth (public)
        .route("/api/auth/register", post(handlers::users::register))
        .route("/api/auth/login", post(handlers::users::login))
        .route("/api/auth/refresh", post(handlers::users::refresh))
        .route("/api/auth/otp/send", post(handlers::otp::send))
        .route("/api/auth/otp/verify", post(handlers::otp::verify))
        .route("/api/auth/otp/resend", post(handlers::otp::resend))
        // 2FA (JWT required)
        .route("/api/auth/2fa/enable", post(handlers::twofactor::enable))
        .route("/api/auth/2fa/verify", post(handlers::twofactor::verify))
        .route("/api/auth/2fa/code", post(handlers::twofactor::verify_code))
        // Wallet
        .route("/api/wallet", get(handlers::wallets::get_wallet))
        .route("/api/wallet/deposit", post(handlers::wallets::deposit))
        .route("/api/wallet/withdraw", post(handlers::wallets::withdraw))
        .route(
            "/api/wallet/transactions",
            get(handlers::wallets::list_transactions),
        )
        .route(
            "/api/wallet/transactions/{id}/reverse",
            post(handlers::wallets::reverse),
        )
        // Bonus
        .route("/api/bonus", get(handlers::bonus::list))
        .route("/api/bonus/trigger", post(handlers::bonus::trigger))
        .route(
            "/api/bonus/{id}/activity",
            post(handlers::bonus::record_activity),
        )
        .route("/api/bonus/{id}/convert", post(handlers::bonus::convert))
        .route("/api/bonus/{id}/claim", post(handlers::bonus::claim))
        .route("/api/bonus/{id}/forfeit", post(handlers::bonus::forfeit))
        .route(
            "/api/bonus/approve/{token}",
            post(handlers::bonus::approve),
        )
        .route("/api/bonus/reject/{token}", post(handlers::bonus::reject))
        // Realtime
        .route("/events", get(handlers::events::event_stream))
        .route("/ws", get(handlers::ws::ws_upgrade))
        // Admin
        .route("/api/admin/tenants", post(handlers::admin::create_tenant))
        .route("/api/admin/brands", post(handlers::admin::create_brand))
        .route(
            "/api/admin/templates",
            get(handlers::admin::list_templates).post(handlers::admin::create_template),
        )
        .route("/api/admin/pool/fund", post(handlers::admin::fund_pool))
        .route(
            "/api/admin/rates/override",
            post(handlers::admin::set_rate_override),
        )
        .route("/api/admin/webhooks", post(handlers::admin::create_webhook))
        .route("/api/admin/reconcile", get(handlers::admin::run_reconcile))
        .route("/api/admin/sweep-holds", post(handlers::admin::sweep_holds))
        .route(
            "/api/admin/bonus/expire",
            post(handlers::admin::expire_bonuses),
        )
        .route("/api/admin/resolve", post(handlers::admin::resolve_refs))
        .route("/api/admin/pending", get(handlers::admin::list_pending))
        .route(
            "/api/admin/pending/{op}/{token}",
            get(handlers::admin::get_pending),
        )
        .route(
            "/api/admin/config/{service}",
            get(handlers::admin::config_summary),
        )
        .route(
            "/api/admin/config/{service}/{key}",
            put(handlers::admin::set_config),
        )
        .route(
            "/api/admin/databases",
            get(handlers::admin::list_databases),
        )
        // Schema
        .route("/api/schema", get(handlers::schema::get_schema))
        .layer(cors)
        .with_state(AppState::new(platform))
}

pub async fn serve(platform: Arc<Platform>, host: &str, port: u16) -> Result<()> {
    let app = router(platform);
    let addr = format!("{host}:{port}");
    println!("pay-flow API server listening on {addr}");
    println!("  Health:   GET  http://{addr}/health");
    println!("  Auth:     POST http://{addr}/api/auth/register");
    println!("  Auth:     POST http://{addr}/api/auth/login");
    println!("  Wallet:   POST http://{addr}/api/wallet/deposit");
    println!("  Events:   GET  http://{addr}/events");
    println!("  Schema:   GET  http://{addr}/api/schema");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;

    axum::serve(listener, app).await.context("running server")?;
    Ok(())
}
