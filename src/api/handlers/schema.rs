use axum::Json;
use schemars::schema_for;
use serde_json::{Value, json};

/// JSON schemas for the wire-facing domain types, for client generation
/// and LLM consumption.
pub fn schema_json() -> Value {
    json!({
        "bonus_template": schema_for!(crate::bonus::BonusTemplate),
        "user_bonus": schema_for!(crate::bonus::UserBonus),
        "wallet": schema_for!(crate::wallet::Wallet),
        "ledger_transaction": schema_for!(crate::ledger::LedgerTransaction),
        "domain_event": schema_for!(crate::model::DomainEvent),
        "webhook_subscription": schema_for!(crate::model::WebhookSubscription),
    })
}

pub async fn get_schema() -> Json<Value> {
    Json(schema_json())
}
