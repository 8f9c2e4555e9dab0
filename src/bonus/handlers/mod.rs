mod first_action;
mod first_deposit;
mod first_purchase;
mod leaderboard;
mod reload;
mod tournament;
mod welcome;

use std::sync::Arc;

use rusqlite::Connection;

use super::handler::{BonusContext, BonusHandler, Eligibility, HandlerRegistry};
use super::template::BonusType;
use crate::error::CoreResult;

pub use first_action::FirstActionHandler;
pub use first_deposit::FirstDepositHandler;
pub use first_purchase::FirstPurchaseHandler;
pub use leaderboard::LeaderboardHandler;
pub use reload::ReloadHandler;
pub use tournament::TournamentHandler;
pub use welcome::WelcomeHandler;

/// `custom` bonuses default to one award per user when the template does
/// not set its own per-user cap.
pub struct CustomHandler;

impl BonusHandler for CustomHandler {
    fn validate_specific(
        &self,
        conn: &Connection,
        ctx: &BonusContext,
    ) -> CoreResult<Eligibility> {
        if ctx.template.max_uses_per_user.is_some() {
            return Ok(Eligibility::Eligible);
        }
        let uses =
            super::user_bonus::user_uses_of_template(conn, &ctx.user.id, &ctx.template.id)?;
        if uses >= 1 {
            return Ok(Eligibility::not_eligible("Custom bonus already used"));
        }
        Ok(Eligibility::Eligible)
    }
}

/// All typed handlers, wired once during platform startup. Types without a
/// dedicated entry run on the registry's default handler.
pub fn build_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register(BonusType::FirstDeposit, Arc::new(FirstDepositHandler));
    registry.register(BonusType::Welcome, Arc::new(WelcomeHandler));
    registry.register(BonusType::Reload, Arc::new(ReloadHandler));
    registry.register(BonusType::FirstPurchase, Arc::new(FirstPurchaseHandler));
    registry.register(BonusType::FirstAction, Arc::new(FirstActionHandler));
    registry.register(BonusType::Tournament, Arc::new(TournamentHandler));
    registry.register(BonusType::Leaderboard, Arc::new(LeaderboardHandler));
    registry.register(BonusType::Custom, Arc::new(CustomHandler));
    registry
}
