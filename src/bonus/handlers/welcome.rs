use rusqlite::Connection;

use crate::bonus::handler::{BonusContext, BonusHandler, Eligibility};
use crate::bonus::template::BonusType;
use crate::bonus::user_bonus::user_has_bonus_of_types;
use crate::error::CoreResult;

/// Welcome and first-deposit exclude each other; a user gets exactly one
/// of the pair.
pub struct WelcomeHandler;

impl BonusHandler for WelcomeHandler {
    fn validate_specific(
        &self,
        conn: &Connection,
        ctx: &BonusContext,
    ) -> CoreResult<Eligibility> {
        if user_has_bonus_of_types(
            conn,
            &ctx.user.id,
            &[BonusType::Welcome, BonusType::FirstDeposit],
        )? {
            return Ok(Eligibility::not_eligible("Welcome bonus already claimed"));
        }
        Ok(Eligibility::Eligible)
    }
}
