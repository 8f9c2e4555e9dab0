use rusqlite::Connection;

use crate::bonus::handler::{BonusContext, BonusHandler, Eligibility, ranked_value};
use crate::bonus::template::BonusType;
use crate::bonus::user_bonus::user_claimed_with_metadata;
use crate::error::CoreResult;

/// Tournament payout: value scales with finishing position via the
/// template's position multipliers, one claim per tournament.
pub struct TournamentHandler;

impl BonusHandler for TournamentHandler {
    fn validate_specific(
        &self,
        conn: &Connection,
        ctx: &BonusContext,
    ) -> CoreResult<Eligibility> {
        let Some(tournament_id) = ctx.trigger.meta_str("tournament_id") else {
            return Ok(Eligibility::not_eligible(
                "Tournament bonus requires a tournament id",
            ));
        };
        let Some(position) = ctx.trigger.meta_i64("position") else {
            return Ok(Eligibility::not_eligible(
                "Tournament bonus requires a finishing position",
            ));
        };
        if position < 1 {
            return Ok(Eligibility::not_eligible(
                "Tournament position must be at least 1",
            ));
        }
        if user_claimed_with_metadata(
            conn,
            &ctx.user.id,
            BonusType::Tournament,
            &[("tournament_id", tournament_id)],
        )? {
            return Ok(Eligibility::not_eligible(
                "Tournament bonus already claimed",
            ));
        }
        Ok(Eligibility::Eligible)
    }

    fn calculate_value(&self, ctx: &BonusContext) -> CoreResult<i64> {
        let position = ctx.trigger.meta_i64("position").unwrap_or(0);
        ranked_value(&ctx.template, position)
    }
}
