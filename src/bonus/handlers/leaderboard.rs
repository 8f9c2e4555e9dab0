use rusqlite::Connection;

use crate::bonus::handler::{BonusContext, BonusHandler, Eligibility, ranked_value};
use crate::bonus::template::BonusType;
use crate::bonus::user_bonus::user_claimed_with_metadata;
use crate::error::CoreResult;

/// Leaderboard payout: rank-scaled value, one claim per
/// `(leaderboard, period)` pair.
pub struct LeaderboardHandler;

impl BonusHandler for LeaderboardHandler {
    fn validate_specific(
        &self,
        conn: &Connection,
        ctx: &BonusContext,
    ) -> CoreResult<Eligibility> {
        let Some(leaderboard_id) = ctx.trigger.meta_str("leaderboard_id") else {
            return Ok(Eligibility::not_eligible(
                "Leaderboard bonus requires a leaderboard id",
            ));
        };
        let Some(period) = ctx.trigger.meta_str("period") else {
            return Ok(Eligibility::not_eligible(
                "Leaderboard bonus requires a period",
            ));
        };
        let Some(rank) = ctx.trigger.meta_i64("rank") else {
            return Ok(Eligibility::not_eligible("Leaderboard bonus requires a rank"));
        };
        if rank < 1 {
            return Ok(Eligibility::not_eligible("Leaderboard rank must be at least 1"));
        }
        if user_claimed_with_metadata(
            conn,
            &ctx.user.id,
            BonusType::Leaderboard,
            &[("leaderboard_id", leaderboard_id), ("period", period)],
        )? {
            return Ok(Eligibility::not_eligible(
                "Leaderboard bonus already claimed for this period",
            ));
        }
        Ok(Eligibility::Eligible)
    }

    fn calculate_value(&self, ctx: &BonusContext) -> CoreResult<i64> {
        let rank = ctx.trigger.meta_i64("rank").unwrap_or(0);
        ranked_value(&ctx.template, rank)
    }
}
