use rusqlite::Connection;

use crate::bonus::handler::{BonusContext, BonusHandler, Eligibility};
use crate::bonus::template::BonusType;
use crate::bonus::user_bonus::user_has_bonus_of_types;
use crate::error::CoreResult;

/// The purchase analogue of first-deposit, keyed on the
/// `has_made_first_purchase` user flag.
pub struct FirstPurchaseHandler;

impl BonusHandler for FirstPurchaseHandler {
    fn validate_specific(
        &self,
        conn: &Connection,
        ctx: &BonusContext,
    ) -> CoreResult<Eligibility> {
        if user_has_bonus_of_types(conn, &ctx.user.id, &[BonusType::FirstPurchase])? {
            return Ok(Eligibility::not_eligible(
                "First purchase bonus already claimed",
            ));
        }
        if ctx.user.metadata_flag("has_made_first_purchase") {
            return Ok(Eligibility::not_eligible("User has already purchased"));
        }
        Ok(Eligibility::Eligible)
    }
}
