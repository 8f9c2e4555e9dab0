use rusqlite::Connection;

use crate::bonus::handler::{BonusContext, BonusHandler, Eligibility};
use crate::bonus::template::BonusType;
use crate::bonus::user_bonus::user_has_bonus_of_types;
use crate::error::CoreResult;

/// One shot per account lifetime: blocked once the user holds any
/// first-deposit or welcome bonus, or has ever deposited.
pub struct FirstDepositHandler;

impl BonusHandler for FirstDepositHandler {
    fn validate_specific(
        &self,
        conn: &Connection,
        ctx: &BonusContext,
    ) -> CoreResult<Eligibility> {
        if user_has_bonus_of_types(
            conn,
            &ctx.user.id,
            &[BonusType::FirstDeposit, BonusType::Welcome],
        )? {
            return Ok(Eligibility::not_eligible(
                "First deposit bonus already claimed",
            ));
        }
        if ctx.user.metadata_flag("has_made_first_deposit") {
            return Ok(Eligibility::not_eligible("User has already deposited"));
        }
        Ok(Eligibility::Eligible)
    }
}
