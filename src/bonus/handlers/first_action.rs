use rusqlite::Connection;

use crate::bonus::handler::{BonusContext, BonusHandler, Eligibility};
use crate::bonus::user_bonus::user_claimed_with_metadata;
use crate::error::CoreResult;

/// First occurrence of a named action. The trigger metadata carries the
/// action name; the per-action flag lives in user metadata as
/// `has_done_{action}`.
pub struct FirstActionHandler;

impl BonusHandler for FirstActionHandler {
    fn validate_specific(
        &self,
        conn: &Connection,
        ctx: &BonusContext,
    ) -> CoreResult<Eligibility> {
        let Some(action) = ctx.trigger.meta_str("action") else {
            return Ok(Eligibility::not_eligible(
                "First action bonus requires an action name",
            ));
        };
        if ctx.user.metadata_flag(&format!("has_done_{action}")) {
            return Ok(Eligibility::not_eligible(format!(
                "User has already performed {action}"
            )));
        }
        if user_claimed_with_metadata(
            conn,
            &ctx.user.id,
            ctx.template.bonus_type,
            &[("action", action)],
        )? {
            return Ok(Eligibility::not_eligible(format!(
                "First action bonus for {action} already claimed"
            )));
        }
        Ok(Eligibility::Eligible)
    }
}
