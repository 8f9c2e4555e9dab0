use rusqlite::Connection;

use crate::bonus::handler::{BonusContext, BonusHandler, Eligibility};
use crate::bonus::template::BonusType;
use crate::bonus::user_bonus::last_bonus_at;
use crate::error::CoreResult;

/// Repeatable deposit bonus with an optional cooldown between awards.
pub struct ReloadHandler;

impl BonusHandler for ReloadHandler {
    fn validate_specific(
        &self,
        conn: &Connection,
        ctx: &BonusContext,
    ) -> CoreResult<Eligibility> {
        let Some(cooldown_hours) = ctx.template.cooldown_hours else {
            return Ok(Eligibility::Eligible);
        };
        if let Some(last) = last_bonus_at(conn, &ctx.user.id, BonusType::Reload)? {
            let elapsed = chrono::Utc::now().timestamp() - last;
            if elapsed < cooldown_hours * 3600 {
                return Ok(Eligibility::not_eligible(format!(
                    "Reload bonus on cooldown for another {}s",
                    cooldown_hours * 3600 - elapsed
                )));
            }
        }
        Ok(Eligibility::Eligible)
    }
}
