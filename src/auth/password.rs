use bcrypt::DEFAULT_COST;

use crate::error::{CoreError, CoreResult};

/// Policy floor, enforced here so every entry point (registration, admin
/// resets) shares it.
pub const MIN_PASSWORD_LEN: usize = 8;

pub fn hash_password(password: &str) -> CoreResult<String> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(CoreError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    bcrypt::hash(password, DEFAULT_COST)
        .map_err(|e| CoreError::Fatal(format!("password hashing failed: {e}")))
}

/// Any bcrypt error (malformed stored hash included) reads as a mismatch;
/// login paths never learn why a check failed.
pub fn verify_password(password: &str, hash: &str) -> bool {
    matches!(bcrypt::verify(password, hash), Ok(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_passwords_are_rejected_before_hashing() {
        assert!(matches!(
            hash_password("short"),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn round_trip_and_garbage_hash() {
        let hash = hash_password("correct horse").unwrap();
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("battery staple", &hash));
        assert!(!verify_password("correct horse", "not-a-bcrypt-hash"));
    }
}
