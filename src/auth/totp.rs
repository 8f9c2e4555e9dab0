use hmac::{Hmac, Mac};
use rusqlite::Connection;
use serde_json::Value;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::error::{CoreError, CoreResult};

use super::crypto;
use super::users;

const TOTP_DIGITS: u32 = 6;
const TOTP_PERIOD: i64 = 30;
/// Accept codes up to two steps either side of now (clock skew).
const TOTP_WINDOW: i64 = 2;
const SECRET_BYTES: usize = 32;
const BACKUP_CODES: usize = 10;

// ── RFC 4226 / 6238 ─────────────────────────────────────

fn hotp(secret: &[u8], counter: u64) -> u32 {
    let mut mac = Hmac::<Sha1>::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();
    let offset = (digest[19] & 0xf) as usize;
    let bin = u32::from_be_bytes([
        digest[offset] & 0x7f,
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]);
    bin % 10u32.pow(TOTP_DIGITS)
}

pub fn totp_at(secret: &[u8], unix_time: i64) -> String {
    let counter = (unix_time / TOTP_PERIOD) as u64;
    format!("{:0width$}", hotp(secret, counter), width = TOTP_DIGITS as usize)
}

pub fn verify_totp(secret: &[u8], token: &str, unix_time: i64) -> bool {
    (-TOTP_WINDOW..=TOTP_WINDOW).any(|skew| {
        let t = unix_time + skew * TOTP_PERIOD;
        totp_at(secret, t) == token
    })
}

pub fn otpauth_uri(issuer: &str, account: &str, secret_b32: &str) -> String {
    format!(
        "otpauth://totp/{issuer}:{account}?secret={secret_b32}&issuer={issuer}&algorithm=SHA1&digits={TOTP_DIGITS}&period={TOTP_PERIOD}"
    )
}

// ── Service ─────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TwoFactorSetup {
    pub secret_base32: String,
    pub otpauth_uri: String,
    /// Shown once; only hashes are stored.
    pub backup_codes: Vec<String>,
}

fn hash_backup_code(code: &str) -> String {
    hex::encode(Sha256::digest(code.as_bytes()))
}

fn generate_backup_codes() -> Vec<String> {
    use rand::Rng;
    let mut rng = rand::rng();
    (0..BACKUP_CODES)
        .map(|_| {
            let bytes: [u8; 4] = rng.random();
            hex::encode(bytes)
        })
        .collect()
}

/// TOTP 2FA over the user store. Secrets rest AES-encrypted under the
/// platform key, sealed to their owning user; backup codes rest as hashes
/// in user metadata.
pub struct TwoFactorService {
    key: crypto::SecretKey,
    issuer: String,
}

impl TwoFactorService {
    pub fn new(key: crypto::SecretKey, issuer: impl Into<String>) -> Self {
        TwoFactorService {
            key,
            issuer: issuer.into(),
        }
    }

    /// Start setup: verify the password, store an encrypted fresh secret
    /// and hashed backup codes. 2FA only activates after `verify`.
    pub fn enable(
        &self,
        conn: &Connection,
        user_id: &str,
        password: &str,
    ) -> CoreResult<TwoFactorSetup> {
        let user = users::get_user(conn, user_id)?
            .ok_or_else(|| CoreError::not_found("user", user_id))?;
        let Some(hash) = &user.password_hash else {
            return Err(CoreError::Precondition("user has no password set".into()));
        };
        if !super::password::verify_password(password, hash) {
            return Err(CoreError::Unauthorized("invalid password".into()));
        }

        use rand::Rng;
        let secret: [u8; SECRET_BYTES] = rand::rng().random();
        let secret_b32 = crypto::base32_encode(&secret);
        // Sealed against the user id: the ciphertext is unusable on any
        // other row.
        let ciphertext = crypto::encrypt_secret(&secret_b32, &self.key, user_id)?;
        users::set_two_factor_secret(conn, user_id, Some(&ciphertext))?;
        users::set_two_factor_enabled(conn, user_id, false)?;

        let backup_codes = generate_backup_codes();
        let hashes: Vec<String> = backup_codes.iter().map(|c| hash_backup_code(c)).collect();
        let mut metadata = if user.metadata.is_object() {
            user.metadata.clone()
        } else {
            Value::Object(serde_json::Map::new())
        };
        if let Some(map) = metadata.as_object_mut() {
            map.insert(
                "backup_codes".to_string(),
                serde_json::to_value(&hashes)?,
            );
        }
        users::update_metadata(conn, user_id, &metadata)?;

        Ok(TwoFactorSetup {
            otpauth_uri: otpauth_uri(&self.issuer, &user.email, &secret_b32),
            secret_base32: secret_b32,
            backup_codes,
        })
    }

    fn decrypt_user_secret(&self, ciphertext: &str, user_id: &str) -> CoreResult<Vec<u8>> {
        let secret_b32 = crypto::decrypt_secret(ciphertext, &self.key, user_id)?;
        crypto::base32_decode(&secret_b32)
    }

    /// Confirm setup with a live code; activates 2FA.
    pub fn verify(&self, conn: &Connection, user_id: &str, token: &str) -> CoreResult<()> {
        let user = users::get_user(conn, user_id)?
            .ok_or_else(|| CoreError::not_found("user", user_id))?;
        let Some(ciphertext) = &user.two_factor_secret else {
            return Err(CoreError::Precondition("2fa setup has not started".into()));
        };
        let secret = self.decrypt_user_secret(ciphertext, user_id)?;
        if !verify_totp(&secret, token, chrono::Utc::now().timestamp()) {
            return Err(CoreError::Unauthorized("invalid 2fa code".into()));
        }
        users::set_two_factor_enabled(conn, user_id, true)?;
        Ok(())
    }

    /// Login-time check: a live TOTP code, or a one-shot backup code
    /// which is consumed on use.
    pub fn verify_code(&self, conn: &Connection, user_id: &str, code: &str) -> CoreResult<()> {
        let user = users::get_user(conn, user_id)?
            .ok_or_else(|| CoreError::not_found("user", user_id))?;
        if !user.two_factor_enabled {
            return Err(CoreError::Precondition("2fa is not enabled".into()));
        }
        if let Some(ciphertext) = &user.two_factor_secret {
            let secret = self.decrypt_user_secret(ciphertext, user_id)?;
            if verify_totp(&secret, code, chrono::Utc::now().timestamp()) {
                return Ok(());
            }
        }

        // Fall back to backup codes.
        let hash = hash_backup_code(code);
        let mut metadata = user.metadata.clone();
        let Some(codes) = metadata
            .get_mut("backup_codes")
            .and_then(|v| v.as_array_mut())
        else {
            return Err(CoreError::Unauthorized("invalid 2fa code".into()));
        };
        let before = codes.len();
        codes.retain(|c| c.as_str() != Some(hash.as_str()));
        if codes.len() == before {
            return Err(CoreError::Unauthorized("invalid 2fa code".into()));
        }
        users::update_metadata(conn, user_id, &metadata)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 6238 appendix B test vector (SHA-1, ASCII secret "12345678901234567890").
    #[test]
    fn rfc6238_vectors() {
        let secret = b"12345678901234567890";
        assert_eq!(totp_at(secret, 59), "287082".to_string());
        assert_eq!(totp_at(secret, 1111111109), "081804".to_string());
        assert_eq!(totp_at(secret, 1234567890), "005924".to_string());
    }

    #[test]
    fn window_tolerates_skew() {
        let secret = b"12345678901234567890";
        let now = 1111111109;
        let code = totp_at(secret, now);
        assert!(verify_totp(secret, &code, now + TOTP_PERIOD));
        assert!(verify_totp(secret, &code, now - TOTP_PERIOD));
        assert!(!verify_totp(secret, &code, now + 10 * TOTP_PERIOD));
    }
}
