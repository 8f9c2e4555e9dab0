use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use pbkdf2::pbkdf2_hmac;
use sha2::Sha512;

use crate::error::{CoreError, CoreResult};

/// PBKDF2-HMAC-SHA512 rounds for the secret-at-rest key.
const KEY_ROUNDS: u32 = 210_000;
const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const GCM_TAG_LEN: usize = 16;
const SALT_LEN: usize = 16;

/// The key protecting secrets at rest (TOTP seeds). Derived once during
/// platform startup from the auth secret and a stored salt; never leaves
/// this module as raw bytes.
#[derive(Clone)]
pub struct SecretKey([u8; KEY_LEN]);

impl SecretKey {
    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

pub fn derive_key(auth_secret: &str, salt_b64: &str) -> CoreResult<SecretKey> {
    let salt = B64
        .decode(salt_b64)
        .map_err(|e| CoreError::Configuration(format!("stored key salt is not base64: {e}")))?;
    let mut key = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha512>(auth_secret.as_bytes(), &salt, KEY_ROUNDS, &mut key);
    Ok(SecretKey(key))
}

pub fn generate_salt() -> String {
    use rand::Rng;
    let salt: [u8; SALT_LEN] = rand::rng().random();
    B64.encode(salt)
}

/// Seal a secret for one owner. The owner id goes in as associated data,
/// so a ciphertext copied onto another user's row will not open.
/// Layout: base64(sealed+tag || nonce).
pub fn encrypt_secret(plaintext: &str, key: &SecretKey, owner: &str) -> CoreResult<String> {
    use rand::Rng;
    let nonce_bytes: [u8; NONCE_LEN] = rand::rng().random();
    let mut blob = key
        .cipher()
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: plaintext.as_bytes(),
                aad: owner.as_bytes(),
            },
        )
        .map_err(|_| CoreError::Fatal("sealing secret failed".into()))?;
    blob.extend_from_slice(&nonce_bytes);
    Ok(B64.encode(blob))
}

pub fn decrypt_secret(encoded: &str, key: &SecretKey, owner: &str) -> CoreResult<String> {
    let blob = B64
        .decode(encoded)
        .map_err(|_| CoreError::Validation("stored secret is not base64".into()))?;
    if blob.len() < NONCE_LEN + GCM_TAG_LEN {
        return Err(CoreError::Validation("stored secret is truncated".into()));
    }
    let (sealed, nonce) = blob.split_at(blob.len() - NONCE_LEN);
    let opened = key
        .cipher()
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: sealed,
                aad: owner.as_bytes(),
            },
        )
        .map_err(|_| CoreError::Unauthorized("secret does not open for this owner".into()))?;
    String::from_utf8(opened)
        .map_err(|_| CoreError::Fatal("opened secret is not valid utf-8".into()))
}

// ── Base32 (RFC 4648, no padding) ───────────────────────
// Authenticator apps only accept TOTP seeds in base32, and nothing in the
// dependency stack provides it.

const BASE32_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

pub fn base32_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len().div_ceil(5) * 8);
    let mut acc: u64 = 0;
    let mut acc_bits = 0u32;
    for &byte in data {
        acc = (acc << 8) | u64::from(byte);
        acc_bits += 8;
        while acc_bits >= 5 {
            acc_bits -= 5;
            out.push(BASE32_ALPHABET[(acc >> acc_bits) as usize & 31] as char);
        }
    }
    if acc_bits > 0 {
        out.push(BASE32_ALPHABET[(acc << (5 - acc_bits)) as usize & 31] as char);
    }
    out
}

pub fn base32_decode(input: &str) -> CoreResult<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len() * 5 / 8);
    let mut acc: u64 = 0;
    let mut acc_bits = 0u32;
    for ch in input.bytes() {
        if ch == b'=' || ch == b' ' {
            continue;
        }
        let value = BASE32_ALPHABET
            .iter()
            .position(|&c| c == ch.to_ascii_uppercase())
            .ok_or_else(|| {
                CoreError::Validation(format!("invalid base32 character {:?}", ch as char))
            })?;
        acc = (acc << 5) | value as u64;
        acc_bits += 5;
        if acc_bits >= 8 {
            acc_bits -= 8;
            out.push((acc >> acc_bits) as u8);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base32_known_vectors() {
        assert_eq!(base32_encode(b"foobar"), "MZXW6YTBOI");
        assert_eq!(base32_decode("MZXW6YTBOI").unwrap(), b"foobar");
        assert_eq!(base32_decode("mzxw6ytboi").unwrap(), b"foobar");
        assert!(base32_decode("MZ1W6").is_err());
    }

    #[test]
    fn sealed_secrets_open_only_for_their_owner() {
        let key = derive_key("server-secret", &generate_salt()).unwrap();
        let sealed = encrypt_secret("JBSWY3DPEHPK3PXP", &key, "user-1").unwrap();
        assert_eq!(
            decrypt_secret(&sealed, &key, "user-1").unwrap(),
            "JBSWY3DPEHPK3PXP"
        );
        // Same ciphertext under a different owner must not open.
        assert!(decrypt_secret(&sealed, &key, "user-2").is_err());
    }

    #[test]
    fn distinct_salts_give_distinct_keys() {
        let key_a = derive_key("server-secret", &generate_salt()).unwrap();
        let key_b = derive_key("server-secret", &generate_salt()).unwrap();
        let sealed = encrypt_secret("seed", &key_a, "u").unwrap();
        assert!(decrypt_secret(&sealed, &key_b, "u").is_err());
    }
}
