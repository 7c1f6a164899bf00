use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand::RngCore as _;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::util::{ct_eq, to_hex};

const TOTP_STEP_SECS: i64 = 30;
const TOTP_DIGITS: u32 = 6;
/// One step of clock drift either way.
const TOTP_WINDOW: i64 = 1;

/// Per-account TOTP secret, stored base64 in the account row.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 20];
    rand::rng().fill_bytes(&mut bytes);
    B64.encode(bytes)
}

/// RFC 6238 with HMAC-SHA256. Enrollment responses name the algorithm so
/// authenticator apps are configured to match.
pub fn totp_code(secret_b64: &str, unix_time: i64) -> Result<String> {
    let secret = B64
        .decode(secret_b64)
        .map_err(|_| Error::Unavailable("corrupt mfa secret".into()))?;
    let counter = (unix_time / TOTP_STEP_SECS) as u64;
    let mut mac = Hmac::<Sha256>::new_from_slice(&secret)
        .map_err(|_| Error::Unavailable("corrupt mfa secret".into()))?;
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();
    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let slice: [u8; 4] = digest[offset..offset + 4]
        .try_into()
        .map_err(|_| Error::Unavailable("totp truncation".into()))?;
    let code = (u32::from_be_bytes(slice) & 0x7fff_ffff) % 10u32.pow(TOTP_DIGITS);
    Ok(format!("{:06}", code))
}

pub fn verify_totp(secret_b64: &str, code: &str, unix_time: i64) -> Result<bool> {
    for drift in -TOTP_WINDOW..=TOTP_WINDOW {
        let expected = totp_code(secret_b64, unix_time + drift * TOTP_STEP_SECS)?;
        if ct_eq(expected.as_bytes(), code.as_bytes()) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Backup codes: shown once in the clear, stored hashed, single-use.
pub fn generate_backup_codes(count: usize) -> Vec<String> {
    (0..count)
        .map(|_| {
            let mut bytes = [0u8; 5];
            rand::rng().fill_bytes(&mut bytes);
            to_hex(&bytes)
        })
        .collect()
}

pub fn hash_backup_code(code: &str) -> String {
    to_hex(&Sha256::digest(code.as_bytes()))
}

/// Consumes the matching hash if present; returns the remaining set.
pub fn consume_backup_code(hashes: &[String], code: &str) -> Option<Vec<String>> {
    let needle = hash_backup_code(code);
    if !hashes.iter().any(|h| ct_eq(h.as_bytes(), needle.as_bytes())) {
        return None;
    }
    Some(hashes.iter().filter(|h| **h != needle).cloned().collect())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_totp_stable_within_step() {
        let secret = generate_secret();
        let t = 1_700_000_000;
        let a = totp_code(&secret, t).unwrap();
        let b = totp_code(&secret, t + TOTP_STEP_SECS - 1 - (t % TOTP_STEP_SECS)).unwrap();
        assert_eq!(a.len(), 6);
        assert_eq!(a, b);
    }

    #[test]
    fn test_totp_verify_accepts_drift() {
        let secret = generate_secret();
        let t = 1_700_000_000;
        let prev = totp_code(&secret, t - TOTP_STEP_SECS).unwrap();
        assert!(verify_totp(&secret, &prev, t).unwrap());
        let ancient = totp_code(&secret, t - 10 * TOTP_STEP_SECS).unwrap();
        // Distinct codes from far outside the window fail; guard against
        // the rare collision where the code text happens to match.
        if ancient != totp_code(&secret, t).unwrap()
            && ancient != prev
            && ancient != totp_code(&secret, t + TOTP_STEP_SECS).unwrap()
        {
            assert!(!verify_totp(&secret, &ancient, t).unwrap());
        }
    }

    #[test]
    fn test_backup_codes_single_use() {
        let codes = generate_backup_codes(4);
        let hashes: Vec<String> = codes.iter().map(|c| hash_backup_code(c)).collect();
        let remaining = consume_backup_code(&hashes, &codes[1]).unwrap();
        assert_eq!(remaining.len(), 3);
        assert!(consume_backup_code(&remaining, &codes[1]).is_none());
        assert!(consume_backup_code(&hashes, "ffffffffff").is_none());
    }
}
