//! Password hashing and verification.
//!
//! Hashes are stored as `pbkdf2:sha256:<iterations>$<hex-salt>$<hex-digest>`.
//! The PBKDF2 salt input is the hex-encoded salt string itself, so a stored
//! hash is self-contained and verification never needs the raw salt bytes.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_ITERATIONS: u32 = 50_000;
const SALT_BYTES: usize = 8;

/// PBKDF2-HMAC-SHA256, single block (the digest length equals the output).
fn pbkdf2_sha256(password: &[u8], salt: &[u8], iterations: u32) -> [u8; 32] {
    let mac = HmacSha256::new_from_slice(password).expect("hmac accepts any key length");

    let mut block = {
        let mut round = mac.clone();
        round.update(salt);
        round.update(&1u32.to_be_bytes());
        round.finalize().into_bytes()
    };

    let mut output = block;
    for _ in 1..iterations {
        let mut round = mac.clone();
        round.update(&block);
        block = round.finalize().into_bytes();
        for (acc, byte) in output.iter_mut().zip(block.iter()) {
            *acc ^= byte;
        }
    }

    output.into()
}

fn format_hash(salt_hex: &str, iterations: u32, digest: &[u8]) -> String {
    format!("pbkdf2:sha256:{iterations}${salt_hex}${}", hex::encode(digest))
}

/// Hash `password` with a fresh 8-byte random salt and the default
/// iteration count.
pub fn generate_password_hash(password: &str) -> String {
    let mut salt = [0u8; SALT_BYTES];
    rand::thread_rng().fill_bytes(&mut salt);
    generate_password_hash_with(password, &hex::encode(salt), DEFAULT_ITERATIONS)
}

/// Hash `password` with an explicit hex salt and iteration count.
pub fn generate_password_hash_with(password: &str, salt_hex: &str, iterations: u32) -> String {
    let digest = pbkdf2_sha256(password.as_bytes(), salt_hex.as_bytes(), iterations);
    format_hash(salt_hex, iterations, &digest)
}

/// Verify `password` against a stored hash string.
///
/// Parses the salt and iteration count out of the stored value, recomputes,
/// and compares the full strings in constant time.
pub fn check_password_hash(hashed: &str, password: &str) -> bool {
    let mut parts = hashed.splitn(3, '$');
    let (Some(head), Some(salt_hex), Some(_digest)) = (parts.next(), parts.next(), parts.next())
    else {
        return false;
    };

    let Some(iterations) = head
        .strip_prefix("pbkdf2:sha256:")
        .and_then(|raw| raw.parse::<u32>().ok())
    else {
        return false;
    };

    let recomputed = generate_password_hash_with(password, salt_hex, iterations);
    recomputed.as_bytes().ct_eq(hashed.as_bytes()).into()
}
