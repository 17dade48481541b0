//! HMAC-SHA256 hex signatures.
//!
//! Signatures are lowercase hex of the raw MAC. Verification recomputes the
//! signature and compares in constant time; no early exit on mismatch.

use hmac::Hmac;
use hmac::Mac;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Sign `message` with `key`, returning lowercase hex.
pub fn sign(message: &str, key: &[u8]) -> String {
    // HMAC-SHA256 accepts keys of any length per RFC 2104.
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key size");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a hex `signature` over `message` under `key`.
pub fn verify(message: &str, key: &[u8], signature: &str) -> bool {
    let expected = sign(message, key);
    constant_time_eq(expected.as_bytes(), signature.as_bytes())
}

/// Constant-time byte comparison.
///
/// XOR accumulation over the full length, so timing reveals nothing about
/// where two inputs differ.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
