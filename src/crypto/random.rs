//! CSPRNG helpers for protocol material.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;

use super::CHALLENGE_SIZE;

/// Generate a fresh challenge: 32 random bytes as 64 lowercase hex chars.
pub fn generate_challenge() -> String {
    let mut bytes = [0u8; CHALLENGE_SIZE];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// `length` random bytes as unpadded base64url, for bearer token suffixes.
pub fn random_base64url(length: usize) -> String {
    let mut bytes = vec![0u8; length];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_shape() {
        let challenge = generate_challenge();
        assert_eq!(challenge.len(), 64);
        assert!(challenge.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_challenges_are_unique() {
        assert_ne!(generate_challenge(), generate_challenge());
    }

    #[test]
    fn test_token_suffix_length() {
        // 15 bytes -> 20 base64url chars, no padding
        let suffix = random_base64url(15);
        assert_eq!(suffix.len(), 20);
        assert!(!suffix.contains('='));
    }
}
