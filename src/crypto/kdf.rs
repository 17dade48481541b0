//! HKDF-SHA256 key derivation.

use hkdf::Hkdf;
use sha2::Sha256;

use super::HKDF_INFO;
use super::KEY_SIZE;

/// Derive the per-request `(enc_key, mac_key)` pair from an ECDH shared
/// secret.
///
/// Uses HKDF-SHA256 with no salt and the fixed protocol info string. Both
/// keys are 32 bytes, read sequentially from a single HKDF stream so the two
/// never overlap.
pub fn derive_keys(shared_secret: &[u8]) -> ([u8; KEY_SIZE], [u8; KEY_SIZE]) {
    let hk = Hkdf::<Sha256>::new(None, shared_secret);

    let mut okm = [0u8; KEY_SIZE * 2];
    hk.expand(HKDF_INFO, &mut okm)
        .expect("okm length is a valid HKDF-SHA256 output size");

    let mut enc_key = [0u8; KEY_SIZE];
    let mut mac_key = [0u8; KEY_SIZE];
    enc_key.copy_from_slice(&okm[..KEY_SIZE]);
    mac_key.copy_from_slice(&okm[KEY_SIZE..]);
    (enc_key, mac_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derivation_is_deterministic() {
        let secret = [7u8; 48];
        let (enc_a, mac_a) = derive_keys(&secret);
        let (enc_b, mac_b) = derive_keys(&secret);
        assert_eq!(enc_a, enc_b);
        assert_eq!(mac_a, mac_b);
    }

    #[test]
    fn test_keys_are_independent() {
        let (enc, mac) = derive_keys(&[7u8; 48]);
        assert_ne!(enc, mac);
    }

    #[test]
    fn test_different_secrets_diverge() {
        let (enc_a, _) = derive_keys(&[1u8; 48]);
        let (enc_b, _) = derive_keys(&[2u8; 48]);
        assert_ne!(enc_a, enc_b);
    }
}
