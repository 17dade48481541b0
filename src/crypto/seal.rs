//! AES-256-GCM payload sealing.
//!
//! Output layout is `nonce(12) || ciphertext || tag(16)`, matching what the
//! device expects to base64-decode out of a firmware response.

use aes_gcm::Aes256Gcm;
use aes_gcm::Nonce;
use aes_gcm::aead::Aead;
use aes_gcm::aead::KeyInit;
use rand::RngCore;
use rand::rngs::OsRng;

use super::CryptoError;
use super::KEY_SIZE;
use super::NONCE_SIZE;

/// Encrypt `plaintext` under `key` with a random 96-bit nonce.
///
/// The nonce is prepended so [`open`] needs nothing but the key.
pub fn seal(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(key.into());

    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::Integrity)?;

    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a [`seal`] output.
///
/// Any truncation or tag mismatch surfaces as [`CryptoError::Integrity`];
/// no partial plaintext is ever returned.
pub fn open(key: &[u8; KEY_SIZE], sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < NONCE_SIZE {
        return Err(CryptoError::Integrity);
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);

    let cipher = Aes256Gcm::new(key.into());
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::Integrity)
}
