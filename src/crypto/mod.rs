//! Cryptographic primitives for the firmware delivery protocol.
//!
//! Everything the protocol needs is collected here so the rest of the crate
//! never touches a cipher directly:
//!
//! - ECDH key agreement on P-384 with PEM persistence ([`keypair`])
//! - HKDF-SHA256 derivation of the per-request key pair ([`kdf`])
//! - AES-256-GCM sealing of firmware payloads ([`seal`])
//! - HMAC-SHA256 hex signatures with constant-time verification ([`sign`])
//! - CSPRNG helpers for challenges, token suffixes and nonces ([`random`])

pub mod kdf;
pub mod keypair;
pub mod random;
pub mod seal;
pub mod sign;

use snafu::Snafu;

pub use kdf::derive_keys;
pub use keypair::{EcdhKeypair, public_key_from_base64, public_key_to_base64};
pub use random::{generate_challenge, random_base64url};
pub use seal::{open, seal};
pub use sign::{sign, verify};

/// Symmetric key length for AES-256 and HMAC-SHA256 (32 bytes).
pub const KEY_SIZE: usize = 32;

/// AES-GCM nonce length (96 bits).
pub const NONCE_SIZE: usize = 12;

/// Random challenge length before hex encoding (32 bytes = 64 hex chars).
pub const CHALLENGE_SIZE: usize = 32;

/// HKDF info string binding derived keys to this protocol.
pub const HKDF_INFO: &[u8] = b"FIRMWARE_UPDATE_KEYS";

/// Errors from the crypto layer.
#[derive(Debug, Snafu)]
pub enum CryptoError {
    /// Key file I/O failed.
    #[snafu(display("key file i/o failed at {path}: {source}"))]
    KeyIo {
        /// Path of the key file.
        path: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The key file does not contain a parseable PEM block.
    #[snafu(display("invalid PEM block in {path}"))]
    InvalidPem {
        /// Path of the key file.
        path: String,
    },

    /// The PEM block carries a label this crate does not recognize.
    #[snafu(display("unexpected PEM type: {label}"))]
    UnexpectedPemType {
        /// The offending PEM label.
        label: String,
    },

    /// The private scalar was rejected by the curve implementation.
    #[snafu(display("failed to parse P-384 private key"))]
    InvalidPrivateKey,

    /// A peer public key failed base64 or SEC1 point decoding.
    #[snafu(display("invalid P-384 public key: {reason}"))]
    InvalidPublicKey {
        /// What went wrong while decoding.
        reason: String,
    },

    /// AEAD open failed: the ciphertext is truncated or the tag is wrong.
    ///
    /// No plaintext or decryption state ever leaves the seal module on this
    /// path.
    #[snafu(display("integrity check failed"))]
    Integrity,
}
