//! ECDH P-384 keypairs with PEM persistence.
//!
//! The server keeps one long-lived keypair on disk; simulated devices keep
//! theirs inside their JSON state files. Public keys travel on the wire as
//! standard base64 of the uncompressed SEC1 point (97 bytes for P-384).

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use p384::PublicKey;
use p384::SecretKey;
use p384::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use snafu::OptionExt;
use snafu::ResultExt;
use tracing::info;

use super::CryptoError;
use super::InvalidPemSnafu;
use super::KeyIoSnafu;

/// PEM label written by this crate.
const PEM_TYPE: &str = "ECDH PRIVATE KEY";

/// Legacy PEM label still accepted on load.
const PEM_TYPE_LEGACY: &str = "EC PRIVATE KEY";

/// An ECDH keypair on P-384.
///
/// Wraps the private scalar; the public key is recomputed on demand. The
/// server instance is read-only after startup and freely shared.
#[derive(Clone)]
pub struct EcdhKeypair {
    secret: SecretKey,
}

impl EcdhKeypair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        Self {
            secret: SecretKey::random(&mut OsRng),
        }
    }

    /// Load the keypair at `path`, generating and persisting a new one if
    /// the file is absent.
    ///
    /// A newly generated key is written as a PEM block of type
    /// `ECDH PRIVATE KEY` with file mode 0600, fsynced before returning.
    pub fn load_or_generate(path: &Path) -> Result<Self, CryptoError> {
        if path.exists() {
            return Self::load(path);
        }
        let keypair = Self::generate();
        keypair.save(path)?;
        info!(path = %path.display(), "generated new server keypair");
        Ok(keypair)
    }

    fn load(path: &Path) -> Result<Self, CryptoError> {
        let data = std::fs::read(path).context(KeyIoSnafu {
            path: path.display().to_string(),
        })?;
        let block = pem::parse(&data).ok().context(InvalidPemSnafu {
            path: path.display().to_string(),
        })?;
        if block.tag() != PEM_TYPE && block.tag() != PEM_TYPE_LEGACY {
            return Err(CryptoError::UnexpectedPemType {
                label: block.tag().to_string(),
            });
        }
        let secret =
            SecretKey::from_slice(block.contents()).map_err(|_| CryptoError::InvalidPrivateKey)?;
        Ok(Self { secret })
    }

    fn save(&self, path: &Path) -> Result<(), CryptoError> {
        let block = pem::Pem::new(PEM_TYPE, self.secret.to_bytes().to_vec());
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .context(KeyIoSnafu {
                path: path.display().to_string(),
            })?;
        file.write_all(pem::encode(&block).as_bytes())
            .context(KeyIoSnafu {
                path: path.display().to_string(),
            })?;
        file.sync_all().context(KeyIoSnafu {
            path: path.display().to_string(),
        })
    }

    /// The public half of this keypair.
    pub fn public_key(&self) -> PublicKey {
        self.secret.public_key()
    }

    /// Public key as base64 of the uncompressed SEC1 point.
    pub fn public_key_base64(&self) -> String {
        public_key_to_base64(&self.public_key())
    }

    /// Private scalar as standard base64, for device state files.
    pub fn private_key_base64(&self) -> String {
        BASE64.encode(self.secret.to_bytes())
    }

    /// Rebuild a keypair from [`Self::private_key_base64`] output.
    pub fn from_private_key_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = BASE64
            .decode(encoded)
            .map_err(|_| CryptoError::InvalidPrivateKey)?;
        let secret = SecretKey::from_slice(&bytes).map_err(|_| CryptoError::InvalidPrivateKey)?;
        Ok(Self { secret })
    }

    /// Raw ECDH shared secret with a peer public key.
    pub fn shared_secret(&self, peer: &PublicKey) -> Vec<u8> {
        p384::ecdh::diffie_hellman(self.secret.to_nonzero_scalar(), peer.as_affine())
            .raw_secret_bytes()
            .to_vec()
    }
}

impl std::fmt::Debug for EcdhKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never expose the scalar in debug output.
        f.debug_struct("EcdhKeypair")
            .field("public_key", &self.public_key_base64())
            .finish()
    }
}

/// Encode a public key as standard base64 of the uncompressed point.
pub fn public_key_to_base64(key: &PublicKey) -> String {
    BASE64.encode(key.to_encoded_point(false).as_bytes())
}

/// Decode a public key from its base64 wire form.
pub fn public_key_from_base64(encoded: &str) -> Result<PublicKey, CryptoError> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| CryptoError::InvalidPublicKey {
            reason: format!("bad base64: {e}"),
        })?;
    PublicKey::from_sec1_bytes(&bytes).map_err(|_| CryptoError::InvalidPublicKey {
        reason: "not a valid SEC1 point".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_secret_agreement() {
        let server = EcdhKeypair::generate();
        let device = EcdhKeypair::generate();

        let a = server.shared_secret(&device.public_key());
        let b = device.shared_secret(&server.public_key());

        assert_eq!(a, b);
        assert_eq!(a.len(), 48); // P-384 field element
    }

    #[test]
    fn test_public_key_base64_roundtrip() {
        let keypair = EcdhKeypair::generate();
        let encoded = keypair.public_key_base64();
        let decoded = public_key_from_base64(&encoded).unwrap();
        assert_eq!(decoded, keypair.public_key());
    }

    #[test]
    fn test_private_key_base64_roundtrip() {
        let keypair = EcdhKeypair::generate();
        let restored = EcdhKeypair::from_private_key_base64(&keypair.private_key_base64()).unwrap();
        assert_eq!(restored.public_key(), keypair.public_key());
    }

    #[test]
    fn test_load_or_generate_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.pem");

        let first = EcdhKeypair::load_or_generate(&path).unwrap();
        assert!(path.exists());

        let second = EcdhKeypair::load_or_generate(&path).unwrap();
        assert_eq!(first.public_key(), second.public_key());
    }

    #[test]
    fn test_key_file_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.pem");
        EcdhKeypair::load_or_generate(&path).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_legacy_pem_label_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.pem");

        let keypair = EcdhKeypair::generate();
        let block = pem::Pem::new(PEM_TYPE_LEGACY, keypair.secret.to_bytes().to_vec());
        std::fs::write(&path, pem::encode(&block)).unwrap();

        let loaded = EcdhKeypair::load_or_generate(&path).unwrap();
        assert_eq!(loaded.public_key(), keypair.public_key());
    }

    #[test]
    fn test_unknown_pem_label_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rsa.pem");
        let block = pem::Pem::new("RSA PRIVATE KEY", vec![1u8; 48]);
        std::fs::write(&path, pem::encode(&block)).unwrap();

        let err = EcdhKeypair::load_or_generate(&path).unwrap_err();
        assert!(matches!(err, CryptoError::UnexpectedPemType { .. }));
    }
}
