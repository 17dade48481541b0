//! A simulated device: honest protocol driver with JSON persistence.
//!
//! A device owns its ECDH keypair and the fleet pre-shared key. It proves
//! identity by signing server challenges, registers its public key, and
//! verifies-then-decrypts firmware payloads. State (including keys) lives
//! in `<state_dir>/<serial>.json` so a restarted simulator picks up where
//! it left off.

use std::path::Path;
use std::path::PathBuf;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::DateTime;
use chrono::Utc;
use p384::PublicKey;
use serde::Deserialize;
use serde::Serialize;
use snafu::ResultExt;
use snafu::Snafu;
use tracing::info;
use tracing::warn;

use crate::client::ClientError;
use crate::client::DeviceClient;
use crate::client::FirmwareResponse;
use crate::crypto;
use crate::crypto::EcdhKeypair;

/// Firmware version a device ships with.
pub const INITIAL_VERSION: &str = "1.0.0";

/// Errors from device protocol operations.
#[derive(Debug, Snafu)]
pub enum DeviceError {
    /// The device has no server public key yet; it must register first.
    #[snafu(display("server public key unknown; register first"))]
    NotPaired,

    /// A protocol request failed.
    #[snafu(transparent)]
    Client {
        /// The underlying client error.
        source: ClientError,
    },

    /// The payload signature or AEAD tag did not check out.
    ///
    /// Raised before any decryption is attempted when the HMAC over the
    /// base64 text mismatches.
    #[snafu(display("integrity check failed"))]
    Integrity,

    /// A key field in a response or state file failed to decode.
    #[snafu(display("{message}"))]
    BadKey {
        /// What failed to decode.
        message: String,
    },

    /// Device state file I/O failed.
    #[snafu(display("device state i/o failed: {source}"))]
    Io {
        /// The underlying I/O error.
        source: std::io::Error,
    },
}

/// Where a device is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    /// Fresh out of the factory, running the bootloader image.
    Bootloader,
    /// At least one firmware update applied.
    Updated,
}

impl DeviceState {
    /// Wire name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceState::Bootloader => "bootloader",
            DeviceState::Updated => "updated",
        }
    }
}

/// One applied update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRecord {
    /// Version that was installed.
    pub version: String,
    /// When the device applied it.
    pub timestamp: DateTime<Utc>,
}

/// Outcome of a replay attack run.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ReplayOutcome {
    /// Requests the server accepted (must be exactly 1).
    pub accepted: u32,
    /// Requests the server rejected (must be exactly 1).
    pub rejected: u32,
}

/// On-disk shape of a device state file.
#[derive(Debug, Serialize, Deserialize)]
struct DeviceFile {
    serial_number: String,
    master_address: String,
    firmware_version: String,
    state: DeviceState,
    symmetric_key: String,
    private_key: String,
    public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    server_pubkey: Option<String>,
    #[serde(default)]
    update_history: Vec<UpdateRecord>,
}

/// A simulated device.
pub struct Device {
    /// 10-digit serial number.
    pub serial_number: String,
    /// `host:port` of the firmware server.
    pub master_address: String,
    /// Currently installed firmware version.
    pub firmware_version: String,
    /// Lifecycle state reported to the server at registration.
    pub state: DeviceState,
    /// Applied updates, oldest first.
    pub update_history: Vec<UpdateRecord>,
    symmetric_key: Vec<u8>,
    keypair: EcdhKeypair,
    server_public_key: Option<PublicKey>,
    state_dir: PathBuf,
    client: DeviceClient,
}

impl Device {
    /// Create a fresh device (new keypair) and persist it, or load the
    /// existing state file if `serial` already has one.
    pub fn load_or_create(
        state_dir: &Path,
        master_address: &str,
        serial: u32,
        symmetric_key: &str,
    ) -> Result<Self, DeviceError> {
        let serial_number = format_serial(serial);
        let path = state_dir.join(format!("{serial_number}.json"));
        if path.exists() {
            return Self::load(state_dir, &path);
        }

        let device = Self {
            serial_number: serial_number.clone(),
            master_address: master_address.to_string(),
            firmware_version: INITIAL_VERSION.to_string(),
            state: DeviceState::Bootloader,
            update_history: Vec::new(),
            symmetric_key: symmetric_key.as_bytes().to_vec(),
            keypair: EcdhKeypair::generate(),
            server_public_key: None,
            state_dir: state_dir.to_path_buf(),
            client: DeviceClient::new(master_address),
        };
        device.save()?;
        info!(%device.serial_number, "created device");
        Ok(device)
    }

    /// Load a device from its state file.
    pub fn load(state_dir: &Path, path: &Path) -> Result<Self, DeviceError> {
        let data = std::fs::read(path).context(IoSnafu)?;
        let file: DeviceFile = serde_json::from_slice(&data)
            .map_err(|e| DeviceError::Io { source: std::io::Error::other(e) })?;

        let keypair = EcdhKeypair::from_private_key_base64(&file.private_key)
            .map_err(|e| DeviceError::BadKey { message: e.to_string() })?;
        let server_public_key = match &file.server_pubkey {
            Some(encoded) => Some(
                crypto::public_key_from_base64(encoded)
                    .map_err(|e| DeviceError::BadKey { message: e.to_string() })?,
            ),
            None => None,
        };

        Ok(Self {
            client: DeviceClient::new(&file.master_address),
            serial_number: file.serial_number,
            master_address: file.master_address,
            firmware_version: file.firmware_version,
            state: file.state,
            update_history: file.update_history,
            symmetric_key: file.symmetric_key.into_bytes(),
            keypair,
            server_public_key,
            state_dir: state_dir.to_path_buf(),
        })
    }

    /// Persist the device to `<state_dir>/<serial>.json`.
    pub fn save(&self) -> Result<(), DeviceError> {
        let file = DeviceFile {
            serial_number: self.serial_number.clone(),
            master_address: self.master_address.clone(),
            firmware_version: self.firmware_version.clone(),
            state: self.state,
            symmetric_key: String::from_utf8_lossy(&self.symmetric_key).to_string(),
            private_key: self.keypair.private_key_base64(),
            public_key: self.keypair.public_key_base64(),
            server_pubkey: self.server_public_key.as_ref().map(crypto::public_key_to_base64),
            update_history: self.update_history.clone(),
        };
        let data = serde_json::to_vec_pretty(&file)
            .map_err(|e| DeviceError::Io { source: std::io::Error::other(e) })?;
        let path = self.state_dir.join(format!("{}.json", self.serial_number));
        std::fs::write(path, data).context(IoSnafu)
    }

    /// Whether the device holds the server public key (registered at least
    /// once).
    pub fn is_paired(&self) -> bool {
        self.server_public_key.is_some()
    }

    /// Run challenge -> verify, returning a fresh one-shot bearer.
    async fn acquire_token(&self) -> Result<String, DeviceError> {
        let challenge = self.client.get_challenge(&self.serial_number).await?;
        let signature = crypto::sign(&challenge, &self.symmetric_key);
        Ok(self
            .client
            .get_token(&self.serial_number, &challenge, &signature)
            .await?)
    }

    /// Full registration round: challenge, verify, register, store the
    /// server public key.
    pub async fn register(&mut self) -> Result<(), DeviceError> {
        let bearer = self.acquire_token().await?;
        let server_key = self
            .client
            .register(
                &self.serial_number,
                &self.keypair.public_key_base64(),
                self.state.as_str(),
                &bearer,
            )
            .await?;

        self.server_public_key = Some(
            crypto::public_key_from_base64(&server_key)
                .map_err(|e| DeviceError::BadKey { message: e.to_string() })?,
        );
        info!(serial_number = %self.serial_number, "device registered");
        self.save()
    }

    /// Honest update: fresh bearer, fetch, verify, decrypt, apply.
    pub async fn update(&mut self, version: &str) -> Result<(), DeviceError> {
        if self.server_public_key.is_none() {
            return Err(DeviceError::NotPaired);
        }
        let bearer = self.acquire_token().await?;
        let response = self.client.get_firmware(version, &bearer).await?;
        self.apply_update(&response)
    }

    /// Replay attack: one fresh bearer, two concurrent firmware requests.
    ///
    /// Exactly one must be accepted; the other dies on the consumed token.
    pub async fn replay(&mut self, version: &str) -> Result<ReplayOutcome, DeviceError> {
        if self.server_public_key.is_none() {
            return Err(DeviceError::NotPaired);
        }
        let bearer = self.acquire_token().await?;

        let (first, second) = tokio::join!(
            self.client.get_firmware(version, &bearer),
            self.client.get_firmware(version, &bearer),
        );

        let mut outcome = ReplayOutcome { accepted: 0, rejected: 0 };
        for result in [first, second] {
            match result {
                Ok(response) => {
                    outcome.accepted += 1;
                    self.apply_update(&response)?;
                }
                Err(e) => {
                    outcome.rejected += 1;
                    warn!(serial_number = %self.serial_number, error = %e, "replayed request rejected");
                }
            }
        }
        Ok(outcome)
    }

    /// Verify the payload signature, open the ciphertext, and commit the
    /// update.
    fn apply_update(&mut self, response: &FirmwareResponse) -> Result<(), DeviceError> {
        let firmware = self.verify_and_open(response)?;

        self.state = DeviceState::Updated;
        self.firmware_version = response.version.clone();
        self.update_history.push(UpdateRecord {
            version: response.version.clone(),
            timestamp: Utc::now(),
        });
        info!(
            serial_number = %self.serial_number,
            version = %String::from_utf8_lossy(&firmware),
            "firmware applied"
        );
        self.save()
    }

    /// Check the HMAC over the base64 text, then decrypt.
    ///
    /// The signature check runs first; a tampered payload never reaches
    /// the cipher.
    fn verify_and_open(&self, response: &FirmwareResponse) -> Result<Vec<u8>, DeviceError> {
        let server_key = self.server_public_key.as_ref().ok_or(DeviceError::NotPaired)?;
        let shared_secret = self.keypair.shared_secret(server_key);
        let (enc_key, mac_key) = crypto::derive_keys(&shared_secret);

        if !crypto::verify(&response.data, &mac_key, &response.signature) {
            return Err(DeviceError::Integrity);
        }

        let sealed = BASE64
            .decode(&response.data)
            .map_err(|_| DeviceError::Integrity)?;
        crypto::open(&enc_key, &sealed).map_err(|_| DeviceError::Integrity)
    }
}

/// Format a numeric serial as the canonical 10-digit string.
pub fn format_serial(serial: u32) -> String {
    format!("{serial:010}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paired_device(server: &EcdhKeypair) -> (tempfile::TempDir, Device) {
        let dir = tempfile::tempdir().unwrap();
        let mut device = Device::load_or_create(dir.path(), "127.0.0.1:1", 1, "fleet-key").unwrap();
        device.server_public_key = Some(server.public_key());
        (dir, device)
    }

    fn sealed_response(server: &EcdhKeypair, device: &Device, version: &str) -> FirmwareResponse {
        let shared = server.shared_secret(&device.keypair.public_key());
        let (enc_key, mac_key) = crypto::derive_keys(&shared);
        let data = BASE64.encode(crypto::seal(&enc_key, version.as_bytes()).unwrap());
        let signature = crypto::sign(&data, &mac_key);
        FirmwareResponse {
            serial_number: device.serial_number.clone(),
            data,
            version: version.to_string(),
            timestamp: Utc::now().timestamp(),
            signature,
        }
    }

    #[test]
    fn test_format_serial() {
        assert_eq!(format_serial(1), "0000000001");
        assert_eq!(format_serial(1234567890), "1234567890");
    }

    #[test]
    fn test_verify_and_open_roundtrip() {
        let server = EcdhKeypair::generate();
        let (_dir, device) = paired_device(&server);
        let response = sealed_response(&server, &device, "1.0.1");

        let plaintext = device.verify_and_open(&response).unwrap();
        assert_eq!(plaintext, b"1.0.1");
    }

    #[test]
    fn test_tampered_data_fails_before_decrypt() {
        let server = EcdhKeypair::generate();
        let (_dir, device) = paired_device(&server);
        let mut response = sealed_response(&server, &device, "1.0.1");

        // Flip one character of the base64 text; the HMAC must catch it.
        let mut bytes = response.data.into_bytes();
        bytes[0] = if bytes[0] == b'A' { b'B' } else { b'A' };
        response.data = String::from_utf8(bytes).unwrap();

        assert!(matches!(
            device.verify_and_open(&response),
            Err(DeviceError::Integrity)
        ));
    }

    #[test]
    fn test_tampered_signature_fails() {
        let server = EcdhKeypair::generate();
        let (_dir, device) = paired_device(&server);
        let mut response = sealed_response(&server, &device, "1.0.1");

        let mut bytes = response.signature.into_bytes();
        bytes[0] = if bytes[0] == b'0' { b'1' } else { b'0' };
        response.signature = String::from_utf8(bytes).unwrap();

        assert!(matches!(
            device.verify_and_open(&response),
            Err(DeviceError::Integrity)
        ));
    }

    #[test]
    fn test_state_file_roundtrip() {
        let server = EcdhKeypair::generate();
        let dir = tempfile::tempdir().unwrap();

        {
            let mut device =
                Device::load_or_create(dir.path(), "127.0.0.1:1", 7, "fleet-key").unwrap();
            device.server_public_key = Some(server.public_key());
            device.firmware_version = "1.0.1".to_string();
            device.state = DeviceState::Updated;
            device.save().unwrap();
        }

        let restored =
            Device::load_or_create(dir.path(), "127.0.0.1:1", 7, "fleet-key").unwrap();
        assert_eq!(restored.serial_number, "0000000007");
        assert_eq!(restored.firmware_version, "1.0.1");
        assert_eq!(restored.state, DeviceState::Updated);
        assert!(restored.is_paired());
    }
}
