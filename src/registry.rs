//! Device registry with a persisted registration allowance.
//!
//! The registry owns two pieces of state under one lock: the device records
//! and the allowance counter. Every successful first-time registration
//! debits the allowance by exactly one and nothing ever re-credits it short
//! of an administrative increase. Mutations persist a whole-document JSON
//! snapshot before they commit in memory, so the on-disk quota can never
//! run ahead of what the server actually granted.

use std::collections::BTreeMap;
use std::path::PathBuf;

use parking_lot::Mutex;
use serde::Deserialize;
use serde::Serialize;
use snafu::Snafu;
use tracing::info;
use tracing::warn;

use crate::storage;

/// Errors from registry operations.
#[derive(Debug, Snafu)]
pub enum RegistryError {
    /// The serial number has no record.
    #[snafu(display("device not registered"))]
    NotRegistered,

    /// The device exists but an operator has blocked it.
    #[snafu(display("device is blocked"))]
    NotAuthorized,

    /// No registrations left in the quota.
    #[snafu(display("allowance exceeded"))]
    AllowanceExhausted,

    /// `increase_allowance` called with a non-positive delta.
    #[snafu(display("invalid increase_allowance"))]
    InvalidIncrease,

    /// The durable snapshot could not be written (already retried once).
    #[snafu(display("failed to persist registry: {source}"))]
    Persist {
        /// The underlying I/O error.
        source: std::io::Error,
    },
}

/// One registered (or placeholder) device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// 10-digit decimal serial number.
    pub serial_number: String,
    /// Device ECDH public key, base64 of the raw point; empty for
    /// placeholder records created by block/authorize.
    pub public_key: String,
    /// Authorized (`true`) vs blocked (`false`).
    pub is_verified: bool,
    /// Device-reported state, e.g. `bootloader` or `updated`.
    pub state: String,
}

/// Capability trait for device lookups and lifecycle operations.
pub trait DeviceStore: Send + Sync {
    /// `Ok` iff the device is present and authorized.
    fn is_registered(&self, serial_number: &str) -> Result<(), RegistryError>;

    /// Insert or replace a device record.
    ///
    /// A new serial number debits the allowance; re-registering an existing
    /// one does not.
    fn register(
        &self,
        serial_number: &str,
        public_key: &str,
        state: &str,
        is_verified: bool,
    ) -> Result<(), RegistryError>;

    /// The stored public key, or empty string if the serial is unknown.
    fn public_key(&self, serial_number: &str) -> String;

    /// Snapshot copy of every record.
    fn list(&self) -> Vec<DeviceRecord>;

    /// Mark a device unauthorized, creating a placeholder if unknown.
    fn block(&self, serial_number: &str) -> Result<(), RegistryError>;

    /// Mark a device authorized, creating a placeholder if unknown.
    fn authorize(&self, serial_number: &str) -> Result<(), RegistryError>;
}

/// Capability trait for the registration quota.
pub trait AllowanceControl: Send + Sync {
    /// Current allowance.
    fn allowance(&self) -> i64;

    /// Raise the allowance by `delta` (> 0), returning the new value.
    fn increase_allowance(&self, delta: i64) -> Result<i64, RegistryError>;
}

/// On-disk shape of the registry snapshot.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct RegistrySnapshot {
    allowance: i64,
    devices: BTreeMap<String, DeviceRecord>,
}

/// Durable device registry.
#[derive(Debug)]
pub struct DeviceRegistry {
    path: PathBuf,
    state: Mutex<RegistrySnapshot>,
}

impl DeviceRegistry {
    /// Open the registry at `path`.
    ///
    /// An existing snapshot wins over `initial_allowance`; the quota
    /// survives process lifetime.
    pub fn open(path: PathBuf, initial_allowance: i64) -> Result<Self, RegistryError> {
        let state = match storage::read_json::<RegistrySnapshot>(&path) {
            Ok(Some(snapshot)) => {
                info!(
                    allowance = snapshot.allowance,
                    devices = snapshot.devices.len(),
                    "restored device registry"
                );
                snapshot
            }
            Ok(None) => RegistrySnapshot {
                allowance: initial_allowance,
                devices: BTreeMap::new(),
            },
            Err(e) => {
                warn!(error = %e, "unreadable registry snapshot, starting fresh");
                RegistrySnapshot {
                    allowance: initial_allowance,
                    devices: BTreeMap::new(),
                }
            }
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Persist `next` and commit it to memory on success.
    ///
    /// Transient I/O is retried once; after that the mutation fails and the
    /// in-memory state stays at the last snapshot.
    fn commit(
        &self,
        state: &mut RegistrySnapshot,
        next: RegistrySnapshot,
    ) -> Result<(), RegistryError> {
        if let Err(first) = storage::write_json_atomic(&self.path, &next) {
            warn!(error = %first, "registry snapshot write failed, retrying");
            storage::write_json_atomic(&self.path, &next)
                .map_err(|source| RegistryError::Persist { source })?;
        }
        *state = next;
        Ok(())
    }
}

impl DeviceStore for DeviceRegistry {
    fn is_registered(&self, serial_number: &str) -> Result<(), RegistryError> {
        let state = self.state.lock();
        match state.devices.get(serial_number) {
            Some(record) if record.is_verified => Ok(()),
            Some(_) => Err(RegistryError::NotAuthorized),
            None => Err(RegistryError::NotRegistered),
        }
    }

    fn register(
        &self,
        serial_number: &str,
        public_key: &str,
        state_label: &str,
        is_verified: bool,
    ) -> Result<(), RegistryError> {
        let mut state = self.state.lock();
        let is_new = !state.devices.contains_key(serial_number);
        if is_new && state.allowance <= 0 {
            return Err(RegistryError::AllowanceExhausted);
        }

        let mut next = state.clone();
        if is_new {
            next.allowance -= 1;
        }
        next.devices.insert(
            serial_number.to_string(),
            DeviceRecord {
                serial_number: serial_number.to_string(),
                public_key: public_key.to_string(),
                is_verified,
                state: state_label.to_string(),
            },
        );
        self.commit(&mut state, next)?;
        info!(serial_number, is_new, "registered device");
        Ok(())
    }

    fn public_key(&self, serial_number: &str) -> String {
        self.state
            .lock()
            .devices
            .get(serial_number)
            .map(|record| record.public_key.clone())
            .unwrap_or_default()
    }

    fn list(&self) -> Vec<DeviceRecord> {
        self.state.lock().devices.values().cloned().collect()
    }

    fn block(&self, serial_number: &str) -> Result<(), RegistryError> {
        self.set_verified(serial_number, false)
    }

    fn authorize(&self, serial_number: &str) -> Result<(), RegistryError> {
        self.set_verified(serial_number, true)
    }
}

impl DeviceRegistry {
    fn set_verified(&self, serial_number: &str, is_verified: bool) -> Result<(), RegistryError> {
        let mut state = self.state.lock();
        let mut next = state.clone();
        next.devices
            .entry(serial_number.to_string())
            .and_modify(|record| record.is_verified = is_verified)
            .or_insert(DeviceRecord {
                serial_number: serial_number.to_string(),
                public_key: String::new(),
                is_verified,
                state: String::new(),
            });
        self.commit(&mut state, next)
    }
}

impl AllowanceControl for DeviceRegistry {
    fn allowance(&self) -> i64 {
        self.state.lock().allowance
    }

    fn increase_allowance(&self, delta: i64) -> Result<i64, RegistryError> {
        if delta <= 0 {
            return Err(RegistryError::InvalidIncrease);
        }
        let mut state = self.state.lock();
        let mut next = state.clone();
        next.allowance += delta;
        self.commit(&mut state, next)?;
        Ok(state.allowance)
    }
}
