//! Application state shared across all HTTP handlers.
//!
//! The coordinator composes independently-locked components behind their
//! capability traits. Handlers reach through `AppState` for exactly the
//! capabilities they need; no handler ever acquires more than one
//! component's lock at a time.

use std::sync::Arc;

use crate::audit::AuditSink;
use crate::crypto::EcdhKeypair;
use crate::registry::AllowanceControl;
use crate::registry::DeviceStore;
use crate::session::SessionGate;

/// Shared application state passed to all axum handlers.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<StateInner>,
}

struct StateInner {
    sessions: Arc<dyn SessionGate>,
    devices: Arc<dyn DeviceStore>,
    allowance: Arc<dyn AllowanceControl>,
    audit: Arc<dyn AuditSink>,
    keypair: Arc<EcdhKeypair>,
    server_public_key: String,
    pre_shared_key: Vec<u8>,
}

impl AppState {
    /// Compose the server's components.
    pub fn new(
        sessions: Arc<dyn SessionGate>,
        devices: Arc<dyn DeviceStore>,
        allowance: Arc<dyn AllowanceControl>,
        audit: Arc<dyn AuditSink>,
        keypair: Arc<EcdhKeypair>,
        pre_shared_key: impl Into<Vec<u8>>,
    ) -> Self {
        let server_public_key = keypair.public_key_base64();
        AppState {
            inner: Arc::new(StateInner {
                sessions,
                devices,
                allowance,
                audit,
                keypair,
                server_public_key,
                pre_shared_key: pre_shared_key.into(),
            }),
        }
    }

    /// Challenge/verify/token lifecycle.
    pub fn sessions(&self) -> &dyn SessionGate {
        self.inner.sessions.as_ref()
    }

    /// Device records and lifecycle.
    pub fn devices(&self) -> &dyn DeviceStore {
        self.inner.devices.as_ref()
    }

    /// Registration quota.
    pub fn allowance(&self) -> &dyn AllowanceControl {
        self.inner.allowance.as_ref()
    }

    /// Audit trail.
    pub fn audit(&self) -> &dyn AuditSink {
        self.inner.audit.as_ref()
    }

    /// Long-term server keypair; read-only after startup.
    pub fn keypair(&self) -> &EcdhKeypair {
        &self.inner.keypair
    }

    /// Cached base64 of the server public key, as sent to devices.
    pub fn server_public_key(&self) -> &str {
        &self.inner.server_public_key
    }

    /// Fleet pre-shared HMAC key.
    pub fn pre_shared_key(&self) -> &[u8] {
        &self.inner.pre_shared_key
    }
}
