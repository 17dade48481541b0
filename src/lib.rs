//! Secure firmware distribution.
//!
//! `fss` is a firmware distribution server plus a device-fleet simulator.
//! Devices prove identity with an HMAC challenge-response over a fleet
//! pre-shared key, register an ECDH P-384 public key under a one-shot
//! bearer token, and receive firmware sealed with AES-256-GCM under
//! HKDF-derived keys, tagged with HMAC-SHA256 over the base64 ciphertext.
//!
//! The server side composes independently-locked components (sessions,
//! device registry, audit log) behind capability traits; the simulator
//! side drives the protocol honestly and also mounts the replay attack
//! used to prove the one-shot token invariant.

#![warn(missing_docs)]

/// Tamper-evident categorized audit log.
pub mod audit;
/// HTTP clients for the server and simulator APIs.
pub mod client;
/// Configuration knobs for both binaries.
pub mod config;
/// Cryptographic primitives for the delivery protocol.
pub mod crypto;
/// API error taxonomy with axum response mapping.
pub mod error;
/// Device registry and registration allowance.
pub mod registry;
/// The firmware distribution server.
pub mod server;
/// Challenge sessions and one-shot bearer tokens.
pub mod session;
/// Device-fleet simulator.
pub mod simulator;
/// Shared application state for HTTP handlers.
pub mod state;
/// Durable JSON snapshot helpers.
pub mod storage;

pub use config::ServerConfig;
pub use config::SimulatorConfig;
pub use state::AppState;
