//! Configuration for the server and the simulator.
//!
//! Plain structs with sensible defaults; every knob can be overridden by an
//! environment variable (`FSS_*`), and the binaries layer clap flags on top.

use std::path::PathBuf;
use std::time::Duration;

/// Demo fleet pre-shared HMAC key.
///
/// A single fleet-wide symmetric root is a known limitation of this design;
/// real deployments provision per-device secrets out of band and override
/// this via `FSS_PRE_SHARED_KEY`.
pub const DEFAULT_PRE_SHARED_KEY: &str =
    "2fc08d8662e87cab5b38045e22797a162af67143dcf4f7c5ac2961f30714da8c";

/// Default HTTP request deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP port the API listens on.
    pub port: u16,
    /// Initial registration allowance; an existing registry snapshot wins.
    pub allowance: i64,
    /// PEM file holding the long-term ECDH private key.
    pub private_key_path: PathBuf,
    /// TLS certificate path. Accepted for packaging compatibility; the
    /// protocol is transport-independent and the core does not terminate
    /// TLS itself.
    pub cert_path: Option<PathBuf>,
    /// Endpoint-table override path, accepted for packaging compatibility.
    pub endpoints_config_path: Option<PathBuf>,
    /// Fleet pre-shared HMAC key (the raw string bytes are the HMAC key).
    pub pre_shared_key: String,
    /// Durable device registry document.
    pub registry_path: PathBuf,
    /// Durable audit log document.
    pub audit_path: PathBuf,
    /// Challenge lifetime.
    pub challenge_ttl: Duration,
    /// Per-request deadline propagated to handlers.
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 9000,
            allowance: 0,
            private_key_path: PathBuf::from("server_key.pem"),
            cert_path: None,
            endpoints_config_path: None,
            pre_shared_key: DEFAULT_PRE_SHARED_KEY.to_string(),
            registry_path: PathBuf::from("registry.json"),
            audit_path: PathBuf::from("audit.json"),
            challenge_ttl: Duration::from_secs(5 * 60),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// Apply `FSS_*` environment overrides on top of the current values.
    pub fn apply_env_overrides(&mut self) {
        if let Some(port) = env_parse::<u16>("FSS_PORT") {
            self.port = port;
        }
        if let Some(allowance) = env_parse::<i64>("FSS_ALLOWANCE") {
            self.allowance = allowance;
        }
        if let Some(path) = env_path("FSS_PRIVATE_KEY_PATH") {
            self.private_key_path = path;
        }
        if let Some(path) = env_path("FSS_CERT_PATH") {
            self.cert_path = Some(path);
        }
        if let Some(path) = env_path("FSS_ENDPOINTS_CONFIG_PATH") {
            self.endpoints_config_path = Some(path);
        }
        if let Some(path) = env_path("FSS_REGISTRY_PATH") {
            self.registry_path = path;
        }
        if let Some(path) = env_path("FSS_AUDIT_PATH") {
            self.audit_path = path;
        }
        if let Ok(key) = std::env::var("FSS_PRE_SHARED_KEY") {
            self.pre_shared_key = key;
        }
        if let Some(secs) = env_parse::<u64>("FSS_CHALLENGE_TTL_SECS") {
            self.challenge_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("FSS_REQUEST_TIMEOUT_SECS") {
            self.request_timeout = Duration::from_secs(secs);
        }
    }
}

/// Simulator configuration.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// TCP port the control plane listens on.
    pub port: u16,
    /// Address of the firmware server, `host:port`.
    pub server_addr: String,
    /// Directory holding per-device JSON state files.
    pub state_dir: PathBuf,
    /// Fleet pre-shared HMAC key; must match the server's.
    pub pre_shared_key: String,
    /// Interval between registration retries for unregistered devices.
    pub register_interval: Duration,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            port: 9001,
            server_addr: "127.0.0.1:9000".to_string(),
            state_dir: PathBuf::from("."),
            pre_shared_key: DEFAULT_PRE_SHARED_KEY.to_string(),
            register_interval: Duration::from_secs(5),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key).ok().map(PathBuf::from)
}
