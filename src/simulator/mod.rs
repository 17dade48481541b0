//! Device-fleet simulator.
//!
//! Hosts a set of simulated [`Device`]s, drives the registration protocol
//! for each in a background retry loop, and exposes a small control-plane
//! HTTP API for generating devices, requesting updates and mounting replay
//! attacks. Device state is restored from the state directory on startup.

pub mod device;
mod handlers;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

use crate::config::SimulatorConfig;

pub use device::Device;
pub use device::DeviceError;
pub use device::DeviceState;
pub use device::ReplayOutcome;
pub use device::format_serial;

/// Version requested when a caller does not name one.
pub const DEFAULT_UPDATE_VERSION: &str = "1.0.1";

/// The simulator: fleet bookkeeping plus background registration.
pub struct Simulator {
    config: SimulatorConfig,
    devices: parking_lot::Mutex<BTreeMap<String, Arc<tokio::sync::Mutex<Device>>>>,
    cancel: CancellationToken,
}

impl Simulator {
    /// Create an empty simulator.
    pub fn new(config: SimulatorConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            devices: parking_lot::Mutex::new(BTreeMap::new()),
            cancel: CancellationToken::new(),
        })
    }

    /// The simulator configuration.
    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Restore every `NNNNNNNNNN.json` device file in the state directory
    /// and resume its registration loop.
    pub fn restore_devices(self: &Arc<Self>) -> Result<usize> {
        let entries = std::fs::read_dir(&self.config.state_dir)
            .with_context(|| format!("cannot read {}", self.config.state_dir.display()))?;

        let mut restored = 0;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            // "<10-digit serial>.json"
            let bytes = name.as_bytes();
            if bytes.len() != 15
                || !name.ends_with(".json")
                || !bytes[..10].iter().all(|b| b.is_ascii_digit())
            {
                continue;
            }
            match Device::load(&self.config.state_dir, &entry.path()) {
                Ok(device) => {
                    self.adopt(device);
                    restored += 1;
                }
                Err(e) => warn!(file = %name, error = %e, "skipping unreadable device file"),
            }
        }
        if restored > 0 {
            info!(restored, "restored devices from state directory");
        }
        Ok(restored)
    }

    /// Generate devices with serials `start_serial..start_serial + count`,
    /// skipping ones that already exist. Returns how many were created.
    pub fn generate_devices(
        self: &Arc<Self>,
        server_addr: &str,
        count: u32,
        start_serial: u32,
    ) -> Result<u32, DeviceError> {
        let mut created = 0;
        for serial in start_serial..start_serial.saturating_add(count) {
            if self.device(serial).is_some() {
                info!(serial, "device already exists");
                continue;
            }
            let device = Device::load_or_create(
                &self.config.state_dir,
                server_addr,
                serial,
                &self.config.pre_shared_key,
            )?;
            self.adopt(device);
            created += 1;
        }
        Ok(created)
    }

    /// Track a device and spawn its registration retry loop.
    fn adopt(self: &Arc<Self>, device: Device) {
        let serial_number = device.serial_number.clone();
        let shared = Arc::new(tokio::sync::Mutex::new(device));
        self.devices.lock().insert(serial_number, shared.clone());

        let interval = self.config.register_interval;
        let cancel = self.cancel.child_token();
        tokio::spawn(register_loop(shared, interval, cancel));
    }

    /// Look up a device by numeric serial.
    pub fn device(&self, serial: u32) -> Option<Arc<tokio::sync::Mutex<Device>>> {
        self.devices.lock().get(&format_serial(serial)).cloned()
    }

    /// Snapshot of every tracked device handle, in serial order.
    pub fn device_handles(&self) -> Vec<Arc<tokio::sync::Mutex<Device>>> {
        self.devices.lock().values().cloned().collect()
    }

    /// Stop all background registration loops.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Build the control-plane router for a simulator instance.
pub fn build_control_router(simulator: Arc<Simulator>) -> axum::Router {
    handlers::build_router(simulator)
}

/// Retry registration on a fixed interval until it succeeds or the token
/// is cancelled. Re-registration is idempotent on the server's quota, so a
/// restored device re-running this loop is harmless.
async fn register_loop(
    device: Arc<tokio::sync::Mutex<Device>>,
    interval: std::time::Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // interval() fires immediately; consume the first tick so we match the
    // wait-then-try cadence.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                let mut device = device.lock().await;
                match device.register().await {
                    Ok(()) => return,
                    Err(e) => {
                        warn!(serial_number = %device.serial_number, error = %e, "registration attempt failed");
                    }
                }
            }
        }
    }
}

/// Run the simulator control plane until ctrl-c.
pub async fn serve(config: SimulatorConfig) -> Result<()> {
    let simulator = Simulator::new(config.clone());
    simulator.restore_devices()?;

    let app = build_control_router(simulator.clone());
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, server = %config.server_addr, "simulator listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("simulator error")?;

    simulator.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
