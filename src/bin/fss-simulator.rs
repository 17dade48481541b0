//! fss-simulator: device-fleet simulator and its control CLI.
//!
//! `serve` runs the control plane; every other subcommand talks to a
//! running simulator over HTTP.
//!
//! ```bash
//! # Start the simulator
//! fss-simulator serve --port 9001 --server 127.0.0.1:9000
//!
//! # Generate 5 devices and exercise the protocol
//! fss-simulator generate 5 --start-serial 1
//! fss-simulator update 1
//! fss-simulator batch-update 1-5
//! fss-simulator simulate-replay 1
//! fss-simulator status 1
//! ```

use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use clap::Parser;
use clap::Subcommand;
use tracing_subscriber::EnvFilter;

use fss::client::SimulatorClient;
use fss::config::SimulatorConfig;

/// Command-line interface for the device-fleet simulator.
#[derive(Parser)]
#[command(name = "fss-simulator")]
#[command(version)]
#[command(about = "Device-fleet simulator for the firmware distribution server")]
#[command(arg_required_else_help = true)]
struct Cli {
    /// Simulator control-plane address for client subcommands.
    #[arg(long, env = "FSS_SIM_ADDR", default_value = "127.0.0.1:9001", global = true)]
    endpoint: String,

    /// Firmware server address.
    #[arg(long, env = "FSS_SERVER_ADDR", default_value = "127.0.0.1:9000", global = true)]
    server: String,

    /// Enable debug-level logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the simulator control plane.
    Serve {
        /// Port to listen on.
        #[arg(long, default_value_t = 9001)]
        port: u16,

        /// Directory for per-device state files.
        #[arg(long, default_value = ".")]
        state_dir: PathBuf,
    },

    /// Generate devices and start registering them.
    Generate {
        /// How many devices to create.
        count: u32,

        /// First serial number.
        #[arg(long, default_value_t = 0)]
        start_serial: u32,
    },

    /// Update one device's firmware.
    Update {
        /// Numeric serial of the device.
        serial: u32,

        /// Version to request.
        #[arg(long)]
        version: Option<String>,
    },

    /// Update a range of devices, e.g. `100-200`.
    BatchUpdate {
        /// Inclusive serial range, `start-end`.
        range: String,

        /// Version to request.
        #[arg(long)]
        version: Option<String>,
    },

    /// Show one device's status and update history.
    Status {
        /// Numeric serial of the device.
        serial: u32,
    },

    /// List all simulated devices.
    ListAll,

    /// Mount a replay attack for one device.
    SimulateReplay {
        /// Numeric serial of the device.
        serial: u32,
    },

    /// Mount replay attacks over a serial range, e.g. `100-200`.
    SimulateBatchReplay {
        /// Inclusive serial range, `start-end`.
        range: String,
    },
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).compact().init();
}

/// Parse an inclusive `start-end` serial range.
fn parse_range(range: &str) -> Result<(u32, u32)> {
    let (start, end) = range
        .split_once('-')
        .context("invalid range, use 'startSerial-endSerial'")?;
    let start: u32 = start.trim().parse().context("invalid start serial")?;
    let end: u32 = end.trim().parse().context("invalid end serial")?;
    if end < start {
        bail!("invalid range, use 'startSerial-endSerial'");
    }
    Ok((start, end))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Serve { port, state_dir } => {
            let config = SimulatorConfig {
                port,
                server_addr: cli.server,
                state_dir,
                ..SimulatorConfig::default()
            };
            fss::simulator::serve(config).await
        }

        Commands::Generate { count, start_serial } => {
            SimulatorClient::new(&cli.endpoint)
                .generate_devices(&cli.server, count, start_serial)
                .await?;
            println!("generated {count} devices starting at {start_serial}");
            Ok(())
        }

        Commands::Update { serial, version } => {
            SimulatorClient::new(&cli.endpoint)
                .update_device(serial, version.as_deref().unwrap_or("1.0.1"))
                .await?;
            println!("updated device {serial}");
            Ok(())
        }

        Commands::BatchUpdate { range, version } => {
            let (start, end) = parse_range(&range)?;
            SimulatorClient::new(&cli.endpoint)
                .batch_update(start, end, version.as_deref().unwrap_or("1.0.1"))
                .await?;
            println!("updated devices {range}");
            Ok(())
        }

        Commands::Status { serial } => {
            let status = SimulatorClient::new(&cli.endpoint).device_status(serial).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }

        Commands::ListAll => {
            let devices = SimulatorClient::new(&cli.endpoint).device_list().await?;
            println!("{}", serde_json::to_string_pretty(&devices)?);
            Ok(())
        }

        Commands::SimulateReplay { serial } => {
            SimulatorClient::new(&cli.endpoint).replay(serial).await?;
            println!("replay attack mounted for device {serial}");
            Ok(())
        }

        Commands::SimulateBatchReplay { range } => {
            let (start, end) = parse_range(&range)?;
            SimulatorClient::new(&cli.endpoint).batch_replay(start, end).await?;
            println!("replay attacks mounted for devices {range}");
            Ok(())
        }
    }
}
