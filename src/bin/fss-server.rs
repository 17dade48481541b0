//! fss-server: firmware distribution server and admin CLI.
//!
//! `serve` runs the daemon; every other subcommand is an admin operation
//! executed against a running server over its HTTP API.
//!
//! ```bash
//! # Run the server with room for 10 registrations
//! fss-server serve --port 9000 --allowance 10
//!
//! # Administer it from another shell
//! fss-server increase-allowance 5
//! fss-server block 0000000003
//! fss-server list-devices
//! fss-server show-incidents
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use clap::Subcommand;
use tracing_subscriber::EnvFilter;

use fss::client::AdminClient;
use fss::config::ServerConfig;

/// Command-line interface for the firmware distribution server.
#[derive(Parser)]
#[command(name = "fss-server")]
#[command(version)]
#[command(about = "Secure firmware distribution server")]
#[command(arg_required_else_help = true)]
struct Cli {
    /// Server address for admin subcommands.
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
    /// Run the server.
    Serve {
        /// Port to listen on.
        #[arg(long, default_value_t = 9000)]
        port: u16,

        /// Initial device registration allowance.
        #[arg(long, default_value_t = 1)]
        allowance: i64,

        /// Path to the server's ECDH private key (generated if absent).
        #[arg(long, default_value = "server_key.pem")]
        private_key: PathBuf,

        /// TLS certificate path (packaging concern, accepted and passed
        /// through).
        #[arg(long)]
        cert: Option<PathBuf>,

        /// Durable device registry document.
        #[arg(long, default_value = "registry.json")]
        registry: PathBuf,

        /// Durable audit log document.
        #[arg(long, default_value = "audit.json")]
        audit: PathBuf,
    },

    /// Raise the registration allowance on a running server.
    IncreaseAllowance {
        /// How many registrations to add.
        amount: i64,
    },

    /// Block a device.
    Block {
        /// 10-digit serial number.
        serial_number: String,
    },

    /// Re-authorize a device.
    Authorize {
        /// 10-digit serial number.
        serial_number: String,
    },

    /// List all registered devices.
    ListDevices,

    /// Show security incident logs.
    ShowIncidents,

    /// Show firmware update logs.
    ShowUpdates,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).compact().init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Serve {
            port,
            allowance,
            private_key,
            cert,
            registry,
            audit,
        } => {
            let mut config = ServerConfig {
                port,
                allowance,
                private_key_path: private_key,
                cert_path: cert,
                registry_path: registry,
                audit_path: audit,
                ..ServerConfig::default()
            };
            config.apply_env_overrides();
            fss::server::serve(config).await
        }

        Commands::IncreaseAllowance { amount } => {
            let allowance = AdminClient::new(&cli.server).increase_allowance(amount).await?;
            println!("allowance: {allowance}");
            Ok(())
        }

        Commands::Block { serial_number } => {
            AdminClient::new(&cli.server).block_device(&serial_number).await?;
            println!("blocked device {serial_number}");
            Ok(())
        }

        Commands::Authorize { serial_number } => {
            AdminClient::new(&cli.server).authorize_device(&serial_number).await?;
            println!("authorized device {serial_number}");
            Ok(())
        }

        Commands::ListDevices => {
            let devices = AdminClient::new(&cli.server).device_list().await?;
            println!("{}", serde_json::to_string_pretty(&devices)?);
            Ok(())
        }

        Commands::ShowIncidents => show_logs(&cli.server, "incidents").await,
        Commands::ShowUpdates => show_logs(&cli.server, "updates").await,
    }
}

async fn show_logs(server: &str, category: &str) -> Result<()> {
    let logs = AdminClient::new(server).audit_logs(category).await?;
    println!("{}", serde_json::to_string_pretty(&logs)?);
    Ok(())
}
