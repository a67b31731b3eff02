//! # Provisioning Service
//!
//! HTTP API and command-line tool for the device lifecycle.
//!
//! ## Running
//!
//! ```bash
//! export PROVISIONING_SERVICE_CONNECTION="HostName=...;SharedAccessKeyName=...;SharedAccessKey=..."
//! export PROVISIONING_ID_SCOPE=0ne000ABCDE
//! export HUB_CA_CERT=/etc/provisioning/hub-ca.pem
//!
//! # Serve the HTTP API
//! provisioning-service serve
//!
//! # Or drive one device directly
//! provisioning-service enroll dev-1 --password pw1
//! provisioning-service register dev-1 --password pw1
//! provisioning-service send dev-1 "hello"
//! provisioning-service status dev-1
//! provisioning-service purge dev-1
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use device_provisioning::Provisioner;
use provisioning_service::{api, AppState};
use shared::config::ServiceConfig;

#[derive(Parser)]
#[command(name = "provisioning-service")]
#[command(about = "Device enrollment, registration and messaging", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Credential directory (overrides PROVISIONING_CREDENTIAL_DIR)
    #[arg(long, global = true)]
    credential_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: Level,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API
    Serve {
        /// Port to listen on (overrides PROVISIONING_API_PORT)
        #[arg(long, short = 'p')]
        port: Option<u16>,
    },

    /// Generate an identity for a device and enroll it
    Enroll {
        device_id: String,

        /// Password protecting the private identity
        #[arg(long)]
        password: String,
    },

    /// Register an enrolled device
    Register {
        device_id: String,

        #[arg(long)]
        password: String,
    },

    /// Send one message from a registered device
    Send {
        device_id: String,

        /// Message contents
        message: String,
    },

    /// Show the lifecycle state of a device
    Status { device_id: String },

    /// Delete every stored credential of a device
    Purge { device_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(cli.log_level)
        .with_target(true)
        .init();

    // Load configuration
    let mut config = ServiceConfig::from_env()?;
    if let Some(dir) = cli.credential_dir {
        config.storage.credential_dir = dir;
    }
    if let Commands::Serve { port: Some(port) } = cli.command {
        config.api.port = port;
    }
    config.validate()?;

    info!(
        credential_dir = ?config.storage.credential_dir,
        global_endpoint = %config.authority.global_endpoint,
        "Configuration loaded"
    );

    let provisioner = Provisioner::from_config(&config).await?;

    match cli.command {
        Commands::Serve { .. } => serve(config, provisioner).await?,
        Commands::Enroll { device_id, password } => {
            let record = provisioner.enroll(&device_id, &password).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::Register { device_id, password } => {
            let record = provisioner.register(&device_id, &password).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::Send { device_id, message } => {
            let receipt = provisioner.send_message(&device_id, message.as_bytes()).await?;
            println!("{}", serde_json::to_string_pretty(&receipt)?);
        }
        Commands::Status { device_id } => {
            let state = provisioner.state(&device_id).await?;
            println!("{}: {}", device_id, state);
        }
        Commands::Purge { device_id } => {
            provisioner.purge(&device_id).await?;
            println!("{}: purged", device_id);
        }
    }

    Ok(())
}

async fn serve(config: ServiceConfig, provisioner: Provisioner) -> Result<()> {
    let bind_addr = config.api.bind_addr();
    let state = Arc::new(AppState { config, provisioner });
    let app = api::create_router(state);

    info!(address = %bind_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Server running at http://{}", bind_addr);
    info!("  GET  /api/enrollment - Registration endpoint and ID scope");
    info!("  POST /api/enrollment - Enroll a device");
    info!("  POST /api/registration - Register a device");
    info!("  POST /api/message - Send a message");

    axum::serve(listener, app).await?;

    Ok(())
}
