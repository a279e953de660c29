//! Device console daemon.
//!
//! Boot sequence: load the effective configuration (defaults + persisted
//! user overrides), bind the local listener and, when enabled and the
//! device has credentials, the tunnel endpoint, register the management
//! endpoints on every active surface, then serve until shutdown or a
//! management-triggered restart.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use device_console::config::ConfigStore;
use device_console::http::handlers;
use device_console::http::ManagementServer;
use device_console::lifecycle::connectivity::ConnectivityMonitor;
use device_console::lifecycle::restart::{ProcessRestart, SystemRestart};
use device_console::observability::logging;

#[derive(Parser)]
#[command(name = "device-console")]
#[command(about = "Embedded device HTTP management surface", long_about = None)]
struct Cli {
    /// Path of the persisted user configuration file.
    #[arg(short, long, default_value = "conf.json")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init();
    let cli = Cli::parse();

    let store = ConfigStore::new(&cli.config);
    let config = store.load()?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "device-console starting"
    );

    // No WiFi manager on a hosted build: the reconnect gate starts open.
    // Firmware integrations construct a ConnectivityMonitor, pass it here,
    // and feed it from their connectivity driver.
    let monitor: Option<&ConnectivityMonitor> = None;
    let restarter: Arc<dyn SystemRestart> = Arc::new(ProcessRestart);

    let Some(mut server) = ManagementServer::bind(config, store, restarter, monitor).await?
    else {
        tracing::info!("Nothing to serve, exiting");
        return Ok(());
    };

    let ctx = server.context();
    handlers::register_management_endpoints(server.registry(), ctx.config.as_ref());

    server.run().await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
