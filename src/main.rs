/// Virtual structure service
///
/// Main entry point. Loads configuration from the environment and starts the
/// HTTP server.

use virtual_structure::{config::Config, server::start_server};

/// Application entry point
///
/// The server provides:
/// - Structure administration at /api/structure/*
/// - Virtual structure adapter browsing at /adapters/virtual_structure/*
/// - Wiring resolution at /api/wirings/*
/// - Health check at /healthz
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration (defaults to 0.0.0.0:8090 and data/structure.db)
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
