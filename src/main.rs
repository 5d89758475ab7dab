//! multikv - An In-Memory, Multi-Database Key-Value Server
//!
//! This is the main entry point for the multikv server.
//! It parses the configuration, sets up logging, binds the listener and
//! serves until Ctrl+C.

use clap::Parser;
use multikv::config::{Config, Network};
use multikv::server::Server;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn print_banner(config: &Config) {
    let transport = match config.network {
        Network::Tcp => "tcp",
        Network::Unix => "unix",
    };

    println!(
        r#"
multikv v{} - In-Memory Multi-Database Key-Value Server
──────────────────────────────────────────────────────────────
Listening on {} ({})
Databases 0..={}

Use Ctrl+C to shutdown gracefully.
"#,
        multikv::VERSION,
        config.address,
        transport,
        config.db_num
    );
}

/// Resolves when Ctrl+C is received.
async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, stopping server...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = Config::parse();

    // Set up logging; RUST_LOG wins over --log-level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let listener = Server::bind(&config).await?;
    let server = Server::from_config(&config);
    info!(
        databases = server.sessions().registry().len(),
        "Databases initialized"
    );

    print_banner(&config);

    server.run(listener, shutdown_signal()).await?;

    info!("Server shutdown complete");
    Ok(())
}
