//! Atelier table server executable
//!
//! Serves the storefront tables over the framed JSON protocol.

use anyhow::Context;
use atelier_core::{Config, server::TableServer, service::MemoryService};
use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{filter::EnvFilter, fmt};

#[derive(Parser)]
#[clap(version, about = "Atelier table server")]
struct Cli {
    /// Path to the TOML config file
    #[clap(short, long, default_value = "atelier.toml")]
    config: PathBuf,
    /// Override the listening port
    #[clap(short, long)]
    port: Option<u16>,
    /// JSON seed file with the initial tables
    #[clap(short, long)]
    seed: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::load_from_path(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(seed) = cli.seed {
        config.store.seed_path = Some(seed);
    }

    print_banner();
    println!("Configuration:");
    println!("  Address: {}", config.listen_addr().bright_cyan());
    println!(
        "  Max Connections: {}",
        config.server.max_connections.to_string().bright_cyan()
    );
    println!(
        "  Seed: {}",
        config
            .store
            .seed_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "none".to_string())
            .bright_cyan()
    );

    let service = match &config.store.seed_path {
        Some(path) => MemoryService::from_seed_file(path)
            .with_context(|| format!("loading seed {}", path.display()))?,
        None => MemoryService::new(),
    };

    let server = Arc::new(TableServer::new(config.server.clone(), Arc::new(service)));

    let server_for_shutdown = Arc::clone(&server);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        println!("\n{}", "Received shutdown signal".bright_yellow());
        server_for_shutdown.shutdown();
    });

    if let Err(e) = server.start().await {
        eprintln!("{} {}", "Server error:".bright_red(), e);
        return Err(e.into());
    }

    info!("atelierd stopped");
    println!("{}", "Atelier server stopped".bright_green());
    Ok(())
}

fn print_banner() {
    let banner = r#"
     _   _       _ _
    / \ | |_ ___| (_) ___ _ __
   / _ \| __/ _ \ | |/ _ \ '__|
  / ___ \ ||  __/ | |  __/ |
 /_/   \_\__\___|_|_|\___|_|
          Table Server v0.1.0
    "#;

    println!("{}", banner.bright_blue());
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => {},
                    _ = sigterm.recv() => {},
                }
            }
            _ => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
