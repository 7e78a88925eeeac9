//! Hive - presence-aware message relay for autonomous agents
//!
//! Main entry point for the `hive` CLI.

use anyhow::Context;
use clap::{Parser, Subcommand};
use hive_relay::config::{validate_config, RelayConfig};
use hive_relay::identity::generate_name;
use hive_relay::relay::Scheduler;
use hive_relay::transport::{default_session_id, run_stdio, RelayServer, ToolServer};
use hive_relay::Relay;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

/// Hive - message relay for autonomous agents
#[derive(Parser, Debug)]
#[command(name = "hive")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP API and background maintenance
    Serve {
        /// Path to config file (default: ~/.config/hive/config.yaml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Listen address (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Listen port (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Serve the JSON-RPC tool interface on stdin/stdout
    Tools {
        /// Path to config file (default: ~/.config/hive/config.yaml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Session id (default: hostname and process id)
        #[arg(short, long, env = "HIVE_SESSION_ID")]
        session: Option<String>,
    },

    /// Print generated agent names
    Name {
        /// How many names to print
        #[arg(short = 'n', long, default_value = "1")]
        count: usize,
    },

    /// Load and validate configuration, then print it
    CheckConfig {
        /// Path to config file (default: ~/.config/hive/config.yaml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Serve { config, host, port } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            init_logging(&config);
            serve(config).await
        }
        Commands::Tools { config, session } => {
            let config = load_config(config.as_deref())?;
            init_logging(&config);
            tools(config, session.unwrap_or_else(default_session_id)).await
        }
        Commands::Name { count } => {
            for _ in 0..count {
                println!("{}", generate_name());
            }
            Ok(())
        }
        Commands::CheckConfig { config } => check_config(config.as_deref()),
    }
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<RelayConfig> {
    RelayConfig::resolve(path).context("Failed to load configuration")
}

fn init_logging(config: &RelayConfig) {
    if let Err(e) = hive_relay::logging::init(&config.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
    }
}

async fn serve(config: RelayConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let relay = Arc::new(
        Relay::builder(config)
            .build()
            .context("Failed to start relay")?,
    );

    let scheduler = Scheduler::new(relay.clone()).start();
    let result = RelayServer::new(relay)
        .run_until(&addr, shutdown_signal())
        .await
        .context("HTTP server failed");

    scheduler.stop().await?;
    tracing::info!("Relay stopped");
    result
}

async fn tools(config: RelayConfig, session_id: String) -> anyhow::Result<()> {
    let relay = Arc::new(
        Relay::builder(config)
            .build()
            .context("Failed to start relay")?,
    );

    let scheduler = Scheduler::new(relay.clone()).start();
    let server = ToolServer::new(relay, session_id);

    let result = tokio::select! {
        served = run_stdio(&server) => served.context("Tool server failed"),
        _ = shutdown_signal() => Ok(()),
    };

    scheduler.stop().await?;
    result
}

fn check_config(path: Option<&std::path::Path>) -> anyhow::Result<()> {
    let config = load_config(path)?;

    if let Err(errors) = validate_config(&config) {
        for error in &errors {
            eprintln!("  - {}", error);
        }
        anyhow::bail!("{} configuration error(s)", errors.len());
    }

    print!("{}", config.to_yaml()?);
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to set up SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
