//! call-relay - phone system webhook relay
//!
//! Receives call and SMS webhooks from the phone provider and records them
//! in the case-management system, correlating the separate deliveries that
//! describe one call.

mod api;
mod config;
mod correlation;
mod events;
mod models;
mod server;
#[cfg(test)]
mod testing;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Config;

#[derive(Parser)]
#[command(name = "call-relay")]
#[command(about = "Relay phone system webhooks into the case-management API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the webhook server
    Serve {
        /// Address to bind (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Write a default config file
    Init {
        /// Overwrite an existing config file
        #[arg(short, long)]
        force: bool,
    },

    /// Show the effective configuration (secrets masked)
    Config,

    /// Classify a webhook body saved to a file and print the normalized event
    Classify {
        /// Path to a JSON webhook body
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Serve { host, port } => {
            let mut config = Config::load(config_path)?;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            server::run(config).await?;
        }
        Commands::Init { force } => {
            let path = Config::resolve_path(config_path)?;
            if path.exists() && !force {
                bail!(
                    "Config file {} already exists. Use --force to overwrite.",
                    path.display()
                );
            }
            let path = Config::default().save(Some(&path))?;
            println!("Wrote default config to {}", path.display());
        }
        Commands::Config => {
            let path = Config::resolve_path(config_path)?;
            let config = Config::load(config_path)?;
            let shown = toml::to_string_pretty(&config.redacted())
                .context("Failed to serialize config")?;

            println!("# {}", path.display());
            println!("{}", shown);
            if let Err(e) = config.validate() {
                println!("# Not ready to serve: {:#}", e);
            }
        }
        Commands::Classify { file } => {
            let body = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            match events::normalize(&body) {
                Ok(event) => {
                    println!("Kind: {}", event.kind());
                    if let Some(key) = event.correlation_key() {
                        println!("Key:  {}", key);
                    }
                    println!("{:#?}", event);
                }
                Err(e) => println!("Not relayed: {}", e),
            }
        }
    }

    Ok(())
}
