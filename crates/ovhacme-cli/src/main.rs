//! ovhacme - DNS-01 certificates for domains hosted at OVH

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ovhacme_cli::commands::{self, IssueOptions};
use ovhacme_cli::config::{AppConfig, DEFAULT_CONFIG_FILE};

/// Obtain Let's Encrypt certificates by answering DNS-01 challenges through the OVH API
#[derive(Parser, Debug)]
#[command(name = "ovhacme")]
#[command(about = "Issue ACME certificates through OVH DNS", long_about = None)]
#[command(version = env!("GIT_TAG"))]
#[command(long_version = concat!(env!("GIT_TAG"), "\nCommit: ", env!("GIT_HASH"), "\nBuilt: ", env!("BUILD_TIME")))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file
    #[arg(short, long, env = "OVHACME_CONFIG", default_value = DEFAULT_CONFIG_FILE, global = true)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Issue a certificate for the configured domains
    Issue {
        /// Use the Let's Encrypt staging directory
        #[arg(long)]
        staging: bool,
        /// Domain to include (repeatable); replaces the configured list
        #[arg(short, long = "domain")]
        domains: Vec<String>,
        /// Directory to write the certificate and key to
        #[arg(short, long)]
        out_dir: Option<PathBuf>,
        /// Skip the public DNS probe after the propagation wait
        #[arg(long)]
        no_probe: bool,
    },
    /// Remove leftover _acme-challenge records for the configured domains
    Cleanup,
    /// Write a config file template
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // instant-acme and reqwest both go through rustls
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        anyhow::bail!("Failed to install rustls crypto provider");
    }

    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    run(cli).await
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Issue {
            staging,
            domains,
            out_dir,
            no_probe,
        } => {
            let config = AppConfig::load(&cli.config)?;
            let options = IssueOptions {
                staging,
                domains,
                out_dir,
                no_probe,
            };

            let artifacts = commands::issue(config, &options).await?;
            println!("Certificate: {}", artifacts.certificate_path.display());
            println!("Private key: {}", artifacts.private_key_path.display());
        }
        Commands::Cleanup => {
            let config = AppConfig::load(&cli.config)?;
            let removed = commands::cleanup(&config).await?;
            info!(removed, "Cleanup finished");
            println!("Removed {} challenge record(s)", removed);
        }
        Commands::Init { force } => {
            commands::init(&cli.config, force)?;
            println!("Wrote {}", cli.config.display());
            println!("Fill in your OVH credentials, then run: ovhacme issue --staging");
        }
    }

    Ok(())
}

fn init_logging(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))
        .context("Failed to initialize logging filter")?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}
