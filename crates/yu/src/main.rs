//! yu CLI
//!
//! Runs commands, moves files, builds projects and manages packages on hosts over SSH

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use color_eyre::Result;
use eyre::WrapErr;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod factory;

use commands::{App, Commands};
use config::Config;

#[derive(Parser)]
#[command(name = "yu")]
#[command(about = "Host automation over SSH", long_about = None)]
struct Cli {
    /// Config file (default: $YU_CONFIG, ./yu.toml, /etc/yu/yu.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log in as this user instead of the host entry's user
    #[arg(long, short, global = true)]
    user: Option<String>,
    /// Debug logging
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let path = cli.config.clone().or_else(Config::locate);
    let config = match &path {
        Some(path) => Config::load(path)
            .wrap_err_with(|| format!("failed to load {}", path.display()))?,
        None => Config::default(),
    };

    init_tracing(&config.general.log_level, cli.verbose);
    match &path {
        Some(path) => tracing::debug!(path = %path.display(), "loaded configuration"),
        None => tracing::warn!("no config file found, using defaults"),
    }

    App::new(config, cli.user).run(cli.command).await
}

/// `RUST_LOG` wins over the configured level; `--verbose` forces debug
fn init_tracing(log_level: &str, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
