//! Fractal CLI - run the on-device training client and manage its settings.
//!
//! This CLI provides a `fractal` command that runs the resource-gated
//! training loop against a coordinator and edits the admission policy it
//! runs under.

mod commands;
mod config;

use clap::{Parser, Subcommand};
use commands::settings::SettingsCommand;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Fractal - resource-gated, resumable on-device training
///
/// Fetches training tasks from a coordinator, trains them only while the
/// device permits, checkpoints every epoch and uploads the trained weights.
#[derive(Parser, Debug)]
#[command(name = "fractal", author, version, about = "Fractal - resource-gated on-device training")]
struct Args {
    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Configuration file (defaults to ./fractal.toml, then ~/.fractal/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the training client until interrupted
    ///
    /// Ctrl-C cancels the run. On Unix, SIGUSR1 toggles pause.
    Run,

    /// Show or change the admission policy
    #[command(subcommand)]
    Settings(SettingsCommand),

    /// List resumable checkpoints
    Checkpoints {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let (client_config, source) = config::discover(args.config.as_deref())?;

    let level = args.log_level.or_else(|| client_config.log_level.clone()).unwrap_or_else(|| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match &source {
        Some(path) => tracing::debug!(path = %path.display(), "configuration loaded"),
        None => tracing::debug!("no configuration file found, using defaults"),
    }

    match args.command {
        Command::Run => commands::run::execute(client_config).await?,
        Command::Settings(cmd) => commands::settings::execute(cmd, &client_config)?,
        Command::Checkpoints { json } => commands::checkpoints::execute(&client_config, json)?,
    }

    Ok(())
}
