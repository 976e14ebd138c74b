use std::fs::OpenOptions;
use std::process::ExitCode;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use droid_config::{load_config, Config};
use droid_platform::logging::level_directive;
use droid_platform::{DefaultPaths, LogFileSettings, PlatformPaths};

mod cli;
mod commands;

use cli::Cli;

/// Install the subscriber. `RUST_LOG` wins over the configured level.
fn init_logging(config: &Config, paths: &DefaultPaths, to_stderr: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_directive(config.log.level.as_str())));

    if to_stderr {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        return Ok(());
    }

    let dir = config.log.dir.clone().unwrap_or_else(|| paths.log_dir());
    let path = LogFileSettings::in_dir(dir)
        .prepare()
        .context("failed to prepare log directory")?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

fn load(cli: &Cli, paths: &DefaultPaths) -> Result<Config> {
    let config_dir = cli.config.clone().unwrap_or_else(|| paths.config_dir());
    let project_dir = std::env::current_dir().ok();
    load_config(&config_dir, project_dir.as_deref())
        .with_context(|| format!("failed to load config from {}", config_dir.display()))
}

async fn run(cli: Cli) -> Result<()> {
    let paths = DefaultPaths::new().context("failed to detect platform paths")?;
    let mut config = load(&cli, &paths)?;
    init_logging(&config, &paths, cli.log_stderr)?;

    if let Some(serial) = cli.serial.clone() {
        config.adb.serial = Some(serial);
    }
    let paths = paths.with_cache_root(config.cache.root.clone());

    tracing::info!(command = ?cli.command, "droidbridge starting");
    commands::execute(cli.command, config, paths).await
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "command failed");
            eprintln!("droidbridge: {e:#}");
            ExitCode::FAILURE
        }
    }
}
