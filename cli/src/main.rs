//! bif CLI - binary entry point.
//!
//! Loads `~/.bif/config.toml`, builds an [`Agent`] for the project directory
//! (first argument, or the current directory) and runs a line-oriented REPL:
//!
//! ```text
//! main() -> Agent::from_config() -> Repl::run()
//!                                     |  stdin lines -> messages / slash commands
//!                                     |  UiEvent     -> streamed text, log entries
//!                                     |  gate        -> approval prompts
//! ```

mod commands;
mod render;
mod repl;

use anyhow::{Context, Result};
use std::{
    env,
    fs::{self, File, OpenOptions},
    path::PathBuf,
    sync::{Arc, Mutex},
};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use bif_engine::{Agent, BifConfig, ContextCollector, RecentFiles};

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::try_new("warn").expect("warn filter is valid"));

    let (log_file, init_warnings) = open_bif_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // No log file: stay silent rather than interleave logs with the REPL.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_bif_log_file() -> (Option<(PathBuf, File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in bif_log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn bif_log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.bif/logs/bif.log
    if let Some(config_path) = BifConfig::path()
        && let Some(config_dir) = config_path.parent()
    {
        candidates.push(config_dir.join("logs").join("bif.log"));
    }

    // Fallback: ./.bif/logs/bif.log
    candidates.push(PathBuf::from(".bif").join("logs").join("bif.log"));

    candidates
}

fn project_root() -> Result<PathBuf> {
    match env::args_os().nth(1) {
        Some(arg) => Ok(PathBuf::from(arg)),
        None => env::current_dir().context("failed to determine the current directory"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = BifConfig::load()?.unwrap_or_default();
    let root = project_root()?;
    let recent = Arc::new(RecentFiles::new());
    let agent = Agent::from_config(&config, &root)
        .context("failed to configure the agent")?
        .with_collector(Arc::clone(&recent) as Arc<dyn ContextCollector>);

    repl::Repl::new(agent, recent).run().await
}
