//! ADE CLI - Command line interface for the adaptive decision engine
//!
//! `simulate` drives the engine against an in-memory store with synthetic
//! learners. The remaining commands talk to PostgreSQL.

// Clippy pedantic allows - these are intentional design choices
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::unused_async)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::float_cmp)]

use std::path::{Path, PathBuf};

use ade_engine::config::LoggingConfig;
use ade_engine::EngineConfig;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{catalog, config, learner, simulate};

/// Load environment variables from the ADE env file if not already set
fn load_env_file() {
    let env_paths = [
        "/usr/local/etc/ade/ade.env".to_string(),
        dirs::config_dir()
            .map(|p| p.join("ade/ade.env").to_string_lossy().to_string())
            .unwrap_or_default(),
    ];

    for path in &env_paths {
        if path.is_empty() {
            continue;
        }
        if Path::new(path).exists() {
            if let Ok(contents) = std::fs::read_to_string(path) {
                parse_env_file(&contents);
            }
            break;
        }
    }
}

/// Parse env file contents and set variables that are not already defined
fn parse_env_file(contents: &str) {
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let line = line.strip_prefix("export ").unwrap_or(line);

        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            let value = value.trim().trim_matches('"').trim_matches('\'');
            if std::env::var(key).is_err() {
                std::env::set_var(key, value);
            }
        }
    }
}

#[derive(Parser)]
#[command(name = "ade")]
#[command(author, version, about = "ADE - Adaptive Decision Engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to ADE_CONFIG, ./ade.toml, ~/.config/ade/ade.toml)
    #[arg(short = 'c', long = "config", global = true, env = "ADE_CONFIG")]
    config_path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run synthetic learners against an in-memory store
    Simulate(simulate::SimulateArgs),

    /// Submit one answer to the engine
    Answer(learner::AnswerArgs),

    /// Show a learner's topic state and learned Q-values
    State {
        /// Student id
        student: String,
        /// Topic id
        topic: String,
    },

    /// Apply database migrations
    Migrate,

    /// Register topics and students
    #[command(subcommand)]
    Catalog(catalog::CatalogCommands),

    /// Configuration management
    #[command(subcommand)]
    Config(config::ConfigCommands),
}

/// Install the tracing subscriber; the guard must live until exit when a log file is set
fn init_logging(logging: &LoggingConfig, verbose: bool) -> Result<Option<WorkerGuard>> {
    let log_level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            format!("ade={log_level},ade_engine={log_level},ade_rl={log_level}").into()
        })
    };

    if logging.file.is_empty() {
        tracing_subscriber::registry()
            .with(filter())
            .with(tracing_subscriber::fmt::layer())
            .init();
        return Ok(None);
    }

    let path = Path::new(&logging.file);
    let file_name = path
        .file_name()
        .with_context(|| format!("logging.file has no file name: {}", logging.file))?;
    let directory = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let appender = tracing_appender::rolling::never(directory, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(filter())
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false),
        )
        .init();
    Ok(Some(guard))
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env_file();

    let cli = Cli::parse();

    let engine_config = EngineConfig::load_from(cli.config_path.as_deref())
        .context("failed to load configuration")?;
    let _log_guard = init_logging(&engine_config.logging, cli.verbose)?;

    match cli.command {
        Commands::Simulate(args) => simulate::run(&engine_config, args).await,
        Commands::Answer(args) => learner::answer(&engine_config, args).await,
        Commands::State { student, topic } => {
            learner::show_state(&engine_config, &student, &topic).await
        }
        Commands::Migrate => learner::migrate(&engine_config).await,
        Commands::Catalog(cmd) => catalog::run(&engine_config, cmd).await,
        Commands::Config(cmd) => config::run(&engine_config, cli.config_path.as_deref(), cmd).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_env_file_keeps_existing_values() {
        std::env::set_var("ADE_TEST_EXISTING", "kept");
        parse_env_file(
            "# comment\nexport ADE_TEST_NEW=\"fresh\"\nADE_TEST_EXISTING=replaced\n",
        );
        assert_eq!(std::env::var("ADE_TEST_NEW").unwrap(), "fresh");
        assert_eq!(std::env::var("ADE_TEST_EXISTING").unwrap(), "kept");
    }

    #[test]
    fn test_simulate_args_parse() {
        let cli = Cli::try_parse_from([
            "ade", "simulate", "--students", "3", "--answers", "5", "--seed", "9",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Simulate(_)));
    }
}
