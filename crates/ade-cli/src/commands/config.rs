//! Configuration management commands

use std::path::Path;

use ade_engine::EngineConfig;
use anyhow::{Context, Result};
use clap::Subcommand;

use super::redact_url;

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration (file plus ADE__* overrides)
    Show,
    /// Write a configuration file with every default spelled out
    Init {
        /// Target path
        #[arg(default_value = "ade.toml")]
        path: String,
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

pub async fn run(config: &EngineConfig, explicit: Option<&Path>, cmd: ConfigCommands) -> Result<()> {
    match cmd {
        ConfigCommands::Show => show(config, explicit),
        ConfigCommands::Init { path, force } => init(&path, force),
    }
}

fn show(config: &EngineConfig, explicit: Option<&Path>) -> Result<()> {
    println!("Current Configuration");
    println!("=====================\n");

    let source = explicit
        .map(Path::to_path_buf)
        .or_else(EngineConfig::find_config_file);
    match source {
        Some(path) => println!("Config file: {}\n", path.display()),
        None => println!("No configuration file found. Using defaults.\n"),
    }

    let mut shown = config.clone();
    shown.postgres.url = redact_url(&shown.postgres.url);
    println!("{}", render(&shown)?);
    Ok(())
}

fn init(path: &str, force: bool) -> Result<()> {
    if Path::new(path).exists() && !force {
        println!("Configuration file already exists: {path}");
        println!("Use --force to overwrite");
        return Ok(());
    }

    std::fs::write(path, render(&EngineConfig::default())?)
        .with_context(|| format!("failed to write {path}"))?;
    println!("Configuration written to {path}");
    Ok(())
}

fn render(config: &EngineConfig) -> Result<String> {
    toml::to_string_pretty(config).context("failed to serialize configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rendered_defaults_load_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ade.toml");
        init(path.to_str().unwrap(), false).unwrap();

        let loaded = EngineConfig::load_from(Some(path.as_path())).unwrap();
        let defaults = EngineConfig::default();
        assert_eq!(loaded.policy.learning_rate, defaults.policy.learning_rate);
        assert_eq!(loaded.mastery.first_try_base, defaults.mastery.first_try_base);
        assert_eq!(loaded.progression.min_mastery, defaults.progression.min_mastery);
        assert_eq!(loaded.cache.max_students, defaults.cache.max_students);
    }

    #[test]
    fn test_init_does_not_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ade.toml");
        std::fs::write(&path, "# keep me\n").unwrap();

        init(path.to_str().unwrap(), false).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# keep me\n");
    }
}
