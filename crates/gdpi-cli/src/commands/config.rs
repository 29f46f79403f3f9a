//! Config command - configuration management

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use gdpi_core::config::Config;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::args::Args as GlobalArgs;

/// Config command arguments
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,

    /// Generate a configuration file with every default spelled out
    Generate {
        /// Output file path
        #[arg(short, long, default_value = "goodbyedpi.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Config file to validate
        file: PathBuf,
    },

    /// Show config and state file locations
    Paths,
}

/// Execute config command
pub fn execute(args: &ConfigArgs, global: &GlobalArgs) -> Result<()> {
    match &args.action {
        ConfigAction::Show => show_config(global),
        ConfigAction::Generate { output, force } => generate_config(output, *force),
        ConfigAction::Validate { file } => validate_config(file),
        ConfigAction::Paths => show_paths(global),
    }
}

/// Load the effective configuration
///
/// Priority: `--config` > first file found on the search path > defaults.
/// The persistence directory is then resolved from the global flags.
pub fn load_config(global: &GlobalArgs) -> Result<Config> {
    let mut config = match global.config.clone().or_else(find_config_file) {
        Some(path) => {
            debug!(path = %path.display(), "Loading configuration");
            Config::load(&path).with_context(|| format!("Failed to load config from {}", path.display()))?
        }
        None => Config::default(),
    };
    config.validate().context("Configuration validation failed")?;

    if global.no_persist {
        config.persistence.enabled = false;
    } else if let Some(ref dir) = global.state_dir {
        config.persistence.state_dir = Some(dir.clone());
    } else if config.persistence.state_dir.is_none() {
        config.persistence.state_dir = default_state_dir();
    }

    Ok(config)
}

fn show_config(global: &GlobalArgs) -> Result<()> {
    let config = load_config(global)?;
    let toml_str = config.to_toml().context("Failed to serialize config")?;
    println!("{toml_str}");
    Ok(())
}

fn generate_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", output.display());
    }

    let toml_str = Config::default().to_toml().context("Failed to serialize config")?;
    let content = format!(
        "# GoodbyeDPI-Turkey plan orchestration settings\n\
         # Every value below is the built-in default\n\n\
         {toml_str}"
    );

    std::fs::write(output, content).with_context(|| format!("Failed to write config to {}", output.display()))?;

    info!("Generated config file: {}", output.display());
    println!("Configuration file generated: {}", output.display());
    Ok(())
}

fn validate_config(file: &Path) -> Result<()> {
    let config = Config::load(file).with_context(|| format!("Failed to load config from {}", file.display()))?;
    config.validate().context("Configuration validation failed")?;

    println!("{} Configuration is valid", "✓".green());
    println!("  Auto-apply: {}", on_off(config.auto_apply.enabled));
    println!(
        "  Cooldowns: min {}s, after success {}s, general {}s",
        config.auto_apply.min_interval_secs, config.auto_apply.success_cooldown_secs, config.auto_apply.cooldown_secs
    );
    println!("  Min confidence: {}", config.auto_apply.min_confidence);
    println!("  DoH changes allowed: {}", on_off(config.dns.allow_doh_changes));
    println!("  Verification: {}", on_off(config.verification.enabled));
    Ok(())
}

fn show_paths(global: &GlobalArgs) -> Result<()> {
    println!("Configuration file search paths:");
    println!();
    println!("  1. ./goodbyedpi.toml");
    println!("  2. ./config.toml");
    if let Some(dirs) = project_dirs() {
        println!("  3. {}", dirs.config_dir().join("config.toml").display());
    }

    println!();
    println!("State directory:");
    println!();
    let state_dir = if global.no_persist {
        None
    } else {
        global.state_dir.clone().or_else(default_state_dir)
    };
    match state_dir {
        Some(dir) => println!("  {}", dir.display()),
        None => println!("  (persistence disabled)"),
    }

    Ok(())
}

fn on_off(value: bool) -> colored::ColoredString {
    if value {
        "on".green()
    } else {
        "off".yellow()
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "goodbyedpi")
}

fn default_state_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().to_path_buf())
}

fn find_config_file() -> Option<PathBuf> {
    let candidates = [PathBuf::from("goodbyedpi.toml"), PathBuf::from("config.toml")];
    if let Some(path) = candidates.into_iter().find(|p| p.exists()) {
        return Some(path);
    }

    project_dirs()
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .filter(|path| path.exists())
}
