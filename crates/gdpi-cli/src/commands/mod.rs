//! CLI commands

pub mod apply;
pub mod completions;
pub mod config;
pub mod replay;

use clap::Subcommand;

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Apply a bypass plan to a target (main command)
    Apply(apply::ApplyArgs),

    /// Feed recorded plan discoveries through the auto-apply loop
    Replay(replay::ReplayArgs),

    /// Configuration management
    Config(config::ConfigArgs),

    /// Generate shell completions
    Completions(completions::CompletionsArgs),
}
