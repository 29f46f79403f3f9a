//! Command-line arguments

use clap::{ArgAction, Parser, ValueEnum};
use std::path::PathBuf;

use crate::commands::Command;

/// GoodbyeDPI-Turkey bypass plan tool
#[derive(Parser, Debug)]
#[command(name = "goodbyedpi", version, about, long_about = None)]
pub struct Args {
    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only print errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<String>,

    /// Configuration file
    #[arg(short, long, global = true, env = "GOODBYEDPI_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory for persisted state (presets, learned groups)
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    /// Do not read or write persisted state
    #[arg(long, global = true, conflicts_with = "state_dir")]
    pub no_persist: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text
    Text,
    /// JSON lines
    Json,
    /// Compact single-line text
    Compact,
}
