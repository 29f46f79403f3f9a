//! GoodbyeDPI-Turkey command-line interface
//!
//! Applies bypass plans and replays recorded plan discoveries through the
//! auto-apply loop.

#![warn(clippy::all)]

mod args;
mod commands;
mod logging;
mod session;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;

use args::Args;
use commands::Command;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{} {e:#}", "error:".red().bold());
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();
    let _log_guard = logging::init(&args)?;

    match args.command {
        Command::Apply(ref apply) => commands::apply::execute(apply, &args).await,
        Command::Replay(ref replay) => commands::replay::execute(replay, &args).await,
        Command::Config(ref config) => commands::config::execute(config, &args),
        Command::Completions(ref completions) => commands::completions::execute(completions),
    }
}
