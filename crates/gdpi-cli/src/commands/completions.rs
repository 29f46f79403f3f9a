//! Shell completions generator

use anyhow::{Context, Result};
use clap::{Args, CommandFactory};
use clap_complete::{generate, generate_to, Shell};
use std::path::PathBuf;

use crate::args::Args as CliArgs;

const BIN_NAME: &str = "goodbyedpi";

/// Completions command arguments
#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,

    /// Write the script into this directory instead of stdout
    #[arg(short, long)]
    pub out_dir: Option<PathBuf>,
}

/// Execute completions command
pub fn execute(args: &CompletionsArgs) -> Result<()> {
    let mut cmd = CliArgs::command();

    match &args.out_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
            let path = generate_to(args.shell, &mut cmd, BIN_NAME, dir)
                .with_context(|| format!("Failed to write completions to {}", dir.display()))?;
            println!("Completions written to {}", path.display());
        }
        None => generate(args.shell, &mut cmd, BIN_NAME, &mut std::io::stdout()),
    }

    Ok(())
}
