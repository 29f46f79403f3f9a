//! Apply command - apply one bypass plan to a target

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use gdpi_core::{ApplyOutcome, ApplyStatus, BypassPlan, StrategyId};
use gdpi_orchestrator::CancellationToken;

use crate::args::Args as GlobalArgs;
use crate::commands::config::load_config;
use crate::session::{cancel_on_ctrl_c, CliSession, Faults};

/// Apply command arguments
#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Plan file in JSON (`-` reads stdin)
    #[arg(short, long, conflicts_with = "strategy")]
    pub plan: Option<String>,

    /// Build the plan from strategy names instead of a file
    #[arg(short, long, value_delimiter = ',')]
    pub strategy: Vec<String>,

    /// Target host the plan is applied to
    #[arg(short, long)]
    pub target: String,

    /// Apply deadline in seconds (default from config)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Skip post-apply verification
    #[arg(long)]
    pub no_verify: bool,

    /// Make the engine reject the new options
    #[arg(long)]
    pub fail_engine: bool,

    /// Make DoH changes fail
    #[arg(long)]
    pub fail_dns: bool,

    /// Print the outcome as JSON
    #[arg(long)]
    pub json: bool,
}

/// Execute the apply command
pub async fn execute(args: &ApplyArgs, global: &GlobalArgs) -> Result<()> {
    let mut config = load_config(global)?;
    if args.no_verify {
        config.verification.enabled = false;
    }

    let plan = load_plan(args)?;
    info!(target = %args.target, plan = %plan.plan_text(), "Applying plan");

    let cli = CliSession::start(
        config,
        Faults {
            engine: args.fail_engine,
            dns: args.fail_dns,
        },
    )?;

    let cancel = CancellationToken::new();
    let signal = cancel_on_ctrl_c(cancel.clone());

    let outcome = cli
        .session
        .apply_plan(plan, &args.target, args.timeout.map(Duration::from_secs), cancel)
        .await
        .context("Apply failed")?;
    signal.abort();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome).context("Failed to serialize outcome")?);
    } else {
        print_outcome(&outcome);
    }

    let queued = cli.finish().await;
    if queued > 0 {
        info!(queued, "Verification units queued");
    }

    if outcome.status == ApplyStatus::RolledBack {
        anyhow::bail!("plan was rolled back");
    }
    Ok(())
}

fn load_plan(args: &ApplyArgs) -> Result<BypassPlan> {
    if let Some(ref source) = args.plan {
        let content = if source == "-" {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read plan from stdin")?;
            buf
        } else {
            std::fs::read_to_string(Path::new(source)).with_context(|| format!("Failed to read plan file {source}"))?
        };
        return serde_json::from_str(&content).context("Invalid plan JSON");
    }

    if args.strategy.is_empty() {
        anyhow::bail!("either --plan or --strategy is required");
    }
    let plan = args
        .strategy
        .iter()
        .map(|name| StrategyId::from(name.as_str()))
        .fold(BypassPlan::new("manual").with_confidence(100), BypassPlan::with_strategy);
    Ok(plan)
}

/// Print an outcome the way a user reads it
pub fn print_outcome(outcome: &ApplyOutcome) {
    let status = match outcome.status {
        ApplyStatus::Applied => outcome.status.to_string().green().bold(),
        ApplyStatus::RolledBack => outcome.status.to_string().red().bold(),
        ApplyStatus::Skipped => outcome.status.to_string().yellow().bold(),
    };
    println!("{status} {}", outcome.message());

    if let Some(ref before) = outcome.state_before {
        println!("  {} {before}", "before:".dimmed());
    }
    if let Some(ref after) = outcome.state_after {
        println!("  {} {after}", "after: ".dimmed());
    }
    for phase in &outcome.phases {
        println!(
            "  {} {} {:?} ({}ms){}",
            "phase:".dimmed(),
            phase.phase,
            phase.status,
            phase.elapsed_ms,
            phase.detail.as_deref().map(|d| format!(" {d}")).unwrap_or_default()
        );
    }
}
