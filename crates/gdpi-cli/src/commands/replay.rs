//! Replay command - drive the auto-apply loop from recorded discoveries
//!
//! Input is JSON lines, one event per line:
//!
//! ```text
//! {"host": "cdn.example.com", "plan": {"plan_confidence": 90, "strategies": [{"id": "TlsFragment"}]}}
//! {"host": "cdn.example.com", "ip": "203.0.113.7"}
//! {"wait_ms": 6000}
//! ```

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Deserialize;
use std::io::{BufRead, BufReader};
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, info};

use gdpi_core::BypassPlan;
use gdpi_orchestrator::{AutoApplyDecision, CancellationToken};

use crate::args::Args as GlobalArgs;
use crate::commands::apply::print_outcome;
use crate::commands::config::load_config;
use crate::session::{cancel_on_ctrl_c, CliSession, Faults};

/// Replay command arguments
#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Event file in JSON lines (`-` reads stdin)
    pub events: String,

    /// Keep auto-apply as configured instead of switching it on
    #[arg(long)]
    pub respect_config: bool,

    /// After the replay, apply the best known plan for this domain
    #[arg(long)]
    pub apply_domain: Option<String>,

    /// Skip post-apply verification
    #[arg(long)]
    pub no_verify: bool,
}

/// One recorded event
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ReplayEvent {
    /// The diagnosis engine produced a plan
    Plan { host: String, plan: BypassPlan },
    /// Traffic to `host` was seen going to `ip`
    Observed { host: String, ip: IpAddr },
    /// Pause between events
    Wait { wait_ms: u64 },
}

/// Execute the replay command
pub async fn execute(args: &ReplayArgs, global: &GlobalArgs) -> Result<()> {
    let mut config = load_config(global)?;
    if args.no_verify {
        config.verification.enabled = false;
    }
    if !args.respect_config {
        config.auto_apply.enabled = true;
    }

    let events = read_events(&args.events)?;
    info!(count = events.len(), "Loaded replay events");

    let cli = CliSession::start(config, Faults::default())?;
    let cancel = CancellationToken::new();
    let signal = cancel_on_ctrl_c(cancel.clone());

    let (mut dispatched, mut skipped) = (0usize, 0usize);
    for (line, event) in events {
        if cancel.is_cancelled() {
            break;
        }
        match event {
            ReplayEvent::Plan { host, plan } => match cli.session.on_plan_discovered(&host, plan) {
                AutoApplyDecision::Dispatched { target, signature } => {
                    dispatched += 1;
                    println!("{} {target} [{signature}] (line {line})", "dispatch".green());
                }
                AutoApplyDecision::Skipped(reason) => {
                    skipped += 1;
                    println!("{} {host}: {reason} (line {line})", "skip".yellow());
                }
            },
            ReplayEvent::Observed { host, ip } => {
                debug!(%host, %ip, "Observed address");
                cli.session.record_observed_address(&host, ip);
            }
            ReplayEvent::Wait { wait_ms } => {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(Duration::from_millis(wait_ms)) => {}
                }
            }
        }
    }
    cli.session.wait_idle().await;

    if let Some(ref domain) = args.apply_domain {
        let outcome = cli
            .session
            .apply_plan_for_domain(domain, cancel.clone())
            .await
            .context("Apply for domain failed")?;
        print_outcome(&outcome);
    }

    println!();
    println!("{}", "Summary".bold());
    println!("  dispatched: {dispatched}, skipped: {skipped}");
    for outcome in cli.session.history() {
        println!("  {:<12} {}", outcome.status.to_string(), outcome.message());
    }
    let promoted = cli.session.promoted_suffixes();
    if !promoted.is_empty() {
        println!("  promoted suffixes: {}", promoted.join(", "));
    }
    for group in cli.session.group_catalog().learned_groups {
        println!("  learned group {}: {}", group.display_name, group.domains.join(", "));
    }
    println!("  live state: {}", cli.session.current_state().summary());

    signal.abort();
    cli.finish().await;
    Ok(())
}

fn read_events(source: &str) -> Result<Vec<(usize, ReplayEvent)>> {
    let reader: Box<dyn BufRead> = if source == "-" {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        let file = std::fs::File::open(source).with_context(|| format!("Failed to open event file {source}"))?;
        Box::new(BufReader::new(file))
    };

    let mut events = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.context("Failed to read event file")?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let event = serde_json::from_str(trimmed).with_context(|| format!("Invalid event on line {}", index + 1))?;
        events.push((index + 1, event));
    }
    Ok(events)
}
