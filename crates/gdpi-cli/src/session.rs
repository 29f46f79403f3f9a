//! Session wiring shared by the apply and replay commands
//!
//! The CLI has no packet driver of its own, so it runs the orchestrator
//! against the in-memory engine and DNS controller, seeded from whatever
//! the last session persisted.

use anyhow::{Context, Result};
use colored::Colorize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use gdpi_core::persist::StateStore;
use gdpi_core::{BypassOptions, Config};
use gdpi_orchestrator::{CancellationToken, Orchestrator, SessionEvent};
use gdpi_platform::{ChannelRetestSink, HostDiscovered, InMemoryDns, InMemoryPacketEngine, TcpConnectProbe};

const PROBE_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const PRINTER_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Failure injection for dry runs
#[derive(Debug, Clone, Copy, Default)]
pub struct Faults {
    /// Fail the next engine apply
    pub engine: bool,
    /// Fail DoH changes
    pub dns: bool,
}

/// A running session and its retest printer
pub struct CliSession {
    pub session: Orchestrator,
    printer: JoinHandle<usize>,
}

impl CliSession {
    /// Wire up a session for `config`
    pub fn start(config: Config, faults: Faults) -> Result<Self> {
        let store = match &config.persistence.state_dir {
            Some(dir) if config.persistence.enabled => StateStore::new(dir.clone()),
            _ => StateStore::disabled(),
        };

        let mut options = BypassOptions::default();
        store.load_settings().apply_to(&mut options);
        debug!(options = %options.summary(), "Seeded engine options");

        let engine = Arc::new(InMemoryPacketEngine::new(options));
        if faults.engine {
            engine.fail_next(1);
        }
        let dns = Arc::new(InMemoryDns::default());
        if faults.dns {
            dns.set_fail_apply(true);
        }

        let (sink, rx) = ChannelRetestSink::channel();
        let printer = tokio::spawn(print_retests(rx));

        let mut builder = Orchestrator::builder(config.clone(), engine, dns, Arc::new(sink))
            .state_store(store)
            .notifier(Arc::new(log_event));
        if config.auto_apply.outcome_probe {
            builder = builder.outcome_probe(Arc::new(TcpConnectProbe::new(
                config.verification.port,
                PROBE_CONNECT_TIMEOUT,
            )));
        }
        let session = builder.build().context("Failed to start session")?;

        Ok(Self { session, printer })
    }

    /// Wait for background work, then shut down and flush output
    pub async fn finish(self) -> usize {
        self.session.wait_idle().await;
        self.session.shutdown().await;

        let Self { session, printer, .. } = self;
        drop(session);
        match tokio::time::timeout(PRINTER_DRAIN_TIMEOUT, printer).await {
            Ok(Ok(count)) => count,
            _ => 0,
        }
    }
}

/// Cancel `token` on Ctrl+C; abort the handle when done
pub fn cancel_on_ctrl_c(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received interrupt signal, cancelling...");
            token.cancel();
        }
    })
}

async fn print_retests(mut rx: mpsc::UnboundedReceiver<HostDiscovered>) -> usize {
    let mut count = 0;
    while let Some(unit) = rx.recv().await {
        count += 1;
        match unit.sni {
            Some(ref sni) => println!("  {} {} ({sni})", "retest".cyan(), unit.key),
            None => println!("  {} {}", "retest".cyan(), unit.key),
        }
    }
    count
}

fn log_event(event: SessionEvent) {
    match event {
        SessionEvent::SuffixPromoted(suffix) => debug!("[GROUPS] promoted {suffix}"),
        SessionEvent::GroupLearned(group) => debug!("[GROUPS] learned {}", group.key),
        SessionEvent::OptionsChanged(state) => debug!("state: {}", state.summary()),
        other => debug!(event = ?other, "session event"),
    }
}
