//! In-memory collaborators
//!
//! Used by the CLI simulation and by tests. Each one can be told to fail or
//! to take time, and records what it was asked to do.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use gdpi_core::{BypassOptions, DnsState};

use crate::traits::{DnsController, HostDiscovered, HostResolver, OutcomeProbe, PacketEngine, ProbeResult, RetestSink};
use crate::{PlatformError, Result};

/// Packet engine that keeps options in memory
#[derive(Debug, Default)]
pub struct InMemoryPacketEngine {
    options: RwLock<BypassOptions>,
    applied: Mutex<Vec<BypassOptions>>,
    delay: Mutex<Duration>,
    fail_next: AtomicU32,
    fail_always: AtomicBool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl InMemoryPacketEngine {
    /// Engine starting with the given options
    pub fn new(options: BypassOptions) -> Self {
        Self {
            options: RwLock::new(options),
            ..Default::default()
        }
    }

    /// Make every apply take `delay`
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Fail the next `count` applies
    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Fail every apply until switched off
    pub fn set_fail_always(&self, fail: bool) {
        self.fail_always.store(fail, Ordering::SeqCst);
    }

    /// Every successful apply, in order
    pub fn applied(&self) -> Vec<BypassOptions> {
        self.applied.lock().clone()
    }

    /// Highest number of applies observed running at once
    pub fn max_concurrent_applies(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn should_fail(&self) -> bool {
        if self.fail_always.load(Ordering::SeqCst) {
            return true;
        }
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl PacketEngine for InMemoryPacketEngine {
    fn options_snapshot(&self) -> BypassOptions {
        self.options.read().clone()
    }

    async fn apply_options(&self, options: &BypassOptions) -> Result<()> {
        let _in_flight = InFlight::enter(&self.in_flight, &self.max_in_flight);

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.should_fail() {
            return Err(PlatformError::EngineApply("injected failure".to_string()));
        }
        *self.options.write() = options.clone();
        self.applied.lock().push(options.clone());
        debug!(options = %options, "Engine options replaced");
        Ok(())
    }
}

/// Counts an apply as running until dropped, including when the caller
/// abandons the future mid-way.
struct InFlight<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, max: &AtomicUsize) -> Self {
        let running = counter.fetch_add(1, Ordering::SeqCst) + 1;
        max.fetch_max(running, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// DNS toggler that keeps state in memory
#[derive(Debug, Default)]
pub struct InMemoryDns {
    state: RwLock<DnsState>,
    delay: Mutex<Duration>,
    fail_apply: AtomicBool,
    fail_restore: AtomicBool,
}

impl InMemoryDns {
    /// Toggler starting in the given state
    pub fn new(state: DnsState) -> Self {
        Self {
            state: RwLock::new(state),
            ..Default::default()
        }
    }

    /// Make every change take `delay`
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Fail `apply_doh`
    pub fn set_fail_apply(&self, fail: bool) {
        self.fail_apply.store(fail, Ordering::SeqCst);
    }

    /// Fail `restore_dns`
    pub fn set_fail_restore(&self, fail: bool) {
        self.fail_restore.store(fail, Ordering::SeqCst);
    }

    async fn pause(&self) {
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl DnsController for InMemoryDns {
    fn dns_state(&self) -> DnsState {
        self.state.read().clone()
    }

    async fn apply_doh(&self, dns_preset: &str) -> Result<()> {
        self.pause().await;
        if self.fail_apply.load(Ordering::SeqCst) {
            return Err(PlatformError::DnsChange("injected DoH failure".to_string()));
        }
        let mut state = self.state.write();
        state.doh_enabled = true;
        state.dns_preset = dns_preset.to_string();
        Ok(())
    }

    async fn restore_dns(&self) -> Result<()> {
        self.pause().await;
        if self.fail_restore.load(Ordering::SeqCst) {
            return Err(PlatformError::DnsChange("injected restore failure".to_string()));
        }
        self.state.write().doh_enabled = false;
        Ok(())
    }
}

/// Re-test sink backed by an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelRetestSink {
    tx: mpsc::UnboundedSender<HostDiscovered>,
}

impl ChannelRetestSink {
    /// Sink plus the receiving end
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<HostDiscovered>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl RetestSink for ChannelRetestSink {
    async fn enqueue_host(&self, host: HostDiscovered) -> Result<()> {
        self.tx.send(host).map_err(|_| PlatformError::SinkClosed)
    }
}

/// Resolver answering from a fixed table
#[derive(Debug, Default)]
pub struct StaticResolver {
    table: RwLock<HashMap<String, Vec<IpAddr>>>,
    delay: Mutex<Duration>,
}

impl StaticResolver {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an answer
    pub fn insert(&self, host: &str, ips: Vec<IpAddr>) {
        self.table.write().insert(host.to_lowercase(), ips);
    }

    /// Make every lookup take `delay`
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }
}

#[async_trait]
impl HostResolver for StaticResolver {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>> {
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.table
            .read()
            .get(&host.to_lowercase())
            .cloned()
            .ok_or_else(|| PlatformError::Resolution {
                host: host.to_string(),
                reason: "no such host".to_string(),
            })
    }
}

/// Probe with a fixed answer
#[derive(Debug, Clone, Copy)]
pub struct StaticProbe {
    reachable: bool,
}

impl StaticProbe {
    /// Probe that always reports `reachable`
    pub fn new(reachable: bool) -> Self {
        Self { reachable }
    }
}

#[async_trait]
impl OutcomeProbe for StaticProbe {
    async fn probe(&self, target: &str) -> Result<ProbeResult> {
        Ok(ProbeResult {
            reachable: self.reachable,
            latency: Some(Duration::ZERO),
            detail: format!("static answer for {target}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_engine_apply_and_fail_next() {
        let engine = InMemoryPacketEngine::default();
        let mut options = BypassOptions::default();
        options.enable_fragment();

        engine.fail_next(1);
        assert!(engine.apply_options(&options).await.is_err());
        assert!(!engine.options_snapshot().fragment_enabled());

        engine.apply_options(&options).await.unwrap();
        assert!(engine.options_snapshot().fragment_enabled());
        assert_eq!(engine.applied().len(), 1);
        assert_eq!(engine.max_concurrent_applies(), 1);
    }

    #[tokio::test]
    async fn test_dns_toggle() {
        let dns = InMemoryDns::default();
        dns.apply_doh("Quad9").await.unwrap();
        assert_eq!(dns.dns_state(), DnsState { doh_enabled: true, dns_preset: "Quad9".into() });

        dns.set_fail_restore(true);
        assert!(dns.restore_dns().await.is_err());
        assert!(dns.dns_state().doh_enabled);

        dns.set_fail_restore(false);
        dns.restore_dns().await.unwrap();
        assert!(!dns.dns_state().doh_enabled);
    }

    #[tokio::test]
    async fn test_channel_sink_closed() {
        let (sink, rx) = ChannelRetestSink::channel();
        drop(rx);
        let unit = HostDiscovered::tcp("1.1.1.1".parse().unwrap(), 443, None);
        assert!(matches!(sink.enqueue_host(unit).await, Err(PlatformError::SinkClosed)));
    }

    #[tokio::test]
    async fn test_static_resolver() {
        let resolver = StaticResolver::new();
        resolver.insert("Example.com", vec!["9.9.9.9".parse().unwrap()]);
        assert_eq!(resolver.resolve("example.com").await.unwrap().len(), 1);
        assert!(resolver.resolve("missing.test").await.is_err());
    }
}
