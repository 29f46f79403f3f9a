//! Post-apply verification
//!
//! After a commit, give the engine a moment to pick up the new rules, then
//! turn the target into concrete addresses and queue a short re-test for
//! each of them.

use std::net::IpAddr;
use std::sync::Arc;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use gdpi_core::config::VerificationConfig;
use gdpi_core::domain::{normalize_host, parse_ip};
use gdpi_platform::{HostDiscovered, HostResolver, ObservedAddressCache, RetestSink};

/// Where candidate addresses came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSource {
    /// The target is an address
    Literal,
    /// Observed-address cache
    Cache,
    /// Name resolution
    Resolver,
    /// Nothing found
    None,
}

/// Resolves targets and feeds the live-testing pipeline
pub struct VerificationScheduler {
    config: VerificationConfig,
    cache: ObservedAddressCache,
    resolver: Arc<dyn HostResolver>,
    sink: Arc<dyn RetestSink>,
}

impl VerificationScheduler {
    /// Create a scheduler
    pub fn new(
        config: VerificationConfig,
        cache: ObservedAddressCache,
        resolver: Arc<dyn HostResolver>,
        sink: Arc<dyn RetestSink>,
    ) -> Self {
        Self {
            config,
            cache,
            resolver,
            sink,
        }
    }

    /// The observed-address cache consulted before resolving
    pub fn cache(&self) -> &ObservedAddressCache {
        &self.cache
    }

    /// Candidate addresses for `target`
    ///
    /// Address literal first, then the cache, then name resolution bounded
    /// by the resolve timeout. Capped at `max_targets`.
    pub async fn resolve_candidates(&self, target: &str) -> (Vec<IpAddr>, CandidateSource) {
        let target = normalize_host(target);
        if let Some(ip) = parse_ip(&target) {
            return (vec![ip], CandidateSource::Literal);
        }

        let mut cached = self.cache.lookup_suffix(&target);
        if !cached.is_empty() {
            cached.truncate(self.config.max_targets);
            return (cached, CandidateSource::Cache);
        }

        match timeout(self.config.resolve_timeout(), self.resolver.resolve(&target)).await {
            Ok(Ok(mut ips)) if !ips.is_empty() => {
                ips.truncate(self.config.max_targets);
                (ips, CandidateSource::Resolver)
            }
            Ok(Ok(_)) => (Vec::new(), CandidateSource::None),
            Ok(Err(e)) => {
                debug!("[RETEST] resolution failed: target={target}; error={e}");
                (Vec::new(), CandidateSource::None)
            }
            Err(_) => {
                debug!(
                    "[RETEST] resolution timed out after {}ms: target={target}",
                    self.config.resolve_timeout_ms
                );
                (Vec::new(), CandidateSource::None)
            }
        }
    }

    /// Re-test units for `target`
    pub fn build_units(&self, target: &str, ips: &[IpAddr]) -> Vec<HostDiscovered> {
        let target = normalize_host(target);
        let hostname = parse_ip(&target).is_none().then_some(target);
        ips.iter()
            .map(|ip| HostDiscovered::tcp(*ip, self.config.port, hostname.clone()))
            .collect()
    }

    /// Wait, resolve and enqueue
    ///
    /// Returns the number of units queued. `cancel` discards whatever has not
    /// been queued yet.
    pub async fn verify(&self, target: &str, cancel: &CancellationToken) -> usize {
        tokio::select! {
            () = cancel.cancelled() => return 0,
            () = sleep(self.config.delay()) => {}
        }

        let (ips, source) = tokio::select! {
            () = cancel.cancelled() => return 0,
            found = self.resolve_candidates(target) => found,
        };
        if ips.is_empty() {
            info!("[RETEST] No targets resolved: {target}");
            return 0;
        }

        let units = self.build_units(target, &ips);
        info!("[RETEST] Enqueue: target={target}; ips={}; source={source:?}", units.len());

        let mut queued = 0;
        for unit in units {
            if cancel.is_cancelled() {
                debug!("[RETEST] cancelled, dropping remaining units for {target}");
                break;
            }
            match self.sink.enqueue_host(unit).await {
                Ok(()) => queued += 1,
                Err(e) => {
                    warn!("[RETEST] enqueue failed: target={target}; error={e}");
                    break;
                }
            }
        }
        queued
    }
}

impl std::fmt::Debug for VerificationScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationScheduler")
            .field("config", &self.config)
            .field("cached_hosts", &self.cache.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gdpi_platform::{ChannelRetestSink, StaticResolver};
    use std::time::Duration;

    fn scheduler(resolver: StaticResolver) -> (VerificationScheduler, tokio::sync::mpsc::UnboundedReceiver<HostDiscovered>) {
        let (sink, rx) = ChannelRetestSink::channel();
        let scheduler = VerificationScheduler::new(
            VerificationConfig::default(),
            ObservedAddressCache::default(),
            Arc::new(resolver),
            Arc::new(sink),
        );
        (scheduler, rx)
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    // ===== Candidate Tests =====

    #[tokio::test]
    async fn test_literal_target() {
        let (scheduler, _rx) = scheduler(StaticResolver::new());
        let (ips, source) = scheduler.resolve_candidates("203.0.113.7").await;
        assert_eq!(ips, vec![ip("203.0.113.7")]);
        assert_eq!(source, CandidateSource::Literal);

        let units = scheduler.build_units("203.0.113.7", &ips);
        assert_eq!(units[0].key, "203.0.113.7:443:TCP");
        assert!(units[0].hostname.is_none());
    }

    #[tokio::test]
    async fn test_cache_before_resolver() {
        let resolver = StaticResolver::new();
        resolver.insert("example.com", vec![ip("9.9.9.9")]);
        let (scheduler, _rx) = scheduler(resolver);
        scheduler.cache().record("cdn.example.com", ip("1.1.1.1"));

        let (ips, source) = scheduler.resolve_candidates("example.com").await;
        assert_eq!(ips, vec![ip("1.1.1.1")]);
        assert_eq!(source, CandidateSource::Cache);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolution_timeout() {
        let resolver = StaticResolver::new();
        resolver.insert("slow.example", vec![ip("9.9.9.9")]);
        resolver.set_delay(Duration::from_secs(10));
        let (scheduler, _rx) = scheduler(resolver);

        let (ips, source) = scheduler.resolve_candidates("slow.example").await;
        assert!(ips.is_empty());
        assert_eq!(source, CandidateSource::None);
    }

    // ===== Verify Tests =====

    #[tokio::test(start_paused = true)]
    async fn test_verify_enqueues_units() {
        let resolver = StaticResolver::new();
        resolver.insert("example.com", vec![ip("1.1.1.1"), ip("2.2.2.2")]);
        let (scheduler, mut rx) = scheduler(resolver);

        let queued = scheduler.verify("example.com", &CancellationToken::new()).await;
        assert_eq!(queued, 2);

        let unit = rx.recv().await.unwrap();
        assert_eq!(unit.key, "1.1.1.1:443:TCP");
        assert_eq!(unit.sni.as_deref(), Some("example.com"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_verify_nothing_resolved() {
        let (scheduler, mut rx) = scheduler(StaticResolver::new());
        assert_eq!(scheduler.verify("missing.test", &CancellationToken::new()).await, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_discards_pending() {
        let resolver = StaticResolver::new();
        resolver.insert("example.com", vec![ip("1.1.1.1")]);
        let (scheduler, mut rx) = scheduler(resolver);

        let token = CancellationToken::new();
        token.cancel();
        assert_eq!(scheduler.verify("example.com", &token).await, 0);
        assert!(rx.try_recv().is_err());
    }
}
