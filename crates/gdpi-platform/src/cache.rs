//! Observed address cache
//!
//! The DNS/SNI capture side records which addresses it saw for which host
//! names. The verification scheduler looks here before doing a real lookup,
//! matching every cached host under a target suffix.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use gdpi_core::domain::{is_host_in_suffix, normalize_host};

#[derive(Debug, Clone)]
struct CachedAddress {
    ip: IpAddr,
    seen: Instant,
}

/// Short-lived host name to address cache
#[derive(Debug, Clone)]
pub struct ObservedAddressCache {
    entries: Arc<RwLock<HashMap<String, Vec<CachedAddress>>>>,
    ttl: Duration,
}

impl ObservedAddressCache {
    /// Create a cache whose entries live for `ttl`
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Record an address seen for a host name
    pub fn record(&self, hostname: &str, ip: IpAddr) {
        let hostname = normalize_host(hostname);
        if hostname.is_empty() {
            return;
        }
        let now = Instant::now();
        let mut entries = self.entries.write();
        let addresses = entries.entry(hostname).or_default();
        match addresses.iter_mut().find(|a| a.ip == ip) {
            Some(existing) => existing.seen = now,
            None => addresses.push(CachedAddress { ip, seen: now }),
        }
    }

    /// Unexpired addresses of every host equal to or under `suffix`
    ///
    /// Deduplicated, in insertion order per host.
    pub fn lookup_suffix(&self, suffix: &str) -> Vec<IpAddr> {
        let now = Instant::now();
        let entries = self.entries.read();
        let mut result: Vec<IpAddr> = Vec::new();
        let mut hosts: Vec<&String> = entries.keys().filter(|h| is_host_in_suffix(h, suffix)).collect();
        hosts.sort();
        for host in hosts {
            for address in &entries[host] {
                if now.saturating_duration_since(address.seen) < self.ttl && !result.contains(&address.ip) {
                    result.push(address.ip);
                }
            }
        }
        result
    }

    /// Drop expired entries
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        let ttl = self.ttl;
        let mut entries = self.entries.write();
        for addresses in entries.values_mut() {
            addresses.retain(|a| now.saturating_duration_since(a.seen) < ttl);
        }
        entries.retain(|_, addresses| !addresses.is_empty());
    }

    /// Number of cached host names
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Clear all entries
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl Default for ObservedAddressCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_lookup_suffix() {
        let cache = ObservedAddressCache::default();
        cache.record("www.example.com", ip("1.1.1.1"));
        cache.record("cdn.example.com", ip("2.2.2.2"));
        cache.record("cdn.example.com", ip("1.1.1.1"));
        cache.record("notexample.com", ip("3.3.3.3"));

        let found = cache.lookup_suffix("example.com");
        assert_eq!(found.len(), 2);
        assert!(found.contains(&ip("1.1.1.1")));
        assert!(found.contains(&ip("2.2.2.2")));
        assert!(cache.lookup_suffix("other.org").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry() {
        let cache = ObservedAddressCache::new(Duration::from_secs(10));
        cache.record("a.example.com", ip("1.1.1.1"));
        assert_eq!(cache.lookup_suffix("example.com").len(), 1);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(cache.lookup_suffix("example.com").is_empty());

        cache.cleanup_expired();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_ignores_empty_hostname() {
        let cache = ObservedAddressCache::default();
        cache.record("  ", ip("1.1.1.1"));
        assert!(cache.is_empty());
    }
}
