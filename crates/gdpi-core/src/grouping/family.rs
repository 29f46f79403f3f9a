//! Subdomain family promotion
//!
//! Keeps a rolling window of diagnosis-bearing hosts. When enough distinct,
//! shard-looking subhosts of one registrable domain show up, that domain is
//! promoted to the effective apply target for all of them.

use parking_lot::Mutex;
use std::collections::{BTreeSet, VecDeque};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::GroupingConfig;
use crate::domain::{is_host_in_suffix, normalize_host, registrable_domain};
use crate::noise::NoiseHostFilter;

/// Hard cap on remembered observations
const MAX_OBSERVATIONS: usize = 512;

/// Counts for one registrable domain inside the window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FamilyStats {
    /// Distinct strict subhosts
    pub unique_subhosts: usize,
    /// Subhosts that look like CDN shards
    pub shard_subhosts: usize,
}

#[derive(Debug, Clone)]
struct Observation {
    host: String,
    suffix: String,
    seen: Instant,
}

#[derive(Debug, Default)]
struct FamilyState {
    observations: VecDeque<Observation>,
    promoted: BTreeSet<String>,
}

/// Rolling-window family grouping
#[derive(Debug)]
pub struct DomainFamilyGrouping {
    window: Duration,
    min_subhosts: usize,
    min_shards: usize,
    pinned_min_subhosts: usize,
    pinned_min_shards: usize,
    pinned: Vec<String>,
    noise: Arc<NoiseHostFilter>,
    state: Mutex<FamilyState>,
}

impl DomainFamilyGrouping {
    /// Build from the grouping configuration
    pub fn from_config(config: &GroupingConfig, noise: Arc<NoiseHostFilter>) -> Self {
        Self {
            window: config.window(),
            min_subhosts: config.min_subhosts,
            min_shards: config.min_shard_subhosts,
            pinned_min_subhosts: config.pinned_min_subhosts,
            pinned_min_shards: config.pinned_min_shard_subhosts,
            pinned: config.pinned_suffixes.iter().map(|s| normalize_host(s)).collect(),
            noise,
            state: Mutex::new(FamilyState::default()),
        }
    }

    /// Record a host; returns the suffix if this observation promoted it
    pub fn observe(&self, host: &str, now: Instant) -> Option<String> {
        let host = normalize_host(host);
        if host.is_empty() || host.parse::<IpAddr>().is_ok() || self.noise.is_noise(&host) {
            return None;
        }
        let suffix = registrable_domain(&host)?;
        if host == suffix {
            return None;
        }

        let mut state = self.state.lock();
        self.evict(&mut state, now);

        state.observations.retain(|o| o.host != host);
        state.observations.push_back(Observation {
            host,
            suffix: suffix.clone(),
            seen: now,
        });
        while state.observations.len() > MAX_OBSERVATIONS {
            state.observations.pop_front();
        }

        if state.promoted.contains(&suffix) || !self.qualifies(&state, &suffix) {
            return None;
        }
        let stats = Self::stats_locked(&state, &suffix);
        state.promoted.insert(suffix.clone());
        info!(
            "[GROUPS] Promoted {} ({} subhosts, {} shard-like)",
            suffix, stats.unique_subhosts, stats.shard_subhosts
        );
        Some(suffix)
    }

    /// Effective apply target: the promoted suffix, or the host itself
    pub fn effective_target(&self, host: &str, now: Instant) -> String {
        let host = normalize_host(host);
        let Some(suffix) = registrable_domain(&host) else {
            return host;
        };
        if self.noise.is_noise(&host) {
            return host;
        }
        if self.is_promoted(&suffix, now) {
            suffix
        } else {
            host
        }
    }

    /// Whether a suffix is currently promoted
    pub fn is_promoted(&self, suffix: &str, now: Instant) -> bool {
        let suffix = normalize_host(suffix);
        let mut state = self.state.lock();
        self.evict(&mut state, now);
        state.promoted.contains(&suffix)
    }

    /// All promoted suffixes
    pub fn promoted_suffixes(&self, now: Instant) -> Vec<String> {
        let mut state = self.state.lock();
        self.evict(&mut state, now);
        state.promoted.iter().cloned().collect()
    }

    /// Window counts for a suffix
    pub fn stats(&self, suffix: &str, now: Instant) -> FamilyStats {
        let suffix = normalize_host(suffix);
        let mut state = self.state.lock();
        self.evict(&mut state, now);
        Self::stats_locked(&state, &suffix)
    }

    /// Drop expired observations and demote suffixes that no longer qualify
    fn evict(&self, state: &mut FamilyState, now: Instant) {
        let window = self.window;
        let before = state.observations.len();
        state
            .observations
            .retain(|o| now.saturating_duration_since(o.seen) <= window);
        if state.observations.len() == before {
            return;
        }

        let current: &FamilyState = state;
        let demoted: Vec<String> = current
            .promoted
            .iter()
            .filter(|suffix| !self.qualifies(current, suffix))
            .cloned()
            .collect();
        for suffix in demoted {
            debug!("[GROUPS] Demoted {}", suffix);
            state.promoted.remove(&suffix);
        }
    }

    fn qualifies(&self, state: &FamilyState, suffix: &str) -> bool {
        let stats = Self::stats_locked(state, suffix);
        let (min_subhosts, min_shards) = if self.pinned.iter().any(|p| p == suffix) {
            (self.pinned_min_subhosts, self.pinned_min_shards)
        } else {
            (self.min_subhosts, self.min_shards)
        };
        stats.unique_subhosts >= min_subhosts && stats.shard_subhosts >= min_shards
    }

    fn stats_locked(state: &FamilyState, suffix: &str) -> FamilyStats {
        state
            .observations
            .iter()
            .filter(|o| o.suffix == suffix && is_host_in_suffix(&o.host, suffix))
            .fold(FamilyStats::default(), |mut acc, o| {
                acc.unique_subhosts += 1;
                if looks_like_shard(&o.host, suffix) {
                    acc.shard_subhosts += 1;
                }
                acc
            })
    }
}

/// Shard-like subhost: a "noisy" first label in a deep or long name
///
/// The first label must contain a digit or dash, or be at least 12 chars;
/// and the name must have two subdomain levels or a first label of 8+ chars.
pub fn looks_like_shard(host: &str, suffix: &str) -> bool {
    let Some(prefix) = host.strip_suffix(suffix).and_then(|p| p.strip_suffix('.')) else {
        return false;
    };
    let labels: Vec<&str> = prefix.split('.').filter(|l| !l.is_empty()).collect();
    let Some(first) = labels.first() else {
        return false;
    };

    let noisy = first.chars().any(|c| c.is_ascii_digit() || c == '-') || first.len() >= 12;
    let structured = labels.len() >= 2 || first.len() >= 8;
    noisy && structured
}
