//! Co-occurrence domain group learning
//!
//! Registrable domains that keep showing up together within a short window
//! (a site and its CDN, for example) are learned as a group. Learned groups
//! live in a catalog next to pinned groups and are persisted between sessions.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::GroupingConfig;
use crate::domain::{normalize_host, registrable_domain};

/// Current catalog format version
pub const CATALOG_VERSION: u32 = 1;

/// Recent-observation buffer cap
const MAX_RECENT: usize = 256;

/// Pair counter cap
const MAX_PAIR_COUNTS: usize = 4096;

/// Longest learned group key
const MAX_GROUP_KEY_LEN: usize = 120;

/// A named set of registrable domains
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainGroup {
    /// Stable key
    pub key: String,
    /// Display name
    pub display_name: String,
    /// Member domains
    pub domains: Vec<String>,
}

impl DomainGroup {
    /// Whether the domain belongs to the group
    pub fn contains(&self, domain: &str) -> bool {
        self.domains.iter().any(|d| d == domain)
    }
}

/// Pinned and learned groups
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainGroupCatalog {
    /// Format version
    pub version: u32,
    /// Groups that are never overwritten by learning
    pub pinned_groups: Vec<DomainGroup>,
    /// Groups learned from co-occurrence, oldest first
    pub learned_groups: Vec<DomainGroup>,
}

impl Default for DomainGroupCatalog {
    fn default() -> Self {
        Self {
            version: CATALOG_VERSION,
            pinned_groups: vec![DomainGroup {
                key: "group-youtube".to_string(),
                display_name: "YouTube".to_string(),
                domains: vec![
                    "youtube.com".to_string(),
                    "googlevideo.com".to_string(),
                    "ytimg.com".to_string(),
                    "ggpht.com".to_string(),
                ],
            }],
            learned_groups: Vec::new(),
        }
    }
}

impl DomainGroupCatalog {
    /// Group containing the domain, pinned groups first
    pub fn group_for(&self, domain: &str) -> Option<&DomainGroup> {
        self.pinned_groups
            .iter()
            .chain(self.learned_groups.iter())
            .find(|g| g.contains(domain))
    }

    fn covers_pair(&self, a: &str, b: &str) -> bool {
        self.pinned_groups
            .iter()
            .chain(self.learned_groups.iter())
            .any(|g| g.contains(a) && g.contains(b))
    }
}

/// Stable key for a learned group of sorted domains
pub fn learned_group_key(domains: &[String]) -> String {
    let mut sorted = domains.to_vec();
    sorted.sort();
    let joined = sorted.join("+");
    let sanitized: String = joined
        .chars()
        .map(|c| if matches!(c, '.' | '/' | ':' | ' ') { '_' } else { c })
        .collect();
    format!("learned-{sanitized}").chars().take(MAX_GROUP_KEY_LEN).collect()
}

#[derive(Debug)]
struct LearnerState {
    catalog: DomainGroupCatalog,
    recent: VecDeque<(String, Instant)>,
    pair_counts: HashMap<String, u32>,
    dirty: bool,
    last_persist: Option<Instant>,
}

/// Learns groups from domains observed close together in time
#[derive(Debug)]
pub struct DomainGroupLearner {
    window: Duration,
    pair_threshold: u32,
    max_learned: usize,
    persist_interval: Duration,
    state: Mutex<LearnerState>,
}

impl DomainGroupLearner {
    /// Start from a previously persisted catalog
    pub fn from_config(config: &GroupingConfig, mut catalog: DomainGroupCatalog) -> Self {
        if catalog.pinned_groups.is_empty() {
            catalog.pinned_groups = DomainGroupCatalog::default().pinned_groups;
        }
        catalog.version = CATALOG_VERSION;
        Self {
            window: config.co_occurrence_window(),
            pair_threshold: config.pair_threshold,
            max_learned: config.max_learned_groups,
            persist_interval: config.persist_interval(),
            state: Mutex::new(LearnerState {
                catalog,
                recent: VecDeque::new(),
                pair_counts: HashMap::new(),
                dirty: false,
                last_persist: None,
            }),
        }
    }

    /// Record a host; returns a group learned because of it
    pub fn observe(&self, host: &str, now: Instant) -> Option<DomainGroup> {
        let host = normalize_host(host);
        if host.parse::<IpAddr>().is_ok() {
            return None;
        }
        let domain = registrable_domain(&host)?;

        let mut state = self.state.lock();
        let window = self.window;
        state
            .recent
            .retain(|(_, seen)| now.saturating_duration_since(*seen) <= window);

        let partners: Vec<String> = state
            .recent
            .iter()
            .map(|(d, _)| d.clone())
            .filter(|d| *d != domain)
            .collect();

        let mut learned = None;
        for partner in partners {
            let (a, b) = if partner < domain {
                (partner, domain.clone())
            } else {
                (domain.clone(), partner)
            };
            if state.catalog.covers_pair(&a, &b) {
                continue;
            }
            let pair_key = format!("{a}|{b}");
            let count = {
                let entry = state.pair_counts.entry(pair_key.clone()).or_insert(0);
                *entry += 1;
                *entry
            };
            if count < self.pair_threshold {
                continue;
            }
            // An evicted group has to earn its place again
            state.pair_counts.remove(&pair_key);

            let domains = vec![a.clone(), b.clone()];
            let group = DomainGroup {
                key: learned_group_key(&domains),
                display_name: format!("{a} + {b}"),
                domains,
            };
            if state.catalog.learned_groups.len() >= self.max_learned {
                let dropped = state.catalog.learned_groups.remove(0);
                debug!("[GROUPS] Dropping oldest learned group {}", dropped.key);
            }
            info!("[GROUPS] Learned group {} after {} co-occurrences", group.key, count);
            state.catalog.learned_groups.push(group.clone());
            state.dirty = true;
            learned.get_or_insert(group);
        }

        if state.pair_counts.len() > MAX_PAIR_COUNTS {
            state.pair_counts.retain(|_, count| *count > 1);
            if state.pair_counts.len() > MAX_PAIR_COUNTS {
                debug!("[GROUPS] Pair counters over cap, resetting");
                state.pair_counts.clear();
            }
        }

        state.recent.retain(|(d, _)| *d != domain);
        state.recent.push_back((domain, now));
        while state.recent.len() > MAX_RECENT {
            state.recent.pop_front();
        }

        learned
    }

    /// Group containing the registrable domain of `host`
    pub fn group_for(&self, host: &str) -> Option<DomainGroup> {
        let domain = registrable_domain(host)?;
        self.state.lock().catalog.group_for(&domain).cloned()
    }

    /// Copy of the catalog
    pub fn catalog(&self) -> DomainGroupCatalog {
        self.state.lock().catalog.clone()
    }

    /// Catalog to persist, if it changed and the persist interval elapsed
    pub fn take_pending_persist(&self, now: Instant) -> Option<DomainGroupCatalog> {
        let mut state = self.state.lock();
        if !state.dirty {
            return None;
        }
        if let Some(last) = state.last_persist {
            if now.saturating_duration_since(last) < self.persist_interval {
                return None;
            }
        }
        state.dirty = false;
        state.last_persist = Some(now);
        Some(state.catalog.clone())
    }
}
