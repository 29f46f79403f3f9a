//! Discovered plans
//!
//! Keeps the latest plan per host so a user can later apply "the plan for
//! this domain" without naming a host.

use std::collections::VecDeque;

use gdpi_core::domain::{is_host_in_suffix, normalize_host};
use gdpi_core::BypassPlan;

const MAX_PLANS: usize = 256;

/// Latest plan per host, oldest first
#[derive(Debug, Default)]
pub struct PlanBook {
    entries: VecDeque<(String, BypassPlan)>,
    last_diagnosed: Option<String>,
}

impl PlanBook {
    /// Store the plan for `host`, replacing an older one
    pub fn record(&mut self, host: &str, plan: BypassPlan) {
        let host = normalize_host(host);
        if host.is_empty() {
            return;
        }
        self.entries.retain(|(h, _)| *h != host);
        self.entries.push_back((host.clone(), plan));
        while self.entries.len() > MAX_PLANS {
            self.entries.pop_front();
        }
        self.last_diagnosed = Some(host);
    }

    /// Host of the most recent discovery
    pub fn last_diagnosed(&self) -> Option<&str> {
        self.last_diagnosed.as_deref()
    }

    /// Plan to use for a whole suffix
    ///
    /// The most recent plan under the suffix wins if it would change
    /// anything; otherwise the oldest one that would.
    pub fn select_for_suffix(&self, suffix: &str) -> Option<(String, BypassPlan)> {
        let suffix = normalize_host(suffix);
        let matching: Vec<&(String, BypassPlan)> = self
            .entries
            .iter()
            .filter(|(host, _)| is_host_in_suffix(host, &suffix))
            .collect();

        let latest = matching.last()?;
        if latest.1.has_applicable_actions() {
            return Some((*latest).clone());
        }
        matching
            .into_iter()
            .find(|(_, plan)| plan.has_applicable_actions())
            .cloned()
    }

    /// Number of stored plans
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
