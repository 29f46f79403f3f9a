//! Result card statuses and merging

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Status of a host's re-test card
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    /// Not tested yet
    #[default]
    Idle,
    /// A test is in flight
    Running,
    /// Reachable
    Pass,
    /// Partially reachable
    Warn,
    /// Blocked
    Fail,
}

impl TestStatus {
    /// Merge two statuses of the same logical target
    pub fn merge(self, other: Self) -> Self {
        Self::merge_all([self, other])
    }

    /// Merge every status of one logical target
    ///
    /// `Running` wins until settled. A `Pass` next to any `Fail` or `Warn`
    /// gives `Warn`, otherwise `Fail` > `Warn` > `Pass` > `Idle`. The result
    /// does not depend on order.
    pub fn merge_all<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = Self>,
    {
        let (mut running, mut pass, mut warn, mut fail) = (false, false, false, false);
        for status in statuses {
            match status {
                Self::Running => running = true,
                Self::Pass => pass = true,
                Self::Warn => warn = true,
                Self::Fail => fail = true,
                Self::Idle => {}
            }
        }

        if running {
            Self::Running
        } else if pass && (fail || warn) {
            Self::Warn
        } else if fail {
            Self::Fail
        } else if warn {
            Self::Warn
        } else if pass {
            Self::Pass
        } else {
            Self::Idle
        }
    }

    /// Whether the status is final
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Pass | Self::Warn | Self::Fail)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Pass => "pass",
            Self::Warn => "warn",
            Self::Fail => "fail",
        };
        f.write_str(s)
    }
}

/// One entry in the results list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultCard {
    /// Host the card is about (a promoted suffix after merging)
    pub host_key: String,
    /// Current status
    pub status: TestStatus,
    /// Hosts folded into this card
    pub members: Vec<String>,
}

impl ResultCard {
    /// Card for a single host
    pub fn new(host_key: impl Into<String>, status: TestStatus) -> Self {
        let host_key = host_key.into();
        Self {
            members: vec![host_key.clone()],
            host_key,
            status,
        }
    }
}

/// Fold cards sharing an effective target into one card each
///
/// `target_of` maps a host to its effective apply target. Output order
/// follows the first appearance of each target.
pub fn merge_cards<F>(cards: &[ResultCard], mut target_of: F) -> Vec<ResultCard>
where
    F: FnMut(&str) -> String,
{
    let mut order: Vec<String> = Vec::new();
    let mut merged: BTreeMap<String, (ResultCard, Vec<TestStatus>)> = BTreeMap::new();

    for card in cards {
        let target = target_of(&card.host_key);
        match merged.get_mut(&target) {
            Some((existing, statuses)) => {
                statuses.push(card.status);
                for member in &card.members {
                    if !existing.members.contains(member) {
                        existing.members.push(member.clone());
                    }
                }
            }
            None => {
                order.push(target.clone());
                let first = ResultCard {
                    host_key: target.clone(),
                    status: card.status,
                    members: card.members.clone(),
                };
                merged.insert(target, (first, vec![card.status]));
            }
        }
    }

    order
        .into_iter()
        .filter_map(|key| merged.remove(&key))
        .map(|(mut card, statuses)| {
            card.status = TestStatus::merge_all(statuses);
            card
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use TestStatus::{Fail, Idle, Pass, Running, Warn};

    #[test]
    fn test_merge_rules() {
        assert_eq!(Pass.merge(Fail), Warn);
        assert_eq!(Fail.merge(Pass), Warn);
        assert_eq!(Fail.merge(Warn), Fail);
        assert_eq!(Warn.merge(Pass), Warn);
        assert_eq!(Pass.merge(Idle), Pass);
        assert_eq!(Idle.merge(Idle), Idle);
        assert_eq!(Running.merge(Fail), Running);
        assert_eq!(Pass.merge(Running), Running);
    }

    #[test]
    fn test_merge_is_commutative() {
        let all = [Idle, Running, Pass, Warn, Fail];
        for a in all {
            for b in all {
                assert_eq!(a.merge(b), b.merge(a), "{a} vs {b}");
            }
        }
    }

    #[test]
    fn test_merge_cards_by_target() {
        let cards = vec![
            ResultCard::new("a1.cdn.example.com", Pass),
            ResultCard::new("other.org", Fail),
            ResultCard::new("b2.cdn.example.com", Fail),
        ];
        let merged = merge_cards(&cards, |host| {
            if host.ends_with(".example.com") {
                "example.com".to_string()
            } else {
                host.to_string()
            }
        });

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].host_key, "example.com");
        assert_eq!(merged[0].status, Warn);
        assert_eq!(merged[0].members.len(), 2);
        assert_eq!(merged[1].host_key, "other.org");
        assert_eq!(merged[1].status, Fail);
    }

    #[test]
    fn test_merge_cards_ignores_order() {
        let orders = [[Pass, Fail, Fail], [Fail, Fail, Pass], [Fail, Pass, Fail]];
        for statuses in orders {
            let cards: Vec<ResultCard> = statuses
                .iter()
                .enumerate()
                .map(|(i, status)| ResultCard::new(format!("s{i}.example.com"), *status))
                .collect();
            let merged = merge_cards(&cards, |_| "example.com".to_string());
            assert_eq!(merged.len(), 1);
            assert_eq!(merged[0].status, Warn, "{statuses:?}");
            assert_eq!(merged[0].members.len(), 3);
        }
    }

    #[test]
    fn test_merge_all_rules() {
        assert_eq!(TestStatus::merge_all([Pass, Warn, Fail]), Warn);
        assert_eq!(TestStatus::merge_all([Fail, Warn, Idle]), Fail);
        assert_eq!(TestStatus::merge_all([Pass, Pass, Idle]), Pass);
        assert_eq!(TestStatus::merge_all([Pass, Fail, Running]), Running);
        assert_eq!(TestStatus::merge_all([]), Idle);
    }
}
