//! Auto-apply execution policy
//!
//! The autopilot only applies conservative, reversible actions. A plan is
//! narrowed to what the policy allows before it is throttled or applied.

use gdpi_core::config::AutoApplyConfig;
use gdpi_core::{BypassPlan, RiskLevel, StrategyId};

/// Filter deciding what the autopilot may apply
#[derive(Debug, Clone)]
pub struct AutoApplyPolicy {
    min_confidence: u8,
    allowed: Vec<StrategyId>,
    max_risk: RiskLevel,
    allow_doh: bool,
}

impl AutoApplyPolicy {
    /// Policy from config; `allow_doh` is the DNS change consent
    pub fn from_config(config: &AutoApplyConfig, allow_doh: bool) -> Self {
        Self {
            min_confidence: config.min_confidence,
            allowed: config.allowed_strategies.clone(),
            max_risk: config.max_risk,
            allow_doh,
        }
    }

    /// Narrow `plan` to its auto-appliable part
    ///
    /// Returns the reason when nothing is left.
    pub fn filter(&self, plan: &BypassPlan) -> Result<BypassPlan, String> {
        let confidence = plan.confidence();
        if confidence < self.min_confidence {
            return Err(format!("confidence<{}", self.min_confidence));
        }

        let strategies: Vec<_> = plan
            .strategies
            .iter()
            .filter(|action| {
                if action.id == StrategyId::UseDoh {
                    return self.allow_doh;
                }
                self.allowed.contains(&action.id) && action.risk <= self.max_risk
            })
            .cloned()
            .collect();

        if strategies.is_empty() && !plan.drop_udp443 {
            return Err(if self.allow_doh {
                "no eligible actions".to_string()
            } else {
                "no eligible actions (or DoH requires consent)".to_string()
            });
        }

        Ok(BypassPlan {
            for_diagnosis: plan.for_diagnosis.clone(),
            plan_confidence: confidence,
            strategies,
            drop_udp443: plan.drop_udp443,
            // Widens the scope of the bypass, so never automatic
            allow_no_sni: false,
            reasoning: plan.reasoning.clone(),
        })
    }
}

impl Default for AutoApplyPolicy {
    fn default() -> Self {
        Self::from_config(&AutoApplyConfig::default(), false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gdpi_core::StrategyAction;

    fn confident(plan: BypassPlan) -> BypassPlan {
        plan.with_confidence(85)
    }

    #[test]
    fn test_low_confidence_rejected() {
        let plan = BypassPlan::new("x").with_strategy(StrategyId::TlsFragment).with_confidence(40);
        assert_eq!(AutoApplyPolicy::default().filter(&plan).unwrap_err(), "confidence<70");
    }

    #[test]
    fn test_allowlist_and_risk() {
        let plan = confident(
            BypassPlan::new("x")
                .with_strategy(StrategyId::TlsFragment)
                .with_strategy(StrategyId::TlsFakeTtl)
                .with_strategy(StrategyAction::new(StrategyId::DropRst).with_risk(RiskLevel::High))
                .with_strategy(StrategyAction::new(StrategyId::TlsDisorder).with_risk(RiskLevel::Medium)),
        );

        let filtered = AutoApplyPolicy::default().filter(&plan).unwrap();
        let ids: Vec<_> = filtered.strategies.iter().map(|a| a.id.clone()).collect();
        assert_eq!(ids, vec![StrategyId::TlsFragment, StrategyId::TlsDisorder]);
    }

    #[test]
    fn test_doh_needs_consent() {
        let plan = confident(BypassPlan::new("dns").with_strategy(StrategyId::UseDoh));

        let without = AutoApplyPolicy::default().filter(&plan).unwrap_err();
        assert_eq!(without, "no eligible actions (or DoH requires consent)");

        let with = AutoApplyPolicy::from_config(&AutoApplyConfig::default(), true);
        assert!(with.filter(&plan).unwrap().requests_doh());
    }

    #[test]
    fn test_assist_flags() {
        let plan = confident(BypassPlan::new("quic").with_drop_udp443(true).with_allow_no_sni(true));

        let filtered = AutoApplyPolicy::default().filter(&plan).unwrap();
        assert!(filtered.drop_udp443);
        assert!(!filtered.allow_no_sni);
        assert_eq!(filtered.signature(), "|U1|N0");
    }
}
