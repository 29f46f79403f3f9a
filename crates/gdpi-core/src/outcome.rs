//! Apply outcomes
//!
//! Every apply attempt, manual or automatic, ends in an [`ApplyOutcome`].
//! Cancellation and failures are values here, never errors.

use serde::Serialize;
use std::fmt;

use crate::plan::BypassPlan;

/// Final status of an apply attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyStatus {
    /// New options are live
    Applied,
    /// Something went wrong after the snapshot; previous state restored
    RolledBack,
    /// Nothing was attempted
    Skipped,
}

impl fmt::Display for ApplyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Applied => "APPLIED",
            Self::RolledBack => "ROLLED_BACK",
            Self::Skipped => "SKIPPED",
        };
        f.write_str(s)
    }
}

/// What fired the cancellation scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// External cancellation signal
    User,
    /// Deadline expired
    Timeout,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::User => "cancel",
            Self::Timeout => "timeout",
        })
    }
}

/// Why an apply did not commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum AbortReason {
    /// Cancelled by the caller or the deadline
    Cancelled(CancelReason),
    /// A sub-operation failed
    Failed(String),
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled(reason) => write!(f, "cancelled ({reason})"),
            Self::Failed(message) => write!(f, "failed: {message}"),
        }
    }
}

/// Which throttle window blocked an auto-apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CooldownKind {
    /// Minimum interval between any two attempts
    MinInterval,
    /// Window after a success with the same plan
    AfterSuccess,
    /// Window after an attempt with the same plan
    General,
}

impl fmt::Display for CooldownKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::MinInterval => "min interval",
            Self::AfterSuccess => "success cooldown",
            Self::General => "cooldown",
        })
    }
}

/// Why nothing was attempted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    /// Target is a telemetry/ad host
    NoiseHost,
    /// Plan would change nothing
    NoApplicableActions,
    /// A manual apply holds priority
    ManualApplyRunning,
    /// Auto-apply gate is busy with another target
    AutoApplyBusy,
    /// Auto-apply is switched off
    AutoApplyDisabled,
    /// A throttle window is active
    Cooldown {
        /// Which window
        window: CooldownKind,
        /// Remaining wait in milliseconds
        remaining_ms: u64,
    },
    /// Auto-apply policy rejected the plan
    Policy {
        /// Explanation
        reason: String,
    },
    /// No stored plan matches the requested domain
    NoPlanForDomain,
    /// Cancelled before anything was captured
    CancelledBeforeStart,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoiseHost => f.write_str("noise host"),
            Self::NoApplicableActions => f.write_str("no applicable actions"),
            Self::ManualApplyRunning => f.write_str("manual apply in progress"),
            Self::AutoApplyBusy => f.write_str("auto-apply busy"),
            Self::AutoApplyDisabled => f.write_str("auto-apply disabled"),
            Self::Cooldown {
                window,
                remaining_ms,
            } => write!(f, "{window} active, {:.1}s left", *remaining_ms as f64 / 1000.0),
            Self::Policy { reason } => write!(f, "policy: {reason}"),
            Self::NoPlanForDomain => f.write_str("no plan for domain"),
            Self::CancelledBeforeStart => f.write_str("cancelled before start"),
        }
    }
}

/// Rollback result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RollbackStatus {
    /// Nothing had been touched
    NotNeeded,
    /// Snapshot restored
    Done,
    /// At least one restore step failed
    Failed(String),
}

impl fmt::Display for RollbackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotNeeded => f.write_str("NOT_NEEDED"),
            Self::Done => f.write_str("DONE"),
            Self::Failed(message) => write!(f, "FAILED ({message})"),
        }
    }
}

/// Steps of a transaction, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyPhase {
    /// Mapping the plan to options
    PlanBuild,
    /// Pushing options to the packet engine
    ApplyOptions,
    /// Turning DoH on
    EnableDoh,
    /// Turning DoH off
    DisableDoh,
    /// Restoring options
    RollbackOptions,
    /// Restoring DNS
    RollbackDns,
}

impl fmt::Display for ApplyPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PlanBuild => "plan_build",
            Self::ApplyOptions => "apply_options",
            Self::EnableDoh => "apply_doh_enable",
            Self::DisableDoh => "apply_doh_disable",
            Self::RollbackOptions => "rollback_options",
            Self::RollbackDns => "rollback_dns",
        })
    }
}

/// How a phase ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    /// Completed
    Ok,
    /// Returned an error
    Failed,
    /// Interrupted by the cancellation scope
    Cancelled,
    /// Not needed or not allowed
    Skipped,
}

/// Timing trail entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseRecord {
    /// Phase
    pub phase: ApplyPhase,
    /// How it ended
    pub status: PhaseStatus,
    /// Wall time spent
    pub elapsed_ms: u64,
    /// Error text or note
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Result of one apply attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyOutcome {
    /// Target the plan was applied to
    pub host_key: String,
    /// Readable options summary after the attempt
    pub applied_strategy_text: String,
    /// Token summary of the plan
    pub plan_text: String,
    /// Reasoning copied from the plan
    pub reasoning: String,
    /// Final status
    pub status: ApplyStatus,
    /// Set when status is `RolledBack`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort: Option<AbortReason>,
    /// Set when status is `Skipped`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<SkipReason>,
    /// Rollback result
    pub rollback: RollbackStatus,
    /// State summary before the attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_before: Option<String>,
    /// State summary after the attempt (post-rollback on failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_after: Option<String>,
    /// Strategies the mapper could not apply
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped_strategies: Vec<String>,
    /// Timing trail
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub phases: Vec<PhaseRecord>,
}

impl ApplyOutcome {
    /// Outcome for an attempt that never started
    pub fn skipped(host_key: impl Into<String>, plan: &BypassPlan, reason: SkipReason) -> Self {
        Self {
            host_key: host_key.into(),
            applied_strategy_text: String::new(),
            plan_text: plan.plan_text(),
            reasoning: plan.reasoning.clone(),
            status: ApplyStatus::Skipped,
            abort: None,
            skip: Some(reason),
            rollback: RollbackStatus::NotNeeded,
            state_before: None,
            state_after: None,
            skipped_strategies: Vec::new(),
            phases: Vec::new(),
        }
    }

    /// Whether new options are live
    pub fn is_applied(&self) -> bool {
        self.status == ApplyStatus::Applied
    }

    /// Concise user-facing message
    pub fn message(&self) -> String {
        match self.status {
            ApplyStatus::Applied => format!("Applied to {}: {}", self.host_key, self.applied_strategy_text),
            ApplyStatus::RolledBack => {
                let reason = self
                    .abort
                    .as_ref()
                    .map_or_else(|| "aborted".to_string(), ToString::to_string);
                format!(
                    "Rolled back ({reason}) for {}. Before: {}. After rollback: {}",
                    self.host_key,
                    self.state_before.as_deref().unwrap_or("?"),
                    self.state_after.as_deref().unwrap_or("?"),
                )
            }
            ApplyStatus::Skipped => {
                let reason = self
                    .skip
                    .as_ref()
                    .map_or_else(|| "skipped".to_string(), ToString::to_string);
                format!("Skipped {}: {reason}", self.host_key)
            }
        }
    }
}

impl fmt::Display for ApplyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skipped_outcome() {
        let plan = BypassPlan::new("x").with_reasoning("because");
        let outcome = ApplyOutcome::skipped("ads.example.com", &plan, SkipReason::NoiseHost);
        assert_eq!(outcome.status, ApplyStatus::Skipped);
        assert_eq!(outcome.reasoning, "because");
        assert_eq!(outcome.message(), "Skipped ads.example.com: noise host");
        assert!(!outcome.is_applied());
    }

    #[test]
    fn test_cooldown_display() {
        let reason = SkipReason::Cooldown {
            window: CooldownKind::AfterSuccess,
            remaining_ms: 12_500,
        };
        assert_eq!(reason.to_string(), "success cooldown active, 12.5s left");
    }

    #[test]
    fn test_rolled_back_message() {
        let mut outcome = ApplyOutcome::skipped("example.com", &BypassPlan::new("x"), SkipReason::NoiseHost);
        outcome.status = ApplyStatus::RolledBack;
        outcome.skip = None;
        outcome.abort = Some(AbortReason::Cancelled(CancelReason::Timeout));
        outcome.state_before = Some("off | DoH off".to_string());
        outcome.state_after = Some("off | DoH off".to_string());

        let message = outcome.message();
        assert!(message.contains("cancelled (timeout)"));
        assert!(message.contains("Before: off | DoH off"));
    }

    #[test]
    fn test_outcome_serializes() {
        let outcome = ApplyOutcome::skipped("example.com", &BypassPlan::new("x"), SkipReason::NoPlanForDomain);
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["skip"]["kind"], "no_plan_for_domain");
        assert_eq!(json["rollback"]["kind"], "not_needed");
    }
}
