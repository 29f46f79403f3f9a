//! Auto-apply throttler
//!
//! Per-target debounce state. A discovery event may dispatch an apply only
//! when every window allows it, checked in this order:
//!
//! 1. minimum interval since the last attempt (always enforced)
//! 2. cooldown after a success with the same plan signature
//! 3. general cooldown after an attempt with the same plan signature
//!
//! Check and record happen under one map entry lock, so two events for the
//! same target cannot both pass.

use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

use gdpi_core::config::AutoApplyConfig;
use gdpi_core::outcome::CooldownKind;
use gdpi_core::SkipReason;

/// Debounce state of one target
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetState {
    /// Last dispatch
    pub last_attempt: Option<Instant>,
    /// Last commit
    pub last_success: Option<Instant>,
    /// Signature of the last dispatched plan
    pub last_signature: Option<String>,
}

/// Reserved dispatch slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    /// Normalized target
    pub target: String,
    /// Signature recorded with the attempt
    pub signature: String,
    /// Attempt time recorded
    pub at: Instant,
}

/// Per-target cooldown bookkeeping
#[derive(Debug)]
pub struct AutoApplyThrottler {
    targets: DashMap<String, TargetState>,
    min_interval: Duration,
    success_cooldown: Duration,
    cooldown: Duration,
}

impl AutoApplyThrottler {
    /// Throttler with explicit windows
    pub fn new(min_interval: Duration, success_cooldown: Duration, cooldown: Duration) -> Self {
        Self {
            targets: DashMap::new(),
            min_interval,
            success_cooldown,
            cooldown,
        }
    }

    /// Throttler with the configured windows
    pub fn from_config(config: &AutoApplyConfig) -> Self {
        Self::new(config.min_interval(), config.success_cooldown(), config.cooldown())
    }

    /// Check every window and, if clear, record the attempt
    pub fn try_reserve(&self, target: &str, signature: &str, now: Instant) -> Result<Reservation, SkipReason> {
        let mut state = self.targets.entry(target.to_string()).or_default();
        self.evaluate(&state, signature, now)?;

        state.last_attempt = Some(now);
        state.last_signature = Some(signature.to_string());
        Ok(Reservation {
            target: target.to_string(),
            signature: signature.to_string(),
            at: now,
        })
    }

    /// Whether `reservation` is still the latest attempt for its target
    pub fn is_current(&self, reservation: &Reservation) -> bool {
        self.targets
            .get(&reservation.target)
            .is_some_and(|state| state.last_attempt == Some(reservation.at))
    }

    /// Record a commit for the reserved attempt
    pub fn record_success(&self, reservation: &Reservation, now: Instant) {
        let mut state = self.targets.entry(reservation.target.clone()).or_default();
        state.last_success = Some(now);
        state.last_signature = Some(reservation.signature.clone());
    }

    /// Copy of a target's state
    pub fn state(&self, target: &str) -> Option<TargetState> {
        self.targets.get(target).map(|s| s.clone())
    }

    /// Number of targets seen
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Check if no target was seen yet
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Forget every target
    pub fn clear(&self) {
        self.targets.clear();
    }

    fn evaluate(&self, state: &TargetState, signature: &str, now: Instant) -> Result<(), SkipReason> {
        if let Some(last) = state.last_attempt {
            check_window(CooldownKind::MinInterval, self.min_interval, now.saturating_duration_since(last))?;
        }

        if state.last_signature.as_deref() != Some(signature) {
            return Ok(());
        }

        if let Some(last) = state.last_success {
            check_window(CooldownKind::AfterSuccess, self.success_cooldown, now.saturating_duration_since(last))?;
        }
        if let Some(last) = state.last_attempt {
            check_window(CooldownKind::General, self.cooldown, now.saturating_duration_since(last))?;
        }
        Ok(())
    }
}

impl Default for AutoApplyThrottler {
    fn default() -> Self {
        Self::from_config(&AutoApplyConfig::default())
    }
}

fn check_window(window: CooldownKind, length: Duration, age: Duration) -> Result<(), SkipReason> {
    if age < length {
        let remaining = length - age;
        Err(SkipReason::Cooldown {
            window,
            remaining_ms: u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX),
        })
    } else {
        Ok(())
    }
}
