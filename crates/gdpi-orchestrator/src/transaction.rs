//! Plan apply transaction
//!
//! One transaction moves the live state from a captured snapshot to the
//! mapped options of a plan:
//!
//! ```text
//! Idle -> SnapshotCaptured -> OptionsApplied -> DoHReconciled -> Committed
//!                 \________________\_________________\______-> RolledBack
//! ```
//!
//! The cancellation scope is checked at every step boundary and races the
//! network and DNS sub-operations. Every non-commit exit after the snapshot
//! goes through [`PlanTransaction::rollback`], which restores the snapshot
//! best-effort and records what failed.

use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use gdpi_core::config::DnsConfig;
use gdpi_core::outcome::{ApplyPhase, PhaseRecord, PhaseStatus};
use gdpi_core::{
    map_plan, AbortReason, ApplyOutcome, ApplyStatus, BypassPlan, MappedPlan, PresetCatalog, RollbackStatus, SkipReason,
    StateSnapshot,
};

use crate::cancel::CancelScope;
use crate::store::OptionsStore;

/// Result of running a transaction
#[derive(Debug, Clone)]
pub struct TransactionReport {
    /// User-facing outcome
    pub outcome: ApplyOutcome,
    /// Mapping that went live, when the transaction committed
    pub committed: Option<MappedPlan>,
}

/// What the transaction has written so far
#[derive(Debug, Default, Clone, Copy)]
struct Touched {
    options: bool,
    dns: bool,
}

impl Touched {
    fn any(self) -> bool {
        self.options || self.dns
    }
}

/// A single plan apply
#[derive(Debug)]
pub struct PlanTransaction {
    id: u64,
    host_key: String,
    plan: BypassPlan,
    store: OptionsStore,
    presets: PresetCatalog,
    dns: DnsConfig,
    phases: Vec<PhaseRecord>,
}

impl PlanTransaction {
    /// Prepare a transaction; nothing runs until [`run`](Self::run)
    pub fn new(
        id: u64,
        host_key: impl Into<String>,
        plan: BypassPlan,
        store: OptionsStore,
        presets: PresetCatalog,
        dns: DnsConfig,
    ) -> Self {
        Self {
            id,
            host_key: host_key.into(),
            plan,
            store,
            presets,
            dns,
            phases: Vec::new(),
        }
    }

    /// Run to commit or rollback
    #[instrument(name = "apply_tx", skip_all, fields(tx = self.id, host = %self.host_key))]
    pub async fn run(mut self, scope: CancelScope) -> TransactionReport {
        if let Err(reason) = scope.check() {
            info!("[APPLY] cancelled before start ({reason}): host={}", self.host_key);
            let outcome = ApplyOutcome::skipped(&self.host_key, &self.plan, SkipReason::CancelledBeforeStart);
            return TransactionReport {
                outcome,
                committed: None,
            };
        }

        let started = Instant::now();
        let before = self.store.snapshot();
        info!(
            "[APPLY] start: host={}; plan={}; before={}",
            self.host_key,
            self.plan.plan_text(),
            before.summary()
        );

        let phase_started = Instant::now();
        let mapped = map_plan(&self.plan, &before.options, &self.presets);
        for id in &mapped.skipped {
            warn!("[APPLY] strategy not supported, skipped: {id}");
        }
        self.record(ApplyPhase::PlanBuild, PhaseStatus::Ok, phase_started, None);

        let mut touched = Touched::default();
        let result = self.execute(&scope, &before, &mapped, &mut touched).await;

        let total_ms = elapsed_ms(started);
        match result {
            Ok(()) => {
                let after = self.store.snapshot();
                info!("[APPLY] committed in {total_ms}ms: host={}; after={}", self.host_key, after.summary());
                self.finish(ApplyStatus::Applied, None, RollbackStatus::NotNeeded, &before, Some(mapped))
            }
            Err(abort) => {
                match &abort {
                    AbortReason::Cancelled(reason) => {
                        warn!("[APPLY] cancelled ({reason}) after {total_ms}ms: host={}", self.host_key);
                    }
                    AbortReason::Failed(message) => {
                        error!("[APPLY] failed after {total_ms}ms: host={}; error={message}", self.host_key);
                    }
                }
                let rollback = self.rollback(&before, touched).await;
                self.finish(ApplyStatus::RolledBack, Some(abort), rollback, &before, None)
            }
        }
    }

    async fn execute(
        &mut self,
        scope: &CancelScope,
        before: &StateSnapshot,
        mapped: &MappedPlan,
        touched: &mut Touched,
    ) -> Result<(), AbortReason> {
        scope.check().map_err(AbortReason::Cancelled)?;

        // A cancelled apply may have partially landed, so mark before awaiting
        touched.options = true;
        let phase_started = Instant::now();
        match scope.run(self.store.apply_options(&mapped.options)).await {
            Ok(Ok(())) => self.record(ApplyPhase::ApplyOptions, PhaseStatus::Ok, phase_started, None),
            Ok(Err(e)) => {
                self.record(ApplyPhase::ApplyOptions, PhaseStatus::Failed, phase_started, Some(e.to_string()));
                return Err(AbortReason::Failed(e.to_string()));
            }
            Err(reason) => {
                self.record(ApplyPhase::ApplyOptions, PhaseStatus::Cancelled, phase_started, Some(reason.to_string()));
                return Err(AbortReason::Cancelled(reason));
            }
        }

        scope.check().map_err(AbortReason::Cancelled)?;
        self.reconcile_doh(scope, before, mapped, touched).await?;
        scope.check().map_err(AbortReason::Cancelled)?;
        Ok(())
    }

    /// Bring DoH in line with what the plan implies
    ///
    /// A DNS failure is logged and kept; only cancellation aborts.
    async fn reconcile_doh(
        &mut self,
        scope: &CancelScope,
        before: &StateSnapshot,
        mapped: &MappedPlan,
        touched: &mut Touched,
    ) -> Result<(), AbortReason> {
        let current = self.store.dns_state();
        let implied = if mapped.doh_requested {
            true
        } else if self.dns.disable_doh_when_not_planned {
            false
        } else {
            current.doh_enabled
        };

        if implied == current.doh_enabled {
            return Ok(());
        }

        let phase = if implied {
            ApplyPhase::EnableDoh
        } else {
            ApplyPhase::DisableDoh
        };
        let phase_started = Instant::now();

        if !self.dns.allow_doh_changes {
            info!("[APPLY] DNS change not permitted, leaving DoH {}", if current.doh_enabled { "on" } else { "off" });
            self.record(phase, PhaseStatus::Skipped, phase_started, Some("no consent".to_string()));
            return Ok(());
        }

        touched.dns = true;
        let result = if implied {
            let preset = if before.dns.dns_preset.is_empty() {
                self.dns.default_preset.clone()
            } else {
                before.dns.dns_preset.clone()
            };
            scope.run(self.store.enable_doh(&preset)).await
        } else {
            scope.run(self.store.disable_doh()).await
        };

        match result {
            Ok(Ok(())) => {
                self.record(phase, PhaseStatus::Ok, phase_started, None);
                Ok(())
            }
            Ok(Err(e)) => {
                warn!("[APPLY] {phase} failed, keeping new options: {e}");
                self.record(phase, PhaseStatus::Failed, phase_started, Some(e.to_string()));
                Ok(())
            }
            Err(reason) => {
                self.record(phase, PhaseStatus::Cancelled, phase_started, Some(reason.to_string()));
                Err(AbortReason::Cancelled(reason))
            }
        }
    }

    /// Restore `before`, step by step
    ///
    /// Not raced against the scope: by the time we get here it has usually
    /// fired.
    async fn rollback(&mut self, before: &StateSnapshot, touched: Touched) -> RollbackStatus {
        if !touched.any() {
            debug!("[APPLY] rollback not needed");
            return RollbackStatus::NotNeeded;
        }

        let mut failures = Vec::new();

        if touched.options {
            let phase_started = Instant::now();
            match self.store.apply_options(&before.options).await {
                Ok(()) => self.record(ApplyPhase::RollbackOptions, PhaseStatus::Ok, phase_started, None),
                Err(e) => {
                    error!("[APPLY] rollback of options failed: {e}");
                    self.record(ApplyPhase::RollbackOptions, PhaseStatus::Failed, phase_started, Some(e.to_string()));
                    failures.push(format!("options: {e}"));
                }
            }
        }

        if touched.dns {
            let phase_started = Instant::now();
            match self.store.restore_dns_state(&before.dns).await {
                Ok(()) => self.record(ApplyPhase::RollbackDns, PhaseStatus::Ok, phase_started, None),
                Err(e) => {
                    error!("[APPLY] rollback of DNS failed: {e}");
                    self.record(ApplyPhase::RollbackDns, PhaseStatus::Failed, phase_started, Some(e.to_string()));
                    failures.push(format!("dns: {e}"));
                }
            }
        }

        if failures.is_empty() {
            info!("[APPLY] rolled back to: {}", before.summary());
            RollbackStatus::Done
        } else {
            RollbackStatus::Failed(failures.join("; "))
        }
    }

    fn record(&mut self, phase: ApplyPhase, status: PhaseStatus, started: Instant, detail: Option<String>) {
        let elapsed_ms = elapsed_ms(started);
        debug!(%phase, ?status, elapsed_ms, "[APPLY] phase");
        self.phases.push(PhaseRecord {
            phase,
            status,
            elapsed_ms,
            detail,
        });
    }

    fn finish(
        self,
        status: ApplyStatus,
        abort: Option<AbortReason>,
        rollback: RollbackStatus,
        before: &StateSnapshot,
        committed: Option<MappedPlan>,
    ) -> TransactionReport {
        let after = self.store.snapshot();
        let skipped_strategies = committed.as_ref().map(|m| m.skipped.clone()).unwrap_or_default();
        let outcome = ApplyOutcome {
            host_key: self.host_key,
            applied_strategy_text: after.options.summary(),
            plan_text: self.plan.plan_text(),
            reasoning: self.plan.reasoning.clone(),
            status,
            abort,
            skip: None,
            rollback,
            state_before: Some(before.summary()),
            state_after: Some(after.summary()),
            skipped_strategies,
            phases: self.phases,
        };
        TransactionReport { outcome, committed }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gdpi_core::{CancelReason, StrategyId};
    use gdpi_platform::{DnsController, InMemoryDns, InMemoryPacketEngine, PacketEngine};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct Fixture {
        engine: Arc<InMemoryPacketEngine>,
        dns: Arc<InMemoryDns>,
        store: OptionsStore,
    }

    fn fixture() -> Fixture {
        let engine = Arc::new(InMemoryPacketEngine::default());
        let dns = Arc::new(InMemoryDns::default());
        let store = OptionsStore::new(engine.clone(), dns.clone());
        Fixture { engine, dns, store }
    }

    fn transaction(fx: &Fixture, plan: BypassPlan) -> PlanTransaction {
        PlanTransaction::new(1, "example.com", plan, fx.store.clone(), PresetCatalog::default(), DnsConfig::default())
    }

    fn statuses(outcome: &ApplyOutcome) -> Vec<(ApplyPhase, PhaseStatus)> {
        outcome.phases.iter().map(|p| (p.phase, p.status)).collect()
    }

    // ===== Commit Tests =====

    #[tokio::test]
    async fn test_commit_fragment_and_drop_rst() {
        let fx = fixture();
        let plan = BypassPlan::new("SNI filtering")
            .with_strategy(StrategyId::TlsFragment)
            .with_strategy(StrategyId::DropRst);

        let report = transaction(&fx, plan).run(CancelScope::with_timeout(Duration::from_secs(5))).await;

        assert_eq!(report.outcome.status, ApplyStatus::Applied);
        assert_eq!(report.outcome.rollback, RollbackStatus::NotNeeded);
        assert_eq!(report.outcome.applied_strategy_text, "Fragment + DROP RST");
        assert!(report.committed.is_some());
        let live = fx.engine.options_snapshot();
        assert!(live.fragment_enabled());
        assert!(!live.disorder_enabled());
        assert!(live.drop_rst);
    }

    #[tokio::test]
    async fn test_commit_enables_doh() {
        let fx = fixture();
        let plan = BypassPlan::new("DNS poisoning").with_strategy(StrategyId::UseDoh);

        let report = transaction(&fx, plan).run(CancelScope::with_timeout(Duration::from_secs(5))).await;

        assert!(report.outcome.is_applied());
        assert!(fx.dns.dns_state().doh_enabled);
        assert!(statuses(&report.outcome).contains(&(ApplyPhase::EnableDoh, PhaseStatus::Ok)));
    }

    #[tokio::test]
    async fn test_doh_failure_keeps_options() {
        let fx = fixture();
        fx.dns.set_fail_apply(true);
        let plan = BypassPlan::new("mixed")
            .with_strategy(StrategyId::TlsDisorder)
            .with_strategy(StrategyId::UseDoh);

        let report = transaction(&fx, plan).run(CancelScope::with_timeout(Duration::from_secs(5))).await;

        assert_eq!(report.outcome.status, ApplyStatus::Applied);
        assert!(fx.engine.options_snapshot().disorder_enabled());
        assert!(!fx.dns.dns_state().doh_enabled);
        assert!(statuses(&report.outcome).contains(&(ApplyPhase::EnableDoh, PhaseStatus::Failed)));
    }

    #[tokio::test]
    async fn test_doh_change_needs_consent() {
        let fx = fixture();
        let plan = BypassPlan::new("DNS poisoning").with_strategy(StrategyId::UseDoh);
        let dns = DnsConfig {
            allow_doh_changes: false,
            ..DnsConfig::default()
        };
        let tx = PlanTransaction::new(2, "example.com", plan, fx.store.clone(), PresetCatalog::default(), dns);

        let report = tx.run(CancelScope::with_timeout(Duration::from_secs(5))).await;

        assert!(report.outcome.is_applied());
        assert!(!fx.dns.dns_state().doh_enabled);
        assert!(statuses(&report.outcome).contains(&(ApplyPhase::EnableDoh, PhaseStatus::Skipped)));
    }

    #[tokio::test]
    async fn test_doh_kept_when_not_planned() {
        let fx = fixture();
        fx.dns.apply_doh("Cloudflare").await.unwrap();
        let plan = BypassPlan::new("RST").with_strategy(StrategyId::DropRst);

        let report = transaction(&fx, plan).run(CancelScope::with_timeout(Duration::from_secs(5))).await;

        assert!(report.outcome.is_applied());
        assert!(fx.dns.dns_state().doh_enabled);
    }

    // ===== Rollback Tests =====

    #[tokio::test]
    async fn test_engine_failure_rolls_back() {
        let fx = fixture();
        fx.engine.fail_next(1);
        let before = fx.store.snapshot();
        let plan = BypassPlan::new("x").with_strategy(StrategyId::TlsFragment);

        let report = transaction(&fx, plan).run(CancelScope::with_timeout(Duration::from_secs(5))).await;

        assert_eq!(report.outcome.status, ApplyStatus::RolledBack);
        assert!(matches!(report.outcome.abort, Some(AbortReason::Failed(_))));
        assert_eq!(report.outcome.rollback, RollbackStatus::Done);
        assert_eq!(fx.store.snapshot(), before);
        assert!(report.committed.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_during_apply_rolls_back() {
        let fx = fixture();
        fx.engine.set_delay(Duration::from_secs(30));
        let before = fx.store.snapshot();
        let plan = BypassPlan::new("x").with_strategy(StrategyId::TlsDisorder);

        let report = transaction(&fx, plan)
            .run(CancelScope::with_timeout(Duration::from_secs(1)))
            .await;

        assert_eq!(report.outcome.abort, Some(AbortReason::Cancelled(CancelReason::Timeout)));
        assert_eq!(report.outcome.status, ApplyStatus::RolledBack);
        assert_eq!(fx.store.snapshot().options, before.options);
        assert!(statuses(&report.outcome).contains(&(ApplyPhase::ApplyOptions, PhaseStatus::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_doh_restores_dns() {
        let fx = fixture();
        fx.dns.set_delay(Duration::from_secs(10));
        let before = fx.store.snapshot();
        let plan = BypassPlan::new("x")
            .with_strategy(StrategyId::TlsFragment)
            .with_strategy(StrategyId::UseDoh);

        let token = CancellationToken::new();
        let scope = CancelScope::new(token.clone(), Duration::from_secs(60));
        let handle = tokio::spawn(transaction(&fx, plan).run(scope));
        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();
        let report = handle.await.unwrap();

        assert_eq!(report.outcome.abort, Some(AbortReason::Cancelled(CancelReason::User)));
        assert_eq!(report.outcome.rollback, RollbackStatus::Done);
        assert_eq!(fx.store.snapshot(), before);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_is_skipped() {
        let fx = fixture();
        let token = CancellationToken::new();
        token.cancel();
        let plan = BypassPlan::new("x").with_strategy(StrategyId::DropRst);

        let report = transaction(&fx, plan)
            .run(CancelScope::new(token, Duration::from_secs(5)))
            .await;

        assert_eq!(report.outcome.status, ApplyStatus::Skipped);
        assert_eq!(report.outcome.skip, Some(SkipReason::CancelledBeforeStart));
        assert!(fx.engine.applied().is_empty());
    }

    #[tokio::test]
    async fn test_rollback_failure_is_reported() {
        let fx = fixture();
        fx.engine.set_fail_always(true);
        let plan = BypassPlan::new("x").with_strategy(StrategyId::TlsFragment);

        let report = transaction(&fx, plan).run(CancelScope::with_timeout(Duration::from_secs(5))).await;

        assert_eq!(report.outcome.status, ApplyStatus::RolledBack);
        assert!(matches!(report.outcome.rollback, RollbackStatus::Failed(_)));
    }
}
