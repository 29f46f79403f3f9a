//! Session context
//!
//! Owns every piece of mutable orchestration state for one diagnosis
//! session: the two gates, the throttle map, grouping, discovered plans,
//! the preset catalog and the apply history. Manual applies and the
//! autopilot both end up in [`Inner::run_transaction`].

use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use gdpi_core::domain::{is_host_in_suffix, normalize_host, resolve_target_host};
use gdpi_core::grouping::{merge_cards, DomainFamilyGrouping, DomainGroupCatalog, DomainGroupLearner, ResultCard};
use gdpi_core::persist::{PersistedSettings, StateStore};
use gdpi_core::preset::{normalize_sizes_or_default, FragmentPreset};
use gdpi_core::{
    AbortReason, ApplyOutcome, ApplyStatus, BypassPlan, Config, Error, NoiseHostFilter, PresetCatalog, Result,
    RollbackStatus, SkipReason, StateSnapshot,
};
use gdpi_platform::{
    DnsController, HostResolver, ObservedAddressCache, OutcomeProbe, PacketEngine, RetestSink, SystemResolver,
};

use crate::cancel::CancelScope;
use crate::gate::{ApplyGate, GateHandle};
use crate::notify::{ApplyOrigin, NoopNotifier, Notifier, SessionEvent};
use crate::plans::PlanBook;
use crate::policy::AutoApplyPolicy;
use crate::store::OptionsStore;
use crate::throttle::{AutoApplyThrottler, Reservation};
use crate::transaction::{PlanTransaction, TransactionReport};
use crate::verify::VerificationScheduler;

/// What the autopilot did with a discovery event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoApplyDecision {
    /// An apply was queued on a background task
    Dispatched {
        /// Normalized apply target
        target: String,
        /// Signature of the narrowed plan
        signature: String,
    },
    /// Nothing was queued
    Skipped(SkipReason),
}

impl AutoApplyDecision {
    /// Whether an apply was queued
    pub fn is_dispatched(&self) -> bool {
        matches!(self, Self::Dispatched { .. })
    }
}

/// Builder for [`Orchestrator`]
pub struct OrchestratorBuilder {
    config: Config,
    engine: Arc<dyn PacketEngine>,
    dns: Arc<dyn DnsController>,
    sink: Arc<dyn RetestSink>,
    resolver: Option<Arc<dyn HostResolver>>,
    probe: Option<Arc<dyn OutcomeProbe>>,
    notifier: Option<Arc<dyn Notifier>>,
    noise: Option<NoiseHostFilter>,
    state_store: Option<StateStore>,
}

impl OrchestratorBuilder {
    /// Name resolution for verification (system resolver by default)
    #[must_use]
    pub fn resolver(mut self, resolver: Arc<dyn HostResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Probe run after auto-applies
    #[must_use]
    pub fn outcome_probe(mut self, probe: Arc<dyn OutcomeProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Event receiver
    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Noise filter (built from config otherwise)
    #[must_use]
    pub fn noise_filter(mut self, noise: NoiseHostFilter) -> Self {
        self.noise = Some(noise);
        self
    }

    /// State directory handling (from config otherwise)
    #[must_use]
    pub fn state_store(mut self, store: StateStore) -> Self {
        self.state_store = Some(store);
        self
    }

    /// Build the session
    ///
    /// Fails only when the configured noise patterns do not compile.
    pub fn build(self) -> Result<Orchestrator> {
        let config = self.config;
        let noise = match self.noise {
            Some(noise) => noise,
            None => NoiseHostFilter::from_config(&config.noise)?,
        };
        let noise = Arc::new(noise);

        let state_store = self.state_store.unwrap_or_else(|| match &config.persistence.state_dir {
            Some(dir) if config.persistence.enabled => StateStore::new(dir.clone()),
            _ => StateStore::disabled(),
        });

        let profile_sizes = normalize_sizes_or_default(&config.apply.profile_fragment_sizes);
        let mut presets = PresetCatalog::builtin(&profile_sizes);
        let settings = state_store.load_settings();
        if let Some(choice) = &settings.last_preset {
            if presets.find(&choice.name).is_none() && presets.find_by_sizes(&choice.sizes).is_none() {
                presets.register(FragmentPreset::new(&choice.name, &choice.sizes, "restored"));
            }
        }

        let resolver = self.resolver.unwrap_or_else(|| Arc::new(SystemResolver) as Arc<dyn HostResolver>);
        let verifier = VerificationScheduler::new(
            config.verification.clone(),
            ObservedAddressCache::new(config.verification.cache_ttl()),
            resolver,
            self.sink,
        );

        let inner = Inner {
            store: OptionsStore::new(self.engine, self.dns),
            presets: RwLock::new(presets),
            manual_gate: ApplyGate::new("manual"),
            auto_gate: ApplyGate::new("auto"),
            manual_running: AtomicUsize::new(0),
            auto_enabled: AtomicBool::new(config.auto_apply.enabled),
            throttler: AutoApplyThrottler::from_config(&config.auto_apply),
            policy: AutoApplyPolicy::from_config(&config.auto_apply, config.dns.allow_doh_changes),
            families: DomainFamilyGrouping::from_config(&config.grouping, Arc::clone(&noise)),
            learner: DomainGroupLearner::from_config(&config.grouping, state_store.load_groups()),
            noise,
            plans: Mutex::new(PlanBook::default()),
            history: Mutex::new(VecDeque::new()),
            verifier,
            probe: self.probe,
            notifier: self.notifier.unwrap_or_else(|| Arc::new(NoopNotifier) as Arc<dyn Notifier>),
            state_store,
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
            next_tx: AtomicU64::new(1),
            config,
        };

        Ok(Orchestrator { inner: Arc::new(inner) })
    }
}

/// Apply engine for one session
///
/// Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    store: OptionsStore,
    presets: RwLock<PresetCatalog>,
    noise: Arc<NoiseHostFilter>,
    manual_gate: ApplyGate,
    auto_gate: ApplyGate,
    manual_running: AtomicUsize,
    auto_enabled: AtomicBool,
    throttler: AutoApplyThrottler,
    policy: AutoApplyPolicy,
    families: DomainFamilyGrouping,
    learner: DomainGroupLearner,
    plans: Mutex<PlanBook>,
    history: Mutex<VecDeque<ApplyOutcome>>,
    verifier: VerificationScheduler,
    probe: Option<Arc<dyn OutcomeProbe>>,
    notifier: Arc<dyn Notifier>,
    state_store: StateStore,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    next_tx: AtomicU64,
}

/// Counts a manual apply as pending or running until dropped
struct ManualRunning<'a>(&'a AtomicUsize);

impl<'a> ManualRunning<'a> {
    fn enter(count: &'a AtomicUsize) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self(count)
    }
}

impl Drop for ManualRunning<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Orchestrator {
    /// Start building a session around the external collaborators
    pub fn builder(
        config: Config,
        engine: Arc<dyn PacketEngine>,
        dns: Arc<dyn DnsController>,
        sink: Arc<dyn RetestSink>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            engine,
            dns,
            sink,
            resolver: None,
            probe: None,
            notifier: None,
            noise: None,
            state_store: None,
        }
    }

    // ===== Manual API =====

    /// Apply a plan to `host_key` under a deadline and a cancellation signal
    ///
    /// Waits for any other manual apply first. Every outcome, including
    /// cancellation and failure, is a value; only an empty host key is an
    /// error.
    #[instrument(skip(self, plan, cancel), fields(plan = %plan.plan_text()))]
    pub async fn apply_plan(
        &self,
        plan: BypassPlan,
        host_key: &str,
        timeout: Option<Duration>,
        cancel: CancellationToken,
    ) -> Result<ApplyOutcome> {
        let host_key = normalize_host(host_key);
        if host_key.is_empty() {
            return Err(Error::invalid_input("host key is empty"));
        }

        if self.inner.noise.is_noise(&host_key) {
            debug!("Noise target ignored: {host_key}");
            return Ok(ApplyOutcome::skipped(host_key, &plan, SkipReason::NoiseHost));
        }
        if !plan.has_applicable_actions() {
            info!("[APPLY] nothing to apply for {host_key}");
            return Ok(ApplyOutcome::skipped(host_key, &plan, SkipReason::NoApplicableActions));
        }

        if let Some(last) = self.inner.plans.lock().last_diagnosed() {
            if !is_host_in_suffix(last, &host_key) && last != host_key {
                warn!("[APPLY] target {host_key} differs from last diagnosed host {last}, applying anyway");
            }
        }

        let running = ManualRunning::enter(&self.inner.manual_running);
        let gate = tokio::select! {
            biased;
            gate = self.inner.manual_gate.acquire() => gate,
            () = cancel.cancelled() => {
                info!("[APPLY] cancelled while queued: host={host_key}");
                return Ok(ApplyOutcome::skipped(host_key, &plan, SkipReason::CancelledBeforeStart));
            }
        };

        // The deadline covers the apply itself, not the wait in the queue
        let timeout = timeout.unwrap_or_else(|| self.inner.config.apply.timeout());
        let scope = CancelScope::new(cancel, timeout);
        let outcome = self
            .inner
            .run_transaction(host_key, plan, scope, ApplyOrigin::Manual, gate)
            .await;
        drop(running);
        Ok(outcome)
    }

    /// Apply the stored plan for a domain suffix
    ///
    /// Picks among plans discovered for the suffix or its subdomains.
    pub async fn apply_plan_for_domain(&self, suffix: &str, cancel: CancellationToken) -> Result<ApplyOutcome> {
        let suffix = normalize_host(suffix);
        if suffix.is_empty() {
            return Err(Error::invalid_input("domain suffix is empty"));
        }

        let selected = self.inner.plans.lock().select_for_suffix(&suffix);
        let Some((source, plan)) = selected else {
            info!("[APPLY] no stored plan for {suffix}");
            return Ok(ApplyOutcome::skipped(suffix, &BypassPlan::default(), SkipReason::NoPlanForDomain));
        };

        info!("[APPLY] domain apply: suffix={suffix}; plan from {source}");
        self.apply_plan(plan, &suffix, None, cancel).await
    }

    /// Target a manual "apply to domain" should use for `host`
    ///
    /// The promoted family suffix if there is one, else the host itself.
    pub fn effective_target(&self, host: &str) -> String {
        self.inner.families.effective_target(host, Instant::now().into_std())
    }

    // ===== Discovery =====

    /// Handle a `{host, plan}` event from the diagnosis engine
    ///
    /// Records the plan, feeds grouping and, when the autopilot is on and
    /// every check passes, queues a background apply.
    pub fn on_plan_discovered(&self, host_key: &str, plan: BypassPlan) -> AutoApplyDecision {
        let inner = &self.inner;
        let host = normalize_host(host_key);
        if host.is_empty() {
            return inner.skip_auto(host_key, SkipReason::Policy {
                reason: "empty host key".to_string(),
            });
        }
        if inner.noise.is_noise(&host) {
            debug!("[AUTO_APPLY] noise host ignored: {host}");
            return inner.skip_auto(&host, SkipReason::NoiseHost);
        }

        inner.plans.lock().record(&host, plan.clone());
        inner.observe_groups(&host);

        if !inner.auto_enabled.load(Ordering::SeqCst) {
            return AutoApplyDecision::Skipped(SkipReason::AutoApplyDisabled);
        }

        let auto_plan = match inner.policy.filter(&plan) {
            Ok(auto_plan) => auto_plan,
            Err(reason) => {
                info!("[AUTO_APPLY] Skip (policy {reason}): from={host}");
                return inner.skip_auto(&host, SkipReason::Policy { reason });
            }
        };
        if !auto_plan.has_applicable_actions() {
            return inner.skip_auto(&host, SkipReason::NoApplicableActions);
        }

        let Some(target) = resolve_target_host(&host) else {
            return inner.skip_auto(&host, SkipReason::Policy {
                reason: "no target".to_string(),
            });
        };

        if inner.manual_running.load(Ordering::SeqCst) > 0 {
            info!("[AUTO_APPLY] Skip (manual apply running): target={target}; from={host}");
            return inner.skip_auto(&host, SkipReason::ManualApplyRunning);
        }
        if inner.auto_gate.is_busy() {
            debug!("[AUTO_APPLY] Skip (busy): target={target}; from={host}");
            return inner.skip_auto(&host, SkipReason::AutoApplyBusy);
        }

        let signature = auto_plan.signature();
        let reservation = match inner.throttler.try_reserve(&target, &signature, Instant::now()) {
            Ok(reservation) => reservation,
            Err(reason) => {
                info!("[AUTO_APPLY] Skip ({reason}): target={target}; from={host}");
                return inner.skip_auto(&host, reason);
            }
        };

        debug!("[AUTO_APPLY] dispatch: target={target}; sig={signature}; from={host}");
        let task_inner = Arc::clone(inner);
        inner
            .tasks
            .spawn(async move { task_inner.auto_apply(reservation, host, auto_plan).await });

        AutoApplyDecision::Dispatched { target, signature }
    }

    /// Record an address the capture side saw for a host name
    pub fn record_observed_address(&self, hostname: &str, ip: IpAddr) {
        self.inner.verifier.cache().record(hostname, ip);
    }

    // ===== Settings & State =====

    /// Switch the autopilot on or off
    pub fn set_auto_apply_enabled(&self, enabled: bool) {
        let previous = self.inner.auto_enabled.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            info!("[AUTO_APPLY] {}", if enabled { "enabled" } else { "disabled" });
        }
    }

    /// Whether the autopilot is on
    pub fn is_auto_apply_enabled(&self) -> bool {
        self.inner.auto_enabled.load(Ordering::SeqCst)
    }

    /// Whether a manual apply is pending or running
    pub fn is_manual_apply_running(&self) -> bool {
        self.inner.manual_running.load(Ordering::SeqCst) > 0
    }

    /// Current live state
    pub fn current_state(&self) -> StateSnapshot {
        self.inner.store.snapshot()
    }

    /// Known fragment presets, including synthesized ones
    pub fn presets(&self) -> PresetCatalog {
        self.inner.presets.read().clone()
    }

    /// Finished applies, oldest first
    pub fn history(&self) -> Vec<ApplyOutcome> {
        self.inner.history.lock().iter().cloned().collect()
    }

    /// Suffixes currently promoted to family targets
    pub fn promoted_suffixes(&self) -> Vec<String> {
        self.inner.families.promoted_suffixes(Instant::now().into_std())
    }

    /// Pinned and learned domain groups
    pub fn group_catalog(&self) -> DomainGroupCatalog {
        self.inner.learner.catalog()
    }

    /// Fold per-host result cards by effective target
    pub fn merge_result_cards(&self, cards: &[ResultCard]) -> Vec<ResultCard> {
        let now = Instant::now().into_std();
        merge_cards(cards, |host| self.inner.families.effective_target(host, now))
    }

    /// Session configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Stop background work and wait for it
    ///
    /// Transactions already running still finish or roll back; pending
    /// re-test units are dropped.
    pub async fn shutdown(&self) {
        info!("Shutting down apply session");
        self.inner.shutdown.cancel();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;

        let catalog = self.inner.learner.catalog();
        if let Err(e) = self.inner.state_store.save_groups(&catalog) {
            warn!("[GROUPS] failed to persist catalog: {e}");
        }
    }

    /// Wait until every background task spawned so far has finished
    pub async fn wait_idle(&self) {
        loop {
            if self.inner.tasks.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("state", &self.inner.store)
            .field("auto_apply", &self.is_auto_apply_enabled())
            .field("targets", &self.inner.throttler.len())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn skip_auto(&self, host_key: &str, reason: SkipReason) -> AutoApplyDecision {
        self.notifier.notify(SessionEvent::AutoApplySkipped {
            host_key: host_key.to_string(),
            reason: reason.clone(),
        });
        AutoApplyDecision::Skipped(reason)
    }

    fn observe_groups(&self, host: &str) {
        let now = Instant::now().into_std();
        if let Some(suffix) = self.families.observe(host, now) {
            self.notifier.notify(SessionEvent::SuffixPromoted(suffix));
        }
        if let Some(group) = self.learner.observe(host, now) {
            self.notifier.notify(SessionEvent::GroupLearned(group));
        }
        if let Some(catalog) = self.learner.take_pending_persist(now) {
            if let Err(e) = self.state_store.save_groups(&catalog) {
                warn!("[GROUPS] failed to persist catalog: {e}");
            }
        }
    }

    /// Background half of an auto-apply
    async fn auto_apply(self: Arc<Self>, reservation: Reservation, source: String, plan: BypassPlan) {
        let target = reservation.target.clone();
        let _auto = self.auto_gate.acquire().await;

        if self.shutdown.is_cancelled() {
            return;
        }
        if !self.auto_enabled.load(Ordering::SeqCst) {
            self.skip_auto(&source, SkipReason::AutoApplyDisabled);
            return;
        }
        let plan = match self.policy.filter(&plan) {
            Ok(plan) => plan,
            Err(reason) => {
                info!("[AUTO_APPLY] Skip (policy {reason}): target={target}; from={source}");
                self.skip_auto(&source, SkipReason::Policy { reason });
                return;
            }
        };
        if !self.throttler.is_current(&reservation) {
            debug!("[AUTO_APPLY] Skip (superseded): target={target}; from={source}");
            return;
        }
        if self.manual_running.load(Ordering::SeqCst) > 0 {
            info!("[AUTO_APPLY] Skip (manual apply running): target={target}; from={source}");
            self.skip_auto(&source, SkipReason::ManualApplyRunning);
            return;
        }
        let Some(gate) = self.manual_gate.try_acquire() else {
            info!("[AUTO_APPLY] Skip (manual apply running): target={target}; from={source}");
            self.skip_auto(&source, SkipReason::ManualApplyRunning);
            return;
        };

        info!("[AUTO_APPLY] Start: target={target}; source={source}");
        let scope = CancelScope::new(self.shutdown.child_token(), self.config.apply.timeout());
        let outcome = self
            .run_transaction(target.clone(), plan, scope, ApplyOrigin::Auto, gate)
            .await;

        if outcome.status == ApplyStatus::Applied {
            self.throttler.record_success(&reservation, Instant::now());
            if self.config.auto_apply.outcome_probe {
                self.run_probe(&target).await;
            }
        } else if let Some(abort) = &outcome.abort {
            warn!("[AUTO_APPLY] FAILED: target={target}; error={abort}");
        }

        info!(
            "[AUTO_APPLY] Done: target={target}; status={}; applied='{}'",
            outcome.status, outcome.applied_strategy_text
        );
    }

    async fn run_probe(&self, target: &str) {
        let Some(probe) = &self.probe else {
            return;
        };
        let result = tokio::select! {
            () = self.shutdown.cancelled() => return,
            result = probe.probe(target) => result,
        };
        match result {
            Ok(result) if result.reachable => info!("[AUTO_APPLY] probe ok: target={target}; {}", result.detail),
            Ok(result) => warn!("[AUTO_APPLY] probe unreachable: target={target}; {}", result.detail),
            Err(e) => warn!("[AUTO_APPLY] probe failed: target={target}; error={e}"),
        }
    }

    /// Run one transaction on its own task
    ///
    /// The gate handle moves into the task, so the gate stays held until the
    /// transaction has committed or rolled back even if the caller goes away.
    async fn run_transaction(
        self: &Arc<Self>,
        host_key: String,
        plan: BypassPlan,
        scope: CancelScope,
        origin: ApplyOrigin,
        gate: GateHandle,
    ) -> ApplyOutcome {
        let id = self.next_tx.fetch_add(1, Ordering::SeqCst);
        let presets = self.presets.read().clone();
        let tx = PlanTransaction::new(id, host_key.clone(), plan.clone(), self.store.clone(), presets, self.config.dns.clone());

        self.notifier.notify(SessionEvent::ApplyStarted {
            host_key: host_key.clone(),
            origin,
        });

        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut gate = gate;
            let report = tx.run(scope).await;
            gate.release();
            inner.finish_transaction(&report, origin);
            report.outcome
        });

        match handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("[APPLY] transaction task died: tx={id}; error={e}");
                let mut outcome = ApplyOutcome::skipped(host_key, &plan, SkipReason::CancelledBeforeStart);
                outcome.status = ApplyStatus::RolledBack;
                outcome.skip = None;
                outcome.abort = Some(AbortReason::Failed(e.to_string()));
                outcome.rollback = RollbackStatus::Failed("unknown state".to_string());
                outcome
            }
        }
    }

    /// Commit bookkeeping, history and follow-up work
    fn finish_transaction(self: &Arc<Self>, report: &TransactionReport, origin: ApplyOrigin) {
        let outcome = &report.outcome;

        if let Some(mapped) = &report.committed {
            if let Some(preset) = &mapped.synthesized_preset {
                if self.presets.write().register(preset.clone()) {
                    info!("[APPLY] registered preset '{}' {:?}", preset.name, preset.sizes);
                }
            }
            let settings = PersistedSettings::from_options(&mapped.options);
            if let Err(e) = self.state_store.save_settings(&settings) {
                warn!("[APPLY] failed to persist settings: {e}");
            }
        }

        if outcome.status != ApplyStatus::Skipped {
            self.notifier.notify(SessionEvent::OptionsChanged(self.store.snapshot()));
        }

        {
            let mut history = self.history.lock();
            history.push_back(outcome.clone());
            while history.len() > self.config.apply.history_size.max(1) {
                history.pop_front();
            }
        }

        self.notifier.notify(SessionEvent::ApplyFinished {
            outcome: outcome.clone(),
            origin,
        });

        if outcome.is_applied() && self.config.verification.enabled {
            self.schedule_verification(outcome.host_key.clone());
        }
    }

    fn schedule_verification(self: &Arc<Self>, target: String) {
        let inner = Arc::clone(self);
        let cancel = self.shutdown.child_token();
        self.tasks.spawn(async move {
            let units = inner.verifier.verify(&target, &cancel).await;
            if units > 0 {
                inner.notifier.notify(SessionEvent::RetestEnqueued { target, units });
            }
        });
    }
}
