//! Integration tests for the autopilot and post-apply verification

use async_trait::async_trait;
use mockall::mock;
use parking_lot::Mutex;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use gdpi_core::outcome::CooldownKind;
use gdpi_core::{BypassPlan, Config, RiskLevel, StrategyAction, StrategyId};
use gdpi_orchestrator::{AutoApplyDecision, Orchestrator, SessionEvent, SkipReason};
use gdpi_platform::{
    HostDiscovered, InMemoryDns, InMemoryPacketEngine, PacketEngine, RetestSink, StaticProbe, StaticResolver,
};

mock! {
    pub Sink {}

    #[async_trait]
    impl RetestSink for Sink {
        async fn enqueue_host(&self, host: HostDiscovered) -> gdpi_platform::Result<()>;
    }
}

fn auto_config() -> Config {
    let mut config = Config::default();
    config.auto_apply.enabled = true;
    config
}

fn confident_plan(id: StrategyId) -> BypassPlan {
    BypassPlan::new("TLS interference").with_strategy(id).with_confidence(90)
}

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

struct Harness {
    session: Orchestrator,
    engine: Arc<InMemoryPacketEngine>,
    events: Arc<Mutex<Vec<SessionEvent>>>,
}

fn harness_with_sink(config: Config, sink: Arc<dyn RetestSink>) -> Harness {
    let engine = Arc::new(InMemoryPacketEngine::default());
    let resolver = StaticResolver::new();
    resolver.insert("example.com", vec![ip("93.184.216.34")]);
    let events = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&events);

    let session = Orchestrator::builder(config, engine.clone(), Arc::new(InMemoryDns::default()), sink)
        .resolver(Arc::new(resolver))
        .outcome_probe(Arc::new(StaticProbe::new(true)))
        .notifier(Arc::new(move |event| recorder.lock().push(event)))
        .build()
        .unwrap();

    Harness {
        session,
        engine,
        events,
    }
}

fn harness(config: Config) -> Harness {
    let mut sink = MockSink::new();
    sink.expect_enqueue_host().returning(|_| Ok(()));
    harness_with_sink(config, Arc::new(sink))
}

// ===== Dispatch Tests =====

#[tokio::test(start_paused = true)]
async fn test_discovery_applies_to_registrable_domain() {
    let h = harness(auto_config());

    let decision = h
        .session
        .on_plan_discovered("cdn.static.example.com", confident_plan(StrategyId::TlsFragment));
    assert_eq!(
        decision,
        AutoApplyDecision::Dispatched {
            target: "example.com".to_string(),
            signature: "TlsFragment|U0|N0".to_string(),
        }
    );

    h.session.wait_idle().await;
    assert!(h.engine.options_snapshot().fragment_enabled());
    let history = h.session.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].host_key, "example.com");
}

#[tokio::test(start_paused = true)]
async fn test_disabled_by_default() {
    let h = harness(Config::default());
    let decision = h
        .session
        .on_plan_discovered("example.com", confident_plan(StrategyId::TlsFragment));
    assert_eq!(decision, AutoApplyDecision::Skipped(SkipReason::AutoApplyDisabled));

    h.session.set_auto_apply_enabled(true);
    assert!(h
        .session
        .on_plan_discovered("example.com", confident_plan(StrategyId::TlsFragment))
        .is_dispatched());
}

#[tokio::test(start_paused = true)]
async fn test_two_events_within_min_interval_dispatch_once() {
    let h = harness(auto_config());

    let first = h
        .session
        .on_plan_discovered("a.example.com", confident_plan(StrategyId::TlsFragment));
    h.session.wait_idle().await;
    tokio::time::advance(Duration::from_secs(2)).await;
    let second = h
        .session
        .on_plan_discovered("b.example.com", confident_plan(StrategyId::TlsDisorder));

    assert!(first.is_dispatched());
    assert!(matches!(
        second,
        AutoApplyDecision::Skipped(SkipReason::Cooldown {
            window: CooldownKind::MinInterval,
            ..
        })
    ));
    h.session.wait_idle().await;
    assert_eq!(h.engine.applied().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_signature_gating_after_success() {
    let h = harness(auto_config());

    assert!(h
        .session
        .on_plan_discovered("example.com", confident_plan(StrategyId::TlsFragment))
        .is_dispatched());
    h.session.wait_idle().await;

    // Same plan after the general cooldown but inside the success cooldown
    tokio::time::advance(Duration::from_secs(60)).await;
    let same = h
        .session
        .on_plan_discovered("example.com", confident_plan(StrategyId::TlsFragment));
    assert!(matches!(
        same,
        AutoApplyDecision::Skipped(SkipReason::Cooldown {
            window: CooldownKind::AfterSuccess,
            ..
        })
    ));

    // A different plan is allowed
    let changed = h
        .session
        .on_plan_discovered("example.com", confident_plan(StrategyId::TlsDisorder));
    assert!(changed.is_dispatched());
    h.session.wait_idle().await;

    // And the success cooldown expires
    tokio::time::advance(Duration::from_secs(181)).await;
    assert!(h
        .session
        .on_plan_discovered("example.com", confident_plan(StrategyId::TlsDisorder))
        .is_dispatched());
    h.session.wait_idle().await;
    assert_eq!(h.engine.applied().len(), 3);
}

// ===== Filter Tests =====

#[tokio::test(start_paused = true)]
async fn test_noise_events_only_skip() {
    let h = harness(auto_config());
    for host in ["rr3.sn-abc.1e100.net", "stats.g.doubleclick.net", "4.3.2.1.in-addr.arpa", "printer.local"] {
        let decision = h
            .session
            .on_plan_discovered(host, confident_plan(StrategyId::TlsFragment));
        assert_eq!(decision, AutoApplyDecision::Skipped(SkipReason::NoiseHost), "{host}");
    }
    h.session.wait_idle().await;
    assert!(h.engine.applied().is_empty());
    assert!(h.session.promoted_suffixes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_policy_filters_plan() {
    let h = harness(auto_config());

    let low = BypassPlan::new("x").with_strategy(StrategyId::TlsFragment).with_confidence(30);
    assert!(matches!(
        h.session.on_plan_discovered("example.com", low),
        AutoApplyDecision::Skipped(SkipReason::Policy { .. })
    ));

    let risky = BypassPlan::new("x")
        .with_strategy(StrategyAction::new(StrategyId::TlsFragment).with_risk(RiskLevel::High))
        .with_strategy(StrategyId::TlsFakeTtl)
        .with_confidence(95);
    assert!(matches!(
        h.session.on_plan_discovered("example.com", risky),
        AutoApplyDecision::Skipped(SkipReason::Policy { .. })
    ));

    let mixed = BypassPlan::new("x")
        .with_strategy(StrategyId::TlsFakeTtl)
        .with_strategy(StrategyId::DropRst)
        .with_allow_no_sni(true)
        .with_confidence(95);
    assert!(h.session.on_plan_discovered("example.com", mixed).is_dispatched());
    h.session.wait_idle().await;

    let live = h.engine.options_snapshot();
    assert!(live.drop_rst);
    assert!(!live.fake);
    assert!(!live.allow_no_sni);
}

#[tokio::test(start_paused = true)]
async fn test_skips_while_manual_apply_running() {
    let h = harness(auto_config());
    h.engine.set_delay(Duration::from_secs(2));

    let session = h.session.clone();
    let manual = tokio::spawn(async move {
        session
            .apply_plan(
                BypassPlan::new("manual").with_strategy(StrategyId::TlsDisorder),
                "other.org",
                None,
                gdpi_orchestrator::CancellationToken::new(),
            )
            .await
            .unwrap()
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let decision = h
        .session
        .on_plan_discovered("example.com", confident_plan(StrategyId::TlsFragment));
    assert_eq!(decision, AutoApplyDecision::Skipped(SkipReason::ManualApplyRunning));

    assert!(manual.await.unwrap().is_applied());
    assert!(h.engine.options_snapshot().disorder_enabled());
}

// ===== Verification Tests =====

#[tokio::test(start_paused = true)]
async fn test_retest_enqueued_after_auto_apply() {
    let mut sink = MockSink::new();
    sink.expect_enqueue_host()
        .withf(|unit| unit.key == "93.184.216.34:443:TCP" && unit.sni.as_deref() == Some("example.com"))
        .times(1)
        .returning(|_| Ok(()));
    let h = harness_with_sink(auto_config(), Arc::new(sink));

    assert!(h
        .session
        .on_plan_discovered("www.example.com", confident_plan(StrategyId::TlsFragment))
        .is_dispatched());
    h.session.wait_idle().await;

    let events = h.events.lock();
    assert!(events.contains(&SessionEvent::RetestEnqueued {
        target: "example.com".to_string(),
        units: 1,
    }));
}

#[tokio::test(start_paused = true)]
async fn test_observed_addresses_preferred() {
    let mut sink = MockSink::new();
    sink.expect_enqueue_host()
        .withf(|unit| unit.ip == "10.0.0.5".parse::<IpAddr>().unwrap())
        .times(1)
        .returning(|_| Ok(()));
    let h = harness_with_sink(auto_config(), Arc::new(sink));
    h.session.record_observed_address("media.example.com", ip("10.0.0.5"));

    h.session
        .on_plan_discovered("media.example.com", confident_plan(StrategyId::DropRst));
    h.session.wait_idle().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_discards_pending_retests() {
    let mut sink = MockSink::new();
    sink.expect_enqueue_host().times(0);
    let h = harness_with_sink(auto_config(), Arc::new(sink));

    h.session
        .apply_plan(
            confident_plan(StrategyId::TlsFragment),
            "example.com",
            None,
            gdpi_orchestrator::CancellationToken::new(),
        )
        .await
        .unwrap();
    // Verification waits before resolving; shut down inside that delay
    h.session.shutdown().await;
}
