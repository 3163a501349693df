//! Remediation Scenario Tests
//!
//! End-to-end runs through the public API with scripted collaborators:
//! endpoint fallback, memory emergency, reload debounce and lifecycle.
//! Time is paused, so every delay resolves instantly and deterministically.

use healthd::background::{OrchestratorAction, ReloadPhase, Severity};
use healthd::config::ReloadConfig;
use healthd::host::scripted::{ProbeScript, RecordingReloadHost, ScriptedHost, ScriptedTransport};
use healthd::host::{HostProbe, ReloadHost};
use healthd::storage::InMemoryStore;
use healthd::{
    Collaborators, EndpointStatus, HealthOrchestrator, HealthSignal, ReloadKind, ReloadReason,
    ReloadSeverity, RuntimeConfig, SignalBus, SmartReloader,
};

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

struct Harness {
    orchestrator: Arc<HealthOrchestrator>,
    host: Arc<ScriptedHost>,
    transport: Arc<ScriptedTransport>,
    reload_host: Arc<RecordingReloadHost>,
}

fn harness() -> Harness {
    let host = Arc::new(ScriptedHost::new());
    let transport = Arc::new(ScriptedTransport::new());
    let reload_host = Arc::new(RecordingReloadHost::new("/rides/current"));

    let orchestrator = HealthOrchestrator::build(
        &RuntimeConfig::default(),
        Collaborators {
            host: Arc::clone(&host) as Arc<dyn HostProbe>,
            transport: Arc::clone(&transport) as _,
            reload_host: Arc::clone(&reload_host) as Arc<dyn ReloadHost>,
            persisted: Arc::new(InMemoryStore::new()),
            session: Arc::new(InMemoryStore::new()),
        },
    )
    .expect("default config builds");

    Harness { orchestrator, host, transport, reload_host }
}

fn drain(rx: &mut broadcast::Receiver<HealthSignal>) -> Vec<HealthSignal> {
    let mut seen = Vec::new();
    while let Ok(signal) = rx.try_recv() {
        seen.push(signal);
    }
    seen
}

#[derive(Default)]
struct CountingHook {
    activated: Mutex<Vec<String>>,
    restored: Mutex<Vec<String>>,
}

impl healthd::background::FallbackHook for CountingHook {
    fn activate_fallback(&self, endpoint: &str) {
        self.activated.lock().push(endpoint.to_string());
    }

    fn restore_primary(&self, endpoint: &str) {
        self.restored.lock().push(endpoint.to_string());
    }
}

// ============================================================================
// Endpoint fallback
// ============================================================================

/// Three consecutive failures mark the endpoint down and trip the fallback once.
#[tokio::test(start_paused = true)]
async fn test_persistent_endpoint_failure_activates_fallback_once() {
    let h = harness();
    let hook = Arc::new(CountingHook::default());
    h.orchestrator.api().register_fallback_hook(Arc::clone(&hook) as _);
    let mut rx = h.orchestrator.signals().subscribe();

    h.transport.script(
        "geocode",
        [ProbeScript::fail(50), ProbeScript::fail(60), ProbeScript::fail(70)],
    );

    let api = h.orchestrator.api();
    assert_eq!(api.force_check("geocode").await, Some(EndpointStatus::Degraded));
    assert_eq!(api.force_check("geocode").await, Some(EndpointStatus::Degraded));
    assert!(!api.should_use_fallback("geocode"));
    assert_eq!(api.force_check("geocode").await, Some(EndpointStatus::Down));

    assert!(api.should_use_fallback("geocode"));
    assert!(!api.is_endpoint_healthy("geocode"));
    assert_eq!(h.transport.calls("geocode"), 3);
    assert_eq!(*hook.activated.lock(), vec!["geocode".to_string()]);

    let activations: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter(|s| matches!(s, HealthSignal::FallbackActivated { .. }))
        .collect();
    assert_eq!(
        activations,
        vec![HealthSignal::FallbackActivated { endpoint: "geocode".to_string() }]
    );

    // The monitor saw every probe
    let stats = h.orchestrator.monitor().get_metrics().apis["geocode"].clone();
    assert_eq!(stats.consecutive_failures, 3);
    assert!(stats.success_rate < 1.0);
}

/// The next clean success releases the latch and calls the restore hook.
#[tokio::test(start_paused = true)]
async fn test_recovered_endpoint_restores_primary() {
    let h = harness();
    let hook = Arc::new(CountingHook::default());
    h.orchestrator.api().register_fallback_hook(Arc::clone(&hook) as _);

    h.transport.script(
        "directions",
        [
            ProbeScript::fail(10),
            ProbeScript::fail(10),
            ProbeScript::fail(10),
            ProbeScript::ok(120),
        ],
    );

    let api = h.orchestrator.api();
    for _ in 0..3 {
        api.force_check("directions").await;
    }
    assert!(api.should_use_fallback("directions"));

    assert_eq!(api.force_check("directions").await, Some(EndpointStatus::Up));
    assert!(!api.should_use_fallback("directions"));
    assert_eq!(*hook.restored.lock(), vec!["directions".to_string()]);
}

/// A probe exceeding the timeout counts as a failure even though it "answered".
#[tokio::test(start_paused = true)]
async fn test_slow_probe_is_a_failure() {
    let h = harness();
    h.transport.script("calculate-fare", [ProbeScript::ok(6_000)]);

    let status = h.orchestrator.api().force_check("calculate-fare").await;
    assert_eq!(status, Some(EndpointStatus::Degraded));
    assert_eq!(
        h.orchestrator.monitor().get_metrics().apis["calculate-fare"].consecutive_failures,
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_unknown_endpoint_is_not_probed() {
    let h = harness();
    assert_eq!(h.orchestrator.api().force_check("weather").await, None);
    assert_eq!(h.transport.calls("weather"), 0);
}

// ============================================================================
// Memory emergency
// ============================================================================

/// 96% memory while offline: one aggressive cleanup, then a critical memory restart.
#[tokio::test(start_paused = true)]
async fn test_memory_emergency_cleans_then_schedules_restart() {
    let h = harness();
    let mut rx = h.orchestrator.signals().subscribe();
    h.host.set_memory_percent(Some(96.0));
    h.host.set_online(Some(false));
    h.orchestrator.monitor().sample().await;

    let report = h.orchestrator.evaluate_and_act().await;
    assert_eq!(report.score, 20);
    assert_eq!(report.severity, Severity::Critical);

    let cleanups = report
        .actions
        .iter()
        .filter(|a| matches!(a, OrchestratorAction::AggressiveCleanup { .. }))
        .count();
    assert_eq!(cleanups, 1);
    assert!(report.actions.contains(&OrchestratorAction::AggressiveCleanup {
        usage_after: Some(96.0),
        still_critical: true,
    }));
    assert!(report.actions.contains(&OrchestratorAction::ReloadScheduled {
        kind: ReloadKind::Memory,
        severity: ReloadSeverity::Critical,
    }));

    let reloader = h.orchestrator.reloader();
    assert_eq!(reloader.phase(), ReloadPhase::Scheduled);
    assert_eq!(
        reloader.pending_reason().map(|r| r.kind),
        Some(ReloadKind::Memory)
    );

    let signals = drain(&mut rx);
    assert!(signals.iter().any(|s| matches!(s, HealthSignal::MemoryPressure { .. })));
    assert!(signals
        .iter()
        .any(|s| matches!(s, HealthSignal::MemoryCritical { usage_percent } if *usage_percent == 96.0)));
    assert!(signals.iter().any(|s| matches!(
        s,
        HealthSignal::ReloadScheduled { countdown_secs: 10, .. }
    )));

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(h.reload_host.restarts(), 1);
}

/// 96% memory with nothing else wrong scores in the moderate band and still
/// ends in a forced cleanup followed by a critical memory restart.
#[tokio::test(start_paused = true)]
async fn test_memory_alone_at_96_percent_schedules_restart() {
    let h = harness();
    let mut rx = h.orchestrator.signals().subscribe();
    h.host.set_memory_percent(Some(96.0));
    h.orchestrator.monitor().sample().await;

    let report = h.orchestrator.evaluate_and_act().await;
    assert_eq!(report.score, 50);
    assert_eq!(report.severity, Severity::Moderate);
    assert_eq!(
        report.actions,
        vec![
            OrchestratorAction::AggressiveCleanup {
                usage_after: Some(96.0),
                still_critical: true,
            },
            OrchestratorAction::ReloadScheduled {
                kind: ReloadKind::Memory,
                severity: ReloadSeverity::Critical,
            },
        ]
    );

    let reloader = h.orchestrator.reloader();
    assert_eq!(reloader.phase(), ReloadPhase::Scheduled);
    assert_eq!(
        reloader.pending_reason().map(|r| r.kind),
        Some(ReloadKind::Memory)
    );

    let signals = drain(&mut rx);
    assert!(signals.iter().any(|s| matches!(s, HealthSignal::MemoryPressure { .. })));
    assert!(signals
        .iter()
        .any(|s| matches!(s, HealthSignal::MemoryCritical { usage_percent } if *usage_percent == 96.0)));

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(h.reload_host.restarts(), 1);
}

/// A second emergency inside the reload cooldown does not schedule again.
#[tokio::test(start_paused = true)]
async fn test_repeated_emergency_is_throttled() {
    let h = harness();
    h.host.set_memory_percent(Some(97.0));
    h.host.set_online(Some(false));
    h.orchestrator.monitor().sample().await;

    let first = h.orchestrator.evaluate_and_act().await;
    assert!(first
        .actions
        .iter()
        .any(|a| matches!(a, OrchestratorAction::ReloadScheduled { .. })));

    h.orchestrator.reloader().cancel_reload();
    let second = h.orchestrator.evaluate_and_act().await;
    assert!(second
        .actions
        .contains(&OrchestratorAction::ReloadSuppressed { kind: ReloadKind::Memory }));
    assert_eq!(h.orchestrator.reloader().phase(), ReloadPhase::Idle);
}

// ============================================================================
// Reload debounce
// ============================================================================

/// Cancelling during the countdown prevents the restart; a new schedule is accepted.
#[tokio::test(start_paused = true)]
async fn test_cancelled_reload_never_fires() {
    let reload_host = Arc::new(RecordingReloadHost::new("/home"));
    let reloader = Arc::new(SmartReloader::new(
        ReloadConfig::default(),
        Arc::new(InMemoryStore::new()),
        Arc::clone(&reload_host) as Arc<dyn ReloadHost>,
        SignalBus::new(),
    ));
    let reason = || ReloadReason::new(ReloadKind::Update, ReloadSeverity::Medium, "New build");

    assert!(reloader.schedule_reload(reason(), Duration::from_millis(2000)));
    assert!(!reloader.schedule_reload(reason(), Duration::from_millis(100)));

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(reloader.cancel_reload());
    assert_eq!(reloader.phase(), ReloadPhase::Idle);

    tokio::time::sleep(Duration::from_millis(3000)).await;
    assert_eq!(reload_host.restarts(), 0);

    assert!(reloader.schedule_reload(reason(), Duration::from_millis(2000)));
    assert_eq!(reloader.phase(), ReloadPhase::Scheduled);
    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert_eq!(reload_host.restarts(), 1);
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Stopping cancels every loop and a pending restart timer.
#[tokio::test(start_paused = true)]
async fn test_stop_cancels_loops_and_pending_reload() {
    let h = harness();
    assert!(h.orchestrator.start());

    tokio::time::sleep(Duration::from_secs(1)).await;
    let reason = ReloadReason::new(ReloadKind::Update, ReloadSeverity::Low, "Pending update");
    assert!(h
        .orchestrator
        .reloader()
        .schedule_reload(reason, Duration::from_secs(30)));

    assert!(h.orchestrator.stop().await);
    let ticks = h.orchestrator.get_detailed_status().ticks;

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.reload_host.restarts(), 0);
    assert_eq!(h.orchestrator.reloader().phase(), ReloadPhase::Idle);
    assert_eq!(h.orchestrator.get_detailed_status().ticks, ticks);
    assert!(!h.orchestrator.is_running());

    // Initial sweep probed every registered endpoint exactly once
    for endpoint in ["geocode", "directions", "places-autocomplete", "calculate-fare"] {
        assert_eq!(h.transport.calls(endpoint), 1, "{endpoint}");
    }
}

/// Diagnostics sample, sweep and report without scheduling anything.
#[tokio::test(start_paused = true)]
async fn test_diagnostic_reports_current_state() {
    let h = harness();
    h.host.set_memory_percent(Some(42.0));
    h.transport.script("places-autocomplete", [ProbeScript::fail(30)]);

    let report = h.orchestrator.run_diagnostic().await;
    assert_eq!(report.endpoints.len(), 4);
    assert_eq!(report.memory_usage_percent, Some(42.0));
    assert_eq!(report.reload_phase, ReloadPhase::Idle);
    assert_eq!(
        report.sweep,
        healthd::background::SweepOutcome::Completed { checked: 4, healthy: 4 }
    );
    // One failure degrades without tripping the fallback
    assert_eq!(
        h.orchestrator.api().get_endpoint_status("places-autocomplete"),
        Some(EndpointStatus::Degraded)
    );
    assert!(!h.orchestrator.api().should_use_fallback("places-autocomplete"));

    let json = serde_json::to_value(&report).expect("report serializes");
    assert!(json.get("metrics").is_some());
}
