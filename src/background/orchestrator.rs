//! Health Orchestrator: central evaluation loop
//!
//! Each tick reads the monitor's snapshot, score and status, picks a severity
//! band from the score and runs that band's remediation. Preventive cleanup
//! and the network-unstable broadcast run on every tick regardless of band.
//!
//! Owns every periodic task of the runtime: `start()` spawns them into one
//! `JoinSet` under one `CancellationToken`, `stop()` cancels and drains it.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    panic_message, ActionThrottle, ApiHealthChecker, ForceCleanupOutcome, HealthMonitor,
    MemoryError, MemoryPressureManager, ReloadPhase, SmartReloader, SweepOutcome, TaskName,
};
use crate::config::defaults::SIGNAL_BUS_CAPACITY;
use crate::config::{OrchestratorConfig, RuntimeConfig};
use crate::host::{HostProbe, ReloadHost, RemoteTransport};
use crate::signals::{HealthSignal, SignalBus};
use crate::storage::KeyValueStore;
use crate::types::{
    ApiEndpoint, EndpointStatus, HealthMetrics, HealthStatus, MemoryTrend, NetworkStatus,
    ReloadKind, ReloadReason, ReloadSeverity,
};

// ============================================================================
// Severity bands and reports
// ============================================================================

/// Score band selecting the remediation path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Severe,
    Moderate,
    Light,
    Nominal,
}

impl Severity {
    pub fn classify(score: u8, config: &OrchestratorConfig) -> Self {
        if score < config.critical_score {
            Severity::Critical
        } else if score < config.severe_score {
            Severity::Severe
        } else if score < config.moderate_score {
            Severity::Moderate
        } else if score < config.light_score {
            Severity::Light
        } else {
            Severity::Nominal
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Critical => write!(f, "critical"),
            Severity::Severe => write!(f, "severe"),
            Severity::Moderate => write!(f, "moderate"),
            Severity::Light => write!(f, "light"),
            Severity::Nominal => write!(f, "nominal"),
        }
    }
}

/// One remediation step taken during a tick
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OrchestratorAction {
    ReloadScheduled { kind: ReloadKind, severity: ReloadSeverity },
    /// Throttled, or a reload was already pending
    ReloadSuppressed { kind: ReloadKind },
    AggressiveCleanup { usage_after: Option<f64>, still_critical: bool },
    PreventiveCleanup { purged_keys: usize },
    Signal { signal: &'static str },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickReport {
    pub timestamp: DateTime<Utc>,
    pub score: u8,
    pub status: HealthStatus,
    pub severity: Severity,
    pub actions: Vec<OrchestratorAction>,
}

/// One-shot full check, suitable for printing
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticReport {
    pub timestamp: DateTime<Utc>,
    pub score: u8,
    pub status: HealthStatus,
    pub severity: Severity,
    pub metrics: HealthMetrics,
    pub sweep: SweepOutcome,
    pub endpoints: Vec<ApiEndpoint>,
    pub memory_usage_percent: Option<f64>,
    pub reload_phase: ReloadPhase,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub running: bool,
    pub ticks: u64,
    pub score: u8,
    pub status: HealthStatus,
    pub endpoints: BTreeMap<String, EndpointStatus>,
    pub fallbacks_active: Vec<String>,
    pub memory_usage_percent: Option<f64>,
    pub reload_phase: ReloadPhase,
    pub secs_since_auto_fix: Option<u64>,
    pub last_tick: Option<TickReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecoveryReport {
    pub reload_scheduled: bool,
    pub cleanup: ForceCleanupOutcome,
}

/// External collaborators the runtime is built from
pub struct Collaborators {
    pub host: Arc<dyn HostProbe>,
    pub transport: Arc<dyn RemoteTransport>,
    pub reload_host: Arc<dyn ReloadHost>,
    /// Feature data subject to key cleanup
    pub persisted: Arc<dyn KeyValueStore>,
    /// Holds the reload snapshot
    pub session: Arc<dyn KeyValueStore>,
}

struct Running {
    cancel: CancellationToken,
    tasks: JoinSet<TaskName>,
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct HealthOrchestrator {
    config: OrchestratorConfig,
    monitor: Arc<HealthMonitor>,
    api: Arc<ApiHealthChecker>,
    memory: Arc<MemoryPressureManager>,
    reloader: Arc<SmartReloader>,
    signals: SignalBus,
    /// Single "last auto-fix" timestamp shared by moderate and preventive cleanup
    auto_fix: Mutex<ActionThrottle>,
    reload_throttle: Mutex<ActionThrottle>,
    running: Mutex<Option<Running>>,
    ticks: AtomicU64,
    last_tick: Mutex<Option<TickReport>>,
}

impl HealthOrchestrator {
    /// Wire all five components from a config and the host collaborators.
    pub fn build(config: &RuntimeConfig, collaborators: Collaborators) -> Result<Arc<Self>, MemoryError> {
        let signals = SignalBus::with_capacity(SIGNAL_BUS_CAPACITY);

        let monitor = Arc::new(HealthMonitor::new(
            config.monitor.clone(),
            Arc::clone(&collaborators.host),
        ));
        let api = Arc::new(ApiHealthChecker::new(
            config.api.clone(),
            &config.endpoints,
            collaborators.transport,
            Arc::clone(&monitor),
            signals.clone(),
        ));
        let memory = Arc::new(MemoryPressureManager::new(
            config.memory.clone(),
            collaborators.host,
            collaborators.persisted,
            signals.clone(),
        )?);
        let reloader = Arc::new(SmartReloader::new(
            config.reload.clone(),
            collaborators.session,
            collaborators.reload_host,
            signals.clone(),
        ));

        Ok(Arc::new(Self::from_parts(
            config.orchestrator.clone(),
            monitor,
            api,
            memory,
            reloader,
            signals,
        )))
    }

    pub fn from_parts(
        config: OrchestratorConfig,
        monitor: Arc<HealthMonitor>,
        api: Arc<ApiHealthChecker>,
        memory: Arc<MemoryPressureManager>,
        reloader: Arc<SmartReloader>,
        signals: SignalBus,
    ) -> Self {
        Self {
            config,
            monitor,
            api,
            memory,
            reloader,
            signals,
            auto_fix: Mutex::new(ActionThrottle::new()),
            reload_throttle: Mutex::new(ActionThrottle::new()),
            running: Mutex::new(None),
            ticks: AtomicU64::new(0),
            last_tick: Mutex::new(None),
        }
    }

    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    pub fn api(&self) -> &Arc<ApiHealthChecker> {
        &self.api
    }

    pub fn memory(&self) -> &Arc<MemoryPressureManager> {
        &self.memory
    }

    pub fn reloader(&self) -> &Arc<SmartReloader> {
        &self.reloader
    }

    pub fn signals(&self) -> &SignalBus {
        &self.signals
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Spawn the sampling loops, the initial endpoint sweep and the
    /// evaluation loop. The first evaluation runs immediately.
    ///
    /// Returns false if already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut running = self.running.lock();
        if running.is_some() {
            warn!("Orchestrator already running");
            return false;
        }

        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();

        self.monitor.spawn_sampler(&mut tasks, cancel.child_token());
        self.memory.spawn(&mut tasks, cancel.child_token());
        self.spawn_initial_sweep(&mut tasks, cancel.child_token());
        self.spawn_evaluator(&mut tasks, cancel.child_token());

        info!(
            tasks = tasks.len(),
            interval_secs = self.config.eval_interval_secs,
            "Health orchestrator started"
        );
        *running = Some(Running { cancel, tasks });
        true
    }

    fn spawn_initial_sweep(&self, task_set: &mut JoinSet<TaskName>, cancel_token: CancellationToken) {
        let api = Arc::clone(&self.api);
        task_set.spawn(async move {
            tokio::select! {
                () = cancel_token.cancelled() => {
                    info!("[ApiSweep] Cancelled before completion");
                }
                outcome = api.start_monitoring() => {
                    debug!(?outcome, "[ApiSweep] Initial sweep finished");
                }
            }
            TaskName::ApiSweep
        });
    }

    fn spawn_evaluator(self: &Arc<Self>, task_set: &mut JoinSet<TaskName>, cancel_token: CancellationToken) {
        let orchestrator = Arc::clone(self);
        task_set.spawn(async move {
            let period = orchestrator.config.eval_interval();
            info!("[Evaluator] Task starting with interval {:?}", period);

            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    () = cancel_token.cancelled() => {
                        info!("[Evaluator] Received shutdown signal");
                        return TaskName::Evaluator;
                    }
                    _ = interval.tick() => {}
                }

                let tick = AssertUnwindSafe(orchestrator.evaluate_and_act()).catch_unwind();
                tokio::select! {
                    () = cancel_token.cancelled() => {
                        info!("[Evaluator] Shutdown during evaluation");
                        return TaskName::Evaluator;
                    }
                    outcome = tick => {
                        if let Err(payload) = outcome {
                            error!(
                                panic = %panic_message(payload.as_ref()),
                                "[Evaluator] Evaluation panicked, continuing with next tick"
                            );
                        }
                    }
                }
            }
        });
    }

    /// Cancel every owned task and timer and wait for the tasks to finish.
    ///
    /// Returns false if the orchestrator was not running.
    pub async fn stop(&self) -> bool {
        let Some(Running { cancel, mut tasks }) = self.running.lock().take() else {
            return false;
        };

        cancel.cancel();
        self.reloader.shutdown();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(task) => debug!(task = %task, "Task stopped"),
                Err(e) if e.is_panic() => error!(error = %e, "Task panicked during shutdown"),
                Err(e) => warn!(error = %e, "Task did not stop cleanly"),
            }
        }

        info!("Health orchestrator stopped");
        true
    }

    // ========================================================================
    // Evaluation
    // ========================================================================

    /// One evaluation tick.
    pub async fn evaluate_and_act(&self) -> TickReport {
        let metrics = self.monitor.get_metrics();
        let score = self.monitor.get_health_score();
        let status = self.monitor.get_health_status();
        let severity = Severity::classify(score, &self.config);
        let mut actions = Vec::new();

        debug!(score, status = %status, severity = %severity, "Evaluating health");

        match severity {
            Severity::Critical => {
                let recent = self.monitor.recent_crashes(self.config.crash_window());
                if recent >= self.config.crash_burst_count {
                    error!(recent, score, "Crash burst detected, scheduling restart");
                    let reason = ReloadReason::new(
                        ReloadKind::Crash,
                        ReloadSeverity::Critical,
                        format!("{recent} crashes in the last {}s", self.config.crash_window_secs),
                    );
                    actions.push(self.request_reload(
                        reason,
                        Duration::from_secs(self.config.crash_reload_delay_secs),
                    ));
                    return self.finish(score, status, severity, actions);
                }

                if metrics.memory.trend == MemoryTrend::Critical
                    || metrics.memory.percentage > self.config.memory_emergency_percent
                {
                    actions.extend(self.force_cleanup_and_escalate().await);
                }
            }
            Severity::Severe => {
                if metrics.network.status == NetworkStatus::Offline {
                    warn!(score, "Network offline");
                    self.signals.emit(HealthSignal::NetworkOffline);
                    actions.push(OrchestratorAction::Signal { signal: "network-offline" });
                }
                if metrics.battery.critical && !metrics.battery.charging {
                    warn!(level = metrics.battery.level, "Battery critical");
                    self.signals.emit(HealthSignal::BatteryCritical {
                        level: metrics.battery.level,
                    });
                    actions.push(OrchestratorAction::Signal { signal: "battery-critical" });
                }
            }
            Severity::Moderate => {
                if metrics.memory.percentage > self.config.memory_moderate_percent {
                    let allowed = self.auto_fix.lock().try_acquire(self.config.auto_fix_cooldown());
                    if allowed {
                        info!(usage_percent = metrics.memory.percentage, "Moderate memory pressure, cleaning up");
                        actions.extend(self.force_cleanup_and_escalate().await);
                    }
                }
            }
            Severity::Light => {
                info!(score, status = %status, "Minor degradation, no action");
            }
            Severity::Nominal => {}
        }

        if metrics.memory.trend == MemoryTrend::Rising {
            let allowed = self.auto_fix.lock().try_acquire(self.config.preventive_cooldown());
            if allowed {
                debug!("Memory rising, preventive cleanup");
                let report = self.memory.standard_cleanup();
                actions.push(OrchestratorAction::PreventiveCleanup {
                    purged_keys: report.purged_keys,
                });
            }
        }

        if metrics.network.status == NetworkStatus::Unstable {
            if let Some(latency_ms) = metrics
                .network
                .latency_ms
                .filter(|l| *l > self.config.unstable_latency_ms)
            {
                self.signals.emit(HealthSignal::NetworkUnstable { latency_ms });
                actions.push(OrchestratorAction::Signal { signal: "network-unstable" });
            }
        }

        self.finish(score, status, severity, actions)
    }

    async fn force_cleanup_and_escalate(&self) -> Vec<OrchestratorAction> {
        let outcome = self.memory.force_cleanup().await;
        let mut actions = vec![OrchestratorAction::AggressiveCleanup {
            usage_after: outcome.usage_after,
            still_critical: outcome.still_critical,
        }];

        if let Some(usage) = outcome
            .usage_after
            .filter(|u| *u > self.config.memory_reload_percent)
        {
            error!(usage_percent = usage, "Memory still critical after cleanup, scheduling restart");
            let reason = ReloadReason::new(
                ReloadKind::Memory,
                ReloadSeverity::Critical,
                format!("Memory usage at {usage:.0}% after cleanup"),
            );
            actions.push(self.request_reload(
                reason,
                Duration::from_secs(self.config.memory_reload_delay_secs),
            ));
        }
        actions
    }

    fn request_reload(&self, reason: ReloadReason, delay: Duration) -> OrchestratorAction {
        let kind = reason.kind;
        let severity = reason.severity;

        let allowed = self.reload_throttle.lock().allows(self.config.reload_cooldown());
        if !allowed {
            debug!(reason = %reason, "Reload throttled");
            return OrchestratorAction::ReloadSuppressed { kind };
        }

        if self.reloader.schedule_reload(reason, delay) {
            self.reload_throttle.lock().record();
            OrchestratorAction::ReloadScheduled { kind, severity }
        } else {
            OrchestratorAction::ReloadSuppressed { kind }
        }
    }

    fn finish(
        &self,
        score: u8,
        status: HealthStatus,
        severity: Severity,
        actions: Vec<OrchestratorAction>,
    ) -> TickReport {
        let report = TickReport {
            timestamp: Utc::now(),
            score,
            status,
            severity,
            actions,
        };
        self.ticks.fetch_add(1, Ordering::Relaxed);
        if !report.actions.is_empty() {
            info!(score, severity = %severity, actions = report.actions.len(), "Remediation applied");
        }
        *self.last_tick.lock() = Some(report.clone());
        report
    }

    // ========================================================================
    // Manual entry points
    // ========================================================================

    /// Fresh sample, full endpoint sweep and a combined report.
    pub async fn run_diagnostic(&self) -> DiagnosticReport {
        self.monitor.sample().await;
        let sweep = self.api.check_all_endpoints().await;
        let score = self.monitor.get_health_score();

        DiagnosticReport {
            timestamp: Utc::now(),
            score,
            status: self.monitor.get_health_status(),
            severity: Severity::classify(score, &self.config),
            metrics: self.monitor.get_metrics(),
            sweep,
            endpoints: self.api.get_detailed_status(),
            memory_usage_percent: self.memory.get_memory_usage(),
            reload_phase: self.reloader.phase(),
        }
    }

    /// Manual override: schedule a high-severity restart and run aggressive
    /// cleanup during the countdown. Bypasses the reload throttle.
    pub async fn force_recovery(&self) -> RecoveryReport {
        warn!("Manual recovery requested");
        let reason = ReloadReason::new(
            ReloadKind::Recovery,
            ReloadSeverity::High,
            "Manual recovery requested",
        );
        let reload_scheduled = self.reloader.schedule_reload(
            reason,
            Duration::from_secs(self.config.recovery_reload_delay_secs),
        );
        if reload_scheduled {
            self.reload_throttle.lock().record();
        }

        let cleanup = self.memory.force_cleanup().await;
        RecoveryReport { reload_scheduled, cleanup }
    }

    pub fn get_detailed_status(&self) -> OrchestratorStatus {
        let endpoints = self.api.get_all_statuses();
        let fallbacks_active = endpoints
            .keys()
            .filter(|name| self.api.should_use_fallback(name))
            .cloned()
            .collect();

        OrchestratorStatus {
            running: self.is_running(),
            ticks: self.ticks.load(Ordering::Relaxed),
            score: self.monitor.get_health_score(),
            status: self.monitor.get_health_status(),
            endpoints,
            fallbacks_active,
            memory_usage_percent: self.memory.last_known_usage(),
            reload_phase: self.reloader.phase(),
            secs_since_auto_fix: self.auto_fix.lock().since_last().map(|d| d.as_secs()),
            last_tick: self.last_tick.lock().clone(),
        }
    }
}
