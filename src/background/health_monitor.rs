//! Health Monitor: periodic sampling plus crash and API-call accounting
//!
//! Owns the process-wide `HealthMetrics` snapshot. Data flows in through
//! `record_api_call`, `record_crash` and the sampling loop, and out through
//! `get_metrics`, `get_health_score` and `get_health_status`.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{guarded, scoring, TaskName};
use crate::config::MonitorConfig;
use crate::host::HostProbe;
use crate::types::{HealthMetrics, HealthStatus, MemoryTrend, NetworkMetrics, NetworkStatus};

/// Crash timestamps kept for `recent_crashes`.
const CRASH_LOG_CAPACITY: usize = 64;

/// Minimum run of strictly increasing samples that counts as "rising".
const RISING_RUN: usize = 3;

type Listener = Arc<dyn Fn(&HealthMetrics) + Send + Sync>;
type ListenerList = Mutex<Vec<(u64, Listener)>>;

struct MonitorState {
    metrics: HealthMetrics,
    memory_history: VecDeque<f64>,
    crash_log: VecDeque<DateTime<Utc>>,
}

pub struct HealthMonitor {
    config: MonitorConfig,
    host: Arc<dyn HostProbe>,
    state: RwLock<MonitorState>,
    listeners: Arc<ListenerList>,
    next_listener_id: AtomicU64,
    /// Held for the duration of one sample; a second caller skips instead of overlapping
    sampling: tokio::sync::Mutex<()>,
}

/// Handle returned by `subscribe`. Dropping it keeps the listener registered.
pub struct Subscription {
    id: u64,
    listeners: Weak<ListenerList>,
}

impl Subscription {
    /// Remove the listener. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        let Some(listeners) = self.listeners.upgrade() else {
            return false;
        };
        let mut listeners = listeners.lock();
        let before = listeners.len();
        listeners.retain(|(id, _)| *id != self.id);
        listeners.len() != before
    }
}

impl HealthMonitor {
    pub fn new(config: MonitorConfig, host: Arc<dyn HostProbe>) -> Self {
        let history_len = config.memory_history_len.max(RISING_RUN);
        Self {
            config,
            host,
            state: RwLock::new(MonitorState {
                metrics: HealthMetrics::default(),
                memory_history: VecDeque::with_capacity(history_len),
                crash_log: VecDeque::new(),
            }),
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_listener_id: AtomicU64::new(0),
            sampling: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    // ========================================================================
    // Inbound: call outcomes and crashes
    // ========================================================================

    /// Fold one remote call outcome into the endpoint's smoothed statistics.
    pub fn record_api_call(&self, endpoint: &str, success: bool, latency: Duration) {
        let mut state = self.state.write();
        let stats = state.metrics.apis.entry(endpoint.to_string()).or_default();
        stats.record(success, latency);
        debug!(
            endpoint,
            success,
            latency_ms = latency.as_millis() as u64,
            success_rate = stats.success_rate,
            consecutive_failures = stats.consecutive_failures,
            "API call recorded"
        );
    }

    pub fn record_crash(&self, component: &str) {
        let now = Utc::now();
        let mut state = self.state.write();
        let crashes = &mut state.metrics.crashes;
        crashes.total = crashes.total.saturating_add(1);
        *crashes.by_component.entry(component.to_string()).or_default() += 1;
        crashes.last_crash_time = Some(now);
        let total = crashes.total;

        state.crash_log.push_back(now);
        if state.crash_log.len() > CRASH_LOG_CAPACITY {
            state.crash_log.pop_front();
        }
        warn!(component, total, "Crash recorded");
    }

    /// Number of crashes recorded within `window` of now.
    pub fn recent_crashes(&self, window: Duration) -> u32 {
        let Ok(window) = chrono::Duration::from_std(window) else {
            return self.state.read().metrics.crashes.total;
        };
        let cutoff = Utc::now() - window;
        let count = self
            .state
            .read()
            .crash_log
            .iter()
            .filter(|at| **at >= cutoff)
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    // ========================================================================
    // Outbound: snapshot, score, status
    // ========================================================================

    pub fn get_metrics(&self) -> HealthMetrics {
        self.state.read().metrics.clone()
    }

    pub fn get_health_score(&self) -> u8 {
        scoring::health_score(&self.state.read().metrics, &self.config)
    }

    pub fn get_health_status(&self) -> HealthStatus {
        scoring::health_status(&self.state.read().metrics, &self.config, Utc::now())
    }

    /// Register a listener invoked with the snapshot after every sample.
    ///
    /// A panicking listener is logged and skipped; the others still run.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&HealthMetrics) + Send + Sync + 'static,
    {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, Arc::new(listener)));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    // ========================================================================
    // Sampling
    // ========================================================================

    /// Take one sample of memory, network and battery, then notify listeners.
    ///
    /// Returns false if another sample was already running.
    pub async fn sample(&self) -> bool {
        let Ok(_running) = self.sampling.try_lock() else {
            debug!("Sample already in progress, skipping");
            return false;
        };

        let network = self.sample_network().await;
        let memory = self.host.memory();
        let battery = self.host.battery();

        let snapshot = {
            let mut state = self.state.write();

            if let Some(sample) = memory {
                state.memory_history.push_back(sample.percentage);
                while state.memory_history.len() > self.config.memory_history_len.max(RISING_RUN) {
                    state.memory_history.pop_front();
                }
                let trend = self.memory_trend(&state.memory_history, sample.percentage);
                let memory = &mut state.metrics.memory;
                memory.current = Some(sample.used_bytes);
                memory.percentage = sample.percentage;
                memory.trend = trend;
            }

            state.metrics.network = network;

            if let Some(sample) = battery {
                let battery = &mut state.metrics.battery;
                battery.level = sample.level;
                battery.charging = sample.charging;
                battery.critical = sample.level <= self.config.battery_critical_percent;
            }

            state.metrics.clone()
        };

        debug!(
            memory_percent = snapshot.memory.percentage,
            memory_trend = %snapshot.memory.trend,
            network = %snapshot.network.status,
            latency_ms = ?snapshot.network.latency_ms,
            battery = snapshot.battery.level,
            "Health sample taken"
        );

        self.notify(&snapshot);
        true
    }

    async fn sample_network(&self) -> NetworkMetrics {
        let now = Some(Utc::now());

        if self.host.is_online() == Some(false) {
            return NetworkMetrics {
                status: NetworkStatus::Offline,
                latency_ms: None,
                last_check: now,
            };
        }

        match self.host.round_trip().await {
            Ok(Some(latency)) => {
                let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
                let status = if latency_ms > self.config.latency_unstable_ms {
                    NetworkStatus::Unstable
                } else {
                    NetworkStatus::Stable
                };
                NetworkMetrics { status, latency_ms: Some(latency_ms), last_check: now }
            }
            Ok(None) => NetworkMetrics {
                status: NetworkStatus::Stable,
                latency_ms: None,
                last_check: now,
            },
            // A failed probe alone never means offline
            Err(e) => {
                debug!(error = %e, "Latency probe failed");
                NetworkMetrics {
                    status: NetworkStatus::Unstable,
                    latency_ms: None,
                    last_check: now,
                }
            }
        }
    }

    fn memory_trend(&self, history: &VecDeque<f64>, percentage: f64) -> MemoryTrend {
        if percentage > self.config.memory_critical_percent {
            return MemoryTrend::Critical;
        }

        let rising = history.len() >= RISING_RUN
            && history
                .iter()
                .skip(history.len() - RISING_RUN)
                .zip(history.iter().skip(history.len() - RISING_RUN + 1))
                .all(|(a, b)| b > a);

        if rising && percentage > self.config.memory_elevated_percent {
            MemoryTrend::Rising
        } else {
            MemoryTrend::Stable
        }
    }

    fn notify(&self, snapshot: &HealthMetrics) {
        // Clone out so listeners may (un)subscribe without deadlocking
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        for listener in listeners {
            guarded("health-listener", || listener(snapshot));
        }
    }

    /// Spawn the periodic sampling loop into the supervisor's task set.
    pub fn spawn_sampler(
        self: &Arc<Self>,
        task_set: &mut JoinSet<TaskName>,
        cancel_token: CancellationToken,
    ) {
        let monitor = Arc::clone(self);
        task_set.spawn(async move {
            let period = monitor.config.sample_interval();
            info!("[MonitorSampler] Task starting with interval {:?}", period);

            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    () = cancel_token.cancelled() => {
                        info!("[MonitorSampler] Received shutdown signal");
                        return TaskName::MonitorSampler;
                    }
                    _ = interval.tick() => {
                        monitor.sample().await;
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::scripted::ScriptedHost;
    use crate::host::BatterySample;
    use std::sync::atomic::AtomicUsize;

    fn monitor_with(host: &Arc<ScriptedHost>) -> HealthMonitor {
        HealthMonitor::new(MonitorConfig::default(), Arc::clone(host) as Arc<dyn HostProbe>)
    }

    #[test]
    fn consecutive_failures_reset_on_success() {
        let monitor = monitor_with(&Arc::new(ScriptedHost::new()));
        let ms = Duration::from_millis(100);
        monitor.record_api_call("geocode", false, ms);
        monitor.record_api_call("geocode", false, ms);
        assert_eq!(monitor.get_metrics().apis["geocode"].consecutive_failures, 2);

        monitor.record_api_call("geocode", true, ms);
        assert_eq!(monitor.get_metrics().apis["geocode"].consecutive_failures, 0);
    }

    proptest::proptest! {
        /// Any call sequence: the failure run is the trailing failures, the
        /// success rate stays a probability, latency never goes negative.
        #[test]
        fn api_call_sequences_track_trailing_failures(
            calls in proptest::collection::vec((proptest::bool::ANY, 0u64..10_000), 1..64)
        ) {
            let monitor = monitor_with(&Arc::new(ScriptedHost::new()));
            let mut trailing = 0u32;
            for (success, latency_ms) in &calls {
                monitor.record_api_call("geocode", *success, Duration::from_millis(*latency_ms));
                trailing = if *success { 0 } else { trailing + 1 };

                let stats = monitor.get_metrics().apis["geocode"].clone();
                proptest::prop_assert_eq!(stats.consecutive_failures, trailing);
                proptest::prop_assert!((0.0..=1.0).contains(&stats.success_rate));
                proptest::prop_assert!(stats.avg_latency_ms >= 0.0);
            }

            let all_ok = calls.iter().all(|(success, _)| *success);
            let stats = &monitor.get_metrics().apis["geocode"];
            proptest::prop_assert_eq!(stats.success_rate == 1.0, all_ok);
        }
    }

    #[test]
    fn crashes_counted_per_component() {
        let monitor = monitor_with(&Arc::new(ScriptedHost::new()));
        monitor.record_crash("map");
        monitor.record_crash("map");
        monitor.record_crash("chat");

        let crashes = monitor.get_metrics().crashes;
        assert_eq!(crashes.total, 3);
        assert_eq!(crashes.by_component["map"], 2);
        assert!(crashes.last_crash_time.is_some());
        assert_eq!(monitor.recent_crashes(Duration::from_secs(60)), 3);
        assert_eq!(monitor.get_health_status(), HealthStatus::Critical);
    }

    #[tokio::test]
    async fn rising_trend_needs_three_increasing_samples_above_elevated() {
        let host = Arc::new(ScriptedHost::new());
        let monitor = monitor_with(&host);

        for pct in [72.0, 75.0] {
            host.set_memory_percent(Some(pct));
            monitor.sample().await;
        }
        assert_eq!(monitor.get_metrics().memory.trend, MemoryTrend::Stable);

        host.set_memory_percent(Some(78.0));
        monitor.sample().await;
        assert_eq!(monitor.get_metrics().memory.trend, MemoryTrend::Rising);

        host.set_memory_percent(Some(77.0));
        monitor.sample().await;
        assert_eq!(monitor.get_metrics().memory.trend, MemoryTrend::Stable);

        host.set_memory_percent(Some(90.0));
        monitor.sample().await;
        assert_eq!(monitor.get_metrics().memory.trend, MemoryTrend::Critical);
    }

    #[tokio::test]
    async fn network_probe_error_is_unstable_not_offline() {
        let host = Arc::new(ScriptedHost::new());
        host.set_round_trip(Some(Err("connection reset".into())));
        let monitor = monitor_with(&host);
        monitor.sample().await;

        let network = monitor.get_metrics().network;
        assert_eq!(network.status, NetworkStatus::Unstable);
        assert_eq!(network.latency_ms, None);
        assert!(network.last_check.is_some());
    }

    #[tokio::test]
    async fn offline_flag_and_slow_round_trip() {
        let host = Arc::new(ScriptedHost::new());
        let monitor = monitor_with(&host);

        host.set_round_trip(Some(Ok(Duration::from_millis(2500))));
        monitor.sample().await;
        assert_eq!(monitor.get_metrics().network.status, NetworkStatus::Unstable);
        assert_eq!(monitor.get_metrics().network.latency_ms, Some(2500));

        host.set_online(Some(false));
        monitor.sample().await;
        assert_eq!(monitor.get_metrics().network.status, NetworkStatus::Offline);
    }

    #[tokio::test]
    async fn missing_signals_keep_last_value() {
        let host = Arc::new(ScriptedHost::new());
        let monitor = monitor_with(&host);

        host.set_memory_percent(Some(40.0));
        host.set_battery(Some(BatterySample { level: 12.0, charging: false }));
        monitor.sample().await;

        host.set_memory_percent(None);
        host.set_battery(None);
        monitor.sample().await;

        let metrics = monitor.get_metrics();
        assert_eq!(metrics.memory.percentage, 40.0);
        assert_eq!(metrics.battery.level, 12.0);
        assert!(metrics.battery.critical);
    }

    #[tokio::test]
    async fn panicking_listener_does_not_block_others() {
        let monitor = monitor_with(&Arc::new(ScriptedHost::new()));
        let calls = Arc::new(AtomicUsize::new(0));

        let _bad = monitor.subscribe(|_| panic!("listener bug"));
        let counter = Arc::clone(&calls);
        let good = monitor.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        monitor.sample().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(good.unsubscribe());
        monitor.sample().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(monitor.listener_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sampler_stops_on_cancel() {
        let host = Arc::new(ScriptedHost::new());
        let monitor = Arc::new(monitor_with(&host));
        let samples = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&samples);
        let _sub = monitor.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();
        monitor.spawn_sampler(&mut tasks, cancel.clone());

        tokio::time::sleep(Duration::from_secs(125)).await;
        cancel.cancel();
        let finished = tasks.join_next().await.unwrap().unwrap();
        assert_eq!(finished, TaskName::MonitorSampler);
        // Immediate first tick plus ticks at 60s and 120s
        assert_eq!(samples.load(Ordering::SeqCst), 3);
    }
}
