//! API Health Checker: endpoint probes with a per-endpoint fallback latch
//!
//! The registry is fixed at construction. `start_monitoring` performs one
//! sweep and does not repeat; afterwards endpoints are re-tested only through
//! `force_check`. A tripped fallback clears on the next clean success, there
//! is no half-open retry timer.

use chrono::Utc;
use futures::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{guarded, HealthMonitor};
use crate::config::defaults::PROBE_BODY;
use crate::config::{ApiCheckConfig, EndpointConfig};
use crate::host::RemoteTransport;
use crate::signals::{HealthSignal, SignalBus};
use crate::types::{ApiEndpoint, EndpointStatus};

/// Weight given to history in the endpoint latency average.
const LATENCY_DECAY: f64 = 0.8;

#[derive(Debug, thiserror::Error)]
pub enum ApiCheckError {
    #[error("unknown endpoint '{0}'")]
    UnknownEndpoint(String),
}

/// Extension point invoked when an endpoint's fallback latch changes.
///
/// Concrete fallback wiring lives in feature code.
pub trait FallbackHook: Send + Sync {
    fn activate_fallback(&self, endpoint: &str);

    fn restore_primary(&self, endpoint: &str);
}

/// Default hook: log only.
pub struct LoggingFallback;

impl FallbackHook for LoggingFallback {
    fn activate_fallback(&self, endpoint: &str) {
        warn!(endpoint, "Fallback activated");
    }

    fn restore_primary(&self, endpoint: &str) {
        info!(endpoint, "Primary endpoint restored");
    }
}

/// Result of `check_all_endpoints`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SweepOutcome {
    Completed { checked: usize, healthy: usize },
    /// Another sweep was in flight; nothing was probed
    AlreadyRunning,
}

/// Latch transition produced by one probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LatchChange {
    None,
    Activated,
    Restored,
}

pub struct ApiHealthChecker {
    config: ApiCheckConfig,
    endpoints: RwLock<BTreeMap<String, ApiEndpoint>>,
    transport: Arc<dyn RemoteTransport>,
    monitor: Arc<HealthMonitor>,
    signals: SignalBus,
    fallback_hook: RwLock<Arc<dyn FallbackHook>>,
    probe_body: serde_json::Value,
    sweep: tokio::sync::Mutex<()>,
}

impl ApiHealthChecker {
    pub fn new(
        config: ApiCheckConfig,
        registry: &[EndpointConfig],
        transport: Arc<dyn RemoteTransport>,
        monitor: Arc<HealthMonitor>,
        signals: SignalBus,
    ) -> Self {
        let endpoints = registry
            .iter()
            .map(|e| (e.name.clone(), ApiEndpoint::new(e.name.clone(), e.target())))
            .collect();
        let probe_body = serde_json::from_str(PROBE_BODY).unwrap_or(serde_json::Value::Null);

        Self {
            config,
            endpoints: RwLock::new(endpoints),
            transport,
            monitor,
            signals,
            fallback_hook: RwLock::new(Arc::new(LoggingFallback)),
            probe_body,
            sweep: tokio::sync::Mutex::new(()),
        }
    }

    /// Install the `activate_fallback` / `restore_primary` extension point.
    pub fn register_fallback_hook(&self, hook: Arc<dyn FallbackHook>) {
        *self.fallback_hook.write() = hook;
    }

    pub fn endpoint_names(&self) -> Vec<String> {
        self.endpoints.read().keys().cloned().collect()
    }

    // ========================================================================
    // Probing
    // ========================================================================

    /// Probe one endpoint and update its state.
    pub async fn check_endpoint(&self, name: &str) -> Result<EndpointStatus, ApiCheckError> {
        let target = self
            .endpoints
            .read()
            .get(name)
            .map(|e| e.target.clone())
            .ok_or_else(|| ApiCheckError::UnknownEndpoint(name.to_string()))?;

        let timeout = self.config.probe_timeout();
        let started = Instant::now();
        let result = tokio::time::timeout(
            timeout,
            self.transport.invoke(&target, &self.probe_body, timeout),
        )
        .await;
        let latency = started.elapsed();

        let success = match &result {
            Ok(Ok(_)) => latency < timeout,
            Ok(Err(e)) => {
                debug!(endpoint = name, error = %e, "Probe failed");
                false
            }
            Err(_) => {
                debug!(endpoint = name, timeout_ms = timeout.as_millis() as u64, "Probe timed out");
                false
            }
        };

        self.monitor.record_api_call(name, success, latency);

        let (status, change) = self.apply_outcome(name, success, latency);
        match change {
            LatchChange::Activated => {
                warn!(
                    endpoint = name,
                    failures = self.config.failure_threshold,
                    "Endpoint persistently failing, switching to fallback"
                );
                let hook = Arc::clone(&*self.fallback_hook.read());
                guarded("activate-fallback", || hook.activate_fallback(name));
                self.signals.emit(HealthSignal::FallbackActivated {
                    endpoint: name.to_string(),
                });
            }
            LatchChange::Restored => {
                info!(endpoint = name, "Endpoint recovered, fallback released");
                let hook = Arc::clone(&*self.fallback_hook.read());
                guarded("restore-primary", || hook.restore_primary(name));
                self.signals.emit(HealthSignal::EndpointRestored {
                    endpoint: name.to_string(),
                });
            }
            LatchChange::None => {}
        }

        Ok(status)
    }

    fn apply_outcome(&self, name: &str, success: bool, latency: Duration) -> (EndpointStatus, LatchChange) {
        let mut endpoints = self.endpoints.write();
        let Some(endpoint) = endpoints.get_mut(name) else {
            return (EndpointStatus::Unknown, LatchChange::None);
        };

        let latency_ms = latency.as_secs_f64() * 1000.0;
        endpoint.avg_latency_ms = if endpoint.last_check.is_none() {
            latency_ms
        } else {
            endpoint.avg_latency_ms * LATENCY_DECAY + latency_ms * (1.0 - LATENCY_DECAY)
        };
        endpoint.last_check = Some(Utc::now());

        let mut change = LatchChange::None;
        if success {
            endpoint.consecutive_failures = 0;
            endpoint.status = if latency < self.config.degraded_latency() {
                EndpointStatus::Up
            } else {
                EndpointStatus::Degraded
            };
            if endpoint.fallback_enabled {
                endpoint.fallback_enabled = false;
                change = LatchChange::Restored;
            }
        } else {
            endpoint.consecutive_failures = endpoint.consecutive_failures.saturating_add(1);
            let threshold = self.config.failure_threshold;
            endpoint.status = if endpoint.consecutive_failures >= threshold {
                EndpointStatus::Down
            } else {
                EndpointStatus::Degraded
            };
            if endpoint.consecutive_failures == threshold && !endpoint.fallback_enabled {
                endpoint.fallback_enabled = true;
                change = LatchChange::Activated;
            }
        }

        (endpoint.status, change)
    }

    /// On-demand re-check. Unknown endpoints are logged and yield `None`.
    pub async fn force_check(&self, name: &str) -> Option<EndpointStatus> {
        match self.check_endpoint(name).await {
            Ok(status) => Some(status),
            Err(e) => {
                warn!(error = %e, "Forced check skipped");
                None
            }
        }
    }

    /// Probe every registered endpoint concurrently and wait for all of them.
    pub async fn check_all_endpoints(&self) -> SweepOutcome {
        let Ok(_in_flight) = self.sweep.try_lock() else {
            debug!("Endpoint sweep already in flight");
            return SweepOutcome::AlreadyRunning;
        };

        let names = self.endpoint_names();
        let results = join_all(names.iter().map(|name| self.check_endpoint(name))).await;
        let healthy = results
            .iter()
            .filter(|r| matches!(r, Ok(status) if status.is_healthy()))
            .count();

        info!(checked = names.len(), healthy, "Endpoint sweep complete");
        SweepOutcome::Completed {
            checked: names.len(),
            healthy,
        }
    }

    /// One initial sweep. Does not schedule further sweeps.
    pub async fn start_monitoring(&self) -> SweepOutcome {
        info!(endpoints = self.endpoints.read().len(), "Starting endpoint monitoring");
        self.check_all_endpoints().await
    }

    // ========================================================================
    // Pure reads
    // ========================================================================

    pub fn get_endpoint_status(&self, name: &str) -> Option<EndpointStatus> {
        self.endpoints.read().get(name).map(|e| e.status)
    }

    /// Up or degraded.
    pub fn is_endpoint_healthy(&self, name: &str) -> bool {
        self.get_endpoint_status(name)
            .is_some_and(EndpointStatus::is_healthy)
    }

    pub fn should_use_fallback(&self, name: &str) -> bool {
        self.endpoints
            .read()
            .get(name)
            .is_some_and(|e| e.fallback_enabled)
    }

    pub fn get_all_statuses(&self) -> BTreeMap<String, EndpointStatus> {
        self.endpoints
            .read()
            .iter()
            .map(|(name, e)| (name.clone(), e.status))
            .collect()
    }

    pub fn get_detailed_status(&self) -> Vec<ApiEndpoint> {
        self.endpoints.read().values().cloned().collect()
    }
}
