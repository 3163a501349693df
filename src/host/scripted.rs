//! Scripted collaborators for tests and dry runs
//!
//! Each implements one host trait with values set by the caller. Readings can
//! be queued so successive calls observe a sequence (e.g. memory before and
//! after cleanup); the last reading sticks once the queue drains.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{
    BatterySample, HostError, HostProbe, InvokeResponse, MemorySample, ReloadError, ReloadHost,
    RemoteTransport, TransportError,
};
use crate::types::ViewportPosition;

// ============================================================================
// Host probe
// ============================================================================

#[derive(Default)]
pub struct ScriptedHost {
    memory: Mutex<Option<f64>>,
    memory_queue: Mutex<VecDeque<f64>>,
    online: Mutex<Option<bool>>,
    round_trip: Mutex<Option<Result<Duration, String>>>,
    battery: Mutex<Option<BatterySample>>,
}

impl ScriptedHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_memory_percent(&self, percent: Option<f64>) {
        self.memory_queue.lock().clear();
        *self.memory.lock() = percent;
    }

    /// Queue readings returned by the next `memory()` calls, in order.
    pub fn queue_memory_percent(&self, readings: impl IntoIterator<Item = f64>) {
        self.memory_queue.lock().extend(readings);
    }

    pub fn set_online(&self, online: Option<bool>) {
        *self.online.lock() = online;
    }

    /// `None` means no latency probe configured.
    pub fn set_round_trip(&self, outcome: Option<Result<Duration, String>>) {
        *self.round_trip.lock() = outcome;
    }

    pub fn set_battery(&self, battery: Option<BatterySample>) {
        *self.battery.lock() = battery;
    }
}

#[async_trait]
impl HostProbe for ScriptedHost {
    fn memory(&self) -> Option<MemorySample> {
        let mut current = self.memory.lock();
        if let Some(next) = self.memory_queue.lock().pop_front() {
            *current = Some(next);
        }
        current.map(|percentage| MemorySample {
            // Pretend a 1 GiB budget
            used_bytes: (percentage / 100.0 * 1_073_741_824.0) as u64,
            percentage,
        })
    }

    fn is_online(&self) -> Option<bool> {
        *self.online.lock()
    }

    async fn round_trip(&self) -> Result<Option<Duration>, HostError> {
        let outcome = self.round_trip.lock().clone();
        match outcome {
            None => Ok(None),
            Some(Ok(latency)) => Ok(Some(latency)),
            Some(Err(reason)) => Err(HostError::Probe(reason)),
        }
    }

    fn battery(&self) -> Option<BatterySample> {
        *self.battery.lock()
    }
}

// ============================================================================
// Remote transport
// ============================================================================

/// One scripted call result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeScript {
    pub latency: Duration,
    pub success: bool,
}

impl ProbeScript {
    pub fn ok(latency_ms: u64) -> Self {
        Self { latency: Duration::from_millis(latency_ms), success: true }
    }

    pub fn fail(latency_ms: u64) -> Self {
        Self { latency: Duration::from_millis(latency_ms), success: false }
    }
}

/// Transport answering from per-target queues. Unscripted targets succeed
/// immediately.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<ProbeScript>>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, target: &str, outcomes: impl IntoIterator<Item = ProbeScript>) {
        self.scripts
            .lock()
            .entry(target.to_string())
            .or_default()
            .extend(outcomes);
    }

    pub fn calls(&self, target: &str) -> usize {
        self.calls.lock().get(target).copied().unwrap_or(0)
    }
}

#[async_trait]
impl RemoteTransport for ScriptedTransport {
    async fn invoke(
        &self,
        target: &str,
        _body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<InvokeResponse, TransportError> {
        *self.calls.lock().entry(target.to_string()).or_default() += 1;
        let script = self
            .scripts
            .lock()
            .get_mut(target)
            .and_then(VecDeque::pop_front)
            .unwrap_or(ProbeScript::ok(0));

        if script.latency >= timeout {
            tokio::time::sleep(timeout).await;
            return Err(TransportError::Timeout(timeout));
        }
        tokio::time::sleep(script.latency).await;

        if script.success {
            Ok(InvokeResponse {
                elapsed: script.latency,
                body: serde_json::Value::Null,
            })
        } else {
            Err(TransportError::Remote(format!("scripted failure for {target}")))
        }
    }
}

// ============================================================================
// Reload host
// ============================================================================

/// Records restart and navigation attempts instead of performing them.
pub struct RecordingReloadHost {
    location: String,
    restart_fails: bool,
    restarts: AtomicUsize,
    navigations: Mutex<Vec<String>>,
}

impl RecordingReloadHost {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            restart_fails: false,
            restarts: AtomicUsize::new(0),
            navigations: Mutex::new(Vec::new()),
        }
    }

    /// Make every `restart` fail so the navigate fallback runs.
    pub fn with_failing_restart(mut self) -> Self {
        self.restart_fails = true;
        self
    }

    pub fn restarts(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }

    pub fn navigations(&self) -> Vec<String> {
        self.navigations.lock().clone()
    }
}

impl ReloadHost for RecordingReloadHost {
    fn current_location(&self) -> String {
        self.location.clone()
    }

    fn viewport(&self) -> ViewportPosition {
        ViewportPosition { x: 0.0, y: 240.0 }
    }

    fn restart(&self) -> Result<(), ReloadError> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        if self.restart_fails {
            return Err(ReloadError::Restart(std::io::Error::new(
                std::io::ErrorKind::Other,
                "scripted restart failure",
            )));
        }
        Ok(())
    }

    fn navigate(&self, location: &str) -> Result<(), ReloadError> {
        self.navigations.lock().push(location.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_queue_then_sticky() {
        let host = ScriptedHost::new();
        assert!(host.memory().is_none());

        host.set_memory_percent(Some(50.0));
        host.queue_memory_percent([60.0, 70.0]);
        assert_eq!(host.memory().map(|m| m.percentage), Some(60.0));
        assert_eq!(host.memory().map(|m| m.percentage), Some(70.0));
        assert_eq!(host.memory().map(|m| m.percentage), Some(70.0));
    }

    #[tokio::test(start_paused = true)]
    async fn transport_follows_script() {
        let transport = ScriptedTransport::new();
        transport.script("geocode", [ProbeScript::fail(50), ProbeScript::ok(10)]);
        let body = serde_json::Value::Null;
        let timeout = Duration::from_secs(5);

        assert!(transport.invoke("geocode", &body, timeout).await.is_err());
        assert!(transport.invoke("geocode", &body, timeout).await.is_ok());
        assert!(transport.invoke("geocode", &body, timeout).await.is_ok());
        assert_eq!(transport.calls("geocode"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_script_times_out() {
        let transport = ScriptedTransport::new();
        transport.script("places", [ProbeScript::ok(9_000)]);
        let result = transport
            .invoke("places", &serde_json::Value::Null, Duration::from_secs(5))
            .await;
        assert!(matches!(result, Err(TransportError::Timeout(_))));
    }
}
