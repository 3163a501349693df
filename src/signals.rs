//! Typed signal bus for cross-cutting health events
//!
//! A thin wrapper over `tokio::sync::broadcast`. The orchestrator owns the bus
//! and hands clones to each component; feature code subscribes explicitly.
//! Emitting with no subscribers is not an error.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::types::ReloadReason;

/// Default channel capacity. Slow subscribers observe `Lagged` rather than
/// blocking emitters.
const DEFAULT_CAPACITY: usize = 64;

/// Events broadcast by the runtime
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum HealthSignal {
    /// Aggressive cleanup started; listeners should drop what they can
    MemoryPressure { usage_percent: Option<f64> },
    /// Usage stayed above the aggressive threshold after cleanup; a restart is advisable
    MemoryCritical { usage_percent: f64 },
    /// Network is slow; dependent code may relax its own timeouts
    NetworkUnstable { latency_ms: u64 },
    /// Diagnostic: host reports no connectivity
    NetworkOffline,
    /// Diagnostic: battery critical and not charging
    BatteryCritical { level: f64 },
    /// Endpoint crossed the failure threshold and is now served by its fallback
    FallbackActivated { endpoint: String },
    /// Endpoint answered again after its fallback was active
    EndpointRestored { endpoint: String },
    /// User-visible countdown notification for a scheduled restart
    ReloadScheduled {
        reason: ReloadReason,
        countdown_secs: u64,
        message: String,
    },
    ReloadCancelled,
}

impl HealthSignal {
    /// Stable kebab-case name, matching the serialized `event` tag.
    pub fn name(&self) -> &'static str {
        match self {
            HealthSignal::MemoryPressure { .. } => "memory-pressure",
            HealthSignal::MemoryCritical { .. } => "memory-critical",
            HealthSignal::NetworkUnstable { .. } => "network-unstable",
            HealthSignal::NetworkOffline => "network-offline",
            HealthSignal::BatteryCritical { .. } => "battery-critical",
            HealthSignal::FallbackActivated { .. } => "fallback-activated",
            HealthSignal::EndpointRestored { .. } => "endpoint-restored",
            HealthSignal::ReloadScheduled { .. } => "reload-scheduled",
            HealthSignal::ReloadCancelled => "reload-cancelled",
        }
    }
}

/// Cloneable handle to the broadcast channel
#[derive(Debug, Clone)]
pub struct SignalBus {
    tx: broadcast::Sender<HealthSignal>,
}

impl SignalBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HealthSignal> {
        self.tx.subscribe()
    }

    /// Broadcast a signal, returning how many subscribers received it.
    pub fn emit(&self, signal: HealthSignal) -> usize {
        let name = signal.name();
        let delivered = self.tx.send(signal).unwrap_or(0);
        trace!(signal = name, delivered, "Signal emitted");
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new()
    }
}
