//! Background services: health monitoring and self-healing
//!
//! Five long-lived components, constructed once and shared as `Arc`:
//! - `HealthMonitor`: samples memory/network/battery, tracks crashes and API stats
//! - `ApiHealthChecker`: probes registered endpoints, latches per-endpoint fallback
//! - `MemoryPressureManager`: threshold-triggered, rate-limited cleanup
//! - `SmartReloader`: debounced restart with a short-lived state snapshot
//! - `HealthOrchestrator`: evaluation loop dispatching remediation by score
//!
//! Periodic work runs as tokio tasks in the orchestrator's `JoinSet`, each
//! selecting on a shared `CancellationToken`, so `stop()` tears everything
//! down through one path.

pub mod api_health;
pub mod health_monitor;
pub mod memory_pressure;
pub mod orchestrator;
pub mod scoring;
pub mod smart_reloader;
pub mod throttle;

pub use api_health::{
    ApiCheckError, ApiHealthChecker, FallbackHook, LoggingFallback, SweepOutcome,
};
pub use health_monitor::{HealthMonitor, Subscription};
pub use memory_pressure::{
    CleanupReport, ForceCleanupOutcome, MemoryError, MemoryPressureManager, MemoryTick,
};
pub use orchestrator::{
    Collaborators, DiagnosticReport, HealthOrchestrator, OrchestratorAction,
    OrchestratorStatus, RecoveryReport, Severity, TickReport,
};
pub use scoring::{health_score, health_status};
pub use smart_reloader::{ReloadPhase, SmartReloader};
pub use throttle::ActionThrottle;

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::error;

// ============================================================================
// Task Names for Supervisor Logging
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskName {
    MonitorSampler,
    MemorySampler,
    ApiSweep,
    Evaluator,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::MonitorSampler => write!(f, "MonitorSampler"),
            TaskName::MemorySampler => write!(f, "MemorySampler"),
            TaskName::ApiSweep => write!(f, "ApiSweep"),
            TaskName::Evaluator => write!(f, "Evaluator"),
        }
    }
}

// ============================================================================
// Panic containment for caller-supplied callbacks
// ============================================================================

/// Run a callback, turning a panic into a logged `None`.
pub(crate) fn guarded<T>(what: &str, f: impl FnOnce() -> T) -> Option<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            error!(callback = what, panic = %panic_message(payload.as_ref()), "Callback panicked");
            None
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
