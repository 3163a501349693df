//! healthd: self-healing runtime
//!
//! Layered health monitoring and automatic remediation for a long-running
//! client process.
//!
//! ## Architecture
//!
//! - **Health Monitor**: samples memory/network/battery, tracks crashes and API call stats
//! - **API Health Checker**: probes registered endpoints, latches per-endpoint fallback
//! - **Memory Pressure Manager**: rate-limited cleanup at two severities
//! - **Smart Reloader**: debounced restart with a short-lived state snapshot
//! - **Health Orchestrator**: evaluation loop dispatching remediation by health score
//!
//! Components are constructed once and passed by `Arc`; there are no globals.
//! Cross-cutting events travel over the typed [`signals::SignalBus`].

pub mod background;
pub mod config;
pub mod host;
pub mod signals;
pub mod storage;
pub mod types;

// Re-export configuration
pub use config::{ConfigError, RuntimeConfig};

// Re-export the components
pub use background::{
    ApiHealthChecker, Collaborators, HealthMonitor, HealthOrchestrator, MemoryPressureManager,
    SmartReloader,
};

// Re-export commonly used types
pub use signals::{HealthSignal, SignalBus};
pub use types::{
    ApiEndpoint, EndpointStatus, HealthMetrics, HealthStatus, MemoryTrend, NetworkStatus,
    ReloadKind, ReloadReason, ReloadSeverity, ReloadSnapshot,
};
