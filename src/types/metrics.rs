//! Health metrics snapshot: memory, network, battery, API and crash signals

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

// ============================================================================
// Memory
// ============================================================================

/// Direction of memory usage over the recent sample window
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MemoryTrend {
    #[default]
    Stable,
    Rising,
    Critical,
}

impl std::fmt::Display for MemoryTrend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryTrend::Stable => write!(f, "stable"),
            MemoryTrend::Rising => write!(f, "rising"),
            MemoryTrend::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MemoryMetrics {
    /// Bytes in use at the last successful sample (`None` until first sample)
    pub current: Option<u64>,
    pub trend: MemoryTrend,
    /// Usage percentage in [0, 100]
    pub percentage: f64,
}

// ============================================================================
// Network
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NetworkStatus {
    #[default]
    Stable,
    Unstable,
    Offline,
}

impl std::fmt::Display for NetworkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkStatus::Stable => write!(f, "stable"),
            NetworkStatus::Unstable => write!(f, "unstable"),
            NetworkStatus::Offline => write!(f, "offline"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NetworkMetrics {
    pub status: NetworkStatus,
    /// Round-trip latency in milliseconds; `None` when unmeasured
    pub latency_ms: Option<u64>,
    pub last_check: Option<DateTime<Utc>>,
}

// ============================================================================
// Battery
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatteryMetrics {
    /// Charge level in [0, 100]
    pub level: f64,
    pub critical: bool,
    pub charging: bool,
}

/// Hosts without a battery report as a full, non-critical battery.
impl Default for BatteryMetrics {
    fn default() -> Self {
        Self {
            level: 100.0,
            critical: false,
            charging: false,
        }
    }
}

// ============================================================================
// API call statistics
// ============================================================================

/// Weight given to history in the success-rate EWMA.
const SUCCESS_RATE_DECAY: f64 = 0.9;
/// Weight given to history in the latency EWMA.
const LATENCY_DECAY: f64 = 0.8;

/// Smoothed call statistics for one endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiStats {
    /// Exponentially weighted success rate in [0, 1]
    pub success_rate: f64,
    /// Exponentially weighted latency in milliseconds
    pub avg_latency_ms: f64,
    pub consecutive_failures: u32,
}

impl Default for ApiStats {
    fn default() -> Self {
        Self {
            success_rate: 1.0,
            avg_latency_ms: 0.0,
            consecutive_failures: 0,
        }
    }
}

impl ApiStats {
    /// Fold one call outcome into the running statistics.
    pub fn record(&mut self, success: bool, latency: Duration) {
        let outcome = if success { 1.0 } else { 0.0 };
        self.success_rate =
            (self.success_rate * SUCCESS_RATE_DECAY + outcome * (1.0 - SUCCESS_RATE_DECAY))
                .clamp(0.0, 1.0);

        let latency_ms = latency.as_secs_f64() * 1000.0;
        self.avg_latency_ms =
            (self.avg_latency_ms * LATENCY_DECAY + latency_ms * (1.0 - LATENCY_DECAY)).max(0.0);

        if success {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        }
    }
}

// ============================================================================
// Crashes
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CrashMetrics {
    pub total: u32,
    pub by_component: HashMap<String, u32>,
    pub last_crash_time: Option<DateTime<Utc>>,
}

impl CrashMetrics {
    /// True if the most recent crash happened within `window` of `now`.
    pub fn last_crash_within(&self, window: Duration, now: DateTime<Utc>) -> bool {
        let Some(last) = self.last_crash_time else {
            return false;
        };
        match chrono::Duration::from_std(window) {
            Ok(window) => now.signed_duration_since(last) <= window,
            Err(_) => true,
        }
    }
}

// ============================================================================
// Aggregate snapshot
// ============================================================================

/// Process-wide health snapshot.
///
/// Mutated only by the health monitor; everything else reads clones.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HealthMetrics {
    pub memory: MemoryMetrics,
    pub network: NetworkMetrics,
    pub battery: BatteryMetrics,
    pub apis: BTreeMap<String, ApiStats>,
    pub crashes: CrashMetrics,
}

/// Discrete health status, evaluated by priority
/// (critical > failing > degraded > healthy).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Healthy,
    Degraded,
    Failing,
    Critical,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "HEALTHY"),
            HealthStatus::Degraded => write!(f, "DEGRADED"),
            HealthStatus::Failing => write!(f, "FAILING"),
            HealthStatus::Critical => write!(f, "CRITICAL"),
        }
    }
}
