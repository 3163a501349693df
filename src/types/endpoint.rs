//! Per-endpoint probe state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EndpointStatus {
    Up,
    Down,
    Degraded,
    #[default]
    Unknown,
}

impl EndpointStatus {
    /// Reachable endpoints are usable, even if slow.
    pub fn is_healthy(self) -> bool {
        matches!(self, EndpointStatus::Up | EndpointStatus::Degraded)
    }
}

impl std::fmt::Display for EndpointStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointStatus::Up => write!(f, "up"),
            EndpointStatus::Down => write!(f, "down"),
            EndpointStatus::Degraded => write!(f, "degraded"),
            EndpointStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// A registered remote endpoint and its probe state.
///
/// Created once when the checker is built and never removed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiEndpoint {
    /// Registry name (e.g. "geocode")
    pub name: String,
    /// Identifier handed to the transport
    pub target: String,
    pub status: EndpointStatus,
    pub last_check: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    /// Smoothed probe latency in milliseconds
    pub avg_latency_ms: f64,
    /// One-way latch: set on the failure reaching the threshold, cleared by the next success
    pub fallback_enabled: bool,
}

impl ApiEndpoint {
    pub fn new(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            status: EndpointStatus::Unknown,
            last_check: None,
            consecutive_failures: 0,
            avg_latency_ms: 0.0,
            fallback_enabled: false,
        }
    }
}
