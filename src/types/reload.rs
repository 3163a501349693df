//! Restart requests and the pre-restart snapshot

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What triggered a reload request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ReloadKind {
    Crash,
    Memory,
    Update,
    Recovery,
}

impl std::fmt::Display for ReloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReloadKind::Crash => write!(f, "crash"),
            ReloadKind::Memory => write!(f, "memory"),
            ReloadKind::Update => write!(f, "update"),
            ReloadKind::Recovery => write!(f, "recovery"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ReloadSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for ReloadSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReloadSeverity::Low => write!(f, "low"),
            ReloadSeverity::Medium => write!(f, "medium"),
            ReloadSeverity::High => write!(f, "high"),
            ReloadSeverity::Critical => write!(f, "critical"),
        }
    }
}

/// Why a restart was requested. Built per request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReloadReason {
    #[serde(rename = "type")]
    pub kind: ReloadKind,
    pub severity: ReloadSeverity,
    pub message: String,
}

impl ReloadReason {
    pub fn new(kind: ReloadKind, severity: ReloadSeverity, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ReloadReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}/{}] {}", self.kind, self.severity, self.message)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ViewportPosition {
    pub x: f64,
    pub y: f64,
}

/// State captured just before a restart and restored on the next start.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReloadSnapshot {
    pub reason: ReloadReason,
    pub timestamp: DateTime<Utc>,
    pub location: String,
    pub viewport: ViewportPosition,
}
