//! Shared data structures for the self-healing runtime
//!
//! This module defines the data model shared by the background components:
//! - `HealthMetrics`: process-wide health snapshot owned by the health monitor
//! - `HealthStatus`: discrete status derived from a snapshot
//! - `ApiEndpoint`: per-endpoint probe state with the fallback latch
//! - `ReloadReason` / `ReloadSnapshot`: restart requests and pre-restart state

mod metrics;
mod endpoint;
mod reload;

pub use metrics::*;
pub use endpoint::*;
pub use reload::*;
