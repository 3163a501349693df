//! Runtime Configuration Module
//!
//! Provides the runtime configuration loaded from TOML files. Every interval,
//! percentage cutoff, failure count and rate-limit window is a field here.
//!
//! ## Loading Order
//!
//! 1. `HEALTHD_CONFIG` environment variable (path to TOML file)
//! 2. `healthd.toml` in the current working directory
//! 3. Built-in defaults
//!
//! ## Usage
//!
//! There is no global config. Load once at startup and hand each component
//! its section:
//!
//! ```ignore
//! let config = RuntimeConfig::load();
//! let monitor = HealthMonitor::new(config.monitor.clone(), host);
//! ```

mod runtime_config;
pub mod validation;
pub mod defaults;

pub use runtime_config::*;
