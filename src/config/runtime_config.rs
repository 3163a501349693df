//! Runtime Configuration - every threshold of the self-healing runtime as TOML values
//!
//! Each struct implements `Default` with the documented production values,
//! so an empty or missing config file yields a fully working runtime.
//! Components receive their section by value in their constructor.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "HEALTHD_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "healthd.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one runtime instance.
///
/// Load with `RuntimeConfig::load()` which searches:
/// 1. `$HEALTHD_CONFIG` env var
/// 2. `./healthd.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Health monitor sampling and status thresholds
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Endpoint probe thresholds
    #[serde(default)]
    pub api: ApiCheckConfig,

    /// Fixed endpoint registry
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<EndpointConfig>,

    /// Memory pressure cleanup
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Restart scheduling
    #[serde(default)]
    pub reload: ReloadConfig,

    /// Central evaluation loop
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Remote function transport
    #[serde(default)]
    pub transport: TransportConfig,

    /// Host introspection
    #[serde(default)]
    pub host: HostConfig,

    /// Key-value store location
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            monitor: MonitorConfig::default(),
            api: ApiCheckConfig::default(),
            endpoints: default_endpoints(),
            memory: MemoryConfig::default(),
            reload: ReloadConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            transport: TransportConfig::default(),
            host: HostConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration using the standard search order:
    /// 1. `$HEALTHD_CONFIG` environment variable
    /// 2. `./healthd.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), endpoints = config.endpoints.len(), "Loaded runtime config from HEALTHD_CONFIG");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from HEALTHD_CONFIG, falling back");
                    }
                }
            } else {
                warn!(path = %path, "HEALTHD_CONFIG points to non-existent file, falling back");
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!(endpoints = config.endpoints.len(), "Loaded runtime config from ./healthd.toml");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./healthd.toml, using defaults");
                }
            }
        }

        info!("No healthd.toml found, using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;

        // Unknown keys only warn; serde ignores them
        for w in super::validation::validate_unknown_keys(&contents) {
            warn!("{}", w);
        }

        let config = Self::from_toml_str(&contents)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse without validation (used by `load_from_file` and tests).
    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Write the effective config to a file.
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = self.to_toml()?;
        std::fs::write(path, contents).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        info!(path = %path.display(), "Runtime config saved");
        Ok(())
    }

    /// Validate all thresholds for internal consistency.
    ///
    /// Rules:
    /// - Intervals and windows must be non-zero
    /// - Escalating thresholds must be ordered (standard < aggressive, score bands ascending)
    /// - Percentages must lie in [0, 100]
    /// - Endpoint names must be non-empty and unique
    /// - Key purge patterns must compile
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        let m = &self.monitor;
        Self::check_nonzero(m.sample_interval_secs, "monitor.sample_interval_secs", &mut errors);
        if m.memory_history_len < 3 {
            errors.push(format!(
                "monitor.memory_history_len: must be >= 3 (got {})",
                m.memory_history_len
            ));
        }
        Self::check_percent(m.memory_critical_percent, "monitor.memory_critical_percent", &mut errors);
        Self::check_percent(m.memory_elevated_percent, "monitor.memory_elevated_percent", &mut errors);
        Self::check_escalation(
            m.memory_elevated_percent,
            m.memory_critical_percent,
            "monitor.memory",
            &mut errors,
        );
        Self::check_percent(m.battery_critical_percent, "monitor.battery_critical_percent", &mut errors);
        Self::check_percent(m.battery_low_percent, "monitor.battery_low_percent", &mut errors);
        Self::check_nonzero(m.crash_window_secs, "monitor.crash_window_secs", &mut errors);

        let a = &self.api;
        Self::check_nonzero(a.probe_timeout_ms, "api.probe_timeout_ms", &mut errors);
        if a.failure_threshold == 0 {
            errors.push("api.failure_threshold: must be >= 1".to_string());
        }
        if a.degraded_latency_ms > a.probe_timeout_ms {
            errors.push(format!(
                "api.degraded_latency_ms ({}) must be <= api.probe_timeout_ms ({})",
                a.degraded_latency_ms, a.probe_timeout_ms
            ));
        }

        let mut seen = HashSet::new();
        for ep in &self.endpoints {
            if ep.name.trim().is_empty() {
                errors.push("endpoints: endpoint name must not be empty".to_string());
            } else if !seen.insert(ep.name.as_str()) {
                errors.push(format!("endpoints: duplicate endpoint name '{}'", ep.name));
            }
        }

        let mem = &self.memory;
        Self::check_nonzero(mem.sample_interval_secs, "memory.sample_interval_secs", &mut errors);
        Self::check_percent(mem.standard_threshold_percent, "memory.standard_threshold_percent", &mut errors);
        Self::check_percent(mem.aggressive_threshold_percent, "memory.aggressive_threshold_percent", &mut errors);
        if mem.standard_threshold_percent >= mem.aggressive_threshold_percent {
            errors.push(format!(
                "memory: standard_threshold_percent ({:.1}) must be < aggressive_threshold_percent ({:.1})",
                mem.standard_threshold_percent, mem.aggressive_threshold_percent
            ));
        }
        for pattern in &mem.purge_key_patterns {
            if let Err(e) = regex::Regex::new(pattern) {
                errors.push(format!("memory.purge_key_patterns: '{pattern}' is not a valid regex: {e}"));
            }
        }

        let r = &self.reload;
        Self::check_nonzero(r.snapshot_ttl_secs, "reload.snapshot_ttl_secs", &mut errors);
        Self::check_nonzero(r.idle_tick_secs, "reload.idle_tick_secs", &mut errors);
        if r.idle_threshold_secs < r.idle_tick_secs {
            errors.push(format!(
                "reload.idle_threshold_secs ({}) must be >= reload.idle_tick_secs ({})",
                r.idle_threshold_secs, r.idle_tick_secs
            ));
        }
        if r.snapshot_key.trim().is_empty() {
            errors.push("reload.snapshot_key: must not be empty".to_string());
        }

        let o = &self.orchestrator;
        Self::check_nonzero(o.eval_interval_secs, "orchestrator.eval_interval_secs", &mut errors);
        let bands = [o.critical_score, o.severe_score, o.moderate_score, o.light_score];
        if bands.windows(2).any(|w| w[0] >= w[1]) || o.light_score > 100 {
            errors.push(format!(
                "orchestrator: score bands must be strictly ascending and <= 100 (got {bands:?})"
            ));
        }
        Self::check_percent(o.memory_emergency_percent, "orchestrator.memory_emergency_percent", &mut errors);
        Self::check_percent(o.memory_reload_percent, "orchestrator.memory_reload_percent", &mut errors);
        Self::check_percent(o.memory_moderate_percent, "orchestrator.memory_moderate_percent", &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    fn check_escalation(lower: f64, upper: f64, name: &str, errors: &mut Vec<String>) {
        if upper < lower {
            errors.push(format!(
                "{name}: critical ({upper:.1}) must be >= elevated ({lower:.1})"
            ));
        }
    }

    fn check_percent(value: f64, name: &str, errors: &mut Vec<String>) {
        // NaN comparisons silently pass, catch them explicitly
        if !value.is_finite() || !(0.0..=100.0).contains(&value) {
            errors.push(format!("{name}: must be a percentage in [0, 100] (got {value})"));
        }
    }

    fn check_nonzero(value: u64, name: &str, errors: &mut Vec<String>) {
        if value == 0 {
            errors.push(format!("{name}: must be > 0"));
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Serialize(e) => write!(f, "Config serialization error: {}", e),
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Health Monitor
// ============================================================================

/// Sampling cadence and the thresholds behind memory trend, network status,
/// battery criticality and the crash-burst rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_monitor_interval")]
    pub sample_interval_secs: u64,

    /// Number of memory samples kept for trend detection (>= 3)
    #[serde(default = "default_memory_history_len")]
    pub memory_history_len: usize,

    /// Above this usage the memory trend is critical
    #[serde(default = "default_memory_critical")]
    pub memory_critical_percent: f64,

    /// Above this usage a strictly increasing run is "rising"; also the degraded cutoff
    #[serde(default = "default_memory_elevated")]
    pub memory_elevated_percent: f64,

    /// Round trips slower than this mark the network unstable
    #[serde(default = "default_latency_unstable")]
    pub latency_unstable_ms: u64,

    /// At or below this charge level the battery is critical
    #[serde(default = "default_battery_critical")]
    pub battery_critical_percent: f64,

    /// Below this charge level the score takes the low-battery penalty
    #[serde(default = "default_battery_low")]
    pub battery_low_percent: f64,

    /// Crash count that, with a recent crash, makes the status critical
    #[serde(default = "default_crash_burst")]
    pub crash_burst_count: u32,

    #[serde(default = "default_crash_window")]
    pub crash_window_secs: u64,
}

fn default_monitor_interval() -> u64 { 60 }
fn default_memory_history_len() -> usize { 10 }
fn default_memory_critical() -> f64 { 85.0 }
fn default_memory_elevated() -> f64 { 70.0 }
fn default_latency_unstable() -> u64 { 2000 }
fn default_battery_critical() -> f64 { 15.0 }
fn default_battery_low() -> f64 { 20.0 }
fn default_crash_burst() -> u32 { 3 }
fn default_crash_window() -> u64 { 60 }

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: default_monitor_interval(),
            memory_history_len: default_memory_history_len(),
            memory_critical_percent: default_memory_critical(),
            memory_elevated_percent: default_memory_elevated(),
            latency_unstable_ms: default_latency_unstable(),
            battery_critical_percent: default_battery_critical(),
            battery_low_percent: default_battery_low(),
            crash_burst_count: default_crash_burst(),
            crash_window_secs: default_crash_window(),
        }
    }
}

impl MonitorConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_secs)
    }

    pub fn crash_window(&self) -> Duration {
        Duration::from_secs(self.crash_window_secs)
    }
}

// ============================================================================
// API Health Checker
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiCheckConfig {
    /// Probe timeout; a probe taking this long counts as a failure
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,

    /// Successful probes at or above this latency report `degraded`
    #[serde(default = "default_degraded_latency")]
    pub degraded_latency_ms: u64,

    /// Consecutive failures that mark an endpoint down and trip its fallback
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

fn default_probe_timeout() -> u64 { 5000 }
fn default_degraded_latency() -> u64 { 3000 }
fn default_failure_threshold() -> u32 { 3 }

impl Default for ApiCheckConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: default_probe_timeout(),
            degraded_latency_ms: default_degraded_latency(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

impl ApiCheckConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn degraded_latency(&self) -> Duration {
        Duration::from_millis(self.degraded_latency_ms)
    }
}

/// One entry of the endpoint registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointConfig {
    pub name: String,
    /// Transport identifier; defaults to the endpoint name
    #[serde(default)]
    pub target: Option<String>,
}

impl EndpointConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: None,
        }
    }

    pub fn target(&self) -> &str {
        self.target.as_deref().unwrap_or(&self.name)
    }
}

fn default_endpoints() -> Vec<EndpointConfig> {
    ["geocode", "directions", "places-autocomplete", "calculate-fare"]
        .into_iter()
        .map(EndpointConfig::new)
        .collect()
}

// ============================================================================
// Memory Pressure Manager
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_memory_interval")]
    pub sample_interval_secs: u64,

    /// Standard cleanup above this usage
    #[serde(default = "default_standard_threshold")]
    pub standard_threshold_percent: f64,

    /// Aggressive cleanup above this usage; still above after recheck → memory-critical
    #[serde(default = "default_aggressive_threshold")]
    pub aggressive_threshold_percent: f64,

    /// Minimum spacing between cleanups started by the sampling loop
    #[serde(default = "default_cleanup_cooldown")]
    pub cleanup_cooldown_secs: u64,

    /// Delay between aggressive cleanup and the usage recheck
    #[serde(default = "default_recheck_delay")]
    pub recheck_delay_ms: u64,

    /// Persisted keys matching any of these regexes are purged by cleanup
    #[serde(default = "default_purge_patterns")]
    pub purge_key_patterns: Vec<String>,

    /// Non-critical cached payloads at least this large are released by standard cleanup
    #[serde(default = "default_large_payload")]
    pub large_payload_bytes: usize,
}

fn default_memory_interval() -> u64 { 30 }
fn default_standard_threshold() -> f64 { 80.0 }
fn default_aggressive_threshold() -> f64 { 90.0 }
fn default_cleanup_cooldown() -> u64 { 60 }
fn default_recheck_delay() -> u64 { 3000 }
fn default_large_payload() -> usize { 100 * 1024 }
fn default_purge_patterns() -> Vec<String> {
    vec![
        r"^temp[_.-]".to_string(),
        r"^cache[_.-]".to_string(),
        r"^backup[_.-]".to_string(),
        r"[_.-](tmp|bak)$".to_string(),
    ]
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: default_memory_interval(),
            standard_threshold_percent: default_standard_threshold(),
            aggressive_threshold_percent: default_aggressive_threshold(),
            cleanup_cooldown_secs: default_cleanup_cooldown(),
            recheck_delay_ms: default_recheck_delay(),
            purge_key_patterns: default_purge_patterns(),
            large_payload_bytes: default_large_payload(),
        }
    }
}

impl MemoryConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_secs)
    }

    pub fn cleanup_cooldown(&self) -> Duration {
        Duration::from_secs(self.cleanup_cooldown_secs)
    }

    pub fn recheck_delay(&self) -> Duration {
        Duration::from_millis(self.recheck_delay_ms)
    }
}

// ============================================================================
// Smart Reloader
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReloadConfig {
    /// Snapshots older than this are discarded on the next start
    #[serde(default = "default_snapshot_ttl")]
    pub snapshot_ttl_secs: u64,

    #[serde(default = "default_snapshot_key")]
    pub snapshot_key: String,

    /// Continuous idle time before an idle-time restart is scheduled
    #[serde(default = "default_idle_threshold")]
    pub idle_threshold_secs: u64,

    /// Granularity of idle tracking
    #[serde(default = "default_idle_tick")]
    pub idle_tick_secs: u64,

    /// Countdown used for the idle-time restart
    #[serde(default = "default_idle_reload_delay")]
    pub idle_reload_delay_secs: u64,
}

fn default_snapshot_ttl() -> u64 { 10 }
fn default_snapshot_key() -> String { "healthd.reload_state".to_string() }
fn default_idle_threshold() -> u64 { 300 }
fn default_idle_tick() -> u64 { 30 }
fn default_idle_reload_delay() -> u64 { 5 }

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            snapshot_ttl_secs: default_snapshot_ttl(),
            snapshot_key: default_snapshot_key(),
            idle_threshold_secs: default_idle_threshold(),
            idle_tick_secs: default_idle_tick(),
            idle_reload_delay_secs: default_idle_reload_delay(),
        }
    }
}

impl ReloadConfig {
    pub fn snapshot_ttl(&self) -> Duration {
        Duration::from_secs(self.snapshot_ttl_secs)
    }

    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_threshold_secs)
    }

    pub fn idle_tick(&self) -> Duration {
        Duration::from_secs(self.idle_tick_secs)
    }

    pub fn idle_reload_delay(&self) -> Duration {
        Duration::from_secs(self.idle_reload_delay_secs)
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Score bands, remediation cutoffs and the orchestrator's own rate limits.
///
/// Bands: `score < critical_score` critical, `< severe_score` severe,
/// `< moderate_score` moderate, `< light_score` light, otherwise nominal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_eval_interval")]
    pub eval_interval_secs: u64,

    #[serde(default = "default_critical_score")]
    pub critical_score: u8,
    #[serde(default = "default_severe_score")]
    pub severe_score: u8,
    #[serde(default = "default_moderate_score")]
    pub moderate_score: u8,
    #[serde(default = "default_light_score")]
    pub light_score: u8,

    /// Minimum spacing between moderate-band auto-fixes
    #[serde(default = "default_auto_fix_cooldown")]
    pub auto_fix_cooldown_secs: u64,

    /// Minimum spacing between preventive cleanups (shares the auto-fix timestamp)
    #[serde(default = "default_preventive_cooldown")]
    pub preventive_cooldown_secs: u64,

    /// Minimum spacing between automatically requested restarts
    #[serde(default = "default_reload_cooldown")]
    pub reload_cooldown_secs: u64,

    #[serde(default = "default_crash_burst")]
    pub crash_burst_count: u32,
    #[serde(default = "default_crash_window")]
    pub crash_window_secs: u64,

    #[serde(default = "default_crash_reload_delay")]
    pub crash_reload_delay_secs: u64,
    #[serde(default = "default_memory_reload_delay")]
    pub memory_reload_delay_secs: u64,
    #[serde(default = "default_recovery_reload_delay")]
    pub recovery_reload_delay_secs: u64,

    /// Critical band: usage above this forces aggressive cleanup
    #[serde(default = "default_memory_emergency")]
    pub memory_emergency_percent: f64,
    /// Critical band: usage still above this after cleanup schedules a restart
    #[serde(default = "default_memory_reload")]
    pub memory_reload_percent: f64,
    /// Moderate band: usage above this triggers a standard cleanup
    #[serde(default = "default_memory_moderate")]
    pub memory_moderate_percent: f64,

    /// Unstable network slower than this broadcasts `network-unstable`
    #[serde(default = "default_latency_unstable")]
    pub unstable_latency_ms: u64,
}

fn default_eval_interval() -> u64 { 15 }
fn default_critical_score() -> u8 { 30 }
fn default_severe_score() -> u8 { 50 }
fn default_moderate_score() -> u8 { 70 }
fn default_light_score() -> u8 { 90 }
fn default_auto_fix_cooldown() -> u64 { 120 }
fn default_preventive_cooldown() -> u64 { 60 }
fn default_reload_cooldown() -> u64 { 60 }
fn default_crash_reload_delay() -> u64 { 5 }
fn default_memory_reload_delay() -> u64 { 10 }
fn default_recovery_reload_delay() -> u64 { 1 }
fn default_memory_emergency() -> f64 { 95.0 }
fn default_memory_reload() -> f64 { 90.0 }
fn default_memory_moderate() -> f64 { 75.0 }

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            eval_interval_secs: default_eval_interval(),
            critical_score: default_critical_score(),
            severe_score: default_severe_score(),
            moderate_score: default_moderate_score(),
            light_score: default_light_score(),
            auto_fix_cooldown_secs: default_auto_fix_cooldown(),
            preventive_cooldown_secs: default_preventive_cooldown(),
            reload_cooldown_secs: default_reload_cooldown(),
            crash_burst_count: default_crash_burst(),
            crash_window_secs: default_crash_window(),
            crash_reload_delay_secs: default_crash_reload_delay(),
            memory_reload_delay_secs: default_memory_reload_delay(),
            recovery_reload_delay_secs: default_recovery_reload_delay(),
            memory_emergency_percent: default_memory_emergency(),
            memory_reload_percent: default_memory_reload(),
            memory_moderate_percent: default_memory_moderate(),
            unstable_latency_ms: default_latency_unstable(),
        }
    }
}

impl OrchestratorConfig {
    pub fn eval_interval(&self) -> Duration {
        Duration::from_secs(self.eval_interval_secs)
    }

    pub fn auto_fix_cooldown(&self) -> Duration {
        Duration::from_secs(self.auto_fix_cooldown_secs)
    }

    pub fn preventive_cooldown(&self) -> Duration {
        Duration::from_secs(self.preventive_cooldown_secs)
    }

    pub fn reload_cooldown(&self) -> Duration {
        Duration::from_secs(self.reload_cooldown_secs)
    }

    pub fn crash_window(&self) -> Duration {
        Duration::from_secs(self.crash_window_secs)
    }
}

// ============================================================================
// Transport / Host / Storage
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Base URL remote functions are resolved against
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token sent with every call
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_base_url() -> String {
    "http://127.0.0.1:54321/functions/v1".to_string()
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    /// URL for the lightweight latency round trip; unset leaves latency unmeasured
    #[serde(default)]
    pub probe_url: Option<String>,

    /// Process memory budget; unset measures system-wide usage instead
    #[serde(default)]
    pub memory_budget_mb: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_data_dir() -> String {
    "./data/healthd".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = RuntimeConfig::default();
        assert!(config.validate().is_ok(), "Default config must always validate");
    }

    #[test]
    fn test_empty_toml_produces_defaults() {
        let config = RuntimeConfig::from_toml_str("").expect("empty TOML should parse");
        assert_eq!(config.monitor.sample_interval_secs, 60);
        assert_eq!(config.memory.aggressive_threshold_percent, 90.0);
        assert_eq!(config.api.failure_threshold, 3);
        assert_eq!(config.orchestrator.critical_score, 30);
        assert_eq!(config.endpoints.len(), 4);
    }

    #[test]
    fn test_partial_toml_override() {
        let toml_str = r#"
[memory]
standard_threshold_percent = 75.0

[[endpoints]]
name = "geocode"
target = "maps-geocode"
"#;
        let config = RuntimeConfig::from_toml_str(toml_str).expect("partial TOML should parse");
        assert_eq!(config.memory.standard_threshold_percent, 75.0);
        assert_eq!(config.memory.aggressive_threshold_percent, 90.0);
        assert_eq!(config.endpoints.len(), 1);
        assert_eq!(config.endpoints[0].target(), "maps-geocode");
    }

    #[test]
    fn test_endpoint_target_defaults_to_name() {
        assert_eq!(EndpointConfig::new("directions").target(), "directions");
    }

    #[test]
    fn test_validation_catches_inverted_cleanup_thresholds() {
        let mut config = RuntimeConfig::default();
        config.memory.standard_threshold_percent = 95.0;
        let result = config.validate();
        assert!(result.is_err(), "Standard >= aggressive should fail validation");
        if let Err(ConfigError::Validation(errors)) = result {
            assert!(errors.iter().any(|e| e.contains("standard_threshold_percent")));
        }
    }

    #[test]
    fn test_validation_catches_unordered_score_bands() {
        let mut config = RuntimeConfig::default();
        config.orchestrator.severe_score = 20;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_catches_duplicate_endpoints() {
        let mut config = RuntimeConfig::default();
        config.endpoints = vec![EndpointConfig::new("geocode"), EndpointConfig::new("geocode")];
        let result = config.validate();
        if let Err(ConfigError::Validation(errors)) = result {
            assert!(errors.iter().any(|e| e.contains("duplicate")));
        } else {
            panic!("duplicate endpoints should fail validation");
        }
    }

    #[test]
    fn test_validation_catches_bad_regex() {
        let mut config = RuntimeConfig::default();
        config.memory.purge_key_patterns.push("(".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_catches_short_history() {
        let mut config = RuntimeConfig::default();
        config.monitor.memory_history_len = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_catches_nan_percentage() {
        let mut config = RuntimeConfig::default();
        config.monitor.battery_low_percent = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_roundtrip_toml() {
        let original = RuntimeConfig::default();
        let toml_str = original.to_toml().expect("serialization should work");
        let roundtripped =
            RuntimeConfig::from_toml_str(&toml_str).expect("deserialization should work");
        assert_eq!(original.endpoints, roundtripped.endpoints);
        assert_eq!(
            original.memory.purge_key_patterns,
            roundtripped.memory.purge_key_patterns
        );
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("healthd.toml");
        let mut config = RuntimeConfig::default();
        config.orchestrator.eval_interval_secs = 30;
        config.save_to_file(&path).unwrap();

        let loaded = RuntimeConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.orchestrator.eval_interval_secs, 30);
    }
}
