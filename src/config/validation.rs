//! Config validation: unknown-key detection with Levenshtein suggestions.
//!
//! Two-pass parse approach: first deserialize raw TOML into `toml::Value`,
//! walk the key tree, compare against known field names, and emit warnings
//! with "did you mean?" suggestions. Then proceed with normal serde
//! deserialization. Warnings never break existing configs.

use std::collections::HashSet;

/// A non-fatal config warning (typo, unknown section).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, ", did you mean '{s}'?")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Returns the complete set of valid dotted key paths for RuntimeConfig.
///
/// Maintained by hand to match runtime_config.rs. `[[endpoints]]` entries are
/// arrays of tables and are not walked, so only the section name appears.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [monitor]
        "monitor",
        "monitor.sample_interval_secs",
        "monitor.memory_history_len",
        "monitor.memory_critical_percent",
        "monitor.memory_elevated_percent",
        "monitor.latency_unstable_ms",
        "monitor.battery_critical_percent",
        "monitor.battery_low_percent",
        "monitor.crash_burst_count",
        "monitor.crash_window_secs",
        // [api]
        "api",
        "api.probe_timeout_ms",
        "api.degraded_latency_ms",
        "api.failure_threshold",
        // [[endpoints]]
        "endpoints",
        // [memory]
        "memory",
        "memory.sample_interval_secs",
        "memory.standard_threshold_percent",
        "memory.aggressive_threshold_percent",
        "memory.cleanup_cooldown_secs",
        "memory.recheck_delay_ms",
        "memory.purge_key_patterns",
        "memory.large_payload_bytes",
        // [reload]
        "reload",
        "reload.snapshot_ttl_secs",
        "reload.snapshot_key",
        "reload.idle_threshold_secs",
        "reload.idle_tick_secs",
        "reload.idle_reload_delay_secs",
        // [orchestrator]
        "orchestrator",
        "orchestrator.eval_interval_secs",
        "orchestrator.critical_score",
        "orchestrator.severe_score",
        "orchestrator.moderate_score",
        "orchestrator.light_score",
        "orchestrator.auto_fix_cooldown_secs",
        "orchestrator.preventive_cooldown_secs",
        "orchestrator.reload_cooldown_secs",
        "orchestrator.crash_burst_count",
        "orchestrator.crash_window_secs",
        "orchestrator.crash_reload_delay_secs",
        "orchestrator.memory_reload_delay_secs",
        "orchestrator.recovery_reload_delay_secs",
        "orchestrator.memory_emergency_percent",
        "orchestrator.memory_reload_percent",
        "orchestrator.memory_moderate_percent",
        "orchestrator.unstable_latency_ms",
        // [transport]
        "transport",
        "transport.base_url",
        "transport.api_key",
        // [host]
        "host",
        "host.probe_url",
        "host.memory_budget_mb",
        // [storage]
        "storage",
        "storage.data_dir",
    ];
    keys.iter().copied().collect()
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively walks a `toml::Value` tree and collects all dotted key paths.
///
/// For example, a table `{ a = { b = 1, c = 2 } }` yields:
/// `["a", "a.b", "a.c"]`
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            }
        }
    }
    keys
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let b_len = b.chars().count();
    if a.is_empty() {
        return b_len;
    }
    if b_len == 0 {
        return a.chars().count();
    }

    let mut prev: Vec<usize> = (0..=b_len).collect();
    let mut curr = vec![0; b_len + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.chars().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_len]
}

/// Suggest the closest known key for an unknown key, if within edit distance 3.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|&k| (k, levenshtein(unknown, k)))
        .filter(|&(_, dist)| dist <= 3)
        .min_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)))
        .map(|(k, _)| k.to_string())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Parse a raw TOML string and return warnings for any unknown config keys.
///
/// This does NOT fail on unknown keys; it only warns.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let value: toml::Value = match raw_toml.parse() {
        Ok(v) => v,
        Err(_) => return Vec::new(), // parse errors are handled by serde later
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key.as_str()))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}
