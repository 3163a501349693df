//! Runtime-wide default constants that are not operator-tunable.

// ============================================================================
// Health Score Penalties
// ============================================================================

/// Score every evaluation starts from.
pub const SCORE_MAX: i64 = 100;

pub const PENALTY_MEMORY_CRITICAL: i64 = 40;
pub const PENALTY_MEMORY_RISING: i64 = 20;
pub const PENALTY_MEMORY_ELEVATED: i64 = 10;

pub const PENALTY_NETWORK_OFFLINE: i64 = 30;
pub const PENALTY_NETWORK_UNSTABLE: i64 = 15;

pub const PENALTY_BATTERY_CRITICAL: i64 = 20;
pub const PENALTY_BATTERY_LOW: i64 = 10;

/// Per recorded crash.
pub const PENALTY_PER_CRASH: i64 = 10;

/// Endpoint success rate below `API_RATE_FAILING` costs `PENALTY_API_FAILING`.
pub const API_RATE_FAILING: f64 = 0.5;
pub const PENALTY_API_FAILING: i64 = 15;
/// Endpoint success rate below `API_RATE_FLAKY` costs `PENALTY_API_FLAKY`.
pub const API_RATE_FLAKY: f64 = 0.8;
pub const PENALTY_API_FLAKY: i64 = 5;

// ============================================================================
// Endpoint Probes
// ============================================================================

/// Body sent with every endpoint probe. Endpoints answer it without doing real work.
pub const PROBE_BODY: &str = r#"{"healthCheck":true}"#;

// ============================================================================
// Signal Bus
// ============================================================================

/// Broadcast capacity for the runtime signal bus.
pub const SIGNAL_BUS_CAPACITY: usize = 128;

// ============================================================================
// Storage
// ============================================================================

/// sled tree holding the short-lived reload snapshot.
pub const SESSION_TREE: &str = "session";

/// sled tree holding persisted feature data subject to key cleanup.
pub const PERSISTED_TREE: &str = "persisted";

// ============================================================================
// Host Introspection
// ============================================================================

/// Upper bound for the network latency round trip (milliseconds).
pub const LATENCY_PROBE_TIMEOUT_MS: u64 = 10_000;
