//! Pure health score and status derivation
//!
//! Both functions depend only on the snapshot, the monitor thresholds and the
//! current time, so they can be checked exhaustively in tests.

use chrono::{DateTime, Utc};

use crate::config::defaults::{
    API_RATE_FAILING, API_RATE_FLAKY, PENALTY_API_FAILING, PENALTY_API_FLAKY,
    PENALTY_BATTERY_CRITICAL, PENALTY_BATTERY_LOW, PENALTY_MEMORY_CRITICAL,
    PENALTY_MEMORY_ELEVATED, PENALTY_MEMORY_RISING, PENALTY_NETWORK_OFFLINE,
    PENALTY_NETWORK_UNSTABLE, PENALTY_PER_CRASH, SCORE_MAX,
};
use crate::config::MonitorConfig;
use crate::types::{HealthMetrics, HealthStatus, MemoryTrend, NetworkStatus};

/// Health score in [0, 100], starting at 100 and subtracting per-signal penalties.
pub fn health_score(metrics: &HealthMetrics, config: &MonitorConfig) -> u8 {
    let mut score = SCORE_MAX;

    // Trend and current usage are separate signals; both penalties apply.
    score -= match metrics.memory.trend {
        MemoryTrend::Critical => PENALTY_MEMORY_CRITICAL,
        MemoryTrend::Rising => PENALTY_MEMORY_RISING,
        MemoryTrend::Stable => 0,
    };
    if metrics.memory.percentage > config.memory_elevated_percent {
        score -= PENALTY_MEMORY_ELEVATED;
    }

    score -= match metrics.network.status {
        NetworkStatus::Offline => PENALTY_NETWORK_OFFLINE,
        NetworkStatus::Unstable => PENALTY_NETWORK_UNSTABLE,
        NetworkStatus::Stable => 0,
    };

    // One signal in two tiers: a critical, discharging battery takes only the larger penalty.
    let battery = &metrics.battery;
    if battery.critical && !battery.charging {
        score -= PENALTY_BATTERY_CRITICAL;
    } else if battery.level < config.battery_low_percent {
        score -= PENALTY_BATTERY_LOW;
    }

    score -= i64::from(metrics.crashes.total) * PENALTY_PER_CRASH;

    for stats in metrics.apis.values() {
        if stats.success_rate < API_RATE_FAILING {
            score -= PENALTY_API_FAILING;
        } else if stats.success_rate < API_RATE_FLAKY {
            score -= PENALTY_API_FLAKY;
        }
    }

    u8::try_from(score.clamp(0, SCORE_MAX)).unwrap_or(0)
}

/// Discrete status, first match wins: critical, failing, degraded, healthy.
pub fn health_status(
    metrics: &HealthMetrics,
    config: &MonitorConfig,
    now: DateTime<Utc>,
) -> HealthStatus {
    let crash_burst = metrics.crashes.total >= config.crash_burst_count
        && metrics
            .crashes
            .last_crash_within(config.crash_window(), now);

    if metrics.memory.trend == MemoryTrend::Critical || crash_burst {
        return HealthStatus::Critical;
    }

    if metrics.network.status == NetworkStatus::Offline && metrics.battery.critical {
        return HealthStatus::Failing;
    }

    if metrics.memory.percentage > config.memory_elevated_percent
        || metrics.network.status == NetworkStatus::Unstable
        || metrics.battery.critical
        || metrics.crashes.total > 0
    {
        return HealthStatus::Degraded;
    }

    HealthStatus::Healthy
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ApiStats, BatteryMetrics, CrashMetrics, MemoryMetrics, NetworkMetrics};
    use proptest::prelude::*;
    use std::collections::{BTreeMap, HashMap};

    fn cfg() -> MonitorConfig {
        MonitorConfig::default()
    }

    #[test]
    fn pristine_metrics_score_full_and_healthy() {
        let metrics = HealthMetrics::default();
        assert_eq!(health_score(&metrics, &cfg()), 100);
        assert_eq!(health_status(&metrics, &cfg(), Utc::now()), HealthStatus::Healthy);
    }

    #[test]
    fn memory_penalties_stack_trend_and_usage() {
        let mut metrics = HealthMetrics::default();
        metrics.memory.trend = MemoryTrend::Critical;
        metrics.memory.percentage = 96.0;
        assert_eq!(health_score(&metrics, &cfg()), 50);

        metrics.memory.trend = MemoryTrend::Rising;
        metrics.memory.percentage = 72.0;
        assert_eq!(health_score(&metrics, &cfg()), 70);
    }

    #[test]
    fn battery_low_only_when_not_critical_uncharged() {
        let mut metrics = HealthMetrics::default();
        metrics.battery = BatteryMetrics { level: 10.0, critical: true, charging: false };
        assert_eq!(health_score(&metrics, &cfg()), 80);

        // Critical but charging falls through to the low-level penalty
        metrics.battery.charging = true;
        assert_eq!(health_score(&metrics, &cfg()), 90);
    }

    #[test]
    fn api_penalties_per_endpoint() {
        let mut metrics = HealthMetrics::default();
        metrics.apis.insert(
            "geocode".into(),
            ApiStats { success_rate: 0.3, avg_latency_ms: 0.0, consecutive_failures: 3 },
        );
        metrics.apis.insert(
            "directions".into(),
            ApiStats { success_rate: 0.7, avg_latency_ms: 0.0, consecutive_failures: 0 },
        );
        assert_eq!(health_score(&metrics, &cfg()), 80);
    }

    #[test]
    fn many_crashes_clamp_to_zero() {
        let mut metrics = HealthMetrics::default();
        metrics.crashes.total = 50;
        assert_eq!(health_score(&metrics, &cfg()), 0);
    }

    #[test]
    fn crash_burst_needs_recent_crash() {
        let now = Utc::now();
        let mut metrics = HealthMetrics::default();
        metrics.crashes.total = 3;
        metrics.crashes.last_crash_time = Some(now - chrono::Duration::seconds(5));
        assert_eq!(health_status(&metrics, &cfg(), now), HealthStatus::Critical);

        metrics.crashes.last_crash_time = Some(now - chrono::Duration::seconds(600));
        assert_eq!(health_status(&metrics, &cfg(), now), HealthStatus::Degraded);
    }

    #[test]
    fn offline_with_critical_battery_is_failing() {
        let mut metrics = HealthMetrics::default();
        metrics.network.status = NetworkStatus::Offline;
        metrics.battery.critical = true;
        assert_eq!(health_status(&metrics, &cfg(), Utc::now()), HealthStatus::Failing);
    }

    #[test]
    fn offline_alone_is_healthy_status() {
        // Offline only costs score; status needs a critical battery too
        let mut metrics = HealthMetrics::default();
        metrics.network.status = NetworkStatus::Offline;
        assert_eq!(health_status(&metrics, &cfg(), Utc::now()), HealthStatus::Healthy);
    }

    fn arb_metrics() -> impl Strategy<Value = HealthMetrics> {
        let trend = prop_oneof![
            Just(MemoryTrend::Stable),
            Just(MemoryTrend::Rising),
            Just(MemoryTrend::Critical)
        ];
        let network = prop_oneof![
            Just(NetworkStatus::Stable),
            Just(NetworkStatus::Unstable),
            Just(NetworkStatus::Offline)
        ];
        let apis = prop::collection::btree_map(
            "[a-z]{1,8}",
            (0.0f64..=1.0, 0.0f64..10_000.0, 0u32..10),
            0..6,
        );
        (
            trend,
            0.0f64..=100.0,
            network,
            (0.0f64..=100.0, any::<bool>(), any::<bool>()),
            0u32..200,
            apis,
        )
            .prop_map(|(trend, percentage, status, (level, critical, charging), crashes, apis)| {
                HealthMetrics {
                    memory: MemoryMetrics { current: None, trend, percentage },
                    network: NetworkMetrics { status, latency_ms: None, last_check: None },
                    battery: BatteryMetrics { level, critical, charging },
                    apis: apis
                        .into_iter()
                        .map(|(name, (success_rate, avg_latency_ms, consecutive_failures))| {
                            (name, ApiStats { success_rate, avg_latency_ms, consecutive_failures })
                        })
                        .collect::<BTreeMap<_, _>>(),
                    crashes: CrashMetrics {
                        total: crashes,
                        by_component: HashMap::new(),
                        last_crash_time: None,
                    },
                }
            })
    }

    proptest! {
        #[test]
        fn score_is_always_in_range(metrics in arb_metrics()) {
            let score = health_score(&metrics, &cfg());
            prop_assert!(score <= 100);
        }

        #[test]
        fn critical_trend_always_means_critical(mut metrics in arb_metrics()) {
            metrics.memory.trend = MemoryTrend::Critical;
            prop_assert_eq!(health_status(&metrics, &cfg(), Utc::now()), HealthStatus::Critical);
        }

        #[test]
        fn penalties_never_raise_score(metrics in arb_metrics()) {
            let mut worse = metrics.clone();
            worse.crashes.total += 1;
            prop_assert!(health_score(&worse, &cfg()) <= health_score(&metrics, &cfg()));
        }
    }
}
