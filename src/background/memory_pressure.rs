//! Memory Pressure Manager: threshold-triggered cleanup at two severities
//!
//! The sampling loop runs standard cleanup above the standard threshold and
//! aggressive cleanup above the aggressive threshold. Both share one cooldown,
//! checked before either severity runs.
//!
//! `force_cleanup` (the public aggressive entry point) bypasses the cooldown
//! but stamps it, so the loop does not clean again right after a forced run.

use parking_lot::{Mutex, RwLock};
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ActionThrottle, TaskName};
use crate::config::MemoryConfig;
use crate::host::{release_free_heap, HostProbe};
use crate::signals::{HealthSignal, SignalBus};
use crate::storage::{KeyValueStore, TransientCache, TrimLevel, TrimReport, Trimmable};

/// Name of the built-in route/navigation cache.
pub const ROUTE_CACHE: &str = "routes";
/// Name of the built-in inline payload cache.
pub const PAYLOAD_CACHE: &str = "inline-payloads";

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("invalid purge pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// What one standard cleanup did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub caches: Vec<TrimReport>,
    pub purged_keys: usize,
}

/// What one aggressive cleanup did
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForceCleanupOutcome {
    pub standard: CleanupReport,
    pub aggressive: Vec<TrimReport>,
    pub heap_released: bool,
    pub usage_before: Option<f64>,
    /// Usage at the recheck after the settle delay
    pub usage_after: Option<f64>,
    /// Still above the aggressive threshold after the recheck
    pub still_critical: bool,
}

/// Outcome of one sampling tick
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MemoryTick {
    /// Usage could not be read
    Unavailable,
    BelowThreshold { usage_percent: f64 },
    Throttled { usage_percent: f64 },
    Standard { usage_percent: f64, report: CleanupReport },
    Aggressive { outcome: ForceCleanupOutcome },
}

pub struct MemoryPressureManager {
    config: MemoryConfig,
    host: Arc<dyn HostProbe>,
    store: Arc<dyn KeyValueStore>,
    signals: SignalBus,
    purge_patterns: Vec<Regex>,
    caches: RwLock<Vec<Arc<dyn Trimmable>>>,
    route_cache: Arc<TransientCache>,
    payload_cache: Arc<TransientCache>,
    throttle: Mutex<ActionThrottle>,
    last_usage: Mutex<Option<f64>>,
}

impl MemoryPressureManager {
    pub fn new(
        config: MemoryConfig,
        host: Arc<dyn HostProbe>,
        store: Arc<dyn KeyValueStore>,
        signals: SignalBus,
    ) -> Result<Self, MemoryError> {
        let purge_patterns = config
            .purge_key_patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|source| MemoryError::Pattern {
                    pattern: pattern.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let route_cache = Arc::new(TransientCache::transient(ROUTE_CACHE));
        let payload_cache = Arc::new(TransientCache::payloads(
            PAYLOAD_CACHE,
            config.large_payload_bytes,
        ));
        let caches: Vec<Arc<dyn Trimmable>> = vec![
            Arc::clone(&route_cache) as Arc<dyn Trimmable>,
            Arc::clone(&payload_cache) as Arc<dyn Trimmable>,
        ];

        Ok(Self {
            config,
            host,
            store,
            signals,
            purge_patterns,
            caches: RwLock::new(caches),
            route_cache,
            payload_cache,
            throttle: Mutex::new(ActionThrottle::new()),
            last_usage: Mutex::new(None),
        })
    }

    /// Built-in route/navigation cache, cleared by every cleanup
    pub fn route_cache(&self) -> Arc<TransientCache> {
        Arc::clone(&self.route_cache)
    }

    /// Built-in inline payload cache
    pub fn payload_cache(&self) -> Arc<TransientCache> {
        Arc::clone(&self.payload_cache)
    }

    /// Register an additional cache to trim during cleanup.
    pub fn register_cache(&self, cache: Arc<dyn Trimmable>) {
        debug!(cache = cache.name(), "Cache registered for memory cleanup");
        self.caches.write().push(cache);
    }

    /// Current usage percentage, `None` when the host cannot tell.
    pub fn get_memory_usage(&self) -> Option<f64> {
        let usage = self.host.memory().map(|m| m.percentage);
        if usage.is_some() {
            *self.last_usage.lock() = usage;
        }
        usage
    }

    /// Last successfully read usage, without sampling.
    pub fn last_known_usage(&self) -> Option<f64> {
        *self.last_usage.lock()
    }

    // ========================================================================
    // Cleanup
    // ========================================================================

    /// Trim caches and purge temporary/cache/backup keys. Not throttled.
    pub fn standard_cleanup(&self) -> CleanupReport {
        let caches = self.trim_caches(TrimLevel::Standard);
        let purged_keys = self.purge_persisted_keys();

        info!(
            purged_keys,
            bytes_freed = caches.iter().map(|r| r.bytes_freed).sum::<usize>(),
            "Standard memory cleanup complete"
        );
        CleanupReport { caches, purged_keys }
    }

    /// Aggressive cleanup: standard cleanup, full cache trim, heap release,
    /// `memory-pressure` broadcast, settle delay, recheck.
    ///
    /// Emits `memory-critical` if usage is still above the aggressive
    /// threshold after the recheck.
    pub async fn force_cleanup(&self) -> ForceCleanupOutcome {
        self.throttle.lock().record();
        self.run_aggressive().await
    }

    async fn run_aggressive(&self) -> ForceCleanupOutcome {
        let usage_before = self.get_memory_usage();
        warn!(usage_percent = ?usage_before, "Aggressive memory cleanup");

        let standard = self.standard_cleanup();
        let aggressive = self.trim_caches(TrimLevel::Aggressive);
        let heap_released = release_free_heap();

        self.signals.emit(HealthSignal::MemoryPressure {
            usage_percent: usage_before,
        });

        tokio::time::sleep(self.config.recheck_delay()).await;

        let usage_after = self.get_memory_usage();
        let still_critical =
            usage_after.is_some_and(|u| u > self.config.aggressive_threshold_percent);

        if let (true, Some(usage)) = (still_critical, usage_after) {
            warn!(usage_percent = usage, "Memory still critical after cleanup");
            self.signals.emit(HealthSignal::MemoryCritical { usage_percent: usage });
        } else {
            info!(usage_percent = ?usage_after, heap_released, "Aggressive cleanup relieved pressure");
        }

        ForceCleanupOutcome {
            standard,
            aggressive,
            heap_released,
            usage_before,
            usage_after,
            still_critical,
        }
    }

    fn trim_caches(&self, level: TrimLevel) -> Vec<TrimReport> {
        let caches: Vec<Arc<dyn Trimmable>> = self.caches.read().clone();
        caches
            .iter()
            .filter_map(|cache| super::guarded(cache.name(), || cache.trim(level)))
            .filter(|report| report.entries_removed > 0)
            .collect()
    }

    fn purge_persisted_keys(&self) -> usize {
        let keys = match self.store.keys() {
            Ok(keys) => keys,
            Err(e) => {
                warn!(backend = self.store.backend_name(), error = %e, "Cannot list keys for cleanup");
                return 0;
            }
        };

        let mut purged = 0;
        for key in keys
            .iter()
            .filter(|key| self.purge_patterns.iter().any(|p| p.is_match(key)))
        {
            match self.store.remove(key) {
                Ok(Some(_)) => purged += 1,
                Ok(None) => {}
                Err(e) => warn!(key = %key, error = %e, "Failed to purge key"),
            }
        }
        purged
    }

    // ========================================================================
    // Sampling loop
    // ========================================================================

    /// One sampling tick: read usage and run the cleanup it calls for.
    pub async fn tick(&self) -> MemoryTick {
        let Some(usage) = self.get_memory_usage() else {
            debug!("Memory usage unavailable, skipping tick");
            return MemoryTick::Unavailable;
        };

        if usage <= self.config.standard_threshold_percent {
            return MemoryTick::BelowThreshold { usage_percent: usage };
        }

        if !self.throttle.lock().try_acquire(self.config.cleanup_cooldown()) {
            debug!(usage_percent = usage, "Cleanup throttled");
            return MemoryTick::Throttled { usage_percent: usage };
        }

        if usage > self.config.aggressive_threshold_percent {
            MemoryTick::Aggressive {
                outcome: self.run_aggressive().await,
            }
        } else {
            MemoryTick::Standard {
                usage_percent: usage,
                report: self.standard_cleanup(),
            }
        }
    }

    /// Spawn the periodic sampling loop into the supervisor's task set.
    pub fn spawn(self: &Arc<Self>, task_set: &mut JoinSet<TaskName>, cancel_token: CancellationToken) {
        let manager = Arc::clone(self);
        task_set.spawn(async move {
            let period = manager.config.sample_interval();
            info!("[MemorySampler] Task starting with interval {:?}", period);

            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    () = cancel_token.cancelled() => {
                        info!("[MemorySampler] Received shutdown signal");
                        return TaskName::MemorySampler;
                    }
                    _ = interval.tick() => {
                        let outcome = manager.tick().await;
                        debug!(?outcome, "Memory tick");
                    }
                }
            }
        });
    }
}
