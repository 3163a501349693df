//! Smart Reloader: debounced full restart with a short-lived snapshot
//!
//! State machine: `Idle → Scheduled → Fired`, or `Scheduled → Idle` through
//! `cancel_reload`. A generation counter invalidates timers armed for an
//! earlier schedule, so a cancelled timer can never fire late.

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ReloadConfig;
use crate::host::ReloadHost;
use crate::signals::{HealthSignal, SignalBus};
use crate::storage::KeyValueStore;
use crate::types::{ReloadKind, ReloadReason, ReloadSeverity, ReloadSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReloadPhase {
    Idle,
    Scheduled,
    Fired,
}

impl std::fmt::Display for ReloadPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReloadPhase::Idle => write!(f, "idle"),
            ReloadPhase::Scheduled => write!(f, "scheduled"),
            ReloadPhase::Fired => write!(f, "fired"),
        }
    }
}

struct ReloaderState {
    phase: ReloadPhase,
    generation: u64,
    timer: Option<CancellationToken>,
    pending: Option<ReloadReason>,
}

struct IdleTracker {
    elapsed: Duration,
    watcher: Option<CancellationToken>,
}

pub struct SmartReloader {
    config: ReloadConfig,
    store: Arc<dyn KeyValueStore>,
    host: Arc<dyn ReloadHost>,
    signals: SignalBus,
    state: Mutex<ReloaderState>,
    idle: Mutex<IdleTracker>,
    /// Parent of every timer and watcher token; replaced on shutdown
    root: Mutex<CancellationToken>,
}

impl SmartReloader {
    pub fn new(
        config: ReloadConfig,
        store: Arc<dyn KeyValueStore>,
        host: Arc<dyn ReloadHost>,
        signals: SignalBus,
    ) -> Self {
        Self {
            config,
            store,
            host,
            signals,
            state: Mutex::new(ReloaderState {
                phase: ReloadPhase::Idle,
                generation: 0,
                timer: None,
                pending: None,
            }),
            idle: Mutex::new(IdleTracker {
                elapsed: Duration::ZERO,
                watcher: None,
            }),
            root: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn phase(&self) -> ReloadPhase {
        self.state.lock().phase
    }

    pub fn pending_reason(&self) -> Option<ReloadReason> {
        self.state.lock().pending.clone()
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    /// Arm a restart after `delay`. Returns false (and does nothing) if a
    /// restart is already scheduled or underway.
    pub fn schedule_reload(self: &Arc<Self>, reason: ReloadReason, delay: Duration) -> bool {
        let (generation, timer) = {
            let mut state = self.state.lock();
            if state.phase != ReloadPhase::Idle {
                debug!(phase = %state.phase, reason = %reason, "Reload already pending, ignoring");
                return false;
            }
            state.generation += 1;
            let timer = self.root.lock().child_token();
            state.phase = ReloadPhase::Scheduled;
            state.timer = Some(timer.clone());
            state.pending = Some(reason.clone());
            (state.generation, timer)
        };

        self.persist_snapshot(&reason);

        let countdown_secs = delay.as_secs() + u64::from(delay.subsec_nanos() > 0);
        info!(reason = %reason, countdown_secs, "Reload scheduled");
        self.signals.emit(HealthSignal::ReloadScheduled {
            message: format!("Restarting in {countdown_secs}s: {}", reason.message),
            reason,
            countdown_secs,
        });

        let reloader = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                () = timer.cancelled() => {
                    debug!(generation, "Reload timer cancelled");
                }
                () = tokio::time::sleep(delay) => {
                    reloader.fire(generation);
                }
            }
        });

        true
    }

    /// Disarm a scheduled restart. Returns true if one was pending.
    pub fn cancel_reload(&self) -> bool {
        {
            let mut state = self.state.lock();
            if state.phase != ReloadPhase::Scheduled {
                return false;
            }
            state.generation += 1;
            state.phase = ReloadPhase::Idle;
            state.pending = None;
            if let Some(timer) = state.timer.take() {
                timer.cancel();
            }
        }

        if let Err(e) = self.store.remove(&self.config.snapshot_key) {
            warn!(error = %e, "Failed to discard reload snapshot");
        }
        info!("Scheduled reload cancelled");
        self.signals.emit(HealthSignal::ReloadCancelled);
        true
    }

    fn fire(&self, generation: u64) {
        let location = {
            let mut state = self.state.lock();
            if state.generation != generation || state.phase != ReloadPhase::Scheduled {
                debug!(generation, current = state.generation, "Stale reload timer ignored");
                return;
            }
            state.phase = ReloadPhase::Fired;
            state.timer = None;
            self.host.current_location()
        };

        info!(location = %location, "Restarting process");
        let Err(restart_err) = self.host.restart() else {
            return;
        };

        warn!(error = %restart_err, "Restart failed, re-navigating to current location");
        if let Err(nav_err) = self.host.navigate(&location) {
            error!(error = %nav_err, "Re-navigation failed, reload abandoned");
            let mut state = self.state.lock();
            if state.generation == generation {
                state.phase = ReloadPhase::Idle;
                state.pending = None;
            }
        }
    }

    fn persist_snapshot(&self, reason: &ReloadReason) {
        let snapshot = ReloadSnapshot {
            reason: reason.clone(),
            timestamp: Utc::now(),
            location: self.host.current_location(),
            viewport: self.host.viewport(),
        };

        let result = serde_json::to_vec(&snapshot)
            .map_err(crate::storage::StoreError::from)
            .and_then(|bytes| self.store.set(&self.config.snapshot_key, &bytes))
            .and_then(|()| self.store.flush());
        if let Err(e) = result {
            warn!(error = %e, "Failed to persist reload snapshot");
        }
    }

    /// Read and clear the snapshot left by the previous process.
    ///
    /// Returns it only if it is younger than the snapshot TTL.
    pub fn check_reload_state(&self) -> Option<ReloadSnapshot> {
        let bytes = match self.store.remove(&self.config.snapshot_key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Failed to read reload snapshot");
                return None;
            }
        };

        let snapshot: ReloadSnapshot = match serde_json::from_slice(&bytes) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Discarding unreadable reload snapshot");
                return None;
            }
        };

        let age = Utc::now().signed_duration_since(snapshot.timestamp);
        let fresh = age
            .to_std()
            .map(|age| age <= self.config.snapshot_ttl())
            // Timestamp in the future: clock skew, treat as fresh
            .unwrap_or(true);

        if fresh {
            info!(reason = %snapshot.reason, location = %snapshot.location, "Restored reload snapshot");
            Some(snapshot)
        } else {
            debug!(age_secs = age.num_seconds(), "Discarding stale reload snapshot");
            None
        }
    }

    // ========================================================================
    // Idle-time reload
    // ========================================================================

    /// User-interaction signal: resets idle tracking.
    pub fn record_activity(&self) {
        self.idle.lock().elapsed = Duration::ZERO;
    }

    /// Idle time accumulated by the watcher so far.
    pub fn idle_elapsed(&self) -> Duration {
        self.idle.lock().elapsed
    }

    /// Watch for a continuous idle period and then schedule a low-urgency
    /// reload. Returns false if a watcher is already running.
    pub fn schedule_reload_when_idle(self: &Arc<Self>) -> bool {
        let token = {
            let mut idle = self.idle.lock();
            if idle.watcher.as_ref().is_some_and(|t| !t.is_cancelled()) {
                return false;
            }
            let token = self.root.lock().child_token();
            idle.elapsed = Duration::ZERO;
            idle.watcher = Some(token.clone());
            token
        };

        let reloader = Arc::clone(self);
        tokio::spawn(async move {
            let step = reloader.config.idle_tick();
            let threshold = reloader.config.idle_threshold();
            debug!(?step, ?threshold, "Idle watcher started");

            loop {
                tokio::select! {
                    () = token.cancelled() => return,
                    () = tokio::time::sleep(step) => {}
                }

                let elapsed = {
                    let mut idle = reloader.idle.lock();
                    idle.elapsed += step;
                    idle.elapsed
                };
                if elapsed < threshold {
                    continue;
                }

                let reason = ReloadReason::new(
                    ReloadKind::Update,
                    ReloadSeverity::Low,
                    "Applying pending updates while idle",
                );
                reloader.schedule_reload(reason, reloader.config.idle_reload_delay());
                token.cancel();
                return;
            }
        });

        true
    }

    /// Cancel the pending timer and idle watcher. The reloader can be used
    /// again afterwards.
    pub fn shutdown(&self) {
        let previous = std::mem::replace(&mut *self.root.lock(), CancellationToken::new());
        previous.cancel();

        let mut state = self.state.lock();
        state.generation += 1;
        state.timer = None;
        let was_scheduled = state.phase == ReloadPhase::Scheduled;
        if was_scheduled {
            state.phase = ReloadPhase::Idle;
            state.pending = None;
        }
        drop(state);

        // The restart will never fire, so its snapshot must not be restored
        if was_scheduled {
            if let Err(e) = self.store.remove(&self.config.snapshot_key) {
                warn!(error = %e, "Failed to discard reload snapshot");
            }
        }

        self.idle.lock().watcher = None;
        debug!("Smart reloader shut down");
    }
}
