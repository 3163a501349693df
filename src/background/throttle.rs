//! Last-action timestamp used for remediation hysteresis

use std::time::Duration;
use tokio::time::Instant;

/// Remembers when an action last ran and answers whether a window has passed.
///
/// One throttle can be checked against different windows; the orchestrator
/// uses a single auto-fix timestamp with a 120s moderate window and a 60s
/// preventive window.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActionThrottle {
    last: Option<Instant>,
}

impl ActionThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if the action never ran or ran at least `window` ago.
    pub fn allows(&self, window: Duration) -> bool {
        self.last.map_or(true, |last| last.elapsed() >= window)
    }

    pub fn record(&mut self) {
        self.last = Some(Instant::now());
    }

    /// Check and record in one step. Returns false without recording if throttled.
    pub fn try_acquire(&mut self, window: Duration) -> bool {
        if self.allows(window) {
            self.record();
            true
        } else {
            false
        }
    }

    pub fn since_last(&self) -> Option<Duration> {
        self.last.map(|last| last.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn allows_first_action() {
        let throttle = ActionThrottle::new();
        assert!(throttle.allows(WINDOW));
        assert!(throttle.since_last().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn suppresses_rapid_repeats() {
        let mut throttle = ActionThrottle::new();
        assert!(throttle.try_acquire(WINDOW));
        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!throttle.try_acquire(WINDOW));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(throttle.try_acquire(WINDOW));
    }

    #[tokio::test(start_paused = true)]
    async fn one_timestamp_many_windows() {
        let mut throttle = ActionThrottle::new();
        throttle.record();
        tokio::time::advance(Duration::from_secs(90)).await;
        assert!(throttle.allows(Duration::from_secs(60)));
        assert!(!throttle.allows(Duration::from_secs(120)));
    }
}
