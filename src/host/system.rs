//! Production `HostProbe` backed by sysinfo, reqwest and (optionally) the battery crate

use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;
use sysinfo::{MemoryRefreshKind, Networks, Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};
use tokio::time::Instant;
use tracing::debug;

use super::{BatterySample, HostError, HostProbe, MemorySample};
use crate::config::defaults::LATENCY_PROBE_TIMEOUT_MS;
use crate::config::HostConfig;

/// Interface names that never indicate real connectivity.
const LOOPBACK_PREFIXES: &[&str] = &["lo", "Loopback"];

/// Introspects the machine the runtime is running on.
///
/// Memory is measured as this process's resident size against
/// `memory_budget_mb` when a budget is configured, otherwise as system-wide
/// used/total memory.
pub struct SystemHost {
    system: Mutex<System>,
    pid: Option<Pid>,
    memory_budget_bytes: Option<u64>,
    probe_url: Option<String>,
    http: reqwest::Client,
    probe_timeout: Duration,
}

impl SystemHost {
    pub fn new(config: &HostConfig) -> Result<Self, HostError> {
        let probe_timeout = Duration::from_millis(LATENCY_PROBE_TIMEOUT_MS);
        let http = reqwest::Client::builder().timeout(probe_timeout).build()?;
        let system = System::new_with_specifics(
            RefreshKind::nothing().with_memory(MemoryRefreshKind::everything()),
        );

        Ok(Self {
            system: Mutex::new(system),
            pid: sysinfo::get_current_pid().ok(),
            memory_budget_bytes: config
                .memory_budget_mb
                .filter(|mb| *mb > 0)
                .map(|mb| mb.saturating_mul(1024 * 1024)),
            probe_url: config.probe_url.clone(),
            http,
            probe_timeout,
        })
    }

    fn process_memory(&self, system: &mut System, pid: Pid) -> Option<u64> {
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );
        system.process(pid).map(sysinfo::Process::memory)
    }
}

fn percentage(used: u64, total: u64) -> f64 {
    (used as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
}

#[async_trait]
impl HostProbe for SystemHost {
    fn memory(&self) -> Option<MemorySample> {
        let mut system = self.system.lock();

        if let (Some(pid), Some(budget)) = (self.pid, self.memory_budget_bytes) {
            let used = self.process_memory(&mut system, pid)?;
            return Some(MemorySample {
                used_bytes: used,
                percentage: percentage(used, budget),
            });
        }

        system.refresh_memory();
        let total = system.total_memory();
        if total == 0 {
            return None;
        }
        let used = system.used_memory();
        Some(MemorySample {
            used_bytes: used,
            percentage: percentage(used, total),
        })
    }

    fn is_online(&self) -> Option<bool> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return None;
        }
        let networks = Networks::new_with_refreshed_list();
        let online = networks.list().iter().any(|(name, data)| {
            !LOOPBACK_PREFIXES.iter().any(|p| name.starts_with(p))
                && (data.total_received() > 0 || data.total_transmitted() > 0)
        });
        Some(online)
    }

    async fn round_trip(&self) -> Result<Option<Duration>, HostError> {
        let Some(url) = self.probe_url.as_deref() else {
            return Ok(None);
        };

        let started = Instant::now();
        let response = self.http.head(url).send().await.map_err(|e| {
            if e.is_timeout() {
                HostError::Timeout(self.probe_timeout)
            } else {
                HostError::Http(e)
            }
        })?;

        let status = response.status();
        if !(status.is_success() || status.is_redirection()) {
            return Err(HostError::Status(status));
        }

        let elapsed = started.elapsed();
        debug!(url, latency_ms = elapsed.as_millis() as u64, "Latency round trip complete");
        Ok(Some(elapsed))
    }

    fn battery(&self) -> Option<BatterySample> {
        read_battery()
    }
}

/// Full counts as charging: the device is on external power either way.
#[cfg(feature = "battery-probe")]
fn read_battery() -> Option<BatterySample> {
    let manager = battery::Manager::new().ok()?;
    let mut batteries = manager.batteries().ok()?;
    let battery = batteries.next()?.ok()?;

    let level = f64::from(battery.state_of_charge().value) * 100.0;
    let charging = matches!(battery.state(), battery::State::Charging | battery::State::Full);
    Some(BatterySample {
        level: level.clamp(0.0, 100.0),
        charging,
    })
}

#[cfg(not(feature = "battery-probe"))]
fn read_battery() -> Option<BatterySample> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_is_clamped() {
        assert_eq!(percentage(50, 100), 50.0);
        assert_eq!(percentage(300, 100), 100.0);
    }

    #[tokio::test]
    async fn round_trip_without_url_is_unmeasured() {
        let host = SystemHost::new(&HostConfig::default()).unwrap();
        assert!(host.round_trip().await.unwrap().is_none());
    }

    #[test]
    fn system_memory_is_within_bounds() {
        let host = SystemHost::new(&HostConfig::default()).unwrap();
        if let Some(sample) = host.memory() {
            assert!((0.0..=100.0).contains(&sample.percentage));
        }
    }
}
