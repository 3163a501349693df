//! Host collaborators: introspection, remote transport and process control
//!
//! Everything the runtime needs from the outside world sits behind a trait
//! here so components can be driven by fakes in tests:
//! - `HostProbe`: memory, connectivity, latency round trip, battery
//! - `RemoteTransport`: the "invoke remote function" call used for probes
//! - `ReloadHost`: restart, re-navigate, location and viewport
//!
//! Introspection never fails hard: an unavailable signal is `None`.
//! `scripted` holds fakes for each trait.

pub mod reload;
pub mod scripted;
pub mod system;
pub mod transport;

pub use system::SystemHost;
pub use transport::{HttpTransport, InvokeResponse, RemoteTransport, TransportError};
pub use reload::{ProcessReloadHost, ReloadError, ReloadHost};

use async_trait::async_trait;
use std::time::Duration;

/// One memory reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemorySample {
    pub used_bytes: u64,
    /// Usage percentage in [0, 100]
    pub percentage: f64,
}

/// One battery reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatterySample {
    /// Charge level in [0, 100]
    pub level: f64,
    pub charging: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("latency probe returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("latency probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("latency probe failed: {0}")]
    Probe(String),
}

/// Best-effort host introspection.
#[async_trait]
pub trait HostProbe: Send + Sync {
    /// Current memory usage, `None` if the host does not expose it
    fn memory(&self) -> Option<MemorySample>;

    /// Connectivity flag, `None` if unknown
    fn is_online(&self) -> Option<bool>;

    /// Time one lightweight round trip. `Ok(None)` means no probe is configured.
    async fn round_trip(&self) -> Result<Option<Duration>, HostError>;

    /// Battery state, `None` on hosts without a battery or battery API
    fn battery(&self) -> Option<BatterySample>;
}

/// Ask the allocator to hand free heap pages back to the OS.
///
/// Returns true if memory was actually released. This is the closest native
/// analogue of a forced garbage-collection hint.
#[cfg(all(target_os = "linux", target_env = "gnu"))]
pub fn release_free_heap() -> bool {
    // SAFETY: malloc_trim only walks the allocator's own free lists.
    #[allow(unsafe_code)]
    let released = unsafe { libc::malloc_trim(0) };
    released == 1
}

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
pub fn release_free_heap() -> bool {
    false
}
