//! Process control used by the smart reloader

use std::path::PathBuf;
use std::process::Command;
use tracing::{info, warn};

use crate::types::ViewportPosition;

#[derive(Debug, thiserror::Error)]
pub enum ReloadError {
    #[error("cannot resolve current executable: {0}")]
    Executable(std::io::Error),
    #[error("restart failed: {0}")]
    Restart(std::io::Error),
    #[error("navigation to '{location}' failed: {reason}")]
    Navigate { location: String, reason: String },
}

/// What a full restart needs from the host.
pub trait ReloadHost: Send + Sync {
    /// Where the process currently is, recorded in the reload snapshot
    fn current_location(&self) -> String;

    fn viewport(&self) -> ViewportPosition;

    /// Replace the running process. Returns only on failure in production.
    fn restart(&self) -> Result<(), ReloadError>;

    /// Fallback when `restart` fails: start `location` afresh.
    fn navigate(&self, location: &str) -> Result<(), ReloadError>;
}

/// Restarts the current binary with its original arguments.
///
/// The "location" of a process is its command line.
#[derive(Debug, Clone)]
pub struct ProcessReloadHost {
    args: Vec<String>,
}

impl ProcessReloadHost {
    pub fn new() -> Self {
        Self {
            args: std::env::args().skip(1).collect(),
        }
    }

    fn executable() -> Result<PathBuf, ReloadError> {
        std::env::current_exe().map_err(ReloadError::Executable)
    }
}

impl Default for ProcessReloadHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ReloadHost for ProcessReloadHost {
    fn current_location(&self) -> String {
        let exe = Self::executable()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| "healthd".to_string());
        std::iter::once(exe)
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn viewport(&self) -> ViewportPosition {
        ViewportPosition::default()
    }

    #[cfg(unix)]
    fn restart(&self) -> Result<(), ReloadError> {
        use std::os::unix::process::CommandExt;

        let exe = Self::executable()?;
        info!(exe = %exe.display(), "Re-executing process");
        // exec only returns on failure
        let err = Command::new(exe).args(&self.args).exec();
        Err(ReloadError::Restart(err))
    }

    #[cfg(not(unix))]
    fn restart(&self) -> Result<(), ReloadError> {
        let exe = Self::executable()?;
        info!(exe = %exe.display(), "Spawning replacement process");
        Command::new(exe)
            .args(&self.args)
            .spawn()
            .map_err(ReloadError::Restart)?;
        std::process::exit(0);
    }

    fn navigate(&self, location: &str) -> Result<(), ReloadError> {
        let mut parts = location.split_whitespace();
        let Some(program) = parts.next() else {
            return Err(ReloadError::Navigate {
                location: location.to_string(),
                reason: "empty location".to_string(),
            });
        };

        warn!(location, "Restart failed, relaunching from recorded location");
        Command::new(program)
            .args(parts)
            .spawn()
            .map_err(|e| ReloadError::Navigate {
                location: location.to_string(),
                reason: e.to_string(),
            })?;
        std::process::exit(0);
    }
}
