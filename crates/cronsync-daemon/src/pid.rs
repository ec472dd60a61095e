//! PID file guarding against two agents on one endpoint.
//!
//! Two agents would race on the same native scheduler, so a live PID in the
//! file refuses startup; a PID whose process is gone is reclaimed.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::DaemonError;

#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    owned: bool,
}

impl PidFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            owned: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this handle wrote the file and will remove it on drop.
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// PID recorded in the file, if any.
    pub fn read_pid(&self) -> Result<Option<u32>, DaemonError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(DaemonError::PidFileRead {
                    path: self.path.clone(),
                    reason: e.to_string(),
                });
            }
        };
        contents
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|e| DaemonError::PidFileRead {
                path: self.path.clone(),
                reason: format!("Invalid PID format: {}", e),
            })
    }

    #[cfg(unix)]
    pub fn is_process_running(pid: u32) -> bool {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        // Signal 0 probes for existence; EPERM still means the process exists.
        match kill(Pid::from_raw(raw), None) {
            Ok(()) => true,
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    #[cfg(not(unix))]
    pub fn is_process_running(_pid: u32) -> bool {
        true
    }

    /// Claim the file for this process, reclaiming it from a dead owner.
    pub fn acquire(&mut self) -> Result<(), DaemonError> {
        self.acquire_as(std::process::id())
    }

    fn acquire_as(&mut self, pid: u32) -> Result<(), DaemonError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.creation_error(e))?;
        }

        for _ in 0..2 {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.path)
            {
                Ok(mut file) => {
                    write!(file, "{}", pid).map_err(|e| self.creation_error(e))?;
                    self.owned = true;
                    info!("PID file created: {} (PID: {})", self.path.display(), pid);
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    match self.read_pid() {
                        Ok(Some(existing)) if Self::is_process_running(existing) => {
                            return Err(DaemonError::AlreadyRunning {
                                path: self.path.clone(),
                                pid: existing,
                            });
                        }
                        Ok(existing) => warn!(
                            "Reclaiming stale PID file {} (PID {:?} not running)",
                            self.path.display(),
                            existing
                        ),
                        Err(e) => warn!("Reclaiming unreadable PID file: {}", e),
                    }
                    self.unlink()?;
                }
                Err(e) => return Err(self.creation_error(e)),
            }
        }
        Err(self.creation_error(std::io::Error::other(
            "PID file reappeared while reclaiming it",
        )))
    }

    /// Remove the file if this handle owns it.
    pub fn release(&mut self) -> Result<(), DaemonError> {
        if self.owned {
            self.unlink()?;
            self.owned = false;
            info!("PID file removed: {}", self.path.display());
        }
        Ok(())
    }

    fn unlink(&self) -> Result<(), DaemonError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DaemonError::PidFileRemoval {
                path: self.path.clone(),
                reason: e.to_string(),
            }),
        }
    }

    fn creation_error(&self, e: std::io::Error) -> DaemonError {
        DaemonError::PidFileCreation {
            path: self.path.clone(),
            reason: e.to_string(),
        }
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Failed to remove PID file on drop: {}", e);
        }
    }
}

#[cfg(test)]
#[path = "pid_tests.rs"]
mod tests;
