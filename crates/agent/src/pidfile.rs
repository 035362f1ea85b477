// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-instance PID file lock.

use std::fmt;
use std::path::{Path, PathBuf};

use nix::sys::signal::kill;
use nix::unistd::Pid;
use tracing::{info, warn};

/// Another live process holds the PID lock. The daemon exits 255.
#[derive(Debug)]
pub struct PidLockHeld {
    pub pid: i32,
}

impl fmt::Display for PidLockHeld {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "another instance is already running with PID {}", self.pid)
    }
}

impl std::error::Error for PidLockHeld {}

/// Holds the PID file for the lifetime of the process; removed on drop.
#[derive(Debug)]
pub struct PidLock {
    path: PathBuf,
}

impl PidLock {
    /// Take the lock, breaking a stale one whose process is gone.
    pub fn acquire(path: &Path) -> anyhow::Result<Self> {
        if let Ok(contents) = std::fs::read_to_string(path) {
            if let Ok(pid) = contents.trim().parse::<i32>() {
                if kill(Pid::from_raw(pid), None).is_ok() {
                    return Err(PidLockHeld { pid }.into());
                }
                warn!(pid, "breaking stale PID lock");
            }
        }
        std::fs::write(path, format!("{}\n", std::process::id()))?;
        info!(path = %path.display(), "acquired PID lock");
        Ok(Self { path: path.to_owned() })
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
#[path = "pidfile_tests.rs"]
mod tests;
