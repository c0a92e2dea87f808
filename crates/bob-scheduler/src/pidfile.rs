// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scheduler PID file.
//!
//! The daemon writes its PID so CLI commands can nudge it with SIGUSR1
//! after mutating the stores. Everything here is best-effort: a missing or
//! stale PID file must never block a CLI operation.

use std::path::Path;

use tracing::debug;

use bob_core::BobError;

/// Writes the current process id.
pub fn write(path: &Path) -> Result<(), BobError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| BobError::Storage {
            source: Box::new(e),
        })?;
    }
    std::fs::write(path, std::process::id().to_string()).map_err(|e| BobError::Storage {
        source: Box::new(e),
    })
}

/// Reads the stored PID, if the file exists and parses.
pub fn read(path: &Path) -> Option<i32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Removes the PID file, ignoring absence.
pub fn remove(path: &Path) {
    let _ = std::fs::remove_file(path);
}

/// Signals a running scheduler with SIGUSR1. Returns whether a signal was
/// delivered; failure only means the daemon was not running.
pub fn signal_scheduler(path: &Path) -> bool {
    let Some(pid) = read(path) else {
        debug!(path = %path.display(), "no scheduler pid file, skipping wakeup");
        return false;
    };

    #[cfg(unix)]
    {
        let delivered = unsafe { libc::kill(pid, libc::SIGUSR1) } == 0;
        if !delivered {
            debug!(pid, "scheduler pid not signallable (stale pid file?)");
        }
        delivered
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}
