// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wakeup sources for the scheduler loop.
//!
//! Two triggers feed one channel: SIGUSR1 from peer CLI processes, and a
//! best-effort file-change hint on the jobs database. The loop debounces
//! the channel itself.

use std::path::Path;

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Spawns the wake sources, returning the receiving end.
pub fn spawn_wake_sources(
    jobs_db_path: &Path,
    cancel: CancellationToken,
) -> mpsc::Receiver<()> {
    let (tx, rx) = mpsc::channel::<()>(16);

    spawn_signal_source(tx.clone(), cancel.clone());
    spawn_watch_source(jobs_db_path, tx, cancel);

    rx
}

/// SIGUSR1 listener: CLI commands signal after mutating the stores.
fn spawn_signal_source(tx: mpsc::Sender<()>, cancel: CancellationToken) {
    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        let mut usr1 = match signal(SignalKind::user_defined1()) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "failed to install SIGUSR1 handler");
                return;
            }
        };
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                signalled = usr1.recv() => {
                    if signalled.is_none() {
                        break;
                    }
                    debug!("wakeup: SIGUSR1");
                    if tx.send(()).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    #[cfg(not(unix))]
    {
        let _ = (tx, cancel);
    }
}

/// File-change hint on the jobs database. Best-effort: when the watcher
/// cannot start, signalling alone still wakes the loop.
fn spawn_watch_source(jobs_db_path: &Path, tx: mpsc::Sender<()>, cancel: CancellationToken) {
    let watch_dir = jobs_db_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    let db_name = jobs_db_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let handler_tx = tx.clone();
    let watcher: Result<RecommendedWatcher, _> = notify::recommended_watcher(
        move |result: Result<Event, notify::Error>| match result {
            Ok(event) => {
                let touches_db = event
                    .paths
                    .iter()
                    .any(|p| p.file_name().is_some_and(|n| n.to_string_lossy().starts_with(&db_name)));
                if touches_db {
                    debug!("wakeup: jobs database changed");
                    let _ = handler_tx.blocking_send(());
                }
            }
            Err(e) => warn!(error = %e, "jobs watcher error"),
        },
    );

    match watcher {
        Ok(mut watcher) => {
            if let Err(e) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
                warn!(error = %e, "could not watch jobs database directory");
                return;
            }
            // Keep the watcher alive until shutdown.
            tokio::spawn(async move {
                cancel.cancelled().await;
                drop(watcher);
            });
        }
        Err(e) => {
            warn!(error = %e, "file watcher unavailable, relying on signals");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_change_produces_wake() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("jobs.db");
        std::fs::write(&db_path, b"initial").unwrap();

        let cancel = CancellationToken::new();
        let mut rx = spawn_wake_sources(&db_path, cancel.clone());

        // Touch the file (WAL sidecars count too, hence the prefix match).
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        std::fs::write(&db_path, b"changed").unwrap();

        let woke = tokio::time::timeout(std::time::Duration::from_secs(3), rx.recv()).await;
        assert!(woke.is_ok(), "expected a wakeup after the file changed");
        cancel.cancel();
    }
}
