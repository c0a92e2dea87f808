// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Crash marker (`data/last_exit.json`).
//!
//! The daemon writes a dirty marker at startup and rewrites it with exit
//! code 0 on clean shutdown. A startup that finds a non-clean marker
//! synthesizes a `daemon_crashed` event to the first allow-listed chat, so
//! the next heartbeat tells the user.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use bob_config::BobPaths;
use bob_core::BobError;
use bob_storage::queries::events;
use bob_storage::{statefile, Database, EventInput};

/// Exit codes that do not count as a crash: clean exit plus the common
/// interrupt codes (SIGINT, SIGTERM).
const CLEAN_CODES: [i32; 3] = [0, 130, 143];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitMarker {
    pub exit_code: i32,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

/// Startup pass: report a prior crash (if the marker says so) and arm the
/// dirty marker for this run.
pub async fn startup_check(
    events_db: &Database,
    paths: &BobPaths,
    allowlist: &[i64],
    now_ms: i64,
) -> Result<(), BobError> {
    let marker_path = paths.last_exit();

    if let Some(marker) = statefile::read_json::<ExitMarker>(&marker_path) {
        if !CLEAN_CODES.contains(&marker.exit_code) {
            warn!(exit_code = marker.exit_code, "previous run did not exit cleanly");
            if let Some(&chat_id) = allowlist.first() {
                let stderr = marker
                    .stderr
                    .as_deref()
                    .map(|s| s.chars().take(500).collect::<String>());
                events::add(
                    events_db,
                    EventInput {
                        chat_id,
                        thread_id: None,
                        kind: "daemon_crashed".to_string(),
                        payload: serde_json::json!({
                            "exit_code": marker.exit_code,
                            "at": marker.timestamp,
                            "stderr": stderr,
                        }),
                    },
                    now_ms,
                )
                .await?;
                info!(chat_id, "daemon_crashed event queued");
            }
        }
    }

    // Dirty until proven otherwise: a crash leaves this in place.
    statefile::write_json_atomic(
        &marker_path,
        &ExitMarker {
            exit_code: 1,
            timestamp: now_ms,
            stderr: None,
        },
    )
}

/// Clean-shutdown pass: rewrite the marker with exit code 0.
pub fn mark_clean_exit(paths: &BobPaths, now_ms: i64) {
    let result = statefile::write_json_atomic(
        &paths.last_exit(),
        &ExitMarker {
            exit_code: 0,
            timestamp: now_ms,
            stderr: None,
        },
    );
    if let Err(e) = result {
        warn!(error = %e, "failed to write clean exit marker");
    }
}
