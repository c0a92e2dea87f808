// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Stateful wrapper around the pure DND window.
//!
//! Owns the persisted ad-hoc override (`data/dnd-state.json`): reads it for
//! every check, clears it lazily once expired, and exposes the CLI's
//! on/off operations.

use std::path::PathBuf;

use tracing::info;

use bob_core::BobError;
use bob_schedule::{AdhocDnd, DndState, DndStatus, DndWindow};
use bob_storage::statefile;

pub struct DndGate {
    window: DndWindow,
    state_path: PathBuf,
}

impl DndGate {
    pub fn new(window: DndWindow, state_path: impl Into<PathBuf>) -> Self {
        Self {
            window,
            state_path: state_path.into(),
        }
    }

    /// Evaluates DND now, clearing an expired ad-hoc record on the way.
    pub fn status(&self, now_ms: i64) -> DndStatus {
        let state = statefile::read_json::<DndState>(&self.state_path).unwrap_or_default();
        let status = self.window.status(state.adhoc.as_ref(), now_ms);
        if status.clear_adhoc {
            info!("clearing expired ad-hoc dnd");
            let _ = statefile::write_json_atomic(&self.state_path, &DndState::default());
        }
        status
    }

    /// Arms an ad-hoc override until the given instant.
    pub fn set_adhoc(&self, until_ms: i64, reason: Option<String>) -> Result<(), BobError> {
        statefile::write_json_atomic(
            &self.state_path,
            &DndState {
                adhoc: Some(AdhocDnd {
                    until: until_ms,
                    reason,
                }),
            },
        )
    }

    /// Drops any ad-hoc override.
    pub fn clear_adhoc(&self) -> Result<(), BobError> {
        statefile::write_json_atomic(&self.state_path, &DndState::default())
    }
}
