// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Small JSON state files with crash-safe writes.
//!
//! Writers go through a temp file in the same directory followed by a
//! rename, so readers never observe a torn file. Readers tolerate absence
//! and malformed content by returning `None`.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use bob_core::BobError;

/// Read and deserialize a JSON state file.
///
/// Absence and malformed content both yield `None`; the latter is logged.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let raw = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring malformed state file");
            None
        }
    }
}

/// Serialize and atomically write a JSON state file (temp file + rename).
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), BobError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| BobError::Storage {
        source: Box::new(e),
    })?;

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(io_err)?;

    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, json).map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)?;
    Ok(())
}

/// Remove a state file, ignoring absence.
pub fn remove(path: &Path) {
    let _ = std::fs::remove_file(path);
}

fn io_err(e: std::io::Error) -> BobError {
    BobError::Storage {
        source: Box::new(e),
    }
}
