// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Engine adapters.
//!
//! Engines are local CLI agents (`claude`, `codex`) spawned per request
//! with JSON-lines streaming output. Each adapter builds the command line,
//! parses its engine's event dialect into [`EngineEvent`]s, and hands back
//! the opaque session token the CLI reports.

pub mod claude;
pub mod codex;
mod process;

use std::sync::Arc;

use bob_config::model::EnginesConfig;
use bob_core::{BobError, EngineAdapter};

pub use claude::ClaudeEngine;
pub use codex::CodexEngine;

/// Resolves an engine id to its adapter.
pub fn engine_for(
    id: &str,
    config: &EnginesConfig,
) -> Result<Arc<dyn EngineAdapter>, BobError> {
    match id {
        "claude" => Ok(Arc::new(ClaudeEngine::new(config.claude.clone()))),
        "codex" => Ok(Arc::new(CodexEngine::new(config.codex.clone()))),
        other => Err(BobError::engine(format!("unknown engine: {other}"))),
    }
}

/// Engine ids accepted as `/<engine>` prefixes in chat.
pub fn known_engines() -> &'static [&'static str] {
    &["claude", "codex"]
}
