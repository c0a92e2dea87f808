// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Streaming engine trait.
//!
//! An engine is an exchangeable LLM runner behind a uniform `run` interface.
//! Implementations emit a stream of [`EngineEvent`]s: text deltas as they
//! arrive, tool-call records, and a terminal [`EngineOutcome`] carrying the
//! final text and an opaque resume token.

use std::path::PathBuf;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::BobError;
use crate::types::EngineAction;

/// A single request to an engine.
#[derive(Debug, Clone, Default)]
pub struct EngineRequest {
    /// The fully assembled prompt, context already injected.
    pub prompt: String,
    /// Paths of images attached to the request.
    pub images: Vec<PathBuf>,
    /// Working directory for the engine process.
    pub cwd: Option<PathBuf>,
    /// Opaque token from a previous run of the same engine in the same chat.
    pub resume_token: Option<String>,
}

/// Terminal result of an engine run.
#[derive(Debug, Clone, Default)]
pub struct EngineOutcome {
    /// The complete assistant text.
    pub final_text: String,
    /// Tool invocations observed during the run.
    pub actions: Vec<EngineAction>,
    /// Token that resumes this conversation on the next run, if any.
    pub session_token: Option<String>,
}

/// An event emitted while an engine run is in flight.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A fragment of assistant text.
    Delta(String),
    /// A tool invocation record.
    Action(EngineAction),
    /// The run finished.
    Completed(EngineOutcome),
}

/// Boxed stream of engine events.
pub type EngineStream = Pin<Box<dyn Stream<Item = Result<EngineEvent, BobError>> + Send>>;

/// A streaming LLM runner.
#[async_trait]
pub trait EngineAdapter: Send + Sync {
    /// Stable identifier ("claude", "codex", …), used to key resume tokens.
    fn id(&self) -> &str;

    /// Starts a run and returns its event stream.
    async fn run(&self, request: EngineRequest) -> Result<EngineStream, BobError>;
}
