// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the bob assistant daemon.

use thiserror::Error;

/// The primary error type used across all bob crates.
#[derive(Debug, Error)]
pub enum BobError {
    /// Configuration errors (invalid TOML, missing required fields).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Chat transport errors (send/edit failure, rate limiting).
    #[error("transport error: {message}")]
    Transport {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Engine errors (subprocess spawn failure, malformed stream).
    #[error("engine error: {message}")]
    Engine {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A schedule string could not be parsed.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// A resolved path escaped its confinement root.
    #[error("path escapes allowed root: {0}")]
    PathEscape(String),

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl BobError {
    /// Shorthand for a transport error with no underlying source.
    pub fn transport(message: impl Into<String>) -> Self {
        BobError::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Shorthand for an engine error with no underlying source.
    pub fn engine(message: impl Into<String>) -> Self {
        BobError::Engine {
            message: message.into(),
            source: None,
        }
    }

    /// Whether this is the transport's "message is not modified" edit
    /// rejection, which flushes treat as success.
    pub fn is_not_modified(&self) -> bool {
        matches!(self, BobError::Transport { message, .. }
            if message.contains("message is not modified"))
    }

    /// Whether the transport rejected the rich-text entities, in which case
    /// the caller retries once as plain text.
    pub fn is_entity_rejection(&self) -> bool {
        matches!(self, BobError::Transport { message, .. }
            if message.contains("parse entities") || message.contains("entity"))
    }
}
