// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Chat transport trait.
//!
//! The streaming reply engine and the scheduler talk to the chat service
//! exclusively through this trait, so tests can substitute a recording mock.

use async_trait::async_trait;

use crate::error::BobError;
use crate::types::{ChatRef, OutgoingMessage, TextEntity};

/// Adapter over the chat service's send/edit/react primitives.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Sends a new message and returns its transport-assigned message id.
    async fn send_message(&self, msg: OutgoingMessage) -> Result<i64, BobError>;

    /// Edits a previously sent message in place.
    ///
    /// An edit that would not change the visible content surfaces as a
    /// transport error whose message contains "message is not modified";
    /// callers decide whether to swallow it.
    async fn edit_message(
        &self,
        chat: ChatRef,
        message_id: i64,
        text: &str,
        entities: &[TextEntity],
    ) -> Result<(), BobError>;

    /// Attaches an emoji reaction to an existing message.
    async fn send_reaction(
        &self,
        chat: ChatRef,
        message_id: i64,
        emoji: &str,
    ) -> Result<(), BobError>;

    /// Shows the "typing…" indicator for the chat. Best-effort.
    async fn send_typing(&self, chat: ChatRef) -> Result<(), BobError>;
}
