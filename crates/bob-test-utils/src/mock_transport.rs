// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock chat transport for deterministic testing.
//!
//! `MockTransport` implements [`ChatTransport`] with a captured call log
//! and injectable failures, so streaming-reply tests can assert on the
//! exact sequence of sends, edits, and reactions without a network.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use bob_core::types::{ChatRef, OutgoingMessage, TextEntity};
use bob_core::{BobError, ChatTransport};

/// One recorded transport interaction.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    Send {
        chat: ChatRef,
        text: String,
        entities: Vec<TextEntity>,
        reply_to: Option<i64>,
        message_id: i64,
    },
    Edit {
        chat: ChatRef,
        message_id: i64,
        text: String,
        entities: Vec<TextEntity>,
    },
    React {
        chat: ChatRef,
        message_id: i64,
        emoji: String,
    },
    Typing {
        chat: ChatRef,
    },
}

/// A mock transport with a captured call log.
#[derive(Default)]
pub struct MockTransport {
    calls: Mutex<Vec<TransportCall>>,
    next_message_id: Mutex<i64>,
    /// Error messages popped (front first) on each `edit_message` call.
    /// `None` entries mean success.
    edit_failures: Mutex<VecDeque<Option<String>>>,
    /// Error messages popped on each `send_reaction` call.
    reaction_failures: Mutex<VecDeque<Option<String>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            next_message_id: Mutex::new(1000),
            ..Default::default()
        }
    }

    /// Queue an edit outcome: `Some(message)` fails with that transport
    /// error, `None` succeeds. Unqueued edits succeed.
    pub fn push_edit_failure(&self, message: Option<&str>) {
        self.edit_failures
            .lock()
            .unwrap()
            .push_back(message.map(str::to_string));
    }

    /// Queue a reaction outcome, same convention as [`push_edit_failure`].
    pub fn push_reaction_failure(&self, message: Option<&str>) {
        self.reaction_failures
            .lock()
            .unwrap()
            .push_back(message.map(str::to_string));
    }

    /// Every recorded call, in order.
    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Texts of sent messages, in order.
    pub fn sent_texts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                TransportCall::Send { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    /// The visible text per message id after all sends and edits replayed.
    pub fn visible_texts(&self) -> Vec<(i64, String)> {
        let mut result: Vec<(i64, String)> = Vec::new();
        for call in self.calls() {
            match call {
                TransportCall::Send {
                    message_id, text, ..
                } => result.push((message_id, text)),
                TransportCall::Edit {
                    message_id, text, ..
                } => {
                    if let Some(entry) = result.iter_mut().find(|(id, _)| *id == message_id) {
                        entry.1 = text;
                    }
                }
                _ => {}
            }
        }
        result
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    async fn send_message(&self, msg: OutgoingMessage) -> Result<i64, BobError> {
        let mut next = self.next_message_id.lock().unwrap();
        *next += 1;
        let id = *next;
        self.calls.lock().unwrap().push(TransportCall::Send {
            chat: msg.chat,
            text: msg.text,
            entities: msg.entities,
            reply_to: msg.reply_to,
            message_id: id,
        });
        Ok(id)
    }

    async fn edit_message(
        &self,
        chat: ChatRef,
        message_id: i64,
        text: &str,
        entities: &[TextEntity],
    ) -> Result<(), BobError> {
        if let Some(Some(message)) = self.edit_failures.lock().unwrap().pop_front() {
            return Err(BobError::transport(message));
        }
        self.calls.lock().unwrap().push(TransportCall::Edit {
            chat,
            message_id,
            text: text.to_string(),
            entities: entities.to_vec(),
        });
        Ok(())
    }

    async fn send_reaction(
        &self,
        chat: ChatRef,
        message_id: i64,
        emoji: &str,
    ) -> Result<(), BobError> {
        if let Some(Some(message)) = self.reaction_failures.lock().unwrap().pop_front() {
            return Err(BobError::transport(message));
        }
        self.calls.lock().unwrap().push(TransportCall::React {
            chat,
            message_id,
            emoji: emoji.to_string(),
        });
        Ok(())
    }

    async fn send_typing(&self, chat: ChatRef) -> Result<(), BobError> {
        self.calls.lock().unwrap().push(TransportCall::Typing { chat });
        Ok(())
    }
}
