// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared types used across crate boundaries.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Process-wide identity discriminator. The schema admits future
/// multi-tenant extension, but this build is single-user.
pub const BOB_ID: &str = "bob";

/// A conversation endpoint: a numeric chat, optionally subdivided by a
/// forum-style thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatRef {
    pub chat_id: i64,
    pub thread_id: Option<i64>,
}

impl ChatRef {
    pub fn new(chat_id: i64, thread_id: Option<i64>) -> Self {
        Self { chat_id, thread_id }
    }
}

/// Message author role in the conversation log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Kind of a rich-text span, transport-neutral.
///
/// The Telegram adapter maps these onto Bot API message entities; mocks
/// record them verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    Bold,
    Italic,
    Code,
    Pre { language: Option<String> },
    TextLink { url: String },
}

/// A rich-text span over the rendered message text.
///
/// Offsets and lengths are in UTF-16 code units, matching the Bot API's
/// entity addressing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextEntity {
    pub kind: EntityKind,
    pub offset: usize,
    pub length: usize,
}

/// An outbound chat message, fully rendered.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub chat: ChatRef,
    pub text: String,
    pub entities: Vec<TextEntity>,
    pub reply_to: Option<i64>,
}

impl OutgoingMessage {
    /// Plain-text message with no formatting and no reply threading.
    pub fn plain(chat: ChatRef, text: impl Into<String>) -> Self {
        Self {
            chat,
            text: text.into(),
            entities: Vec::new(),
            reply_to: None,
        }
    }
}

/// A record of one tool invocation the engine performed during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineAction {
    pub kind: ActionKind,
    pub name: String,
    pub detail: Option<String>,
}

/// Category of an engine tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Bash,
    Read,
    Write,
    Edit,
    Tool,
}
