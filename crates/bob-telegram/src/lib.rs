// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Telegram transport for the bob assistant daemon.
//!
//! Implements [`ChatTransport`] over the Bot API via teloxide, the in-band
//! directive tokenizer, markdown-to-entity rendering, the streaming reply
//! engine, and a long-poll update reader with offset persistence.

pub mod directives;
pub mod entities;
pub mod streaming;
pub mod updates;

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{
    ChatAction, MessageEntity, MessageEntityKind, ReactionType, ReplyParameters, ThreadId,
};
use tracing::debug;

use bob_core::types::{ChatRef, EntityKind, OutgoingMessage, TextEntity};
use bob_core::{BobError, ChatTransport};

pub use streaming::{ReplyOptions, ReplyOutcome, ReplyStream};
pub use updates::{InboundMessage, UpdatePoller};

/// [`ChatTransport`] over the Telegram Bot API.
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    /// Creates the transport. The token must be non-empty; this is a
    /// startup invariant, not something to default around.
    pub fn new(token: &str) -> Result<Self, BobError> {
        if token.is_empty() {
            return Err(BobError::Config("telegram.token must be set".into()));
        }
        Ok(Self {
            bot: Bot::new(token),
        })
    }

    pub fn bot(&self) -> &Bot {
        &self.bot
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn send_message(&self, msg: OutgoingMessage) -> Result<i64, BobError> {
        let mut request = self.bot.send_message(ChatId(msg.chat.chat_id), &msg.text);
        if !msg.entities.is_empty() {
            request = request.entities(to_telegram_entities(&msg.entities));
        }
        if let Some(thread_id) = msg.chat.thread_id {
            request = request.message_thread_id(ThreadId(teloxide::types::MessageId(
                thread_id as i32,
            )));
        }
        if let Some(reply_to) = msg.reply_to {
            request =
                request.reply_parameters(ReplyParameters::new(teloxide::types::MessageId(
                    reply_to as i32,
                )));
        }

        let sent = request.await.map_err(transport_err)?;
        Ok(sent.id.0 as i64)
    }

    async fn edit_message(
        &self,
        chat: ChatRef,
        message_id: i64,
        text: &str,
        text_entities: &[TextEntity],
    ) -> Result<(), BobError> {
        let mut request = self.bot.edit_message_text(
            ChatId(chat.chat_id),
            teloxide::types::MessageId(message_id as i32),
            text,
        );
        if !text_entities.is_empty() {
            request = request.entities(to_telegram_entities(text_entities));
        }
        request.await.map_err(transport_err)?;
        Ok(())
    }

    async fn send_reaction(
        &self,
        chat: ChatRef,
        message_id: i64,
        emoji: &str,
    ) -> Result<(), BobError> {
        self.bot
            .set_message_reaction(
                ChatId(chat.chat_id),
                teloxide::types::MessageId(message_id as i32),
            )
            .reaction(vec![ReactionType::Emoji {
                emoji: emoji.to_string(),
            }])
            .await
            .map_err(transport_err)?;
        Ok(())
    }

    async fn send_typing(&self, chat: ChatRef) -> Result<(), BobError> {
        self.bot
            .send_chat_action(ChatId(chat.chat_id), ChatAction::Typing)
            .await
            .map_err(transport_err)?;
        Ok(())
    }
}

/// Maps a teloxide error into [`BobError::Transport`], preserving the API
/// description text so callers can match "message is not modified" and
/// entity-rejection substrings.
fn transport_err(e: teloxide::RequestError) -> BobError {
    BobError::Transport {
        message: e.to_string(),
        source: Some(Box::new(e)),
    }
}

/// Converts neutral entities to Bot API message entities.
///
/// Entities with unparseable link URLs are dropped rather than failing the
/// whole message.
fn to_telegram_entities(spans: &[TextEntity]) -> Vec<MessageEntity> {
    spans
        .iter()
        .filter_map(|e| {
            let kind = match &e.kind {
                EntityKind::Bold => MessageEntityKind::Bold,
                EntityKind::Italic => MessageEntityKind::Italic,
                EntityKind::Code => MessageEntityKind::Code,
                EntityKind::Pre { language } => MessageEntityKind::Pre {
                    language: language.clone(),
                },
                EntityKind::TextLink { url } => match url::Url::parse(url) {
                    Ok(parsed) => MessageEntityKind::TextLink { url: parsed },
                    Err(e) => {
                        debug!(url = url.as_str(), error = %e, "dropping unparseable link");
                        return None;
                    }
                },
            };
            Some(MessageEntity {
                kind,
                offset: e.offset,
                length: e.length,
            })
        })
        .collect()
}
