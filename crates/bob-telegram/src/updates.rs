// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Long-poll update reader.
//!
//! Polls `getUpdates` with a 30 s timeout, filters messages through the
//! allowlist, downloads inbound images, and persists the update offset to a
//! JSON file (temp-file + rename) so restarts never replay old updates.
//! teloxide's Dispatcher keeps its offset in memory only, which is why this
//! loop is hand-rolled.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{AllowedUpdate, BotCommand, UpdateKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use bob_core::types::ChatRef;
use bob_core::BobError;
use bob_storage::statefile;

/// Long-poll timeout, seconds.
const POLL_TIMEOUT_SECS: u32 = 30;

/// Backoff after a failed poll.
const POLL_RETRY: std::time::Duration = std::time::Duration::from_secs(2);

/// A filtered, extracted inbound message.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub chat: ChatRef,
    pub message_id: i64,
    pub sender_id: i64,
    pub text: String,
    /// Downloaded image, when the message carried a photo.
    pub image: Option<PathBuf>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct OffsetState {
    offset: i64,
}

/// Long-poll reader feeding extracted messages into a channel.
pub struct UpdatePoller {
    bot: Bot,
    offset_path: PathBuf,
    allowlist: Vec<i64>,
    image_dir: PathBuf,
}

impl UpdatePoller {
    pub fn new(
        bot: Bot,
        offset_path: impl Into<PathBuf>,
        allowlist: Vec<i64>,
        image_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            bot,
            offset_path: offset_path.into(),
            allowlist,
            image_dir: image_dir.into(),
        }
    }

    /// Runs until cancelled. Each batch advances and persists the offset
    /// even when every update in it was filtered out.
    pub async fn run(self, tx: mpsc::Sender<InboundMessage>, cancel: CancellationToken) {
        let mut offset = statefile::read_json::<OffsetState>(&self.offset_path)
            .map(|s| s.offset)
            .unwrap_or(0);
        info!(offset, "update poller starting");

        loop {
            let request = self
                .bot
                .get_updates()
                .offset(offset as i32)
                .timeout(POLL_TIMEOUT_SECS)
                .allowed_updates(vec![AllowedUpdate::Message, AllowedUpdate::CallbackQuery]);

            let updates = tokio::select! {
                result = request.send() => result,
                _ = cancel.cancelled() => {
                    info!("update poller shutting down");
                    return;
                }
            };

            let updates = match updates {
                Ok(updates) => updates,
                Err(e) => {
                    warn!(error = %e, "getUpdates failed, backing off");
                    tokio::select! {
                        _ = tokio::time::sleep(POLL_RETRY) => continue,
                        _ = cancel.cancelled() => return,
                    }
                }
            };

            for update in updates {
                offset = offset.max(update.id.0 as i64 + 1);

                match update.kind {
                    UpdateKind::Message(message) => {
                        if let Some(inbound) = self.extract(&message).await {
                            if tx.send(inbound).await.is_err() {
                                warn!("inbound channel closed, stopping poller");
                                return;
                            }
                        }
                    }
                    UpdateKind::CallbackQuery(query) => {
                        // No inline keyboards are in flight; answer to clear
                        // the client-side spinner.
                        if let Err(e) = self.bot.answer_callback_query(query.id).await {
                            debug!(error = %e, "answerCallbackQuery failed");
                        }
                    }
                    _ => {}
                }
            }

            if let Err(e) =
                statefile::write_json_atomic(&self.offset_path, &OffsetState { offset })
            {
                error!(error = %e, "failed to persist update offset");
            }
        }
    }

    /// Applies the allowlist and pulls text (or caption + photo) out of a
    /// message. An empty allowlist rejects everyone.
    async fn extract(&self, message: &Message) -> Option<InboundMessage> {
        let sender_id = message.from.as_ref()?.id.0 as i64;
        if !self.allowlist.contains(&sender_id) {
            debug!(sender_id, "ignoring message from non-allowlisted user");
            return None;
        }

        let chat = ChatRef::new(
            message.chat.id.0,
            message.thread_id.map(|t| t.0 .0 as i64),
        );

        let mut image = None;
        let text = if let Some(text) = message.text() {
            text.to_string()
        } else if let Some(photos) = message.photo() {
            // Largest rendition last.
            if let Some(photo) = photos.last() {
                image = self.download_photo(&photo.file.id, message.id.0).await;
            }
            message.caption().unwrap_or_default().to_string()
        } else {
            debug!(message_id = message.id.0, "ignoring unsupported message type");
            return None;
        };

        Some(InboundMessage {
            chat,
            message_id: message.id.0 as i64,
            sender_id,
            text,
            image,
        })
    }

    async fn download_photo(&self, file_id: &str, message_id: i32) -> Option<PathBuf> {
        let result: Result<PathBuf, BobError> = async {
            tokio::fs::create_dir_all(&self.image_dir)
                .await
                .map_err(|e| BobError::Storage { source: Box::new(e) })?;

            let file = self
                .bot
                .get_file(file_id.to_string())
                .await
                .map_err(|e| BobError::Transport {
                    message: format!("getFile failed: {e}"),
                    source: Some(Box::new(e)),
                })?;

            let dest = self.image_dir.join(format!("inbound-{message_id}.jpg"));
            let mut out = tokio::fs::File::create(&dest)
                .await
                .map_err(|e| BobError::Storage { source: Box::new(e) })?;
            self.bot
                .download_file(&file.path, &mut out)
                .await
                .map_err(|e| BobError::Transport {
                    message: format!("file download failed: {e}"),
                    source: Some(Box::new(e)),
                })?;
            Ok(dest)
        }
        .await;

        match result {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(error = %e, "inbound image download failed");
                None
            }
        }
    }
}

/// Registers the bot's command menu.
pub async fn register_commands(bot: &Bot) -> Result<(), BobError> {
    let commands = vec![
        BotCommand::new("start", "greet and show what bob can do"),
        BotCommand::new("status", "current engine and upcoming jobs"),
        BotCommand::new("claude", "answer this message with the claude engine"),
        BotCommand::new("codex", "answer this message with the codex engine"),
        BotCommand::new("agent", "toggle this chat's default engine"),
    ];
    bot.set_my_commands(commands)
        .await
        .map_err(|e| BobError::Transport {
            message: format!("setMyCommands failed: {e}"),
            source: Some(Box::new(e)),
        })?;
    Ok(())
}
