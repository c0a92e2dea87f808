// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message log: append-only conversation history, pruned by age.

use std::str::FromStr;

use rusqlite::params;

use bob_core::{BobError, ChatRef, Role, BOB_ID};

use crate::database::{map_tr_err, Database};
use crate::models::StoredMessage;

const MESSAGE_COLUMNS: &str = "id, chat_id, thread_id, message_id, role, text, created_at";

/// Append one message to the log.
pub async fn log(
    db: &Database,
    chat: ChatRef,
    message_id: Option<i64>,
    role: Role,
    text: &str,
    now_ms: i64,
) -> Result<i64, BobError> {
    let text = text.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO messages (bob_id, chat_id, thread_id, message_id, role, text, \
                 created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    BOB_ID,
                    chat.chat_id,
                    chat.thread_id,
                    message_id,
                    role.to_string(),
                    text,
                    now_ms
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(map_tr_err)
}

/// The most recent messages for a conversation, oldest first.
pub async fn recent(
    db: &Database,
    chat: ChatRef,
    limit: u32,
) -> Result<Vec<StoredMessage>, BobError> {
    db.connection()
        .call(move |conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM ( \
                     SELECT {MESSAGE_COLUMNS} FROM messages \
                     WHERE chat_id = ?1 AND thread_id IS ?2 \
                     ORDER BY created_at DESC, id DESC LIMIT ?3) \
                 ORDER BY created_at ASC, id ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let messages = stmt
                .query_map(params![chat.chat_id, chat.thread_id, limit], row_to_message)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(messages)
        })
        .await
        .map_err(map_tr_err)
}

/// Delete messages older than the retention window.
pub async fn prune_older_than(db: &Database, days: i64, now_ms: i64) -> Result<usize, BobError> {
    let cutoff = now_ms - days * 86_400_000;
    db.connection()
        .call(move |conn| {
            let removed =
                conn.execute("DELETE FROM messages WHERE created_at < ?1", params![cutoff])?;
            Ok(removed)
        })
        .await
        .map_err(map_tr_err)
}

fn row_to_message(row: &rusqlite::Row) -> Result<StoredMessage, rusqlite::Error> {
    let role_str: String = row.get(4)?;
    Ok(StoredMessage {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        thread_id: row.get(2)?,
        message_id: row.get(3)?,
        role: Role::from_str(&role_str).map_err(|_| rusqlite::Error::InvalidQuery)?,
        text: row.get(5)?,
        created_at: row.get(6)?,
    })
}
