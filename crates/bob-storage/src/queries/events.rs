// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Event store: a claim-token-based at-least-once work queue.
//!
//! A claim stamps pending rows with a fresh token; acks and releases are
//! scoped by that token, so the dispatcher never has to carry row ids.
//! Claims older than the stale window are considered abandoned and become
//! claimable again. This is the crash-recovery path, which is why ack is
//! at-least-once: dispatchers must tolerate replays.

use rusqlite::params;
use uuid::Uuid;

use bob_core::{BobError, BOB_ID};

use crate::database::{map_tr_err, Database};
use crate::models::{Event, EventInput};

/// Claims older than this are considered abandoned.
pub const DEFAULT_STALE_AFTER_MS: i64 = 30 * 60 * 1000;

const EVENT_COLUMNS: &str =
    "id, chat_id, thread_id, kind, payload, created_at, claimed_at, claim_token, processed_at";

/// Append a new event. Unserializable payloads are stored as `{}`.
pub async fn add(db: &Database, input: EventInput, now_ms: i64) -> Result<Event, BobError> {
    let payload = serde_json::to_string(&input.payload)
        .unwrap_or_else(|_| "{}".to_string());

    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO events (bob_id, chat_id, thread_id, kind, payload, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    BOB_ID,
                    input.chat_id,
                    input.thread_id,
                    input.kind,
                    payload,
                    now_ms
                ],
            )?;
            let id = conn.last_insert_rowid();
            let mut stmt =
                conn.prepare(&format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"))?;
            let event = stmt.query_row(params![id], row_to_event)?;
            Ok(event)
        })
        .await
        .map_err(map_tr_err)
}

/// List events in creation order, optionally including processed rows.
pub async fn list(db: &Database, include_processed: bool) -> Result<Vec<Event>, BobError> {
    db.connection()
        .call(move |conn| {
            let sql = if include_processed {
                format!("SELECT {EVENT_COLUMNS} FROM events ORDER BY id ASC")
            } else {
                format!(
                    "SELECT {EVENT_COLUMNS} FROM events WHERE processed_at IS NULL \
                     ORDER BY id ASC"
                )
            };
            let mut stmt = conn.prepare(&sql)?;
            let events = stmt
                .query_map([], row_to_event)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(events)
        })
        .await
        .map_err(map_tr_err)
}

/// Count of claimable events: unprocessed and either unclaimed or stale.
pub async fn count_pending(
    db: &Database,
    now_ms: i64,
    stale_after_ms: i64,
) -> Result<i64, BobError> {
    let stale_before = now_ms - stale_after_ms;
    db.connection()
        .call(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM events \
                 WHERE processed_at IS NULL \
                   AND (claimed_at IS NULL OR claimed_at <= ?1)",
                params![stale_before],
                |row| row.get(0),
            )?;
            Ok(count)
        })
        .await
        .map_err(map_tr_err)
}

/// Atomically claim pending events under a fresh token.
///
/// Stamps the claimable rows (same predicate as [`count_pending`]) with
/// `claimed_at = now` and the new token, then returns exactly those rows.
/// Returns the token alongside; an empty claim still yields a token.
pub async fn claim(
    db: &Database,
    now_ms: i64,
    limit: u32,
    stale_after_ms: i64,
) -> Result<(String, Vec<Event>), BobError> {
    let token = Uuid::new_v4().to_string();
    let token_for_rows = token.clone();
    let stale_before = now_ms - stale_after_ms;

    let events = db
        .connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "UPDATE events SET claimed_at = ?1, claim_token = ?2 \
                 WHERE id IN ( \
                     SELECT id FROM events \
                     WHERE processed_at IS NULL \
                       AND (claimed_at IS NULL OR claimed_at <= ?3) \
                     ORDER BY id ASC LIMIT ?4)",
                params![now_ms, token_for_rows, stale_before, limit],
            )?;
            let events = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {EVENT_COLUMNS} FROM events WHERE claim_token = ?1 \
                     AND processed_at IS NULL ORDER BY id ASC"
                ))?;
                let rows = stmt
                    .query_map(params![token_for_rows], row_to_event)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            };
            tx.commit()?;
            Ok(events)
        })
        .await
        .map_err(map_tr_err)?;

    Ok((token, events))
}

/// Mark every row under the token as processed. Scoped by `(bob_id, token)`.
pub async fn ack(db: &Database, claim_token: &str, now_ms: i64) -> Result<usize, BobError> {
    let claim_token = claim_token.to_string();
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE events SET processed_at = ?1 \
                 WHERE bob_id = ?2 AND claim_token = ?3 AND processed_at IS NULL",
                params![now_ms, BOB_ID, claim_token],
            )?;
            Ok(changed)
        })
        .await
        .map_err(map_tr_err)
}

/// Return every row under the token to pending. A zero-row release is a
/// silent no-op.
pub async fn release(db: &Database, claim_token: &str) -> Result<usize, BobError> {
    let claim_token = claim_token.to_string();
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE events SET claimed_at = NULL, claim_token = NULL \
                 WHERE bob_id = ?1 AND claim_token = ?2 AND processed_at IS NULL",
                params![BOB_ID, claim_token],
            )?;
            Ok(changed)
        })
        .await
        .map_err(map_tr_err)
}

/// Delete processed rows older than the retention window.
pub async fn prune_processed_older_than(
    db: &Database,
    days: i64,
    now_ms: i64,
) -> Result<usize, BobError> {
    let cutoff = now_ms - days * 86_400_000;
    db.connection()
        .call(move |conn| {
            let removed = conn.execute(
                "DELETE FROM events WHERE processed_at IS NOT NULL AND processed_at < ?1",
                params![cutoff],
            )?;
            Ok(removed)
        })
        .await
        .map_err(map_tr_err)
}

fn row_to_event(row: &rusqlite::Row) -> Result<Event, rusqlite::Error> {
    let payload_str: String = row.get(4)?;
    Ok(Event {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        thread_id: row.get(2)?,
        kind: row.get(3)?,
        payload: serde_json::from_str(&payload_str).unwrap_or_else(|_| serde_json::json!({})),
        created_at: row.get(5)?,
        claimed_at: row.get(6)?,
        claim_token: row.get(7)?,
        processed_at: row.get(8)?,
    })
}
