// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain model types for storage entities.
//!
//! These types represent the rows stored in the SQLite databases. All
//! timestamps are epoch milliseconds.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use bob_schedule::ScheduleKind;

/// What a job does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Deliver a literal text to the chat.
    SendMessage,
    /// Run the engine with a scheduled-reminder prompt.
    AgentTurn,
    /// Run a script from the scripts root.
    Script,
}

/// Whether an `agent_turn` job sees the chat's session context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ContextMode {
    Session,
    Isolated,
}

/// A scheduled job row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub chat_id: i64,
    pub thread_id: Option<i64>,
    pub schedule_kind: ScheduleKind,
    pub schedule_spec: String,
    pub job_type: JobType,
    /// Opaque JSON payload; `text` for `send_message`, `prompt` for
    /// `agent_turn`, `path` for `script`. An `urgent` flag bypasses DND.
    pub payload: serde_json::Value,
    pub enabled: bool,
    pub next_run_at: Option<i64>,
    pub last_run_at: Option<i64>,
    pub context_mode: ContextMode,
    pub created_at: i64,
}

impl Job {
    /// Whether the payload carries `urgent = true`.
    pub fn is_urgent(&self) -> bool {
        self.payload
            .get("urgent")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// System jobs use chat 0 and must never notify users.
    pub fn is_system(&self) -> bool {
        self.chat_id == 0
    }
}

/// Input for creating a job. The store computes `next_run_at` from the
/// schedule.
#[derive(Debug, Clone)]
pub struct JobInput {
    pub chat_id: i64,
    pub thread_id: Option<i64>,
    pub schedule_kind: ScheduleKind,
    pub schedule_spec: String,
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub context_mode: ContextMode,
}

/// Writeback after a job ran (or was deferred).
#[derive(Debug, Clone)]
pub struct JobRunUpdate {
    pub id: i64,
    pub last_run_at: Option<i64>,
    pub next_run_at: Option<i64>,
    pub enabled: bool,
}

/// A durable "wake up and consider" signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub chat_id: i64,
    pub thread_id: Option<i64>,
    pub kind: String,
    pub payload: serde_json::Value,
    pub created_at: i64,
    pub claimed_at: Option<i64>,
    pub claim_token: Option<String>,
    pub processed_at: Option<i64>,
}

/// Input for enqueuing an event.
#[derive(Debug, Clone)]
pub struct EventInput {
    pub chat_id: i64,
    pub thread_id: Option<i64>,
    pub kind: String,
    pub payload: serde_json::Value,
}

/// One row of the append-only conversation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    pub chat_id: i64,
    pub thread_id: Option<i64>,
    /// Transport-assigned message id, when known.
    pub message_id: Option<i64>,
    pub role: bob_core::Role,
    pub text: String,
    pub created_at: i64,
}
