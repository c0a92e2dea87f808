// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup. Security-relevant fields (bot token, allowlist)
//! carry no fabricated defaults: an absent token stays `None` and is
//! rejected at the serve boundary.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Top-level bob configuration, loaded from `config.toml` under the bob root.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BobConfig {
    /// Engine used when a chat has not chosen its own.
    #[serde(default = "default_engine")]
    pub default_engine: String,

    /// BCP 47 locale tag used in prompt framing.
    #[serde(default = "default_locale")]
    pub locale: String,

    /// IANA time zone for schedules and the DND window.
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Chat transport settings.
    #[serde(default)]
    pub telegram: TelegramConfig,

    /// Per-engine flags.
    #[serde(default)]
    pub engines: EnginesConfig,

    /// Heartbeat dispatcher settings.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Do-not-disturb window settings.
    #[serde(default)]
    pub dnd: DndConfig,

    /// Named project bindings selectable with `/<alias>`.
    #[serde(default)]
    pub projects: HashMap<String, ProjectConfig>,
}

impl Default for BobConfig {
    fn default() -> Self {
        Self {
            default_engine: default_engine(),
            locale: default_locale(),
            timezone: default_timezone(),
            telegram: TelegramConfig::default(),
            engines: EnginesConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            dnd: DndConfig::default(),
            projects: HashMap::new(),
        }
    }
}

fn default_engine() -> String {
    "claude".to_string()
}

fn default_locale() -> String {
    "en-US".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// Telegram Bot API settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TelegramConfig {
    /// Bot API token. `None` means the transport cannot start.
    #[serde(default)]
    pub token: Option<String>,

    /// Numeric user ids allowed to talk to the daemon. An empty list
    /// rejects everyone.
    #[serde(default)]
    pub allowlist: Vec<i64>,

    /// Emoji reacted onto each inbound message as an eager acknowledgement.
    /// Empty string disables the reaction.
    #[serde(default)]
    pub ack_reaction: String,
}

/// Per-engine flag blocks.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EnginesConfig {
    #[serde(default)]
    pub claude: ClaudeConfig,
    #[serde(default)]
    pub codex: CodexConfig,
}

/// Flags for the claude CLI engine.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ClaudeConfig {
    /// Pass `--dangerously-skip-permissions` to the CLI.
    #[serde(default)]
    pub skip_permissions: bool,
}

/// Flags for the codex CLI engine.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CodexConfig {
    /// Run codex with approvals and sandboxing bypassed.
    #[serde(default)]
    pub yolo: bool,
}

/// Heartbeat dispatcher settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HeartbeatConfig {
    /// Whether the scheduler tick drains pending events through the engine.
    #[serde(default = "default_heartbeat_enabled")]
    pub enabled: bool,

    /// Instruction prepended to the event payloads.
    #[serde(default = "default_heartbeat_prompt")]
    pub prompt: String,

    /// Optional markdown file whose contents override the built-in
    /// heartbeat context. Relative to the bob root.
    #[serde(default = "default_heartbeat_file")]
    pub file: String,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: default_heartbeat_enabled(),
            prompt: default_heartbeat_prompt(),
            file: default_heartbeat_file(),
        }
    }
}

fn default_heartbeat_enabled() -> bool {
    true
}

fn default_heartbeat_prompt() -> String {
    "Process the queued events below. Decide whether the user should be \
     notified. If nothing needs their attention, reply with exactly \
     HEARTBEAT_OK."
        .to_string()
}

fn default_heartbeat_file() -> String {
    "memory/HEARTBEAT.md".to_string()
}

/// Do-not-disturb window settings. A start later than the end wraps
/// overnight.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DndConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Window start, "HH:MM" wall clock in the configured time zone.
    #[serde(default = "default_dnd_start")]
    pub start: String,

    /// Window end, "HH:MM" wall clock in the configured time zone.
    #[serde(default = "default_dnd_end")]
    pub end: String,
}

impl Default for DndConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            start: default_dnd_start(),
            end: default_dnd_end(),
        }
    }
}

fn default_dnd_start() -> String {
    "22:00".to_string()
}

fn default_dnd_end() -> String {
    "08:00".to_string()
}

/// A project binding: `/alias` in a chat points subsequent engine runs at
/// this checkout.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Path to the repository checkout.
    pub path: String,

    /// Directory where per-branch worktrees are created.
    #[serde(default)]
    pub worktrees_root: Option<String>,

    /// Branch used when the chat has not bound one with `@branch`.
    #[serde(default)]
    pub default_branch: Option<String>,

    /// Engine override for this project.
    #[serde(default)]
    pub default_engine: Option<String>,
}
