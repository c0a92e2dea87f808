// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Adapter for the `claude` CLI.
//!
//! Runs `claude -p <prompt> --output-format stream-json` and maps its
//! event dialect: `assistant` messages carry text and tool-use blocks,
//! the terminal `result` event carries the final text and the session id
//! used for `--resume` on the next turn.

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

use bob_config::model::ClaudeConfig;
use bob_core::traits::engine::{EngineEvent, EngineOutcome, EngineRequest, EngineStream};
use bob_core::types::{ActionKind, EngineAction};
use bob_core::{BobError, EngineAdapter};

use crate::process::{stream_jsonl, LineParser};

pub struct ClaudeEngine {
    config: ClaudeConfig,
}

impl ClaudeEngine {
    pub fn new(config: ClaudeConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl EngineAdapter for ClaudeEngine {
    fn id(&self) -> &str {
        "claude"
    }

    async fn run(&self, request: EngineRequest) -> Result<EngineStream, BobError> {
        let mut command = Command::new("claude");
        command
            .arg("-p")
            .arg(prompt_with_images(&request))
            .arg("--output-format")
            .arg("stream-json")
            .arg("--verbose");

        if let Some(token) = &request.resume_token {
            command.arg("--resume").arg(token);
        }
        if self.config.skip_permissions {
            command.arg("--dangerously-skip-permissions");
        }
        if let Some(cwd) = &request.cwd {
            command.current_dir(cwd);
        }

        stream_jsonl(command, Box::new(ClaudeParser::default())).await
    }
}

/// Attached images are referenced by path in the prompt; the CLI reads
/// them itself.
fn prompt_with_images(request: &EngineRequest) -> String {
    if request.images.is_empty() {
        return request.prompt.clone();
    }
    let mut prompt = request.prompt.clone();
    for image in &request.images {
        prompt.push_str(&format!("\n[attached image: {}]", image.display()));
    }
    prompt
}

#[derive(Default)]
struct ClaudeParser {
    text: String,
    actions: Vec<EngineAction>,
    session_id: Option<String>,
    final_text: Option<String>,
}

impl LineParser for ClaudeParser {
    fn on_line(&mut self, line: &str) -> Vec<EngineEvent> {
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            debug!(line, "skipping non-JSON engine output");
            return Vec::new();
        };

        if let Some(session_id) = value.get("session_id").and_then(Value::as_str) {
            self.session_id = Some(session_id.to_string());
        }

        match value.get("type").and_then(Value::as_str) {
            Some("assistant") => {
                let mut events = Vec::new();
                let blocks = value
                    .pointer("/message/content")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                for block in blocks {
                    match block.get("type").and_then(Value::as_str) {
                        Some("text") => {
                            if let Some(text) = block.get("text").and_then(Value::as_str) {
                                self.text.push_str(text);
                                events.push(EngineEvent::Delta(text.to_string()));
                            }
                        }
                        Some("tool_use") => {
                            if let Some(name) = block.get("name").and_then(Value::as_str) {
                                let action = EngineAction {
                                    kind: action_kind(name),
                                    name: name.to_string(),
                                    detail: tool_detail(&block),
                                };
                                self.actions.push(action.clone());
                                events.push(EngineEvent::Action(action));
                            }
                        }
                        _ => {}
                    }
                }
                events
            }
            Some("result") => {
                if let Some(result) = value.get("result").and_then(Value::as_str) {
                    self.final_text = Some(result.to_string());
                }
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn finish(self: Box<Self>) -> EngineOutcome {
        EngineOutcome {
            final_text: self.final_text.unwrap_or(self.text),
            actions: self.actions,
            session_token: self.session_id,
        }
    }
}

fn action_kind(tool_name: &str) -> ActionKind {
    match tool_name {
        "Bash" => ActionKind::Bash,
        "Read" => ActionKind::Read,
        "Write" => ActionKind::Write,
        "Edit" => ActionKind::Edit,
        _ => ActionKind::Tool,
    }
}

fn tool_detail(block: &Value) -> Option<String> {
    let input = block.get("input")?;
    for key in ["command", "file_path", "path", "pattern"] {
        if let Some(detail) = input.get(key).and_then(Value::as_str) {
            return Some(detail.chars().take(200).collect());
        }
    }
    None
}
