// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Adapter for the `codex` CLI.
//!
//! Runs `codex exec --json` (or `codex exec resume <thread>` when a
//! session token exists). Agent text arrives as completed items; command
//! executions map to bash actions; the thread id is the resume token.

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

use bob_config::model::CodexConfig;
use bob_core::traits::engine::{EngineEvent, EngineOutcome, EngineRequest, EngineStream};
use bob_core::types::{ActionKind, EngineAction};
use bob_core::{BobError, EngineAdapter};

use crate::process::{stream_jsonl, LineParser};

pub struct CodexEngine {
    config: CodexConfig,
}

impl CodexEngine {
    pub fn new(config: CodexConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl EngineAdapter for CodexEngine {
    fn id(&self) -> &str {
        "codex"
    }

    async fn run(&self, request: EngineRequest) -> Result<EngineStream, BobError> {
        let mut command = Command::new("codex");
        command.arg("exec");
        if let Some(token) = &request.resume_token {
            command.arg("resume").arg(token);
        }
        command.arg("--json");

        if self.config.yolo {
            command.arg("--dangerously-bypass-approvals-and-sandbox");
        }
        if let Some(cwd) = &request.cwd {
            command.arg("--cd").arg(cwd);
        }
        command.arg(&request.prompt);

        stream_jsonl(command, Box::new(CodexParser::default())).await
    }
}

#[derive(Default)]
struct CodexParser {
    text: String,
    actions: Vec<EngineAction>,
    thread_id: Option<String>,
}

impl LineParser for CodexParser {
    fn on_line(&mut self, line: &str) -> Vec<EngineEvent> {
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            debug!(line, "skipping non-JSON engine output");
            return Vec::new();
        };

        match value.get("type").and_then(Value::as_str) {
            Some("thread.started") => {
                if let Some(thread_id) = value.get("thread_id").and_then(Value::as_str) {
                    self.thread_id = Some(thread_id.to_string());
                }
                Vec::new()
            }
            Some("item.completed") => {
                let Some(item) = value.get("item") else {
                    return Vec::new();
                };
                match item.get("type").and_then(Value::as_str) {
                    Some("agent_message") => {
                        if let Some(text) = item.get("text").and_then(Value::as_str) {
                            if !self.text.is_empty() {
                                self.text.push('\n');
                            }
                            self.text.push_str(text);
                            return vec![EngineEvent::Delta(text.to_string())];
                        }
                        Vec::new()
                    }
                    Some("command_execution") => {
                        let detail = item
                            .get("command")
                            .and_then(Value::as_str)
                            .map(|c| c.chars().take(200).collect::<String>());
                        let action = EngineAction {
                            kind: ActionKind::Bash,
                            name: "command_execution".to_string(),
                            detail,
                        };
                        self.actions.push(action.clone());
                        vec![EngineEvent::Action(action)]
                    }
                    Some("file_change") => {
                        let action = EngineAction {
                            kind: ActionKind::Edit,
                            name: "file_change".to_string(),
                            detail: item
                                .get("path")
                                .and_then(Value::as_str)
                                .map(str::to_string),
                        };
                        self.actions.push(action.clone());
                        vec![EngineEvent::Action(action)]
                    }
                    _ => Vec::new(),
                }
            }
            _ => Vec::new(),
        }
    }

    fn finish(self: Box<Self>) -> EngineOutcome {
        EngineOutcome {
            final_text: self.text,
            actions: self.actions,
            session_token: self.thread_id,
        }
    }
}
