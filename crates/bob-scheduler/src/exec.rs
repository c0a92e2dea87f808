// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Job execution: `send_message`, `agent_turn`, and `script` dispatch.

use std::path::{Component, Path, PathBuf};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use bob_core::types::{ChatRef, OutgoingMessage};
use bob_core::{BobError, EngineRequest, Role};
use bob_storage::queries::messages;
use bob_storage::{ContextMode, Job, JobType};
use bob_telegram::{ReplyOptions, ReplyStream};

use crate::heartbeat::SILENT_TOKENS;
use crate::SchedulerContext;

/// Delivered output is clipped to this many characters.
const OUTPUT_LIMIT: usize = 1000;

/// Recent-log window injected into session-context prompts.
const CONTEXT_MESSAGES: u32 = 10;

/// Executes one claimed job. An `Err` means the run did not happen and the
/// scheduler will retry; delivered-but-unhappy outcomes (a failing script
/// whose summary was sent) are `Ok`.
pub async fn run_job(ctx: &SchedulerContext, job: &Job) -> Result<(), BobError> {
    match job.job_type {
        JobType::SendMessage => run_send_message(ctx, job).await,
        JobType::AgentTurn => run_agent_turn(ctx, job).await,
        JobType::Script => run_script(ctx, job).await,
    }
}

async fn run_send_message(ctx: &SchedulerContext, job: &Job) -> Result<(), BobError> {
    let text = job
        .payload
        .get("text")
        .and_then(|v| v.as_str())
        .ok_or_else(|| BobError::Internal("send_message payload missing text".into()))?;

    if job.is_system() {
        debug!(job_id = job.id, "system job, suppressing delivery");
        return Ok(());
    }

    let chat = ChatRef::new(job.chat_id, job.thread_id);
    let message_id = ctx
        .transport
        .send_message(OutgoingMessage::plain(chat, text))
        .await?;

    messages::log(
        &ctx.messages_db,
        chat,
        Some(message_id),
        Role::Assistant,
        text,
        Utc::now().timestamp_millis(),
    )
    .await?;

    info!(job_id = job.id, chat_id = job.chat_id, "send_message delivered");
    Ok(())
}

async fn run_agent_turn(ctx: &SchedulerContext, job: &Job) -> Result<(), BobError> {
    let chat = ChatRef::new(job.chat_id, job.thread_id);
    let base_prompt = job
        .payload
        .get("prompt")
        .and_then(|v| v.as_str())
        .ok_or_else(|| BobError::Internal("agent_turn payload missing prompt".into()))?;

    let mut prompt = format!("[SCHEDULED REMINDER] {base_prompt}");
    if let Some(request) = job.payload.get("request").and_then(|v| v.as_str()) {
        prompt.push_str(&format!("\n\n[ORIGINAL USER REQUEST]\n{request}"));
    }

    let (engine_id, engine) = match job.payload.get("engine").and_then(|v| v.as_str()) {
        Some(id) => {
            let engine = ctx
                .engines
                .get(id)
                .cloned()
                .ok_or_else(|| BobError::engine(format!("engine not configured: {id}")))?;
            (id.to_string(), engine)
        }
        None => ctx.engine_for_chat(job.chat_id)?,
    };

    let mut request = EngineRequest {
        prompt,
        ..Default::default()
    };

    if job.context_mode == ContextMode::Session {
        let recent = messages::recent(&ctx.messages_db, chat, CONTEXT_MESSAGES).await?;
        if !recent.is_empty() {
            let mut context = String::from("\n\n[RECENT CONVERSATION]\n");
            for message in &recent {
                context.push_str(&format!("{}: {}\n", message.role, message.text));
            }
            request.prompt.push_str(&context);
        }
        request.resume_token = ctx.sessions.resume_token(job.chat_id, &engine_id);
        request.cwd = project_cwd(ctx, job.chat_id);
    }

    let mut opts = ReplyOptions::new(chat).with_silent_tokens(SILENT_TOKENS);
    if job.is_system() {
        // System turns run but never reach a chat.
        let cancelled = CancellationToken::new();
        cancelled.cancel();
        opts = opts.with_cancel(cancelled);
    }

    let stream = engine.run(request).await?;
    let reply = ReplyStream::new(ctx.transport.clone(), opts);
    let outcome = reply.run(stream).await?;

    let now = Utc::now().timestamp_millis();
    if outcome.did_send && !outcome.response_text.is_empty() {
        messages::log(
            &ctx.messages_db,
            chat,
            None,
            Role::Assistant,
            &outcome.response_text,
            now,
        )
        .await?;
    }

    if !outcome.response_text.is_empty() {
        if let Err(e) = append_conversation_file(ctx, &engine_id, &outcome.response_text, now) {
            warn!(error = %e, "conversation file append failed");
        }
    }

    if job.context_mode == ContextMode::Session {
        if let Some(token) = &outcome.session_token {
            ctx.sessions
                .set_resume_token(job.chat_id, &engine_id, token, now)?;
        }
    }

    info!(job_id = job.id, engine = engine_id.as_str(), "agent_turn finished");
    Ok(())
}

async fn run_script(ctx: &SchedulerContext, job: &Job) -> Result<(), BobError> {
    let rel = job
        .payload
        .get("path")
        .and_then(|v| v.as_str())
        .ok_or_else(|| BobError::Internal("script payload missing path".into()))?;
    let path = resolve_script_path(&ctx.paths.scripts_dir(), rel)?;

    let output = tokio::process::Command::new(&path)
        .output()
        .await
        .map_err(|e| BobError::Internal(format!("script spawn failed: {e}")))?;

    let stdout = clip(&String::from_utf8_lossy(&output.stdout));
    let stderr = clip(&String::from_utf8_lossy(&output.stderr));
    let notify = job
        .payload
        .get("notify")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let chat = ChatRef::new(job.chat_id, job.thread_id);

    if output.status.success() {
        info!(job_id = job.id, script = rel, "script succeeded");
        if notify && !job.is_system() {
            let text = if stdout.trim().is_empty() {
                format!("script {rel} finished")
            } else {
                stdout
            };
            let message_id = ctx
                .transport
                .send_message(OutgoingMessage::plain(chat, &text))
                .await?;
            messages::log(
                &ctx.messages_db,
                chat,
                Some(message_id),
                Role::Assistant,
                &text,
                Utc::now().timestamp_millis(),
            )
            .await?;
        }
    } else {
        warn!(
            job_id = job.id,
            script = rel,
            code = output.status.code(),
            "script failed"
        );
        if !job.is_system() {
            let summary = format!(
                "script {rel} failed (exit {:?}):\n{stderr}",
                output.status.code()
            );
            let message_id = ctx
                .transport
                .send_message(OutgoingMessage::plain(chat, &summary))
                .await?;
            messages::log(
                &ctx.messages_db,
                chat,
                Some(message_id),
                Role::Assistant,
                &summary,
                Utc::now().timestamp_millis(),
            )
            .await?;
        }
    }

    Ok(())
}

/// Resolves a script path under the scripts root, rejecting anything that
/// would escape it. The check is lexical: no parent/root components are
/// accepted at all.
pub fn resolve_script_path(root: &Path, rel: &str) -> Result<PathBuf, BobError> {
    let mut resolved = root.to_path_buf();
    for component in Path::new(rel).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            _ => return Err(BobError::PathEscape(rel.to_string())),
        }
    }
    if !resolved.starts_with(root) {
        return Err(BobError::PathEscape(rel.to_string()));
    }
    Ok(resolved)
}

/// The chat's bound project checkout, if any.
fn project_cwd(ctx: &SchedulerContext, chat_id: i64) -> Option<PathBuf> {
    let context = ctx.sessions.context(chat_id)?;
    let alias = context.project?;
    let project = ctx.config.projects.get(&alias)?;
    Some(PathBuf::from(&project.path))
}

fn clip(text: &str) -> String {
    text.chars().take(OUTPUT_LIMIT).collect()
}

/// Appends an agent turn's reply to the daily conversation file.
fn append_conversation_file(
    ctx: &SchedulerContext,
    engine_id: &str,
    text: &str,
    now_ms: i64,
) -> Result<(), BobError> {
    use std::io::Write;

    let now = chrono::DateTime::<Utc>::from_timestamp_millis(now_ms)
        .unwrap_or_else(Utc::now)
        .with_timezone(&ctx.tz);
    let dir = ctx.paths.conversations_dir().join(now.format("%Y").to_string());
    std::fs::create_dir_all(&dir).map_err(storage_err)?;

    let file = dir.join(format!("{}-{engine_id}.md", now.format("%m-%d")));
    let mut handle = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(file)
        .map_err(storage_err)?;
    writeln!(handle, "\n## {}\n\n{text}", now.format("%H:%M")).map_err(storage_err)?;
    Ok(())
}

fn storage_err(e: std::io::Error) -> BobError {
    BobError::Storage {
        source: Box::new(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_paths_are_confined() {
        let root = Path::new("/home/user/.bob/scripts");
        assert_eq!(
            resolve_script_path(root, "backup.sh").unwrap(),
            root.join("backup.sh")
        );
        assert_eq!(
            resolve_script_path(root, "nested/job.sh").unwrap(),
            root.join("nested/job.sh")
        );
        assert_eq!(
            resolve_script_path(root, "./nested/job.sh").unwrap(),
            root.join("nested/job.sh")
        );

        assert!(matches!(
            resolve_script_path(root, "../outside.sh"),
            Err(BobError::PathEscape(_))
        ));
        assert!(matches!(
            resolve_script_path(root, "nested/../../outside.sh"),
            Err(BobError::PathEscape(_))
        ));
        assert!(matches!(
            resolve_script_path(root, "/etc/passwd"),
            Err(BobError::PathEscape(_))
        ));
    }

    #[test]
    fn clip_limits_output() {
        let long = "x".repeat(5000);
        assert_eq!(clip(&long).chars().count(), OUTPUT_LIMIT);
        assert_eq!(clip("short"), "short");
    }
}
