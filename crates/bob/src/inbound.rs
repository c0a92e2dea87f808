// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Inbound message handling.
//!
//! Every message the poller lets through is logged, optionally
//! ack-reacted, then routed: slash prefixes switch engines or bind
//! projects and branches; everything else becomes an engine turn streamed
//! back through the reply engine.

use chrono::Utc;
use tracing::{debug, error, info};

use bob_core::types::{ChatRef, OutgoingMessage};
use bob_core::{BobError, EngineRequest, Role};
use bob_scheduler::SchedulerContext;
use bob_storage::queries::messages;
use bob_telegram::{InboundMessage, ReplyOptions, ReplyStream};

use crate::status;

/// Silent sentinel for interactive turns.
const SILENT_TOKENS: [&str; 1] = ["NO_REPLY"];

/// Recent-log window injected when no resume token carries the context.
const CONTEXT_MESSAGES: u32 = 10;

/// What an inbound text asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Status,
    ToggleAgent,
    /// One turn on a specific engine: `/claude fix the tests`.
    EngineTurn { engine: String, text: String },
    /// `/alias` bound to a configured project.
    BindProject { alias: String },
    /// `@branch`.
    BindBranch { branch: String },
    Turn { text: String },
}

/// Parses the prefix grammar. Unknown slash commands fall through to a
/// plain turn so typos still reach the engine.
pub fn parse_command(text: &str, ctx: &SchedulerContext) -> Command {
    let trimmed = text.trim();

    if let Some(rest) = trimmed.strip_prefix('/') {
        let (word, tail) = match rest.split_once(char::is_whitespace) {
            Some((w, t)) => (w, t.trim()),
            None => (rest, ""),
        };
        match word {
            "start" => return Command::Start,
            "status" => return Command::Status,
            "agent" => return Command::ToggleAgent,
            _ => {}
        }
        if ctx.engines.contains_key(word) {
            return Command::EngineTurn {
                engine: word.to_string(),
                text: tail.to_string(),
            };
        }
        if ctx.config.projects.contains_key(word) {
            return Command::BindProject {
                alias: word.to_string(),
            };
        }
    }

    if let Some(rest) = trimmed.strip_prefix('@') {
        let branch = rest.split_whitespace().next().unwrap_or("");
        if !branch.is_empty() {
            return Command::BindBranch {
                branch: branch.to_string(),
            };
        }
    }

    Command::Turn {
        text: trimmed.to_string(),
    }
}

/// Handles one inbound message end to end.
pub async fn handle(ctx: &SchedulerContext, msg: InboundMessage) -> Result<(), BobError> {
    let chat = msg.chat;
    let now = Utc::now().timestamp_millis();

    let logged_text = if msg.text.is_empty() && msg.image.is_some() {
        "[image]".to_string()
    } else {
        msg.text.clone()
    };
    messages::log(
        &ctx.messages_db,
        chat,
        Some(msg.message_id),
        Role::User,
        &logged_text,
        now,
    )
    .await?;

    // Eager acknowledgement, best-effort.
    let ack = ctx.config.telegram.ack_reaction.clone();
    if !ack.is_empty() {
        if let Err(e) = ctx
            .transport
            .send_reaction(chat, msg.message_id, &ack)
            .await
        {
            debug!(error = %e, "ack reaction failed");
        }
    }

    match parse_command(&msg.text, ctx) {
        Command::Start => {
            let greeting = "hey, I'm bob. Talk to me, or schedule things with \
                            `bob jobs add` on the host. /status shows what's queued.";
            send_plain(ctx, chat, greeting, now).await
        }
        Command::Status => {
            let text = status::chat_status(ctx, chat.chat_id).await?;
            send_plain(ctx, chat, &text, now).await
        }
        Command::ToggleAgent => {
            let next = toggle_engine(ctx, chat.chat_id)?;
            send_plain(ctx, chat, &format!("default engine is now {next}"), now).await
        }
        Command::BindProject { alias } => {
            let mut context = ctx.sessions.context(chat.chat_id).unwrap_or_default();
            context.project = Some(alias.clone());
            if context.branch.is_none() {
                context.branch = ctx
                    .config
                    .projects
                    .get(&alias)
                    .and_then(|p| p.default_branch.clone());
            }
            ctx.sessions.set_context(chat.chat_id, context)?;
            if let Some(engine) = ctx
                .config
                .projects
                .get(&alias)
                .and_then(|p| p.default_engine.clone())
            {
                ctx.sessions.set_default_engine(chat.chat_id, Some(&engine))?;
            }
            send_plain(ctx, chat, &format!("working on {alias}"), now).await
        }
        Command::BindBranch { branch } => {
            let mut context = ctx.sessions.context(chat.chat_id).unwrap_or_default();
            context.branch = Some(branch.clone());
            ctx.sessions.set_context(chat.chat_id, context)?;
            send_plain(ctx, chat, &format!("on branch {branch}"), now).await
        }
        Command::EngineTurn { engine, text } => run_turn(ctx, &msg, Some(engine), text).await,
        Command::Turn { text } => run_turn(ctx, &msg, None, text).await,
    }
}

/// Runs one engine turn and streams the reply.
async fn run_turn(
    ctx: &SchedulerContext,
    msg: &InboundMessage,
    engine_override: Option<String>,
    text: String,
) -> Result<(), BobError> {
    let chat = msg.chat;

    let (engine_id, engine) = match engine_override {
        Some(id) => {
            let engine = ctx
                .engines
                .get(&id)
                .cloned()
                .ok_or_else(|| BobError::engine(format!("engine not configured: {id}")))?;
            (id, engine)
        }
        None => ctx.engine_for_chat(chat.chat_id)?,
    };

    let resume_token = ctx.sessions.resume_token(chat.chat_id, &engine_id);
    let mut prompt = text;

    // Without a resume token the engine starts cold; feed it the recent
    // log so the conversation survives restarts.
    if resume_token.is_none() {
        let recent = messages::recent(&ctx.messages_db, chat, CONTEXT_MESSAGES).await?;
        // The last entry is the message being answered.
        let earlier = &recent[..recent.len().saturating_sub(1)];
        if !earlier.is_empty() {
            let mut context = String::from("[RECENT CONVERSATION]\n");
            for message in earlier {
                context.push_str(&format!("{}: {}\n", message.role, message.text));
            }
            context.push('\n');
            prompt = format!("{context}{prompt}");
        }
    }

    let request = EngineRequest {
        prompt,
        images: msg.image.clone().into_iter().collect(),
        cwd: project_cwd(ctx, chat.chat_id),
        resume_token,
    };

    let mut opts = ReplyOptions::new(chat)
        .with_initiator(msg.message_id)
        .with_silent_tokens(SILENT_TOKENS);
    if !ctx.config.telegram.ack_reaction.is_empty() {
        opts = opts.with_ack_reaction(&ctx.config.telegram.ack_reaction);
    }

    let stream = engine.run(request).await?;
    let outcome = ReplyStream::new(ctx.transport.clone(), opts).run(stream).await?;

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

    if let Some(token) = &outcome.session_token {
        ctx.sessions
            .set_resume_token(chat.chat_id, &engine_id, token, now)?;
    }

    info!(
        chat_id = chat.chat_id,
        engine = engine_id.as_str(),
        did_send = outcome.did_send,
        "turn complete"
    );
    Ok(())
}

/// Flips the chat's default engine to the next configured one.
fn toggle_engine(ctx: &SchedulerContext, chat_id: i64) -> Result<String, BobError> {
    let mut ids: Vec<&String> = ctx.engines.keys().collect();
    ids.sort();
    if ids.is_empty() {
        return Err(BobError::engine("no engines configured"));
    }

    let current = ctx
        .sessions
        .default_engine(chat_id)
        .unwrap_or_else(|| ctx.config.default_engine.clone());
    let position = ids.iter().position(|id| **id == current).unwrap_or(0);
    let next = ids[(position + 1) % ids.len()].clone();

    ctx.sessions.set_default_engine(chat_id, Some(&next))?;
    Ok(next)
}

async fn send_plain(
    ctx: &SchedulerContext,
    chat: ChatRef,
    text: &str,
    now_ms: i64,
) -> Result<(), BobError> {
    match ctx
        .transport
        .send_message(OutgoingMessage::plain(chat, text))
        .await
    {
        Ok(message_id) => {
            messages::log(
                &ctx.messages_db,
                chat,
                Some(message_id),
                Role::Assistant,
                text,
                now_ms,
            )
            .await?;
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "service reply failed");
            Err(e)
        }
    }
}

fn project_cwd(ctx: &SchedulerContext, chat_id: i64) -> Option<std::path::PathBuf> {
    let context = ctx.sessions.context(chat_id)?;
    let alias = context.project?;
    let project = ctx.config.projects.get(&alias)?;
    Some(std::path::PathBuf::from(&project.path))
}
