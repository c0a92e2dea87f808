// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Heartbeat dispatcher: drain pending events through the engine.
//!
//! Claims every pending event under one token, groups them by
//! conversation, and asks the engine whether the user should be told.
//! Dispatching every group acks the claim; any error releases it instead,
//! so the events become claimable again after the stale window. Ack is
//! at-least-once: a crash between dispatch and ack replays the events.

use chrono::Utc;
use tracing::{debug, info};

use bob_core::types::ChatRef;
use bob_core::{BobError, EngineRequest, Role};
use bob_storage::queries::{events, messages};
use bob_storage::Event;
use bob_telegram::{ReplyOptions, ReplyStream};

use crate::SchedulerContext;

/// Sentinels that keep a heartbeat reply out of the chat.
pub const SILENT_TOKENS: [&str; 2] = ["HEARTBEAT_OK", "NO_REPLY"];

/// Events claimed per heartbeat pass.
const CLAIM_LIMIT: u32 = 20;

/// One heartbeat pass. A no-op when nothing is pending.
pub async fn dispatch(ctx: &SchedulerContext) -> Result<(), BobError> {
    let now = Utc::now().timestamp_millis();
    let (token, claimed) = events::claim(
        &ctx.events_db,
        now,
        CLAIM_LIMIT,
        events::DEFAULT_STALE_AFTER_MS,
    )
    .await?;

    if claimed.is_empty() {
        return Ok(());
    }
    info!(count = claimed.len(), "heartbeat claimed events");

    let result = dispatch_groups(ctx, &claimed).await;

    match result {
        Ok(()) => {
            events::ack(&ctx.events_db, &token, Utc::now().timestamp_millis()).await?;
            debug!("heartbeat claim acked");
            Ok(())
        }
        Err(e) => {
            // Release the whole claim; the events go back to pending.
            events::release(&ctx.events_db, &token).await?;
            Err(e)
        }
    }
}

/// Groups events by conversation (insertion order preserved within each
/// group) and runs each group through the engine.
async fn dispatch_groups(ctx: &SchedulerContext, claimed: &[Event]) -> Result<(), BobError> {
    let mut groups: Vec<(ChatRef, Vec<&Event>)> = Vec::new();
    for event in claimed {
        let chat = ChatRef::new(event.chat_id, event.thread_id);
        match groups.iter_mut().find(|(c, _)| *c == chat) {
            Some((_, bucket)) => bucket.push(event),
            None => groups.push((chat, vec![event])),
        }
    }

    for (chat, group) in groups {
        dispatch_group(ctx, chat, &group).await?;
    }
    Ok(())
}

async fn dispatch_group(
    ctx: &SchedulerContext,
    chat: ChatRef,
    group: &[&Event],
) -> Result<(), BobError> {
    let prompt = build_prompt(ctx, chat, group).await?;

    let (engine_id, engine) = ctx.engine_for_chat(chat.chat_id)?;
    let request = EngineRequest {
        prompt,
        resume_token: ctx.sessions.resume_token(chat.chat_id, &engine_id),
        ..Default::default()
    };

    let stream = engine.run(request).await?;
    let opts = ReplyOptions::new(chat).with_silent_tokens(SILENT_TOKENS);
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
        info!(chat_id = chat.chat_id, "heartbeat notified the user");
    } else {
        debug!(chat_id = chat.chat_id, "heartbeat stayed silent");
    }

    if let Some(session_token) = &outcome.session_token {
        ctx.sessions
            .set_resume_token(chat.chat_id, &engine_id, session_token, now)?;
    }

    Ok(())
}

/// Assembles the heartbeat prompt: the optional user-authored context file,
/// the configured instruction, the serialized event payloads, and the
/// recent message slice for the conversation.
async fn build_prompt(
    ctx: &SchedulerContext,
    chat: ChatRef,
    group: &[&Event],
) -> Result<String, BobError> {
    let mut prompt = String::new();

    let override_path = ctx.paths.root().join(&ctx.config.heartbeat.file);
    if let Ok(contents) = std::fs::read_to_string(&override_path) {
        if !contents.trim().is_empty() {
            prompt.push_str(contents.trim());
            prompt.push_str("\n\n");
        }
    }

    prompt.push_str(&ctx.config.heartbeat.prompt);
    prompt.push_str("\n\n[EVENTS]\n");
    for event in group {
        let payload =
            serde_json::to_string(&event.payload).unwrap_or_else(|_| "{}".to_string());
        prompt.push_str(&format!(
            "- {} (at {}): {}\n",
            event.kind, event.created_at, payload
        ));
    }

    let recent = messages::recent(&ctx.messages_db, chat, 10).await?;
    if !recent.is_empty() {
        prompt.push_str("\n[RECENT CONVERSATION]\n");
        for message in &recent {
            prompt.push_str(&format!("{}: {}\n", message.role, message.text));
        }
    }

    Ok(prompt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono_tz::Tz;

    use bob_config::{BobConfig, BobPaths};
    use bob_core::{EngineAdapter, EngineStream};
    use bob_schedule::DndWindow;
    use bob_storage::migrations::StoreKind;
    use bob_storage::{Database, EventInput, SessionStore};
    use bob_test_utils::{MockEngine, MockTransport};

    use crate::dnd_gate::DndGate;

    struct FailingEngine;

    #[async_trait]
    impl EngineAdapter for FailingEngine {
        fn id(&self) -> &str {
            "claude"
        }
        async fn run(&self, _request: EngineRequest) -> Result<EngineStream, BobError> {
            Err(BobError::engine("engine unavailable"))
        }
    }

    async fn context(
        transport: Arc<MockTransport>,
        engine: Arc<dyn EngineAdapter>,
    ) -> (Arc<SchedulerContext>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let paths = BobPaths::new(dir.path());
        paths.ensure_dirs().unwrap();

        let mut engines: HashMap<String, Arc<dyn EngineAdapter>> = HashMap::new();
        engines.insert("claude".to_string(), engine);

        let tz: Tz = "UTC".parse().unwrap();
        let ctx = SchedulerContext {
            config: BobConfig::default(),
            paths: paths.clone(),
            tz,
            jobs_db: Database::open_in_memory(StoreKind::Jobs).await.unwrap(),
            events_db: Database::open_in_memory(StoreKind::Events).await.unwrap(),
            messages_db: Database::open_in_memory(StoreKind::Messages).await.unwrap(),
            sessions: Arc::new(SessionStore::new(paths.sessions_file(), "/work")),
            transport,
            engines,
            dnd: DndGate::new(
                DndWindow::new(false, "22:00", "08:00", tz).unwrap(),
                paths.dnd_state(),
            ),
        };
        (Arc::new(ctx), dir)
    }

    async fn add_event(ctx: &SchedulerContext, chat_id: i64, kind: &str) {
        events::add(
            &ctx.events_db,
            EventInput {
                chat_id,
                thread_id: None,
                kind: kind.to_string(),
                payload: serde_json::json!({"error": "timeout"}),
            },
            Utc::now().timestamp_millis(),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn empty_queue_is_a_noop() {
        let transport = Arc::new(MockTransport::new());
        let engine = Arc::new(MockEngine::single("claude", "HEARTBEAT_OK"));
        let (ctx, _dir) = context(transport.clone(), engine).await;

        dispatch(&ctx).await.unwrap();
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn silent_heartbeat_acks_without_notifying() {
        let transport = Arc::new(MockTransport::new());
        let engine = Arc::new(MockEngine::single("claude", "HEARTBEAT_OK"));
        let (ctx, _dir) = context(transport.clone(), engine.clone()).await;

        add_event(&ctx, 5, "task_failed").await;
        dispatch(&ctx).await.unwrap();

        // The engine saw the payload; the user saw nothing.
        let requests = engine.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].prompt.contains("task_failed"));
        assert!(requests[0].prompt.contains("timeout"));
        assert!(transport.sent_texts().is_empty());

        // Nothing pending afterwards.
        let pending = events::list(&ctx.events_db, false).await.unwrap();
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn visible_heartbeat_notifies_and_logs() {
        let transport = Arc::new(MockTransport::new());
        let engine = Arc::new(MockEngine::single(
            "claude",
            "Your deploy failed, you should look at it.",
        ));
        let (ctx, _dir) = context(transport.clone(), engine).await;

        add_event(&ctx, 5, "deploy_failed").await;
        dispatch(&ctx).await.unwrap();

        assert_eq!(transport.sent_texts().len(), 1);
        let logged = messages::recent(&ctx.messages_db, ChatRef::new(5, None), 10)
            .await
            .unwrap();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].role, Role::Assistant);
    }

    #[tokio::test]
    async fn engine_failure_releases_the_claim() {
        let transport = Arc::new(MockTransport::new());
        let (ctx, _dir) = context(transport, Arc::new(FailingEngine)).await;

        add_event(&ctx, 5, "task_failed").await;
        let err = dispatch(&ctx).await.unwrap_err();
        assert!(err.to_string().contains("engine unavailable"));

        // Released, not acked: the event is pending again immediately.
        let now = Utc::now().timestamp_millis();
        assert_eq!(
            events::count_pending(&ctx.events_db, now, events::DEFAULT_STALE_AFTER_MS)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn events_group_by_conversation() {
        let transport = Arc::new(MockTransport::new());
        let engine = Arc::new(MockEngine::single("claude", "HEARTBEAT_OK"));
        let (ctx, _dir) = context(transport, engine.clone()).await;

        add_event(&ctx, 5, "a").await;
        add_event(&ctx, 6, "b").await;
        add_event(&ctx, 5, "c").await;
        dispatch(&ctx).await.unwrap();

        // One engine run per conversation; chat 5's run carries both its
        // events in order.
        let requests = engine.requests();
        assert_eq!(requests.len(), 2);
        let for_five = requests
            .iter()
            .find(|r| r.prompt.contains("- a") && r.prompt.contains("- c"))
            .expect("chat 5 group prompt");
        let a_pos = for_five.prompt.find("- a").unwrap();
        let c_pos = for_five.prompt.find("- c").unwrap();
        assert!(a_pos < c_pos, "event order preserved within the group");
        assert!(!for_five.prompt.contains("- b"));
    }

    #[tokio::test]
    async fn heartbeat_file_overrides_context() {
        let transport = Arc::new(MockTransport::new());
        let engine = Arc::new(MockEngine::single("claude", "HEARTBEAT_OK"));
        let (ctx, _dir) = context(transport, engine.clone()).await;

        let override_path = ctx.paths.root().join(&ctx.config.heartbeat.file);
        std::fs::create_dir_all(override_path.parent().unwrap()).unwrap();
        std::fs::write(&override_path, "Only ping about deploys.").unwrap();

        add_event(&ctx, 5, "task_failed").await;
        dispatch(&ctx).await.unwrap();

        let requests = engine.requests();
        assert!(requests[0].prompt.starts_with("Only ping about deploys."));
    }

    #[tokio::test]
    async fn session_token_flows_back() {
        let transport = Arc::new(MockTransport::new());
        let engine =
            Arc::new(MockEngine::single("claude", "HEARTBEAT_OK").with_session_token("tok-7"));
        let (ctx, _dir) = context(transport, engine).await;

        add_event(&ctx, 5, "task_failed").await;
        dispatch(&ctx).await.unwrap();

        assert_eq!(
            ctx.sessions.resume_token(5, "claude").as_deref(),
            Some("tok-7")
        );
    }
}
