// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end scenarios across the scheduler, heartbeat, reply engine, and
//! stores, using mock transport and engines. Each test builds an isolated
//! context over temp files and in-memory SQLite.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use chrono_tz::Tz;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use bob::inbound::{self, parse_command, Command};
use bob_config::{BobConfig, BobPaths};
use bob_core::{ChatRef, EngineAdapter, Role};
use bob_schedule::{parse_schedule, DndWindow, ScheduleKind};
use bob_scheduler::dnd_gate::DndGate;
use bob_scheduler::{Scheduler, SchedulerContext};
use bob_storage::migrations::StoreKind;
use bob_storage::queries::{events, jobs, messages};
use bob_storage::{ContextMode, Database, EventInput, JobInput, JobType, SessionStore};
use bob_telegram::InboundMessage;
use bob_test_utils::{MockEngine, MockTransport, TransportCall};

const UTC: &str = "UTC";

struct Harness {
    ctx: Arc<SchedulerContext>,
    transport: Arc<MockTransport>,
    engine: Arc<MockEngine>,
    _dir: tempfile::TempDir,
}

async fn harness(engine_reply: &str) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let paths = BobPaths::new(dir.path());
    paths.ensure_dirs().unwrap();

    let transport = Arc::new(MockTransport::new());
    let engine = Arc::new(MockEngine::single("claude", engine_reply));
    let mut engines: HashMap<String, Arc<dyn EngineAdapter>> = HashMap::new();
    engines.insert("claude".to_string(), engine.clone());
    engines.insert(
        "codex".to_string(),
        Arc::new(MockEngine::single("codex", engine_reply)),
    );

    let tz: Tz = UTC.parse().unwrap();
    let ctx = Arc::new(SchedulerContext {
        config: BobConfig::default(),
        paths: paths.clone(),
        tz,
        jobs_db: Database::open_in_memory(StoreKind::Jobs).await.unwrap(),
        events_db: Database::open_in_memory(StoreKind::Events).await.unwrap(),
        messages_db: Database::open_in_memory(StoreKind::Messages).await.unwrap(),
        sessions: Arc::new(SessionStore::new(paths.sessions_file(), "/work")),
        transport: transport.clone(),
        engines,
        dnd: DndGate::new(
            DndWindow::new(false, "22:00", "08:00", tz).unwrap(),
            paths.dnd_state(),
        ),
    });

    Harness {
        ctx,
        transport,
        engine,
        _dir: dir,
    }
}

fn scheduler(ctx: Arc<SchedulerContext>) -> Scheduler {
    let (_tx, rx) = mpsc::channel(8);
    Scheduler::new(ctx, rx, CancellationToken::new())
}

fn inbound_msg(chat_id: i64, message_id: i64, text: &str) -> InboundMessage {
    InboundMessage {
        chat: ChatRef::new(chat_id, None),
        message_id,
        sender_id: chat_id,
        text: text.to_string(),
        image: None,
    }
}

// ---- One-shot delay ----

#[tokio::test]
async fn one_shot_delay_fires_once_and_goes_terminal() {
    let h = harness("HEARTBEAT_OK").await;
    let tz: Tz = UTC.parse().unwrap();

    // schedule("5m", "ping") at t0 = six minutes ago: due now.
    let t0 = Utc::now().timestamp_millis() - 6 * 60_000;
    let (kind, spec) = parse_schedule("5m", t0, &tz).unwrap();
    assert_eq!(kind, ScheduleKind::At);

    jobs::add(
        &h.ctx.jobs_db,
        JobInput {
            chat_id: 5,
            thread_id: None,
            schedule_kind: kind,
            schedule_spec: spec,
            job_type: JobType::SendMessage,
            payload: serde_json::json!({"text": "ping"}),
            context_mode: ContextMode::Session,
        },
        t0,
        tz,
    )
    .await
    .unwrap();

    scheduler(h.ctx.clone()).tick().await;

    // Delivered and logged.
    assert_eq!(h.transport.sent_texts(), vec!["ping"]);
    let log = messages::recent(&h.ctx.messages_db, ChatRef::new(5, None), 10)
        .await
        .unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].role, Role::Assistant);

    // Terminal: disabled and never claimed again.
    let all = jobs::list(&h.ctx.jobs_db).await.unwrap();
    assert!(!all[0].enabled);

    scheduler(h.ctx.clone()).tick().await;
    assert_eq!(h.transport.sent_texts().len(), 1, "no second delivery");
}

// ---- Daily cron ----

#[tokio::test]
async fn daily_cron_schedules_and_removal_stops_it() {
    let h = harness("HEARTBEAT_OK").await;
    let tz: Tz = UTC.parse().unwrap();
    let now = Utc::now().timestamp_millis();

    let (kind, spec) = parse_schedule("every day at 9am", now, &tz).unwrap();
    assert_eq!(kind, ScheduleKind::Cron);
    assert_eq!(spec, "0 9 * * *");

    let job = jobs::add(
        &h.ctx.jobs_db,
        JobInput {
            chat_id: 5,
            thread_id: None,
            schedule_kind: kind,
            schedule_spec: spec,
            job_type: JobType::SendMessage,
            payload: serde_json::json!({"text": "standup"}),
            context_mode: ContextMode::Session,
        },
        now,
        tz,
    )
    .await
    .unwrap();

    // Next run is in the future, within 24h.
    let next = job.next_run_at.unwrap();
    assert!(next > now);
    assert!(next <= now + 24 * 3_600_000);

    // Removing the job means no further firings.
    assert!(jobs::remove(&h.ctx.jobs_db, job.id).await.unwrap());
    assert_eq!(jobs::next_due_at(&h.ctx.jobs_db).await.unwrap(), None);
}

// ---- Event-driven wake ----

#[tokio::test]
async fn event_flows_through_heartbeat_and_acks() {
    let h = harness("HEARTBEAT_OK").await;
    let now = Utc::now().timestamp_millis();

    events::add(
        &h.ctx.events_db,
        EventInput {
            chat_id: 5,
            thread_id: None,
            kind: "task_failed".to_string(),
            payload: serde_json::json!({"error": "timeout"}),
        },
        now,
    )
    .await
    .unwrap();

    scheduler(h.ctx.clone()).tick().await;

    // The engine saw the payload, the user saw nothing, the queue is empty.
    let requests = h.engine.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].prompt.contains("task_failed"));
    assert!(requests[0].prompt.contains("timeout"));
    assert!(h.transport.sent_texts().is_empty());
    assert!(events::list(&h.ctx.events_db, false).await.unwrap().is_empty());
}

#[tokio::test]
async fn noisy_heartbeat_notifies_the_chat() {
    let h = harness("Deploy red, go look.").await;
    let now = Utc::now().timestamp_millis();

    events::add(
        &h.ctx.events_db,
        EventInput {
            chat_id: 5,
            thread_id: None,
            kind: "deploy_failed".to_string(),
            payload: serde_json::json!({}),
        },
        now,
    )
    .await
    .unwrap();

    scheduler(h.ctx.clone()).tick().await;

    assert_eq!(h.transport.sent_texts().len(), 1);
    assert!(events::list(&h.ctx.events_db, false).await.unwrap().is_empty());
}

// ---- DND defer ----

#[tokio::test]
async fn dnd_adhoc_defers_until_window_end() {
    let h = harness("HEARTBEAT_OK").await;
    let tz: Tz = UTC.parse().unwrap();
    let now = Utc::now().timestamp_millis();
    let until = now + 2 * 3_600_000;

    h.ctx.dnd.set_adhoc(until, Some("sleeping".into())).unwrap();

    jobs::add(
        &h.ctx.jobs_db,
        JobInput {
            chat_id: 5,
            thread_id: None,
            schedule_kind: ScheduleKind::At,
            schedule_spec: (now - 1000).to_string(),
            job_type: JobType::SendMessage,
            payload: serde_json::json!({"text": "wake up"}),
            context_mode: ContextMode::Session,
        },
        now - 2000,
        tz,
    )
    .await
    .unwrap();

    scheduler(h.ctx.clone()).tick().await;

    // Not delivered; rescheduled for the end of the quiet window.
    assert!(h.transport.sent_texts().is_empty());
    let all = jobs::list(&h.ctx.jobs_db).await.unwrap();
    assert!(all[0].enabled);
    assert_eq!(all[0].next_run_at, Some(until));
}

// ---- Inbound command grammar ----

#[tokio::test]
async fn command_grammar_parses_prefixes() {
    let h = harness("ok").await;

    assert_eq!(parse_command("/start", &h.ctx), Command::Start);
    assert_eq!(parse_command("/status", &h.ctx), Command::Status);
    assert_eq!(parse_command("/agent", &h.ctx), Command::ToggleAgent);
    assert_eq!(
        parse_command("/claude fix the tests", &h.ctx),
        Command::EngineTurn {
            engine: "claude".into(),
            text: "fix the tests".into()
        }
    );
    assert_eq!(
        parse_command("@feature-x", &h.ctx),
        Command::BindBranch {
            branch: "feature-x".into()
        }
    );
    // Unknown slash commands degrade to plain turns.
    assert_eq!(
        parse_command("/frobnicate now", &h.ctx),
        Command::Turn {
            text: "/frobnicate now".into()
        }
    );
    assert_eq!(
        parse_command("hello there", &h.ctx),
        Command::Turn {
            text: "hello there".into()
        }
    );
}

#[tokio::test]
async fn plain_turn_streams_reply_and_persists_both_sides() {
    let h = harness("sure, done.").await;

    inbound::handle(&h.ctx, inbound_msg(5, 100, "do the thing"))
        .await
        .unwrap();

    let log = messages::recent(&h.ctx.messages_db, ChatRef::new(5, None), 10)
        .await
        .unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].role, Role::User);
    assert_eq!(log[0].text, "do the thing");
    assert_eq!(log[0].message_id, Some(100));
    assert_eq!(log[1].role, Role::Assistant);
    assert_eq!(log[1].text, "sure, done.");

    let visible = h.transport.visible_texts();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].1, "sure, done.");
}

#[tokio::test]
async fn session_token_round_trips_between_turns() {
    let dir = tempfile::tempdir().unwrap();
    let paths = BobPaths::new(dir.path());
    paths.ensure_dirs().unwrap();

    let transport = Arc::new(MockTransport::new());
    let engine = Arc::new(MockEngine::single("claude", "noted").with_session_token("sess-1"));
    let mut engines: HashMap<String, Arc<dyn EngineAdapter>> = HashMap::new();
    engines.insert("claude".to_string(), engine.clone());

    let tz: Tz = UTC.parse().unwrap();
    let ctx = Arc::new(SchedulerContext {
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
    });

    inbound::handle(&ctx, inbound_msg(5, 1, "first")).await.unwrap();
    assert_eq!(ctx.sessions.resume_token(5, "claude").as_deref(), Some("sess-1"));

    inbound::handle(&ctx, inbound_msg(5, 2, "second")).await.unwrap();
    let requests = engine.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].resume_token.is_none());
    assert_eq!(requests[1].resume_token.as_deref(), Some("sess-1"));
}

#[tokio::test]
async fn agent_toggle_flips_default_engine() {
    let h = harness("ok").await;

    inbound::handle(&h.ctx, inbound_msg(5, 1, "/agent")).await.unwrap();
    assert_eq!(h.ctx.sessions.default_engine(5).as_deref(), Some("codex"));

    inbound::handle(&h.ctx, inbound_msg(5, 2, "/agent")).await.unwrap();
    assert_eq!(h.ctx.sessions.default_engine(5).as_deref(), Some("claude"));
}

#[tokio::test]
async fn status_command_reports_engine_and_jobs() {
    let h = harness("ok").await;
    let tz: Tz = UTC.parse().unwrap();
    let now = Utc::now().timestamp_millis();

    jobs::add(
        &h.ctx.jobs_db,
        JobInput {
            chat_id: 5,
            thread_id: None,
            schedule_kind: ScheduleKind::Every,
            schedule_spec: "3600000".to_string(),
            job_type: JobType::SendMessage,
            payload: serde_json::json!({"text": "hourly"}),
            context_mode: ContextMode::Session,
        },
        now,
        tz,
    )
    .await
    .unwrap();

    inbound::handle(&h.ctx, inbound_msg(5, 1, "/status")).await.unwrap();

    let sends: Vec<String> = h.transport.sent_texts();
    assert_eq!(sends.len(), 1);
    assert!(sends[0].contains("engine: claude"));
    assert!(sends[0].contains("upcoming:"));
}

#[tokio::test]
async fn silent_sentinel_reacts_instead_of_replying() {
    let dir = tempfile::tempdir().unwrap();
    let paths = BobPaths::new(dir.path());
    paths.ensure_dirs().unwrap();

    let transport = Arc::new(MockTransport::new());
    let engine = Arc::new(MockEngine::single("claude", "NO_REPLY"));
    let mut engines: HashMap<String, Arc<dyn EngineAdapter>> = HashMap::new();
    engines.insert("claude".to_string(), engine);

    let mut config = BobConfig::default();
    config.telegram.ack_reaction = "👀".to_string();

    let tz: Tz = UTC.parse().unwrap();
    let ctx = Arc::new(SchedulerContext {
        config,
        paths: paths.clone(),
        tz,
        jobs_db: Database::open_in_memory(StoreKind::Jobs).await.unwrap(),
        events_db: Database::open_in_memory(StoreKind::Events).await.unwrap(),
        messages_db: Database::open_in_memory(StoreKind::Messages).await.unwrap(),
        sessions: Arc::new(SessionStore::new(paths.sessions_file(), "/work")),
        transport: transport.clone(),
        engines,
        dnd: DndGate::new(
            DndWindow::new(false, "22:00", "08:00", tz).unwrap(),
            paths.dnd_state(),
        ),
    });

    inbound::handle(&ctx, inbound_msg(5, 42, "fyi only")).await.unwrap();

    // No text reply; the eager ack plus the silent-path reaction both
    // target the inbound message.
    assert!(transport.sent_texts().is_empty());
    let reactions: Vec<_> = transport
        .calls()
        .into_iter()
        .filter(|c| matches!(c, TransportCall::React { message_id: 42, .. }))
        .collect();
    assert!(!reactions.is_empty());

    // Only the user message is in the log.
    let log = messages::recent(&ctx.messages_db, ChatRef::new(5, None), 10)
        .await
        .unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].role, Role::User);
}
