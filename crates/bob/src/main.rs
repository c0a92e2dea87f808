// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! bob - an always-on personal assistant daemon.
//!
//! CLI entry point. Commands that mutate the stores nudge a running
//! scheduler over SIGUSR1 afterwards; a missing daemon is never an error.

use std::process::ExitCode;

use chrono::Utc;
use chrono_tz::Tz;
use clap::{Parser, Subcommand};

use bob_config::{load_config, BobPaths};
use bob_core::BobError;
use bob_schedule::parse_schedule;
use bob_scheduler::pidfile;
use bob_storage::migrations::StoreKind;
use bob_storage::queries::{events, jobs};
use bob_storage::{ContextMode, Database, EventInput, JobInput, JobType};

/// bob - an always-on personal assistant daemon.
#[derive(Parser, Debug)]
#[command(name = "bob", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the daemon: transport reader plus scheduler loop.
    Serve,
    /// Manage scheduled jobs.
    Jobs {
        #[command(subcommand)]
        command: JobsCommand,
    },
    /// Manage queued events.
    Events {
        #[command(subcommand)]
        command: EventsCommand,
    },
    /// Index and search the markdown corpus.
    Recall {
        #[command(subcommand)]
        command: RecallCommand,
    },
    /// Control do-not-disturb.
    Dnd {
        #[command(subcommand)]
        command: DndCommand,
    },
    /// Show jobs and pending events.
    Status,
}

#[derive(Subcommand, Debug)]
enum JobsCommand {
    /// Schedule a job: `bob jobs add "every day at 9am" "standup"`.
    Add {
        /// Schedule phrase: "5m", "every 30m", "every day at 9am",
        /// "cron */5 * * * *", "tomorrow at 8am", …
        schedule: String,
        /// Message text, agent prompt, or script path (per --kind).
        body: String,
        /// send_message, agent_turn, or script.
        #[arg(long, default_value = "send_message")]
        kind: String,
        /// Target chat id; falls back to $BOB_CHAT_ID.
        #[arg(long)]
        chat: Option<i64>,
        /// Run agent turns without session context.
        #[arg(long)]
        isolated: bool,
        /// Deliver even during do-not-disturb.
        #[arg(long)]
        urgent: bool,
        /// Deliver script stdout on success.
        #[arg(long)]
        notify: bool,
    },
    /// List all jobs.
    List,
    /// Remove a job by id.
    Remove { id: i64 },
}

#[derive(Subcommand, Debug)]
enum EventsCommand {
    /// Queue an event: `bob events add task_failed '{"error":"timeout"}'`.
    Add {
        kind: String,
        /// JSON payload; defaults to `{}`.
        payload: Option<String>,
        /// Target chat id; falls back to $BOB_CHAT_ID.
        #[arg(long)]
        chat: Option<i64>,
    },
    /// List events.
    List {
        /// Include processed events.
        #[arg(long)]
        all: bool,
    },
}

#[derive(Subcommand, Debug)]
enum RecallCommand {
    /// Reindex the markdown corpus.
    Index,
    /// Search the corpus.
    Search {
        query: String,
        #[arg(long, default_value_t = 5)]
        limit: usize,
        /// fts, vector, or hybrid.
        #[arg(long, default_value = "hybrid")]
        mode: String,
    },
}

#[derive(Subcommand, Debug)]
enum DndCommand {
    /// Quiet for a duration: `bob dnd on 2h "deep work"`.
    On {
        duration: String,
        reason: Option<String>,
    },
    /// Clear the ad-hoc override.
    Off,
    /// Show whether DND is active.
    Status,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let paths = BobPaths::resolve();

    let result = match cli.command {
        Commands::Serve => bob::serve::run_serve(paths).await,
        Commands::Jobs { command } => run_jobs(command, &paths).await,
        Commands::Events { command } => run_events(command, &paths).await,
        Commands::Recall { command } => run_recall(command, &paths).await,
        Commands::Dnd { command } => run_dnd(command, &paths).await,
        Commands::Status => run_status(&paths).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_jobs(command: JobsCommand, paths: &BobPaths) -> Result<(), BobError> {
    let tz = configured_tz(paths)?;
    let db = Database::open(paths.jobs_db(), StoreKind::Jobs).await?;

    match command {
        JobsCommand::Add {
            schedule,
            body,
            kind,
            chat,
            isolated,
            urgent,
            notify,
        } => {
            let now = Utc::now().timestamp_millis();
            let (schedule_kind, spec) = parse_schedule(&schedule, now, &tz)
                .ok_or_else(|| BobError::InvalidSchedule(schedule.clone()))?;

            let job_type: JobType = kind
                .parse()
                .map_err(|_| BobError::Config(format!("unknown job kind: {kind}")))?;

            let chat_id = match chat.or_else(env_chat_id) {
                Some(id) => id,
                None if job_type == JobType::Script => 0,
                None => {
                    return Err(BobError::Config(
                        "no chat id: pass --chat or set BOB_CHAT_ID".into(),
                    ))
                }
            };

            let mut payload = match job_type {
                JobType::SendMessage => serde_json::json!({ "text": body }),
                JobType::AgentTurn => {
                    let mut p = serde_json::json!({ "prompt": body });
                    if let Ok(engine) = std::env::var("BOB_ENGINE") {
                        p["engine"] = serde_json::json!(engine);
                    }
                    p
                }
                JobType::Script => serde_json::json!({ "path": body, "notify": notify }),
            };
            if urgent {
                payload["urgent"] = serde_json::json!(true);
            }

            let job = jobs::add(
                &db,
                JobInput {
                    chat_id,
                    thread_id: env_thread_id(),
                    schedule_kind,
                    schedule_spec: spec,
                    job_type,
                    payload,
                    context_mode: if isolated {
                        ContextMode::Isolated
                    } else {
                        ContextMode::Session
                    },
                },
                now,
                tz,
            )
            .await?;

            println!(
                "job #{} scheduled ({} {}), next run at {}",
                job.id,
                job.job_type,
                job.schedule_kind,
                job.next_run_at.unwrap_or(0)
            );
            pidfile::signal_scheduler(&paths.scheduler_pid());
        }
        JobsCommand::List => {
            for job in jobs::list(&db).await? {
                println!(
                    "#{} chat={} {} {} spec={} enabled={} next={:?} last={:?}",
                    job.id,
                    job.chat_id,
                    job.job_type,
                    job.schedule_kind,
                    job.schedule_spec,
                    job.enabled,
                    job.next_run_at,
                    job.last_run_at,
                );
            }
        }
        JobsCommand::Remove { id } => {
            if jobs::remove(&db, id).await? {
                println!("job #{id} removed");
                pidfile::signal_scheduler(&paths.scheduler_pid());
            } else {
                println!("no job #{id}");
            }
        }
    }
    Ok(())
}

async fn run_events(command: EventsCommand, paths: &BobPaths) -> Result<(), BobError> {
    let db = Database::open(paths.events_db(), StoreKind::Events).await?;

    match command {
        EventsCommand::Add {
            kind,
            payload,
            chat,
        } => {
            let chat_id = chat.or_else(env_chat_id).ok_or_else(|| {
                BobError::Config("no chat id: pass --chat or set BOB_CHAT_ID".into())
            })?;
            let payload: serde_json::Value = match payload.as_deref() {
                Some(raw) => serde_json::from_str(raw).map_err(|e| {
                    BobError::Config(format!("payload is not valid JSON: {e}"))
                })?,
                None => serde_json::json!({}),
            };

            let event = events::add(
                &db,
                EventInput {
                    chat_id,
                    thread_id: env_thread_id(),
                    kind,
                    payload,
                },
                Utc::now().timestamp_millis(),
            )
            .await?;
            println!("event #{} queued ({})", event.id, event.kind);
            pidfile::signal_scheduler(&paths.scheduler_pid());
        }
        EventsCommand::List { all } => {
            for event in events::list(&db, all).await? {
                let state = if event.processed_at.is_some() {
                    "processed"
                } else if event.claim_token.is_some() {
                    "claimed"
                } else {
                    "pending"
                };
                println!(
                    "#{} chat={} {} {} {}",
                    event.id, event.chat_id, event.kind, state, event.payload
                );
            }
        }
    }
    Ok(())
}

async fn run_recall(command: RecallCommand, paths: &BobPaths) -> Result<(), BobError> {
    use bob_recall::{RecallIndexer, RecallSearch, RecallStore, SearchMode};
    use std::sync::Arc;

    let store = Arc::new(RecallStore::open(paths.recall_db()).await?);
    let embedder = bob::serve::load_embedder(paths);

    match command {
        RecallCommand::Index => {
            let indexer = RecallIndexer::new(store, embedder, paths.memory_dir());
            let report = indexer.index_all(Utc::now().timestamp_millis()).await?;
            println!(
                "indexed {} sources ({} unchanged, {} removed), embedded {} chunks ({} failed)",
                report.sources_indexed,
                report.sources_skipped,
                report.sources_removed,
                report.chunks_embedded,
                report.embed_failures,
            );
        }
        RecallCommand::Search { query, limit, mode } => {
            let mode = match mode.as_str() {
                "fts" => SearchMode::Fts,
                "vector" => SearchMode::Vector,
                "hybrid" => SearchMode::Hybrid,
                other => {
                    return Err(BobError::Config(format!("unknown search mode: {other}")))
                }
            };
            let search = RecallSearch::new(store, embedder);
            for hit in search.search(&query, limit, mode).await? {
                let trail = if hit.chunk.breadcrumbs.is_empty() {
                    hit.chunk.title.clone()
                } else {
                    format!("{} > {}", hit.chunk.breadcrumbs.join(" > "), hit.chunk.title)
                };
                println!(
                    "[{}] {:.4} {} ({}:{}-{})\n    {}",
                    hit.match_type,
                    hit.score,
                    trail,
                    hit.chunk.source,
                    hit.chunk.line_start,
                    hit.chunk.line_end,
                    hit.chunk.preview.replace('\n', " "),
                );
            }
        }
    }
    Ok(())
}

async fn run_dnd(command: DndCommand, paths: &BobPaths) -> Result<(), BobError> {
    use bob_schedule::DndWindow;
    use bob_scheduler::dnd_gate::DndGate;

    let config = load_config(paths).map_err(|e| BobError::Config(e.to_string()))?;
    let tz = configured_tz(paths)?;
    let gate = DndGate::new(
        DndWindow::new(config.dnd.enabled, &config.dnd.start, &config.dnd.end, tz)?,
        paths.dnd_state(),
    );
    let now = Utc::now().timestamp_millis();

    match command {
        DndCommand::On { duration, reason } => {
            let (kind, spec) = parse_schedule(&duration, now, &tz)
                .ok_or_else(|| BobError::InvalidSchedule(duration.clone()))?;
            if kind != bob_schedule::ScheduleKind::At {
                return Err(BobError::InvalidSchedule(format!(
                    "dnd on needs a duration or time, got: {duration}"
                )));
            }
            let until: i64 = spec
                .parse()
                .map_err(|_| BobError::InvalidSchedule(duration.clone()))?;
            gate.set_adhoc(until, reason)?;
            println!("dnd on until {until}");
        }
        DndCommand::Off => {
            gate.clear_adhoc()?;
            println!("ad-hoc dnd cleared");
        }
        DndCommand::Status => {
            let status = gate.status(now);
            if status.active {
                println!(
                    "dnd active ({:?}) until {:?}",
                    status.reason, status.ends_at
                );
            } else {
                println!("dnd off");
            }
        }
    }
    Ok(())
}

async fn run_status(paths: &BobPaths) -> Result<(), BobError> {
    let jobs_db = Database::open(paths.jobs_db(), StoreKind::Jobs).await?;
    let events_db = Database::open(paths.events_db(), StoreKind::Events).await?;

    let now = Utc::now().timestamp_millis();
    let pending = events::count_pending(&events_db, now, events::DEFAULT_STALE_AFTER_MS).await?;
    let all = jobs::list(&jobs_db).await?;
    let enabled = all.iter().filter(|j| j.enabled).count();

    let running = pidfile::read(&paths.scheduler_pid()).is_some();
    println!("scheduler: {}", if running { "running" } else { "stopped" });
    println!("jobs: {} ({enabled} enabled)", all.len());
    println!("pending events: {pending}");
    for job in all.iter().filter(|j| j.enabled) {
        println!(
            "  #{} chat={} {} {} next={:?}",
            job.id, job.chat_id, job.job_type, job.schedule_kind, job.next_run_at
        );
    }
    Ok(())
}

fn configured_tz(paths: &BobPaths) -> Result<Tz, BobError> {
    let config = load_config(paths).map_err(|e| BobError::Config(e.to_string()))?;
    config
        .timezone
        .parse()
        .map_err(|_| BobError::Config(format!("invalid timezone: {}", config.timezone)))
}

fn env_chat_id() -> Option<i64> {
    std::env::var("BOB_CHAT_ID").ok()?.parse().ok()
}

fn env_thread_id() -> Option<i64> {
    std::env::var("BOB_THREAD_ID").ok()?.parse().ok()
}
