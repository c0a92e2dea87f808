// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The scheduler: a single long-lived loop that drains due jobs and
//! pending events.
//!
//! One logical worker owns the tick body; wakeups (next-due timer, SIGUSR1
//! from peer CLI processes, a file-change hint on the jobs database) are
//! debounced through one channel, so at most one tick executes at a time
//! and bursts collapse into a single pass.

pub mod dnd_gate;
pub mod exec;
pub mod heartbeat;
pub mod pidfile;
pub mod wake;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use chrono_tz::Tz;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use bob_config::{BobConfig, BobPaths};
use bob_core::{BobError, ChatTransport, EngineAdapter};
use bob_schedule::{next_run_of, ScheduleKind};
use bob_storage::queries::{events, jobs};
use bob_storage::{Database, Job, JobRunUpdate, JobType, SessionStore};

use crate::dnd_gate::DndGate;

/// Upper bound on the adaptive sleep.
const MAX_SLEEP: Duration = Duration::from_secs(60);

/// Jobs claimed per `claim_due` pass.
const CLAIM_LIMIT: u32 = 10;

/// Wakeup debounce window: bursts from batch CLI writes collapse.
const WAKE_DEBOUNCE: Duration = Duration::from_millis(200);

/// How often the retention pass runs.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(6 * 3600);

/// Message log retention.
const MESSAGE_RETENTION_DAYS: i64 = 30;

/// Processed-event retention.
const EVENT_RETENTION_DAYS: i64 = 30;

/// Everything the tick body needs, shared with the heartbeat dispatcher
/// and job execution.
pub struct SchedulerContext {
    pub config: BobConfig,
    pub paths: BobPaths,
    pub tz: Tz,
    pub jobs_db: Database,
    pub events_db: Database,
    pub messages_db: Database,
    pub sessions: Arc<SessionStore>,
    pub transport: Arc<dyn ChatTransport>,
    pub engines: HashMap<String, Arc<dyn EngineAdapter>>,
    pub dnd: DndGate,
}

impl SchedulerContext {
    /// Resolves the engine a chat should use: its session override first,
    /// then the configured default.
    pub fn engine_for_chat(
        &self,
        chat_id: i64,
    ) -> Result<(String, Arc<dyn EngineAdapter>), BobError> {
        let id = self
            .sessions
            .default_engine(chat_id)
            .unwrap_or_else(|| self.config.default_engine.clone());
        let engine = self
            .engines
            .get(&id)
            .cloned()
            .ok_or_else(|| BobError::engine(format!("engine not configured: {id}")))?;
        Ok((id, engine))
    }
}

/// The scheduler loop.
pub struct Scheduler {
    ctx: Arc<SchedulerContext>,
    cancel: CancellationToken,
    wake_rx: mpsc::Receiver<()>,
    pid_path: PathBuf,
    last_maintenance: Option<std::time::Instant>,
}

impl Scheduler {
    pub fn new(
        ctx: Arc<SchedulerContext>,
        wake_rx: mpsc::Receiver<()>,
        cancel: CancellationToken,
    ) -> Self {
        let pid_path = ctx.paths.scheduler_pid();
        Self {
            ctx,
            cancel,
            wake_rx,
            pid_path,
            last_maintenance: None,
        }
    }

    /// Runs until cancelled. Writes the PID file on entry and removes it on
    /// the way out; in-flight jobs finish before shutdown completes.
    pub async fn run(mut self) -> Result<(), BobError> {
        if let Err(e) = pidfile::write(&self.pid_path) {
            warn!(error = %e, "could not write scheduler pid file");
        }
        info!("scheduler loop running");

        loop {
            self.tick().await;

            if self.cancel.is_cancelled() {
                break;
            }

            let sleep = self.compute_sleep().await;
            debug!(sleep_ms = sleep.as_millis() as u64, "scheduler sleeping");

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(sleep) => {}
                Some(()) = self.wake_rx.recv() => {
                    self.debounce_wakes().await;
                }
            }
        }

        pidfile::remove(&self.pid_path);
        info!("scheduler loop stopped");
        Ok(())
    }

    /// Collapses a burst of wake signals into one tick.
    async fn debounce_wakes(&mut self) {
        loop {
            match tokio::time::timeout(WAKE_DEBOUNCE, self.wake_rx.recv()).await {
                Ok(Some(())) => continue,
                _ => break,
            }
        }
    }

    /// One tick: heartbeat first, then drain due jobs until `claim_due`
    /// comes back empty. Exactly one tick body executes at a time: the
    /// loop is the only caller.
    pub async fn tick(&mut self) {
        if self.ctx.config.heartbeat.enabled {
            if let Err(e) = heartbeat::dispatch(&self.ctx).await {
                error!(error = %e, "heartbeat dispatch failed");
            }
        }

        self.maybe_run_maintenance().await;

        // A job that failed this tick keeps a due next_run_at and would be
        // claimed right back; it gets exactly one attempt per tick.
        let mut attempted: std::collections::HashSet<i64> = std::collections::HashSet::new();
        loop {
            let now = Utc::now().timestamp_millis();
            let due = match jobs::claim_due(&self.ctx.jobs_db, now, CLAIM_LIMIT).await {
                Ok(due) => due,
                Err(e) => {
                    error!(error = %e, "claim_due failed");
                    return;
                }
            };
            if due.is_empty() {
                return;
            }
            let mut progressed = false;
            for job in due {
                if !attempted.insert(job.id) {
                    // Undo the claim's one-shot flip; the next tick retries.
                    let update = JobRunUpdate {
                        id: job.id,
                        last_run_at: job.last_run_at,
                        next_run_at: job.next_run_at,
                        enabled: true,
                    };
                    if let Err(e) = jobs::update_after_run(&self.ctx.jobs_db, update).await {
                        error!(job_id = job.id, error = %e, "claim restore failed");
                    }
                    continue;
                }
                progressed = true;
                self.run_one(job).await;
            }
            if !progressed {
                return;
            }
        }
    }

    /// Executes one claimed job: DND deferral, dispatch, reschedule.
    async fn run_one(&self, job: Job) {
        let now = Utc::now().timestamp_millis();

        // DND gates user-facing job types unless the payload is urgent.
        if matches!(job.job_type, JobType::SendMessage | JobType::AgentTurn)
            && !job.is_urgent()
        {
            let status = self.ctx.dnd.status(now);
            if status.active {
                let ends_at = status.ends_at.unwrap_or(now + MAX_SLEEP.as_millis() as i64);
                info!(job_id = job.id, ends_at, "job deferred by dnd");
                let update = JobRunUpdate {
                    id: job.id,
                    last_run_at: job.last_run_at,
                    next_run_at: Some(ends_at),
                    enabled: true,
                };
                if let Err(e) = jobs::update_after_run(&self.ctx.jobs_db, update).await {
                    error!(job_id = job.id, error = %e, "dnd deferral writeback failed");
                }
                return;
            }
        }

        match exec::run_job(&self.ctx, &job).await {
            Ok(()) => {
                let update = match job.schedule_kind {
                    ScheduleKind::At => JobRunUpdate {
                        id: job.id,
                        last_run_at: Some(now),
                        next_run_at: None,
                        enabled: false,
                    },
                    kind => {
                        match next_run_of(kind, &job.schedule_spec, now, &self.ctx.tz) {
                            Ok(next) => JobRunUpdate {
                                id: job.id,
                                last_run_at: Some(now),
                                next_run_at: Some(next),
                                enabled: true,
                            },
                            Err(e) => {
                                error!(job_id = job.id, error = %e, "reschedule failed, disabling job");
                                JobRunUpdate {
                                    id: job.id,
                                    last_run_at: Some(now),
                                    next_run_at: None,
                                    enabled: false,
                                }
                            }
                        }
                    }
                };
                if let Err(e) = jobs::update_after_run(&self.ctx.jobs_db, update).await {
                    error!(job_id = job.id, error = %e, "post-run writeback failed");
                }
            }
            Err(e) => {
                // The job keeps its prior next_run_at so the next tick
                // retries. No retry budget: the user owns remediation.
                error!(job_id = job.id, error = %e, "job execution failed, will retry");
                let update = JobRunUpdate {
                    id: job.id,
                    last_run_at: job.last_run_at,
                    next_run_at: job.next_run_at,
                    enabled: true,
                };
                if let Err(e) = jobs::update_after_run(&self.ctx.jobs_db, update).await {
                    error!(job_id = job.id, error = %e, "retry writeback failed");
                }
            }
        }
    }

    /// Periodic retention pass: old messages and processed events.
    async fn maybe_run_maintenance(&mut self) {
        let due = self
            .last_maintenance
            .is_none_or(|last| last.elapsed() >= MAINTENANCE_INTERVAL);
        if !due {
            return;
        }
        self.last_maintenance = Some(std::time::Instant::now());

        let now = Utc::now().timestamp_millis();
        match bob_storage::queries::messages::prune_older_than(
            &self.ctx.messages_db,
            MESSAGE_RETENTION_DAYS,
            now,
        )
        .await
        {
            Ok(removed) if removed > 0 => info!(removed, "pruned old messages"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "message prune failed"),
        }
        match events::prune_processed_older_than(
            &self.ctx.events_db,
            EVENT_RETENTION_DAYS,
            now,
        )
        .await
        {
            Ok(removed) if removed > 0 => info!(removed, "pruned processed events"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "event prune failed"),
        }
    }

    /// `min(max_sleep, max(0, next_due − now))`, zero when events pend.
    async fn compute_sleep(&self) -> Duration {
        let now = Utc::now().timestamp_millis();

        let pending = events::count_pending(
            &self.ctx.events_db,
            now,
            events::DEFAULT_STALE_AFTER_MS,
        )
        .await
        .unwrap_or(0);
        if pending > 0 {
            return Duration::ZERO;
        }

        match jobs::next_due_at(&self.ctx.jobs_db).await {
            Ok(Some(next)) => {
                let until = (next - now).max(0) as u64;
                MAX_SLEEP.min(Duration::from_millis(until))
            }
            Ok(None) => MAX_SLEEP,
            Err(e) => {
                warn!(error = %e, "next_due_at failed");
                MAX_SLEEP
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bob_schedule::DndWindow;
    use bob_storage::migrations::StoreKind;
    use bob_storage::models::{ContextMode, JobInput};
    use bob_test_utils::{MockEngine, MockTransport, TransportCall};

    async fn context(transport: Arc<MockTransport>) -> (Arc<SchedulerContext>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let paths = BobPaths::new(dir.path());
        paths.ensure_dirs().unwrap();

        let mut engines: HashMap<String, Arc<dyn EngineAdapter>> = HashMap::new();
        engines.insert(
            "claude".to_string(),
            Arc::new(MockEngine::single("claude", "scheduled reply")),
        );

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

    fn scheduler(ctx: Arc<SchedulerContext>) -> Scheduler {
        let (_tx, rx) = mpsc::channel(8);
        Scheduler::new(ctx, rx, CancellationToken::new())
    }

    fn send_job(chat_id: i64, at_ms: i64, urgent: bool) -> JobInput {
        let mut payload = serde_json::json!({"text": "ping"});
        if urgent {
            payload["urgent"] = serde_json::json!(true);
        }
        JobInput {
            chat_id,
            thread_id: None,
            schedule_kind: ScheduleKind::At,
            schedule_spec: at_ms.to_string(),
            job_type: JobType::SendMessage,
            payload,
            context_mode: ContextMode::Session,
        }
    }

    #[tokio::test]
    async fn tick_delivers_due_send_message_and_disables_one_shot() {
        let transport = Arc::new(MockTransport::new());
        let (ctx, _dir) = context(transport.clone()).await;
        let now = Utc::now().timestamp_millis();

        let job = jobs::add(&ctx.jobs_db, send_job(5, now - 1000, false), now - 2000, ctx.tz)
            .await
            .unwrap();

        scheduler(ctx.clone()).tick().await;

        assert_eq!(transport.sent_texts(), vec!["ping"]);

        let all = jobs::list(&ctx.jobs_db).await.unwrap();
        assert!(!all[0].enabled, "one-shot must be terminal");
        assert!(all[0].last_run_at.is_some());
        assert_eq!(all[0].id, job.id);

        // A later tick finds nothing.
        scheduler(ctx.clone()).tick().await;
        assert_eq!(transport.sent_texts().len(), 1);
    }

    #[tokio::test]
    async fn interval_job_reschedules_after_run() {
        let transport = Arc::new(MockTransport::new());
        let (ctx, _dir) = context(transport.clone()).await;
        let now = Utc::now().timestamp_millis();

        jobs::add(
            &ctx.jobs_db,
            JobInput {
                chat_id: 5,
                thread_id: None,
                schedule_kind: ScheduleKind::Every,
                schedule_spec: "3600000".to_string(),
                job_type: JobType::SendMessage,
                payload: serde_json::json!({"text": "hourly"}),
                context_mode: ContextMode::Session,
            },
            now - 3_700_000,
            ctx.tz,
        )
        .await
        .unwrap();

        scheduler(ctx.clone()).tick().await;

        let all = jobs::list(&ctx.jobs_db).await.unwrap();
        assert!(all[0].enabled);
        let next = all[0].next_run_at.unwrap();
        assert!(next > now + 3_500_000, "next run is roughly an hour out");
    }

    #[tokio::test]
    async fn dnd_defers_non_urgent_jobs() {
        let transport = Arc::new(MockTransport::new());
        let (mut raw_ctx, _dir) = {
            let (ctx, dir) = context(transport.clone()).await;
            (Arc::try_unwrap(ctx).ok().unwrap(), dir)
        };
        // Always-on window for the test: 00:00–24:00 equivalent via wrap.
        raw_ctx.dnd = DndGate::new(
            DndWindow::new(true, "00:00", "23:59", raw_ctx.tz).unwrap(),
            raw_ctx.paths.dnd_state(),
        );
        let ctx = Arc::new(raw_ctx);
        let now = Utc::now().timestamp_millis();

        jobs::add(&ctx.jobs_db, send_job(5, now - 1000, false), now - 2000, ctx.tz)
            .await
            .unwrap();
        jobs::add(&ctx.jobs_db, send_job(6, now - 1000, true), now - 2000, ctx.tz)
            .await
            .unwrap();

        scheduler(ctx.clone()).tick().await;

        // Only the urgent job got through.
        assert_eq!(transport.sent_texts(), vec!["ping"]);
        let sent_chats: Vec<i64> = transport
            .calls()
            .iter()
            .filter_map(|c| match c {
                TransportCall::Send { chat, .. } => Some(chat.chat_id),
                _ => None,
            })
            .collect();
        assert_eq!(sent_chats, vec![6]);

        // The deferred job is re-enabled with next_run_at at the window end.
        let deferred = jobs::list_for_chat(&ctx.jobs_db, 5).await.unwrap();
        assert!(deferred[0].enabled);
        assert!(deferred[0].next_run_at.unwrap() > now);
        assert!(deferred[0].last_run_at.is_none(), "deferral is not a run");
    }

    #[tokio::test]
    async fn failing_job_keeps_next_run_for_retry() {
        let transport = Arc::new(MockTransport::new());
        let (ctx, _dir) = context(transport.clone()).await;
        let now = Utc::now().timestamp_millis();

        // A script job whose path escapes: execution errors.
        jobs::add(
            &ctx.jobs_db,
            JobInput {
                chat_id: 5,
                thread_id: None,
                schedule_kind: ScheduleKind::At,
                schedule_spec: (now - 1000).to_string(),
                job_type: JobType::Script,
                payload: serde_json::json!({"path": "../../etc/passwd"}),
                context_mode: ContextMode::Isolated,
            },
            now - 2000,
            ctx.tz,
        )
        .await
        .unwrap();

        scheduler(ctx.clone()).tick().await;

        let all = jobs::list(&ctx.jobs_db).await.unwrap();
        assert!(all[0].enabled, "failed job is re-armed");
        assert_eq!(all[0].next_run_at, Some(now - 1000), "next_run_at unchanged");
        assert!(all[0].last_run_at.is_none());
    }

    #[tokio::test]
    async fn compute_sleep_is_zero_with_pending_events() {
        let transport = Arc::new(MockTransport::new());
        let (ctx, _dir) = context(transport).await;
        let now = Utc::now().timestamp_millis();

        events::add(
            &ctx.events_db,
            bob_storage::EventInput {
                chat_id: 5,
                thread_id: None,
                kind: "task_failed".into(),
                payload: serde_json::json!({}),
            },
            now,
        )
        .await
        .unwrap();

        let sleep = scheduler(ctx).compute_sleep().await;
        assert_eq!(sleep, Duration::ZERO);
    }

    #[tokio::test]
    async fn compute_sleep_tracks_next_due() {
        let transport = Arc::new(MockTransport::new());
        let (ctx, _dir) = context(transport).await;
        let now = Utc::now().timestamp_millis();

        jobs::add(&ctx.jobs_db, send_job(5, now + 10_000, false), now, ctx.tz)
            .await
            .unwrap();

        let sleep = scheduler(ctx.clone()).compute_sleep().await;
        assert!(sleep <= Duration::from_secs(10));
        assert!(sleep >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn compute_sleep_caps_at_max() {
        let transport = Arc::new(MockTransport::new());
        let (ctx, _dir) = context(transport).await;
        let sleep = scheduler(ctx).compute_sleep().await;
        assert_eq!(sleep, MAX_SLEEP);
    }
}
