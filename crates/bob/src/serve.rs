// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `bob serve`: the always-on daemon.
//!
//! Wires the transport reader, the scheduler loop, and inbound handling
//! over the shared stores, with crash-marker bookkeeping and graceful
//! shutdown on SIGINT/SIGTERM.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use chrono_tz::Tz;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use bob_config::{load_config, BobPaths};
use bob_core::{BobError, EngineAdapter};
use bob_engine::{engine_for, known_engines};
use bob_recall::{Embedder, RecallIndexer, RecallStore, UnavailableEmbedder};
use bob_schedule::DndWindow;
use bob_scheduler::dnd_gate::DndGate;
use bob_scheduler::{wake, Scheduler, SchedulerContext};
use bob_storage::migrations::StoreKind;
use bob_storage::{Database, SessionStore};
use bob_telegram::updates::register_commands;
use bob_telegram::{TelegramTransport, UpdatePoller};

use crate::{crash, inbound};

/// Runs the daemon until a shutdown signal arrives.
pub async fn run_serve(paths: BobPaths) -> Result<(), BobError> {
    init_tracing("info");
    info!(root = %paths.root().display(), "starting bob serve");

    let config = load_config(&paths).map_err(|e| BobError::Config(e.to_string()))?;

    // Startup invariants: no token, no daemon. Never defaulted.
    let token = config
        .telegram
        .token
        .clone()
        .ok_or_else(|| BobError::Config("telegram.token is required to serve".into()))?;
    if config.telegram.allowlist.is_empty() {
        warn!("telegram.allowlist is empty: every inbound message will be rejected");
    }

    let tz: Tz = config
        .timezone
        .parse()
        .map_err(|_| BobError::Config(format!("invalid timezone: {}", config.timezone)))?;

    paths.ensure_dirs().map_err(|e| BobError::Storage {
        source: Box::new(e),
    })?;

    let jobs_db = Database::open(paths.jobs_db(), StoreKind::Jobs).await?;
    let events_db = Database::open(paths.events_db(), StoreKind::Events).await?;
    let messages_db = Database::open(paths.messages_db(), StoreKind::Messages).await?;

    let cwd = std::env::current_dir()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    let sessions = Arc::new(SessionStore::new(paths.sessions_file(), cwd));

    // Report a prior crash and arm the dirty marker for this run.
    crash::startup_check(
        &events_db,
        &paths,
        &config.telegram.allowlist,
        Utc::now().timestamp_millis(),
    )
    .await?;

    let transport = Arc::new(TelegramTransport::new(&token)?);
    if let Err(e) = register_commands(transport.bot()).await {
        warn!(error = %e, "command registration failed, continuing");
    }

    let mut engines: HashMap<String, Arc<dyn EngineAdapter>> = HashMap::new();
    for id in known_engines() {
        engines.insert((*id).to_string(), engine_for(id, &config.engines)?);
    }

    let dnd = DndGate::new(
        DndWindow::new(config.dnd.enabled, &config.dnd.start, &config.dnd.end, tz)?,
        paths.dnd_state(),
    );

    let allowlist = config.telegram.allowlist.clone();
    let ctx = Arc::new(SchedulerContext {
        config,
        paths: paths.clone(),
        tz,
        jobs_db,
        events_db,
        messages_db,
        sessions,
        transport: transport.clone(),
        engines,
        dnd,
    });

    let cancel = install_signal_handler();

    // Index the recall corpus in the background; the daemon serves either way.
    spawn_recall_index(&paths);

    let wake_rx = wake::spawn_wake_sources(&paths.jobs_db(), cancel.clone());
    let scheduler_task = tokio::spawn(
        Scheduler::new(ctx.clone(), wake_rx, cancel.clone()).run(),
    );

    let (inbound_tx, mut inbound_rx) = mpsc::channel(100);
    let poller = UpdatePoller::new(
        transport.bot().clone(),
        paths.telegram_offset(),
        allowlist,
        paths.data_dir().join("images"),
    );
    let poller_task = tokio::spawn(poller.run(inbound_tx, cancel.clone()));

    // Inbound messages are handled sequentially: per-chat ordering comes
    // for free and engine runs never race each other.
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = inbound_rx.recv() => {
                match received {
                    Some(msg) => {
                        if let Err(e) = inbound::handle(&ctx, msg).await {
                            error!(error = %e, "inbound handling failed");
                        }
                    }
                    None => break,
                }
            }
        }
    }

    info!("shutting down");
    let _ = scheduler_task.await;
    let _ = poller_task.await;

    crash::mark_clean_exit(&paths, Utc::now().timestamp_millis());
    info!("bob serve shutdown complete");
    Ok(())
}

/// Installs SIGINT/SIGTERM handlers, returning the token they cancel.
pub fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "failed to install SIGTERM handler");
                    let _ = ctrl_c.await;
                    token_clone.cancel();
                    return;
                }
            };

            tokio::select! {
                _ = ctrl_c => info!("received SIGINT, initiating shutdown"),
                _ = sigterm.recv() => info!("received SIGTERM, initiating shutdown"),
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("received Ctrl+C, initiating shutdown");
        }

        token_clone.cancel();
    });

    token
}

/// Background recall pass at startup.
fn spawn_recall_index(paths: &BobPaths) {
    let recall_db = paths.recall_db();
    let memory_dir = paths.memory_dir();
    let embedder = load_embedder(paths);

    tokio::spawn(async move {
        let store = match RecallStore::open(&recall_db).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                warn!(error = %e, "recall store unavailable, skipping index");
                return;
            }
        };
        let indexer = RecallIndexer::new(store, embedder, memory_dir);
        match indexer.index_all(Utc::now().timestamp_millis()).await {
            Ok(report) => info!(
                indexed = report.sources_indexed,
                skipped = report.sources_skipped,
                embedded = report.chunks_embedded,
                "recall index pass complete"
            ),
            Err(e) => warn!(error = %e, "recall index pass failed"),
        }
    });
}

/// Loads the ONNX embedder when the model files are on disk; degrades to
/// lexical-only recall otherwise.
pub fn load_embedder(paths: &BobPaths) -> Arc<dyn Embedder> {
    let model_path = paths.root().join("models/model.onnx");

    #[cfg(feature = "onnx")]
    if model_path.exists() {
        match bob_recall::OnnxEmbedder::new(&model_path) {
            Ok(embedder) => return Arc::new(embedder),
            Err(e) => warn!(error = %e, "embedding model failed to load"),
        }
    }

    debug!(path = %model_path.display(), "no embedding model, recall is lexical-only");
    Arc::new(UnavailableEmbedder)
}

/// Initializes the tracing subscriber.
pub fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("bob={log_level},warn")));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .try_init();
}
