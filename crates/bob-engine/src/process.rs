// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared subprocess JSONL streaming driver.

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use bob_core::traits::engine::{EngineEvent, EngineOutcome, EngineStream};
use bob_core::BobError;

/// Per-engine JSONL dialect: maps lines to events and produces the
/// terminal outcome at end of stream.
pub(crate) trait LineParser: Send + 'static {
    fn on_line(&mut self, line: &str) -> Vec<EngineEvent>;
    fn finish(self: Box<Self>) -> EngineOutcome;
}

/// Spawns the command and drives its stdout through the parser.
///
/// The returned stream yields parsed events and a terminal
/// [`EngineEvent::Completed`]. A non-zero exit with no parsed output
/// surfaces as a stream error carrying captured stderr.
pub(crate) async fn stream_jsonl(
    mut command: Command,
    parser: Box<dyn LineParser>,
) -> Result<EngineStream, BobError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn().map_err(|e| BobError::Engine {
        message: format!("failed to spawn engine process: {e}"),
        source: Some(Box::new(e)),
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| BobError::engine("engine process has no stdout"))?;
    let stderr = child.stderr.take();

    let (tx, rx) = mpsc::channel::<Result<EngineEvent, BobError>>(64);

    tokio::spawn(async move {
        let mut parser = parser;
        let mut lines = BufReader::new(stdout).lines();
        let mut saw_output = false;

        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            for event in parser.on_line(line) {
                saw_output = true;
                if tx.send(Ok(event)).await.is_err() {
                    // Receiver dropped (cancelled reply); reap the child.
                    let _ = child.kill().await;
                    return;
                }
            }
        }

        let status = child.wait().await;
        let stderr_text = match stderr {
            Some(stderr) => {
                let mut buf = String::new();
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    buf.push_str(&line);
                    buf.push('\n');
                }
                buf
            }
            None => String::new(),
        };

        match status {
            Ok(status) if status.success() || saw_output => {
                if !status.success() {
                    warn!(code = status.code(), "engine exited non-zero after output");
                }
                let _ = tx.send(Ok(EngineEvent::Completed(parser.finish()))).await;
            }
            Ok(status) => {
                let detail = stderr_text.chars().take(500).collect::<String>();
                let _ = tx
                    .send(Err(BobError::engine(format!(
                        "engine exited with {status}: {detail}"
                    ))))
                    .await;
            }
            Err(e) => {
                debug!(error = %e, "engine wait failed");
                let _ = tx
                    .send(Err(BobError::Engine {
                        message: format!("engine wait failed: {e}"),
                        source: Some(Box::new(e)),
                    }))
                    .await;
            }
        }
    });

    Ok(Box::pin(ReceiverStream::new(rx)))
}
