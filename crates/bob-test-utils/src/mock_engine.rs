// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock engine emitting a scripted event stream.

use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream;

use bob_core::traits::engine::{EngineEvent, EngineOutcome, EngineRequest, EngineStream};
use bob_core::{BobError, EngineAdapter};

/// An engine that replays a scripted sequence of events.
///
/// By default the outcome's `final_text` is the concatenation of the
/// scripted deltas. Requests are recorded for assertions.
pub struct MockEngine {
    id: String,
    deltas: Vec<String>,
    session_token: Option<String>,
    requests: Mutex<Vec<EngineRequest>>,
}

impl MockEngine {
    /// Streams `text` split into `chunk` deltas.
    pub fn streaming(id: &str, text: &str, chunk: usize) -> Self {
        let chunk = chunk.max(1);
        let chars: Vec<char> = text.chars().collect();
        let deltas = chars
            .chunks(chunk)
            .map(|c| c.iter().collect::<String>())
            .collect();
        Self {
            id: id.to_string(),
            deltas,
            session_token: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Streams the text in a single delta.
    pub fn single(id: &str, text: &str) -> Self {
        Self::streaming(id, text, text.chars().count().max(1))
    }

    /// Attach a session token to the outcome.
    pub fn with_session_token(mut self, token: &str) -> Self {
        self.session_token = Some(token.to_string());
        self
    }

    /// Requests seen so far.
    pub fn requests(&self) -> Vec<EngineRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl EngineAdapter for MockEngine {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, request: EngineRequest) -> Result<EngineStream, BobError> {
        self.requests.lock().unwrap().push(request);

        let final_text: String = self.deltas.concat();
        let mut events: Vec<Result<EngineEvent, BobError>> = self
            .deltas
            .iter()
            .cloned()
            .map(|d| Ok(EngineEvent::Delta(d)))
            .collect();
        events.push(Ok(EngineEvent::Completed(EngineOutcome {
            final_text,
            actions: Vec::new(),
            session_token: self.session_token.clone(),
        })));

        Ok(Box::pin(stream::iter(events)))
    }
}
