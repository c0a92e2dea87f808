// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Streaming reply delivery.
//!
//! [`ReplyStream`] projects an engine's token stream into chat-visible
//! messages: it accumulates deltas, parses in-band directives, and flushes
//! through an `edit | append | silent` state machine with throttling,
//! paragraph-boundary chunking, and entity rendering. Flushes are
//! serialized by a single in-progress flag plus a coalescing pending bit;
//! consecutive flushes never send the same visible content twice.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use bob_core::traits::engine::{EngineEvent, EngineStream};
use bob_core::types::{ChatRef, EngineAction, OutgoingMessage, TextEntity};
use bob_core::{BobError, ChatTransport};

use crate::directives::{self, Directive, ParsedOutput, StreamMode};
use crate::entities;

/// Split target for outgoing messages, under the transport's 4096 cap to
/// leave margin for continuation markers.
const CHUNK_CHARS: usize = 3500;

/// Default debounce between non-final flushes.
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(900);

/// Typing indicator refresh period.
const TYPING_PERIOD: Duration = Duration::from_secs(4);

/// Per-reply configuration.
#[derive(Clone)]
pub struct ReplyOptions {
    pub chat: ChatRef,
    /// The inbound message that triggered this reply, for reactions and
    /// `[[reply_to_current]]`.
    pub initiator_message_id: Option<i64>,
    /// Sentinels that suppress visible output when they are the whole
    /// response (`HEARTBEAT_OK`, `NO_REPLY`).
    pub silent_tokens: Vec<String>,
    /// Reaction used on a silent final flush. `None` skips the reaction.
    pub ack_reaction: Option<String>,
    pub flush_interval: Duration,
    /// Cooperative cancellation: once cancelled, no further sends happen.
    pub cancel: CancellationToken,
}

impl ReplyOptions {
    pub fn new(chat: ChatRef) -> Self {
        Self {
            chat,
            initiator_message_id: None,
            silent_tokens: Vec::new(),
            ack_reaction: None,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_initiator(mut self, message_id: i64) -> Self {
        self.initiator_message_id = Some(message_id);
        self
    }

    pub fn with_silent_tokens<I: IntoIterator<Item = S>, S: Into<String>>(
        mut self,
        tokens: I,
    ) -> Self {
        self.silent_tokens = tokens.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_ack_reaction(mut self, emoji: &str) -> Self {
        self.ack_reaction = Some(emoji.to_string());
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// What a finished reply did.
#[derive(Debug, Clone, Default)]
pub struct ReplyOutcome {
    pub did_send: bool,
    pub did_react: bool,
    /// The final cleaned text, trimmed. Empty for silent replies.
    pub response_text: String,
    pub actions: Vec<EngineAction>,
    pub session_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Edit,
    Append,
    Silent,
}

/// Drives one engine run to the chat.
pub struct ReplyStream {
    transport: Arc<dyn ChatTransport>,
    opts: ReplyOptions,

    buffer: String,
    mode: Mode,
    sent_message_id: Option<i64>,
    last_sent_text: String,
    last_rendered_text: String,
    last_flush: Option<Instant>,
    reply_to: Option<i64>,
    pending_reaction: Option<String>,

    flush_in_progress: bool,
    pending_flush: bool,
    did_trigger_send: bool,
    did_send: bool,
    did_react: bool,

    typing_cancel: CancellationToken,
    typing_task: Option<JoinHandle<()>>,
}

impl ReplyStream {
    pub fn new(transport: Arc<dyn ChatTransport>, opts: ReplyOptions) -> Self {
        Self {
            transport,
            opts,
            buffer: String::new(),
            mode: Mode::Edit,
            sent_message_id: None,
            last_sent_text: String::new(),
            last_rendered_text: String::new(),
            last_flush: None,
            reply_to: None,
            pending_reaction: None,
            flush_in_progress: false,
            pending_flush: false,
            did_trigger_send: false,
            did_send: false,
            did_react: false,
            typing_cancel: CancellationToken::new(),
            typing_task: None,
        }
    }

    /// Consumes the engine stream, flushing as deltas arrive, and returns
    /// the reply outcome.
    ///
    /// A mid-stream engine error is logged and the text received so far is
    /// finalized rather than discarded.
    pub async fn run(mut self, mut stream: EngineStream) -> Result<ReplyOutcome, BobError> {
        let mut actions: Vec<EngineAction> = Vec::new();
        let mut session_token: Option<String> = None;

        while let Some(event) = stream.next().await {
            match event {
                Ok(EngineEvent::Delta(delta)) => {
                    self.buffer.push_str(&delta);
                    self.on_delta().await;
                }
                Ok(EngineEvent::Action(action)) => {
                    actions.push(action);
                }
                Ok(EngineEvent::Completed(outcome)) => {
                    if !outcome.final_text.is_empty() {
                        self.buffer = outcome.final_text;
                    }
                    actions.extend(outcome.actions);
                    session_token = outcome.session_token;
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "engine stream error, finalizing partial reply");
                    break;
                }
            }
        }

        let response_text = self.finalize().await;

        Ok(ReplyOutcome {
            did_send: self.did_send,
            did_react: self.did_react,
            response_text,
            actions,
            session_token,
        })
    }

    async fn on_delta(&mut self) {
        if self.opts.cancel.is_cancelled() {
            return;
        }

        // First visible, non-silent text starts the typing indicator.
        let parsed = self.parse_buffer();
        self.apply_directives(&parsed);
        if !self.did_trigger_send
            && self.mode != Mode::Silent
            && !parsed.silent
            && !directives::sanitize(&parsed.text).trim().is_empty()
        {
            self.did_trigger_send = true;
            self.start_typing();
        }

        self.flush(false).await;
    }

    async fn finalize(&mut self) -> String {
        self.flush(true).await;
        if self.mode != Mode::Silent {
            self.deliver_pending_reaction().await;
        }
        self.stop_typing().await;

        let parsed = self.parse_buffer();
        if parsed.silent {
            return String::new();
        }
        directives::sanitize(&parsed.text).trim().to_string()
    }

    /// A `[[react: …]]` directive on a visible reply still reacts to the
    /// initiator. Best-effort, no text fallback.
    async fn deliver_pending_reaction(&mut self) {
        if self.did_react {
            return;
        }
        let (Some(emoji), Some(initiator)) =
            (self.pending_reaction.take(), self.opts.initiator_message_id)
        else {
            return;
        };
        match self
            .transport
            .send_reaction(self.opts.chat, initiator, &emoji)
            .await
        {
            Ok(()) => self.did_react = true,
            Err(e) => debug!(error = %e, "reaction failed"),
        }
    }

    fn parse_buffer(&self) -> ParsedOutput {
        directives::parse_directives(&self.buffer, &self.opts.silent_tokens)
    }

    fn apply_directives(&mut self, parsed: &ParsedOutput) {
        for directive in &parsed.directives {
            match directive {
                Directive::React(emoji) => {
                    self.pending_reaction = Some(emoji.clone());
                }
                Directive::Stream(StreamMode::Edit) => {
                    if self.mode != Mode::Edit {
                        self.mode = Mode::Edit;
                    }
                }
                Directive::Stream(StreamMode::Append) => {
                    self.mode = Mode::Append;
                }
                Directive::Stream(StreamMode::Off) => {
                    self.mode = Mode::Silent;
                }
                Directive::ReplyTo(id) => {
                    self.reply_to = Some(*id);
                }
                Directive::ReplyToCurrent => {
                    self.reply_to = self.opts.initiator_message_id;
                }
            }
        }
        if parsed.silent {
            self.mode = Mode::Silent;
        }
    }

    /// One flush pass. Serialized: a reentrant call only sets the pending
    /// bit, and the in-progress pass loops while the bit is set.
    async fn flush(&mut self, is_final: bool) {
        if self.flush_in_progress {
            self.pending_flush = true;
            return;
        }
        self.flush_in_progress = true;
        loop {
            self.pending_flush = false;
            self.flush_once(is_final).await;
            if !self.pending_flush {
                break;
            }
        }
        self.flush_in_progress = false;
    }

    async fn flush_once(&mut self, is_final: bool) {
        if self.opts.cancel.is_cancelled() {
            return;
        }

        let parsed = self.parse_buffer();
        self.apply_directives(&parsed);

        if self.mode == Mode::Silent {
            if is_final {
                self.react_silently().await;
            }
            return;
        }

        let sanitized = directives::sanitize(&parsed.text);
        let visible = if is_final {
            sanitized.trim()
        } else {
            directives::trim_partial_marker(&sanitized).trim_end()
        };
        if visible.trim().is_empty() {
            return;
        }

        // Non-final throttling.
        if !is_final {
            if let Some(last) = self.last_flush {
                if last.elapsed() < self.opts.flush_interval {
                    return;
                }
            }
        }

        match self.mode {
            Mode::Append => self.flush_append(visible).await,
            Mode::Edit => self.flush_edit(visible, is_final).await,
            Mode::Silent => {}
        }
        self.last_flush = Some(Instant::now());
    }

    /// Append mode: each flush sends only the delta since the last send.
    async fn flush_append(&mut self, visible: &str) {
        let delta = match visible.strip_prefix(self.last_sent_text.as_str()) {
            Some(rest) => rest,
            // The cleaned text no longer extends what was sent (a directive
            // rewrote earlier output); fall back to the whole text.
            None => visible,
        };
        if delta.trim().is_empty() {
            return;
        }

        let msg = OutgoingMessage {
            chat: self.opts.chat,
            text: delta.trim().to_string(),
            entities: Vec::new(),
            reply_to: self.take_reply_to(),
        };
        match self.transport.send_message(msg).await {
            Ok(id) => {
                if self.sent_message_id.is_none() {
                    self.sent_message_id = Some(id);
                }
                self.last_sent_text = visible.to_string();
                self.did_send = true;
            }
            Err(e) => {
                warn!(error = %e, "append send failed");
            }
        }
    }

    /// Edit mode: render, chunk, then send-or-edit the first chunk; on the
    /// final flush, deliver the remaining chunks as fresh messages.
    async fn flush_edit(&mut self, visible: &str, is_final: bool) {
        let (rendered, rendered_entities) = entities::render_markdown(visible);
        let chunks = entities::split_chunks(&rendered, &rendered_entities, CHUNK_CHARS);
        let Some((first_text, first_entities)) = chunks.first() else {
            return;
        };

        // Content unchanged: nothing to do. This short-circuit, together
        // with the "not modified" swallow below, keeps the no-duplicate
        // invariant.
        if *first_text == self.last_rendered_text {
            if is_final && chunks.len() > 1 {
                self.send_remaining_chunks(&chunks[1..]).await;
            }
            return;
        }

        match self.sent_message_id {
            None => {
                let msg = OutgoingMessage {
                    chat: self.opts.chat,
                    text: first_text.clone(),
                    entities: first_entities.clone(),
                    reply_to: self.take_reply_to(),
                };
                match self.send_with_entity_fallback(msg).await {
                    Ok(id) => {
                        self.sent_message_id = Some(id);
                        self.last_rendered_text = first_text.clone();
                        self.did_send = true;
                    }
                    Err(e) => {
                        warn!(error = %e, "initial send failed");
                        return;
                    }
                }
            }
            Some(message_id) => {
                match self
                    .edit_with_entity_fallback(message_id, first_text, first_entities)
                    .await
                {
                    Ok(()) => {
                        self.last_rendered_text = first_text.clone();
                        self.did_send = true;
                    }
                    Err(e) if e.is_not_modified() => {
                        debug!("edit was a no-op, content already on screen");
                        self.last_rendered_text = first_text.clone();
                    }
                    Err(e) => {
                        // Any other edit failure: promote to append mode and
                        // deliver the content as a fresh message.
                        warn!(error = %e, "edit failed, promoting to append mode");
                        self.mode = Mode::Append;
                        self.last_sent_text.clear();
                        self.flush_append(first_text).await;
                        return;
                    }
                }
            }
        }

        if is_final && chunks.len() > 1 {
            self.send_remaining_chunks(&chunks[1..]).await;
        }
    }

    async fn send_remaining_chunks(&mut self, chunks: &[(String, Vec<TextEntity>)]) {
        for (text, chunk_entities) in chunks {
            let msg = OutgoingMessage {
                chat: self.opts.chat,
                text: text.clone(),
                entities: chunk_entities.clone(),
                reply_to: None,
            };
            if let Err(e) = self.send_with_entity_fallback(msg).await {
                warn!(error = %e, "chunk send failed");
                return;
            }
            self.did_send = true;
        }
    }

    /// Final flush of a silent reply: a single reaction on the initiator,
    /// falling back to an emoji text message when the reaction API fails.
    async fn react_silently(&mut self) {
        if self.did_react || self.did_send {
            return;
        }
        let emoji = match self
            .pending_reaction
            .take()
            .or_else(|| self.opts.ack_reaction.clone())
        {
            Some(e) => e,
            None => return,
        };
        let Some(initiator) = self.opts.initiator_message_id else {
            return;
        };

        match self
            .transport
            .send_reaction(self.opts.chat, initiator, &emoji)
            .await
        {
            Ok(()) => {
                self.did_react = true;
            }
            Err(e) => {
                debug!(error = %e, "reaction failed, falling back to text");
                let msg = OutgoingMessage::plain(self.opts.chat, emoji);
                if self.transport.send_message(msg).await.is_ok() {
                    self.did_react = true;
                    self.did_send = true;
                }
            }
        }
    }

    async fn send_with_entity_fallback(&self, msg: OutgoingMessage) -> Result<i64, BobError> {
        let plain = OutgoingMessage {
            entities: Vec::new(),
            ..msg.clone()
        };
        match self.transport.send_message(msg).await {
            Err(e) if e.is_entity_rejection() => {
                debug!("entity rejection on send, retrying as plain text");
                self.transport.send_message(plain).await
            }
            other => other,
        }
    }

    async fn edit_with_entity_fallback(
        &self,
        message_id: i64,
        text: &str,
        text_entities: &[TextEntity],
    ) -> Result<(), BobError> {
        match self
            .transport
            .edit_message(self.opts.chat, message_id, text, text_entities)
            .await
        {
            Err(e) if e.is_entity_rejection() => {
                debug!("entity rejection on edit, retrying as plain text");
                self.transport
                    .edit_message(self.opts.chat, message_id, text, &[])
                    .await
            }
            other => other,
        }
    }

    fn take_reply_to(&mut self) -> Option<i64> {
        // Only the first outgoing message is threaded.
        if self.sent_message_id.is_none() {
            self.reply_to.take()
        } else {
            None
        }
    }

    fn start_typing(&mut self) {
        let transport = self.transport.clone();
        let chat = self.opts.chat;
        let cancel = self.typing_cancel.clone();
        self.typing_task = Some(tokio::spawn(async move {
            loop {
                if let Err(e) = transport.send_typing(chat).await {
                    debug!(error = %e, "typing indicator failed");
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(TYPING_PERIOD) => {}
                }
            }
        }));
    }

    async fn stop_typing(&mut self) {
        self.typing_cancel.cancel();
        if let Some(task) = self.typing_task.take() {
            let _ = task.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bob_test_utils::{MockEngine, MockTransport, TransportCall};
    use bob_core::EngineAdapter;

    fn chat() -> ChatRef {
        ChatRef::new(42, None)
    }

    fn opts() -> ReplyOptions {
        ReplyOptions::new(chat()).with_flush_interval(Duration::from_millis(0))
    }

    async fn run_reply(
        transport: &Arc<MockTransport>,
        engine: MockEngine,
        opts: ReplyOptions,
    ) -> ReplyOutcome {
        let stream = engine
            .run(bob_core::EngineRequest::default())
            .await
            .unwrap();
        let reply = ReplyStream::new(transport.clone() as Arc<dyn ChatTransport>, opts);
        reply.run(stream).await.unwrap()
    }

    #[tokio::test]
    async fn edit_mode_sends_then_edits() {
        let transport = Arc::new(MockTransport::new());
        let engine = MockEngine::streaming("mock", "Hello there, world!", 6);

        let outcome = run_reply(&transport, engine, opts()).await;
        assert!(outcome.did_send);
        assert_eq!(outcome.response_text, "Hello there, world!");

        let calls = transport.calls();
        // Exactly one Send; all later flushes are edits of that message.
        let sends = calls
            .iter()
            .filter(|c| matches!(c, TransportCall::Send { .. }))
            .count();
        assert_eq!(sends, 1);
        // Final visible state is the full text.
        let visible = transport.visible_texts();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].1, "Hello there, world!");
    }

    #[tokio::test]
    async fn no_duplicate_visible_content() {
        let transport = Arc::new(MockTransport::new());
        let engine = MockEngine::streaming("mock", "abcdefghij", 2);
        run_reply(&transport, engine, opts()).await;

        // Every send/edit must change the visible state: no two consecutive
        // calls may carry the same text.
        let mut previous: Option<String> = None;
        for call in transport.calls() {
            let text = match call {
                TransportCall::Send { text, .. } | TransportCall::Edit { text, .. } => text,
                _ => continue,
            };
            assert_ne!(previous.as_deref(), Some(text.as_str()));
            previous = Some(text);
        }
    }

    #[tokio::test]
    async fn silent_token_suppresses_output_and_reacts() {
        let transport = Arc::new(MockTransport::new());
        let engine = MockEngine::single("mock", "HEARTBEAT_OK");
        let opts = opts()
            .with_silent_tokens(["HEARTBEAT_OK", "NO_REPLY"])
            .with_initiator(777)
            .with_ack_reaction("👍");

        let outcome = run_reply(&transport, engine, opts).await;
        assert!(!outcome.did_send);
        assert!(outcome.did_react);
        assert!(outcome.response_text.is_empty());

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert!(matches!(
            &calls[0],
            TransportCall::React { message_id: 777, emoji, .. } if emoji == "👍"
        ));
    }

    #[tokio::test]
    async fn silent_reaction_falls_back_to_text() {
        let transport = Arc::new(MockTransport::new());
        transport.push_reaction_failure(Some("reactions unavailable"));
        let engine = MockEngine::single("mock", "NO_REPLY");
        let opts = opts()
            .with_silent_tokens(["NO_REPLY"])
            .with_initiator(777)
            .with_ack_reaction("👌");

        let outcome = run_reply(&transport, engine, opts).await;
        assert!(outcome.did_react);
        assert_eq!(transport.sent_texts(), vec!["👌"]);
    }

    #[tokio::test]
    async fn react_directive_is_stripped_and_delivered() {
        let transport = Arc::new(MockTransport::new());
        let engine = MockEngine::single("mock", "Deployed. [[react: 🚀]]NO_REPLY");
        let opts = opts().with_silent_tokens(["NO_REPLY"]).with_initiator(5);

        // "Deployed. …NO_REPLY" is not silent (extra text), so this is a
        // visible reply; the directive must not leak into it, and the
        // reaction still lands on the initiator.
        let outcome = run_reply(&transport, engine, opts).await;
        assert!(outcome.did_send);
        assert!(outcome.did_react);
        assert_eq!(outcome.response_text, "Deployed. NO_REPLY");
        assert!(transport.calls().iter().any(|c| matches!(
            c,
            TransportCall::React { message_id: 5, emoji, .. } if emoji == "🚀"
        )));
    }

    #[tokio::test]
    async fn append_mode_sends_deltas_as_new_messages() {
        let transport = Arc::new(MockTransport::new());
        let engine = MockEngine::streaming("mock", "[[stream: append]]one two three", 11);

        let outcome = run_reply(&transport, engine, opts()).await;
        assert!(outcome.did_send);
        let calls = transport.calls();
        assert!(calls
            .iter()
            .all(|c| !matches!(c, TransportCall::Edit { .. })));
        // The concatenation of sends reproduces the text.
        let combined = transport.sent_texts().join(" ");
        assert!(combined.contains("three"));
    }

    #[tokio::test]
    async fn stream_off_is_fully_silent() {
        let transport = Arc::new(MockTransport::new());
        let engine = MockEngine::single("mock", "[[stream: off]]internal notes nobody sees");
        let outcome = run_reply(&transport, engine, opts()).await;
        assert!(!outcome.did_send);
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn reply_to_directive_threads_first_message() {
        let transport = Arc::new(MockTransport::new());
        let engine = MockEngine::single("mock", "[[reply_to: 314]]answered");
        run_reply(&transport, engine, opts()).await;

        match &transport.calls()[0] {
            TransportCall::Send { reply_to, .. } => assert_eq!(*reply_to, Some(314)),
            other => panic!("expected Send, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn reply_to_current_uses_initiator() {
        let transport = Arc::new(MockTransport::new());
        let engine = MockEngine::single("mock", "[[reply_to_current]]pong");
        run_reply(&transport, engine, opts().with_initiator(99)).await;

        match &transport.calls()[0] {
            TransportCall::Send { reply_to, .. } => assert_eq!(*reply_to, Some(99)),
            other => panic!("expected Send, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn not_modified_edit_error_is_swallowed() {
        let transport = Arc::new(MockTransport::new());
        // The first flush sends; make the next flush's edit report
        // "not modified".
        transport.push_edit_failure(Some("Bad Request: message is not modified"));
        let engine = MockEngine::streaming("mock", "same same", 5);

        let outcome = run_reply(&transport, engine, opts()).await;
        assert!(outcome.did_send);
        // No promotion to append: a single message remains.
        let sends = transport
            .calls()
            .iter()
            .filter(|c| matches!(c, TransportCall::Send { .. }))
            .count();
        assert_eq!(sends, 1);
    }

    #[tokio::test]
    async fn other_edit_error_promotes_to_append() {
        let transport = Arc::new(MockTransport::new());
        transport.push_edit_failure(Some("Bad Request: message to edit not found"));
        let engine = MockEngine::streaming("mock", "first part and second part", 10);

        let outcome = run_reply(&transport, engine, opts()).await;
        assert!(outcome.did_send);
        let sends = transport
            .calls()
            .iter()
            .filter(|c| matches!(c, TransportCall::Send { .. }))
            .count();
        assert!(sends >= 2, "failed edit must fall through to a fresh send");
    }

    #[tokio::test]
    async fn long_final_text_is_chunked() {
        let transport = Arc::new(MockTransport::new());
        let paragraphs: Vec<String> = (0..5)
            .map(|i| format!("paragraph {i} {}", "x".repeat(1200)))
            .collect();
        let long_text = paragraphs.join("\n\n");
        let engine = MockEngine::single("mock", &long_text);

        run_reply(&transport, engine, opts()).await;
        let sends = transport
            .calls()
            .iter()
            .filter(|c| matches!(c, TransportCall::Send { .. }))
            .count();
        assert!(sends > 1, "expected chunked delivery, got {sends} send(s)");
        for (_, text) in transport.visible_texts() {
            assert!(text.chars().count() <= CHUNK_CHARS);
        }
    }

    #[tokio::test]
    async fn entity_rejection_retries_plain() {
        let transport = Arc::new(MockTransport::new());
        transport.push_edit_failure(Some("Bad Request: can't parse entities"));
        let engine = MockEngine::streaming("mock", "some **bold** text streaming on", 8);

        let outcome = run_reply(&transport, engine, opts()).await;
        assert!(outcome.did_send);
        // The retry edits without entities instead of promoting to append.
        let edits: Vec<_> = transport
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                TransportCall::Edit { entities, .. } => Some(entities),
                _ => None,
            })
            .collect();
        assert!(edits.iter().any(|e| e.is_empty()));
    }

    #[tokio::test]
    async fn cancellation_suppresses_flushes() {
        let transport = Arc::new(MockTransport::new());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let engine = MockEngine::streaming("mock", "should never appear", 4);

        let outcome = run_reply(&transport, engine, opts().with_cancel(cancel)).await;
        assert!(!outcome.did_send);
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn markdown_renders_to_entities() {
        let transport = Arc::new(MockTransport::new());
        let engine = MockEngine::single("mock", "run `cargo test` **now**");
        let outcome = run_reply(&transport, engine, opts()).await;
        assert_eq!(outcome.response_text, "run `cargo test` **now**");

        match &transport.calls()[0] {
            TransportCall::Send { text, entities, .. } => {
                assert_eq!(text, "run cargo test now");
                assert_eq!(entities.len(), 2);
            }
            other => panic!("expected Send, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn typing_indicator_fires_for_visible_replies() {
        let transport = Arc::new(MockTransport::new());
        let engine = MockEngine::streaming("mock", "visible reply text", 6);
        run_reply(&transport, engine, opts()).await;

        assert!(transport
            .calls()
            .iter()
            .any(|c| matches!(c, TransportCall::Typing { .. })));
    }
}
