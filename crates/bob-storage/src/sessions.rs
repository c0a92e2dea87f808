// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-chat session document.
//!
//! A single versioned JSON file holds every chat's engine resume tokens,
//! project/branch bindings, and default engine. Whole-file rewrite via
//! temp-file + rename keeps it crash-safe; a version mismatch or a working
//! directory change drops content rather than migrating it.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::info;

use bob_core::BobError;

use crate::statefile;

/// Bumped whenever the document shape changes; old documents are dropped.
const SESSIONS_VERSION: u32 = 1;

/// Resume token for one `(chat, engine)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSession {
    pub resume_token: String,
    pub updated_at: i64,
}

/// Project/branch binding for a chat.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

/// Per-chat session state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatSessions {
    #[serde(default)]
    pub sessions_by_engine: HashMap<String, EngineSession>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ChatContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_engine: Option<String>,
}

/// The whole document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDocument {
    pub version: u32,
    /// Working directory the tokens were created under. A change
    /// invalidates every resume token.
    pub cwd: String,
    #[serde(default)]
    pub chats: HashMap<String, ChatSessions>,
}

impl SessionDocument {
    fn empty(cwd: String) -> Self {
        Self {
            version: SESSIONS_VERSION,
            cwd,
            chats: HashMap::new(),
        }
    }
}

/// Loads, mutates, and atomically persists the session document.
pub struct SessionStore {
    path: PathBuf,
    cwd: String,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>, cwd: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            cwd: cwd.into(),
        }
    }

    /// Load the document, dropping content on version mismatch and clearing
    /// resume tokens when the working directory changed.
    pub fn load(&self) -> SessionDocument {
        let Some(mut doc) = statefile::read_json::<SessionDocument>(&self.path) else {
            return SessionDocument::empty(self.cwd.clone());
        };

        if doc.version != SESSIONS_VERSION {
            info!(
                found = doc.version,
                expected = SESSIONS_VERSION,
                "session document version mismatch, dropping content"
            );
            return SessionDocument::empty(self.cwd.clone());
        }

        if doc.cwd != self.cwd {
            info!(
                old = doc.cwd.as_str(),
                new = self.cwd.as_str(),
                "working directory changed, invalidating resume tokens"
            );
            for chat in doc.chats.values_mut() {
                chat.sessions_by_engine.clear();
            }
            doc.cwd = self.cwd.clone();
        }

        doc
    }

    /// Atomically persist the document.
    pub fn save(&self, doc: &SessionDocument) -> Result<(), BobError> {
        statefile::write_json_atomic(&self.path, doc)
    }

    /// The resume token for `(chat, engine)`, if one is stored.
    pub fn resume_token(&self, chat_id: i64, engine: &str) -> Option<String> {
        let doc = self.load();
        doc.chats
            .get(&chat_id.to_string())?
            .sessions_by_engine
            .get(engine)
            .map(|s| s.resume_token.clone())
    }

    /// Store (or replace) the resume token for `(chat, engine)`.
    ///
    /// At most one token exists per pair; storing overwrites.
    pub fn set_resume_token(
        &self,
        chat_id: i64,
        engine: &str,
        token: &str,
        now_ms: i64,
    ) -> Result<(), BobError> {
        let mut doc = self.load();
        let chat = doc.chats.entry(chat_id.to_string()).or_default();
        chat.sessions_by_engine.insert(
            engine.to_string(),
            EngineSession {
                resume_token: token.to_string(),
                updated_at: now_ms,
            },
        );
        self.save(&doc)
    }

    /// The chat's engine override, if set.
    pub fn default_engine(&self, chat_id: i64) -> Option<String> {
        self.load()
            .chats
            .get(&chat_id.to_string())?
            .default_engine
            .clone()
    }

    /// Set or clear the chat's engine override.
    pub fn set_default_engine(
        &self,
        chat_id: i64,
        engine: Option<&str>,
    ) -> Result<(), BobError> {
        let mut doc = self.load();
        let chat = doc.chats.entry(chat_id.to_string()).or_default();
        chat.default_engine = engine.map(str::to_string);
        self.save(&doc)
    }

    /// The chat's project/branch binding.
    pub fn context(&self, chat_id: i64) -> Option<ChatContext> {
        self.load().chats.get(&chat_id.to_string())?.context.clone()
    }

    /// Update the chat's project/branch binding.
    pub fn set_context(&self, chat_id: i64, context: ChatContext) -> Result<(), BobError> {
        let mut doc = self.load();
        let chat = doc.chats.entry(chat_id.to_string()).or_default();
        chat.context = Some(context);
        self.save(&doc)
    }
}
