// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The fixed filesystem layout under the bob root.
//!
//! ```text
//! <root>/config.toml
//! <root>/sessions.json
//! <root>/data/{jobs,events,messages,bob}.db
//! <root>/data/{scheduler.pid,telegram-offset.json,dnd-state.json,last_exit.json}
//! <root>/memory/{USER.md,MEMORY.md,HEARTBEAT.md,journal/,conversations/}
//! <root>/scripts/
//! ```

use std::path::{Path, PathBuf};

/// Resolver for all well-known files under the bob root.
#[derive(Debug, Clone)]
pub struct BobPaths {
    root: PathBuf,
}

impl BobPaths {
    /// Rooted at an explicit directory (tests, `BOB_ROOT`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Default root: `$BOB_ROOT` if set, otherwise `~/.bob`.
    pub fn resolve() -> Self {
        if let Ok(root) = std::env::var("BOB_ROOT") {
            return Self::new(root);
        }
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::new(home.join(".bob"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    pub fn sessions_file(&self) -> PathBuf {
        self.root.join("sessions.json")
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    pub fn jobs_db(&self) -> PathBuf {
        self.data_dir().join("jobs.db")
    }

    pub fn events_db(&self) -> PathBuf {
        self.data_dir().join("events.db")
    }

    pub fn messages_db(&self) -> PathBuf {
        self.data_dir().join("messages.db")
    }

    pub fn recall_db(&self) -> PathBuf {
        self.data_dir().join("bob.db")
    }

    pub fn scheduler_pid(&self) -> PathBuf {
        self.data_dir().join("scheduler.pid")
    }

    pub fn telegram_offset(&self) -> PathBuf {
        self.data_dir().join("telegram-offset.json")
    }

    pub fn dnd_state(&self) -> PathBuf {
        self.data_dir().join("dnd-state.json")
    }

    pub fn last_exit(&self) -> PathBuf {
        self.data_dir().join("last_exit.json")
    }

    pub fn memory_dir(&self) -> PathBuf {
        self.root.join("memory")
    }

    pub fn journal_dir(&self) -> PathBuf {
        self.memory_dir().join("journal")
    }

    pub fn conversations_dir(&self) -> PathBuf {
        self.memory_dir().join("conversations")
    }

    pub fn scripts_dir(&self) -> PathBuf {
        self.root.join("scripts")
    }

    /// Create the directories the daemon writes into.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.data_dir())?;
        std::fs::create_dir_all(self.memory_dir())?;
        std::fs::create_dir_all(self.journal_dir())?;
        std::fs::create_dir_all(self.conversations_dir())?;
        Ok(())
    }
}
