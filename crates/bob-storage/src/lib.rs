// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence layer for the bob assistant daemon.
//!
//! Provides WAL-mode SQLite storage with embedded migrations, a
//! single-writer concurrency model via `tokio-rusqlite`, typed query
//! modules for jobs, events and messages, the versioned session document,
//! and atomic JSON state files.

pub mod database;
pub mod migrations;
pub mod models;
pub mod queries;
pub mod sessions;
pub mod statefile;

pub use database::Database;
pub use migrations::StoreKind;
pub use models::*;
pub use sessions::{SessionDocument, SessionStore};
