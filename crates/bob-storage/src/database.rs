// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! All writes are serialized through tokio-rusqlite's single background
//! thread. Each database file (`jobs.db`, `events.db`, `messages.db`,
//! `bob.db`) gets exactly one [`Database`]; query modules accept
//! `&Database` and call through `connection().call()`.

use std::path::Path;

use tokio_rusqlite::Connection;

use bob_core::BobError;

use crate::migrations::{self, StoreKind};

/// A single SQLite database file with its migrations applied.
#[derive(Clone)]
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens (creating if needed) the database at `path` and applies the
    /// migration set for `kind`.
    pub async fn open(path: impl AsRef<Path>, kind: StoreKind) -> Result<Self, BobError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BobError::Storage {
                source: Box::new(e),
            })?;
        }

        let conn = Connection::open(path).await.map_err(map_tr_err)?;
        Self::initialize(conn, kind).await
    }

    /// Opens an in-memory database with the migration set applied (tests).
    pub async fn open_in_memory(kind: StoreKind) -> Result<Self, BobError> {
        let conn = Connection::open_in_memory().await.map_err(map_tr_err)?;
        Self::initialize(conn, kind).await
    }

    async fn initialize(conn: Connection, kind: StoreKind) -> Result<Self, BobError> {
        conn.call(move |conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA busy_timeout = 5000;
                 PRAGMA foreign_keys = ON;",
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;

        conn.call(move |conn| Ok(migrations::run_migrations(conn, kind)))
            .await
            .map_err(map_tr_err)??;

        Ok(Self { conn })
    }

    /// The underlying serialized connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Closes the background connection thread.
    pub async fn close(self) -> Result<(), BobError> {
        self.conn
            .close()
            .await
            .map_err(|e| BobError::Storage {
                source: Box::new(e),
            })
    }
}

/// Converts a tokio-rusqlite error into [`BobError::Storage`].
pub fn map_tr_err(e: tokio_rusqlite::Error) -> BobError {
    BobError::Storage {
        source: Box::new(e),
    }
}
