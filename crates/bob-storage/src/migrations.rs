// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedded database migrations using refinery.
//!
//! Each database file carries its own migration set, compiled into the
//! binary at build time via `embed_migrations!`. Refinery tracks applied
//! migrations in its own `refinery_schema_history` table per file.

use bob_core::BobError;

mod jobs {
    use refinery::embed_migrations;
    embed_migrations!("migrations/jobs");
}

mod events {
    use refinery::embed_migrations;
    embed_migrations!("migrations/events");
}

mod messages {
    use refinery::embed_migrations;
    embed_migrations!("migrations/messages");
}

mod recall {
    use refinery::embed_migrations;
    embed_migrations!("migrations/recall");
}

/// Which logical store a database file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Jobs,
    Events,
    Messages,
    Recall,
}

/// Run all pending migrations for the given store against the connection.
pub fn run_migrations(
    conn: &mut rusqlite::Connection,
    kind: StoreKind,
) -> Result<(), BobError> {
    let result = match kind {
        StoreKind::Jobs => jobs::migrations::runner().run(conn),
        StoreKind::Events => events::migrations::runner().run(conn),
        StoreKind::Messages => messages::migrations::runner().run(conn),
        StoreKind::Recall => recall::migrations::runner().run(conn),
    };
    result.map_err(|e| BobError::Storage {
        source: Box::new(e),
    })?;
    Ok(())
}
