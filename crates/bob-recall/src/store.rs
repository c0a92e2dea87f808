// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Recall persistence: chunks, FTS sidecar, embeddings, source fingerprints.
//!
//! The embeddings BLOB table is authoritative. The `chunks_vec` virtual
//! table (sqlite-vec, when compiled in) is a cache rebuilt whenever its row
//! count diverges from the embeddings table, and is never JOINed with
//! `chunks` directly: the KNN lookup resolves metadata in a second
//! statement.

use rusqlite::params;

use bob_core::{BobError, BOB_ID};
use bob_storage::database::{map_tr_err, Database};
use bob_storage::migrations::StoreKind;

use crate::chunker::Chunk;
use crate::embedder::{blob_to_vec, vec_to_blob};

#[cfg(feature = "vec")]
static VEC_EXTENSION_INIT: std::sync::Once = std::sync::Once::new();

/// Registers sqlite-vec as an auto-loaded extension for every connection
/// opened afterwards. Call before [`RecallStore::open`].
#[cfg(feature = "vec")]
pub fn register_vec_extension() {
    type AutoExtensionFn = unsafe extern "C" fn(
        *mut rusqlite::ffi::sqlite3,
        *mut *mut std::os::raw::c_char,
        *const rusqlite::ffi::sqlite3_api_routines,
    ) -> std::os::raw::c_int;

    VEC_EXTENSION_INIT.call_once(|| unsafe {
        let init_fn_ptr = sqlite_vec::sqlite3_vec_init as *const ();
        let init_fn: AutoExtensionFn = std::mem::transmute(init_fn_ptr);
        rusqlite::ffi::sqlite3_auto_extension(Some(init_fn));
    });
}

/// A chunk row as stored, with its id and metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredChunk {
    pub id: i64,
    pub source: String,
    pub title: String,
    pub breadcrumbs: Vec<String>,
    pub content: String,
    pub preview: String,
    pub line_start: i64,
    pub line_end: i64,
    pub token_count: i64,
    pub created_at: i64,
}

const CHUNK_COLUMNS: &str =
    "id, source, title, breadcrumbs, content, preview, line_start, line_end, token_count, \
     created_at";

const PREVIEW_CHARS: usize = 200;

/// Data-access layer over the recall database.
pub struct RecallStore {
    db: Database,
}

impl RecallStore {
    /// Opens the recall database, registering the vector extension first
    /// when compiled in.
    pub async fn open(path: impl AsRef<std::path::Path>) -> Result<Self, BobError> {
        #[cfg(feature = "vec")]
        register_vec_extension();
        let db = Database::open(path, StoreKind::Recall).await?;
        Ok(Self { db })
    }

    pub async fn open_in_memory() -> Result<Self, BobError> {
        #[cfg(feature = "vec")]
        register_vec_extension();
        let db = Database::open_in_memory(StoreKind::Recall).await?;
        Ok(Self { db })
    }

    /// The stored fingerprint for a source, if indexed.
    pub async fn fingerprint(&self, source: &str) -> Result<Option<String>, BobError> {
        let source = source.to_string();
        self.db
            .connection()
            .call(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT fingerprint FROM sources WHERE source = ?1")?;
                let fingerprint = stmt
                    .query_row(params![source], |row| row.get::<_, String>(0))
                    .map(Some)
                    .or_else(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => Ok(None),
                        other => Err(other),
                    })?;
                Ok(fingerprint)
            })
            .await
            .map_err(map_tr_err)
    }

    /// Every indexed source tag.
    pub async fn sources(&self) -> Result<Vec<String>, BobError> {
        self.db
            .connection()
            .call(move |conn| {
                let mut stmt = conn.prepare("SELECT source FROM sources ORDER BY source")?;
                let sources = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(sources)
            })
            .await
            .map_err(map_tr_err)
    }

    /// Atomically replaces a source's chunks: delete old chunks, embeddings
    /// and vec rows, insert fresh chunks, update the fingerprint.
    pub async fn replace_source(
        &self,
        source: &str,
        chunks: Vec<Chunk>,
        fingerprint: &str,
        now_ms: i64,
    ) -> Result<usize, BobError> {
        let source = source.to_string();
        let fingerprint = fingerprint.to_string();

        self.db
            .connection()
            .call(move |conn| {
                let tx = conn.transaction()?;

                let old_ids: Vec<i64> = {
                    let mut stmt = tx.prepare("SELECT id FROM chunks WHERE source = ?1")?;
                    stmt.query_map(params![source], |row| row.get(0))?
                        .collect::<Result<Vec<_>, _>>()?
                };
                for id in &old_ids {
                    tx.execute("DELETE FROM embeddings WHERE chunk_id = ?1", params![id])?;
                    #[cfg(feature = "vec")]
                    if vec_table_exists(&tx)? {
                        tx.execute("DELETE FROM chunks_vec WHERE rowid = ?1", params![id])?;
                    }
                }
                tx.execute("DELETE FROM chunks WHERE source = ?1", params![source])?;

                let inserted = chunks.len();
                for chunk in chunks {
                    let breadcrumbs = serde_json::to_string(&chunk.breadcrumbs)
                        .unwrap_or_else(|_| "[]".to_string());
                    let preview: String = chunk.content.chars().take(PREVIEW_CHARS).collect();
                    tx.execute(
                        "INSERT INTO chunks (bob_id, source, title, breadcrumbs, content, \
                         preview, line_start, line_end, token_count, created_at) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                        params![
                            BOB_ID,
                            source,
                            chunk.title,
                            breadcrumbs,
                            chunk.content,
                            preview,
                            chunk.line_start as i64,
                            chunk.line_end as i64,
                            chunk.token_count as i64,
                            now_ms
                        ],
                    )?;
                }

                tx.execute(
                    "INSERT INTO sources (source, fingerprint, updated_at) VALUES (?1, ?2, ?3) \
                     ON CONFLICT(source) DO UPDATE SET fingerprint = excluded.fingerprint, \
                     updated_at = excluded.updated_at",
                    params![source, fingerprint, now_ms],
                )?;

                tx.commit()?;
                Ok(inserted)
            })
            .await
            .map_err(map_tr_err)
    }

    /// Drops a source entirely (file deleted from the corpus).
    pub async fn delete_source(&self, source: &str) -> Result<(), BobError> {
        let source = source.to_string();
        self.db
            .connection()
            .call(move |conn| {
                let tx = conn.transaction()?;
                let old_ids: Vec<i64> = {
                    let mut stmt = tx.prepare("SELECT id FROM chunks WHERE source = ?1")?;
                    stmt.query_map(params![source], |row| row.get(0))?
                        .collect::<Result<Vec<_>, _>>()?
                };
                for id in &old_ids {
                    tx.execute("DELETE FROM embeddings WHERE chunk_id = ?1", params![id])?;
                    #[cfg(feature = "vec")]
                    if vec_table_exists(&tx)? {
                        tx.execute("DELETE FROM chunks_vec WHERE rowid = ?1", params![id])?;
                    }
                }
                tx.execute("DELETE FROM chunks WHERE source = ?1", params![source])?;
                tx.execute("DELETE FROM sources WHERE source = ?1", params![source])?;
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }

    /// Chunks that still need an embedding, oldest first.
    pub async fn chunks_missing_embeddings(
        &self,
        limit: u32,
    ) -> Result<Vec<(i64, String)>, BobError> {
        self.db
            .connection()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT c.id, c.content FROM chunks c \
                     LEFT JOIN embeddings e ON e.chunk_id = c.id \
                     WHERE e.chunk_id IS NULL ORDER BY c.id ASC LIMIT ?1",
                )?;
                let rows = stmt
                    .query_map(params![limit], |row| {
                        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(map_tr_err)
    }

    /// Stores one chunk's embedding BLOB.
    pub async fn put_embedding(&self, chunk_id: i64, vector: &[f32]) -> Result<(), BobError> {
        let blob = vec_to_blob(vector);
        self.db
            .connection()
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO embeddings (chunk_id, vector) VALUES (?1, ?2)",
                    params![chunk_id, blob],
                )?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }

    /// Every stored embedding, decoded.
    pub async fn embeddings_all(&self) -> Result<Vec<(i64, Vec<f32>)>, BobError> {
        self.db
            .connection()
            .call(move |conn| {
                let mut stmt = conn.prepare("SELECT chunk_id, vector FROM embeddings")?;
                let rows = stmt
                    .query_map([], |row| {
                        let id: i64 = row.get(0)?;
                        let blob: Vec<u8> = row.get(1)?;
                        Ok((id, blob_to_vec(&blob)))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(map_tr_err)
    }

    /// Full-text search over `(source, title, content)`.
    ///
    /// Returns `(chunk_id, score)` pairs, best first, where the score is
    /// the negated BM25 value (higher = better). The query is sanitized so
    /// user input cannot hit FTS syntax errors.
    pub async fn fts_search(
        &self,
        query: &str,
        limit: u32,
    ) -> Result<Vec<(i64, f64)>, BobError> {
        let sanitized = sanitize_fts_query(query);
        if sanitized.is_empty() {
            return Ok(Vec::new());
        }
        self.db
            .connection()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT rowid, bm25(chunks_fts) AS score FROM chunks_fts \
                     WHERE chunks_fts MATCH ?1 ORDER BY bm25(chunks_fts) LIMIT ?2",
                )?;
                let rows = stmt
                    .query_map(params![sanitized, limit], |row| {
                        let id: i64 = row.get(0)?;
                        let score: f64 = row.get(1)?;
                        Ok((id, -score))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(map_tr_err)
    }

    /// Batch metadata lookup, preserving the order of `ids`.
    pub async fn chunks_by_ids(&self, ids: &[i64]) -> Result<Vec<StoredChunk>, BobError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids = ids.to_vec();
        self.db
            .connection()
            .call(move |conn| {
                let placeholders: Vec<String> =
                    (1..=ids.len()).map(|i| format!("?{i}")).collect();
                let sql = format!(
                    "SELECT {CHUNK_COLUMNS} FROM chunks WHERE id IN ({})",
                    placeholders.join(", ")
                );
                let mut stmt = conn.prepare(&sql)?;
                let sql_params: Vec<&dyn rusqlite::types::ToSql> =
                    ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();
                let mut found = stmt
                    .query_map(sql_params.as_slice(), row_to_chunk)?
                    .collect::<Result<Vec<_>, _>>()?;

                // Preserve the caller's ranking order.
                found.sort_by_key(|c| {
                    ids.iter().position(|id| *id == c.id).unwrap_or(usize::MAX)
                });
                Ok(found)
            })
            .await
            .map_err(map_tr_err)
    }

    /// Count of chunks for a source (testing and status).
    pub async fn chunk_count(&self, source: &str) -> Result<i64, BobError> {
        let source = source.to_string();
        self.db
            .connection()
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM chunks WHERE source = ?1",
                    params![source],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await
            .map_err(map_tr_err)
    }
}

#[cfg(feature = "vec")]
impl RecallStore {
    /// Approximate-NN lookup via the vec sidecar.
    ///
    /// Creates the virtual table on first use and rebuilds it from the
    /// embeddings BLOBs whenever the row counts diverge. Returns
    /// `(chunk_id, cosine distance)` pairs; metadata resolution is the
    /// caller's second step.
    pub async fn knn(
        &self,
        query: &[f32],
        k: u32,
    ) -> Result<Vec<(i64, f64)>, BobError> {
        let dimensions = query.len();
        let query_json = serde_json::to_string(query).map_err(|e| BobError::Storage {
            source: Box::new(e),
        })?;

        self.db
            .connection()
            .call(move |conn| {
                ensure_vec_table(conn, dimensions)?;
                backfill_vec_if_stale(conn)?;

                let mut stmt = conn.prepare(
                    "SELECT rowid, distance FROM chunks_vec \
                     WHERE embedding MATCH vec_f32(?1) AND k = ?2 \
                     ORDER BY distance ASC",
                )?;
                let rows = stmt
                    .query_map(params![query_json, k], |row| {
                        Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(map_tr_err)
    }
}

#[cfg(feature = "vec")]
fn vec_table_exists(conn: &rusqlite::Connection) -> Result<bool, rusqlite::Error> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'chunks_vec'",
        [],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

#[cfg(feature = "vec")]
fn ensure_vec_table(
    conn: &rusqlite::Connection,
    dimensions: usize,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        &format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS chunks_vec USING vec0( \
             embedding float[{dimensions}] distance_metric=cosine)"
        ),
        [],
    )?;
    Ok(())
}

/// Rebuilds the vec cache from the authoritative BLOBs when counts diverge.
#[cfg(feature = "vec")]
fn backfill_vec_if_stale(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    let blob_count: i64 =
        conn.query_row("SELECT COUNT(*) FROM embeddings", [], |row| row.get(0))?;
    let vec_count: i64 =
        conn.query_row("SELECT COUNT(*) FROM chunks_vec", [], |row| row.get(0))?;
    if blob_count == vec_count {
        return Ok(());
    }

    conn.execute("DELETE FROM chunks_vec", [])?;
    let rows: Vec<(i64, Vec<u8>)> = {
        let mut stmt = conn.prepare("SELECT chunk_id, vector FROM embeddings")?;
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?
    };
    for (chunk_id, blob) in rows {
        let vector = blob_to_vec(&blob);
        let json = serde_json::to_string(&vector).unwrap_or_else(|_| "[]".to_string());
        conn.execute(
            "INSERT INTO chunks_vec (rowid, embedding) VALUES (?1, vec_f32(?2))",
            params![chunk_id, json],
        )?;
    }
    Ok(())
}

/// Strips FTS operator characters so raw user queries cannot produce
/// syntax errors.
fn sanitize_fts_query(query: &str) -> String {
    let cleaned: String = query
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' {
                c
            } else {
                ' '
            }
        })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn row_to_chunk(row: &rusqlite::Row) -> Result<StoredChunk, rusqlite::Error> {
    let breadcrumbs_raw: String = row.get(3)?;
    Ok(StoredChunk {
        id: row.get(0)?,
        source: row.get(1)?,
        title: row.get(2)?,
        breadcrumbs: serde_json::from_str(&breadcrumbs_raw).unwrap_or_default(),
        content: row.get(4)?,
        preview: row.get(5)?,
        line_start: row.get(6)?,
        line_end: row.get(7)?,
        token_count: row.get(8)?,
        created_at: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(title: &str, content: &str) -> Chunk {
        Chunk {
            title: title.to_string(),
            breadcrumbs: vec!["Root".to_string()],
            content: content.to_string(),
            line_start: 1,
            line_end: 3,
            token_count: crate::chunker::estimate_tokens(content),
        }
    }

    #[tokio::test]
    async fn replace_source_inserts_and_fingerprints() {
        let store = RecallStore::open_in_memory().await.unwrap();
        let inserted = store
            .replace_source("memory:user", vec![chunk("A", "likes koalas")], "fp-1", 1000)
            .await
            .unwrap();
        assert_eq!(inserted, 1);
        assert_eq!(store.fingerprint("memory:user").await.unwrap().as_deref(), Some("fp-1"));
        assert_eq!(store.chunk_count("memory:user").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn replace_source_is_atomic_swap() {
        let store = RecallStore::open_in_memory().await.unwrap();
        store
            .replace_source("memory:user", vec![chunk("A", "first version")], "fp-1", 1000)
            .await
            .unwrap();
        store
            .replace_source("memory:user", vec![chunk("A", "second version")], "fp-2", 2000)
            .await
            .unwrap();

        // The old content is gone from both the table and the FTS index.
        assert!(store.fts_search("first", 10).await.unwrap().is_empty());
        let hits = store.fts_search("second", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(store.fingerprint("memory:user").await.unwrap().as_deref(), Some("fp-2"));
    }

    #[tokio::test]
    async fn fts_scores_are_negated_bm25() {
        let store = RecallStore::open_in_memory().await.unwrap();
        store
            .replace_source(
                "s",
                vec![chunk("A", "koala koala koala"), chunk("B", "one koala here")],
                "fp",
                1000,
            )
            .await
            .unwrap();
        let hits = store.fts_search("koala", 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        // Best first, higher (negated) score first.
        assert!(hits[0].1 >= hits[1].1);
    }

    #[tokio::test]
    async fn fts_query_is_sanitized() {
        let store = RecallStore::open_in_memory().await.unwrap();
        store
            .replace_source("s", vec![chunk("A", "normal words")], "fp", 1000)
            .await
            .unwrap();
        // Raw operator soup must not error, just match nothing or sanitize.
        let hits = store.fts_search("\"normal* AND (words)", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(store.fts_search("!!! ???", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn embeddings_lifecycle() {
        let store = RecallStore::open_in_memory().await.unwrap();
        store
            .replace_source("s", vec![chunk("A", "alpha"), chunk("B", "beta")], "fp", 1000)
            .await
            .unwrap();

        let missing = store.chunks_missing_embeddings(10).await.unwrap();
        assert_eq!(missing.len(), 2);

        store.put_embedding(missing[0].0, &[1.0, 0.0]).await.unwrap();
        let missing = store.chunks_missing_embeddings(10).await.unwrap();
        assert_eq!(missing.len(), 1);

        store.put_embedding(missing[0].0, &[0.0, 1.0]).await.unwrap();
        let all = store.embeddings_all().await.unwrap();
        assert_eq!(all.len(), 2);

        // Reindexing the source drops the embeddings with the chunks.
        store
            .replace_source("s", vec![chunk("A", "alpha2")], "fp2", 2000)
            .await
            .unwrap();
        assert!(store.embeddings_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn chunks_by_ids_preserves_order() {
        let store = RecallStore::open_in_memory().await.unwrap();
        store
            .replace_source("s", vec![chunk("A", "one"), chunk("B", "two")], "fp", 1000)
            .await
            .unwrap();
        let reversed = store.chunks_by_ids(&[2, 1]).await.unwrap();
        assert_eq!(reversed.len(), 2);
        assert_eq!(reversed[0].id, 2);
        assert_eq!(reversed[1].id, 1);
        assert_eq!(reversed[1].breadcrumbs, vec!["Root"]);
    }

    #[tokio::test]
    async fn delete_source_removes_everything() {
        let store = RecallStore::open_in_memory().await.unwrap();
        store
            .replace_source("gone", vec![chunk("A", "doomed text")], "fp", 1000)
            .await
            .unwrap();
        let missing = store.chunks_missing_embeddings(10).await.unwrap();
        store.put_embedding(missing[0].0, &[1.0]).await.unwrap();

        store.delete_source("gone").await.unwrap();
        assert!(store.fingerprint("gone").await.unwrap().is_none());
        assert_eq!(store.chunk_count("gone").await.unwrap(), 0);
        assert!(store.embeddings_all().await.unwrap().is_empty());
        assert!(store.fts_search("doomed", 10).await.unwrap().is_empty());
    }

    #[cfg(feature = "vec")]
    #[tokio::test]
    async fn knn_returns_nearest_by_cosine() {
        let store = RecallStore::open_in_memory().await.unwrap();
        store
            .replace_source("s", vec![chunk("A", "x"), chunk("B", "y")], "fp", 1000)
            .await
            .unwrap();
        store.put_embedding(1, &[1.0, 0.0, 0.0]).await.unwrap();
        store.put_embedding(2, &[0.0, 1.0, 0.0]).await.unwrap();

        let hits = store.knn(&[0.9, 0.1, 0.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, 1, "closest vector first");
        assert!(hits[0].1 < hits[1].1);
    }

    #[test]
    fn sanitize_strips_operators() {
        assert_eq!(sanitize_fts_query("hello AND world*"), "hello AND world");
        assert_eq!(sanitize_fts_query("a-b \"c\""), "a b c");
        assert_eq!(sanitize_fts_query("!!!"), "");
    }
}
