// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Content-addressed incremental indexing.
//!
//! Each markdown file under the memory root maps to a source tag
//! (`memory:user`, `journal:2026/02-03`, `conversations:2026/02-03-claude`).
//! A SHA-256 fingerprint decides whether a source is reindexed; matching
//! fingerprints skip, everything else is an atomic replace. Embedding
//! generation runs as a separate pass over chunks without one, and a chunk
//! failing to embed never aborts the batch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use bob_core::BobError;

use crate::chunker::chunk_markdown;
use crate::embedder::Embedder;
use crate::store::RecallStore;

const EMBED_BATCH: u32 = 32;

/// What one `index_all` pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexReport {
    pub sources_indexed: usize,
    pub sources_skipped: usize,
    pub sources_removed: usize,
    pub chunks_embedded: usize,
    pub embed_failures: usize,
}

/// Incremental indexer over the markdown corpus.
pub struct RecallIndexer {
    store: Arc<RecallStore>,
    embedder: Arc<dyn Embedder>,
    memory_dir: PathBuf,
}

impl RecallIndexer {
    pub fn new(
        store: Arc<RecallStore>,
        embedder: Arc<dyn Embedder>,
        memory_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            embedder,
            memory_dir: memory_dir.into(),
        }
    }

    /// Walks the corpus, reindexes changed sources, drops vanished ones,
    /// then embeds chunks that lack a vector.
    pub async fn index_all(&self, now_ms: i64) -> Result<IndexReport, BobError> {
        let mut report = IndexReport::default();
        let files = collect_sources(&self.memory_dir);
        let mut seen: Vec<String> = Vec::with_capacity(files.len());

        for (source, path) in files {
            seen.push(source.clone());
            match self.index_file(&source, &path, now_ms).await {
                Ok(true) => report.sources_indexed += 1,
                Ok(false) => report.sources_skipped += 1,
                Err(e) => {
                    warn!(source = source.as_str(), error = %e, "source indexing failed");
                }
            }
        }

        // Sources whose files disappeared are dropped.
        for stored in self.store.sources().await? {
            if !seen.contains(&stored) {
                info!(source = stored.as_str(), "removing vanished source");
                self.store.delete_source(&stored).await?;
                report.sources_removed += 1;
            }
        }

        let (embedded, failures) = self.embed_missing().await?;
        report.chunks_embedded = embedded;
        report.embed_failures = failures;

        Ok(report)
    }

    /// Indexes one file. Returns whether anything changed.
    async fn index_file(
        &self,
        source: &str,
        path: &Path,
        now_ms: i64,
    ) -> Result<bool, BobError> {
        let content = std::fs::read_to_string(path).map_err(|e| BobError::Storage {
            source: Box::new(e),
        })?;
        let fingerprint = fingerprint_of(&content);

        if self.store.fingerprint(source).await?.as_deref() == Some(fingerprint.as_str()) {
            debug!(source, "fingerprint unchanged, skipping");
            return Ok(false);
        }

        let default_title = source.rsplit(['/', ':']).next().unwrap_or(source);
        let chunks = chunk_markdown(&content, default_title);
        let count = chunks.len();
        self.store
            .replace_source(source, chunks, &fingerprint, now_ms)
            .await?;
        info!(source, chunks = count, "source reindexed");
        Ok(true)
    }

    /// Embeds chunks missing a vector, in batches. Per-chunk failures are
    /// logged and skipped.
    async fn embed_missing(&self) -> Result<(usize, usize), BobError> {
        let mut embedded = 0usize;
        let mut failures = 0usize;

        loop {
            let missing = self.store.chunks_missing_embeddings(EMBED_BATCH).await?;
            if missing.is_empty() {
                break;
            }
            let mut progressed = false;
            for (chunk_id, content) in missing {
                match self.embedder.embed(&content) {
                    Ok(vector) => {
                        self.store.put_embedding(chunk_id, &vector).await?;
                        embedded += 1;
                        progressed = true;
                    }
                    Err(e) => {
                        warn!(chunk_id, error = %e, "embedding failed, skipping chunk");
                        failures += 1;
                    }
                }
            }
            if !progressed {
                // Every remaining chunk failed; stop rather than loop on them.
                break;
            }
        }

        Ok((embedded, failures))
    }
}

/// SHA-256 hex fingerprint of a source's content.
pub fn fingerprint_of(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Maps corpus files to `(source tag, path)` pairs.
///
/// Top-level memory files become `memory:<stem lowercased>`; files under
/// `journal/` and `conversations/` keep their relative path sans extension.
fn collect_sources(memory_dir: &Path) -> Vec<(String, PathBuf)> {
    let mut sources = Vec::new();

    for entry in read_dir_sorted(memory_dir) {
        if entry.is_file() && entry.extension().is_some_and(|e| e == "md") {
            if let Some(stem) = entry.file_stem().and_then(|s| s.to_str()) {
                sources.push((format!("memory:{}", stem.to_lowercase()), entry));
            }
        }
    }

    for subdir in ["journal", "conversations"] {
        let root = memory_dir.join(subdir);
        collect_tree(&root, &root, subdir, &mut sources);
    }

    sources
}

fn collect_tree(root: &Path, dir: &Path, prefix: &str, out: &mut Vec<(String, PathBuf)>) {
    for entry in read_dir_sorted(dir) {
        if entry.is_dir() {
            collect_tree(root, &entry, prefix, out);
        } else if entry.extension().is_some_and(|e| e == "md") {
            let Ok(rel) = entry.strip_prefix(root) else {
                continue;
            };
            let rel = rel.with_extension("");
            let tag = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            out.push((format!("{prefix}:{tag}"), entry));
        }
    }
}

fn read_dir_sorted(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut paths: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
    paths.sort();
    paths
}
