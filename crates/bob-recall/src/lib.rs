// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Recall: hybrid search over the local markdown corpus.
//!
//! Content-addressed incremental indexing of markdown into heading-bounded
//! chunks, local embeddings, and lexical + vector retrieval fused with
//! reciprocal rank fusion.

pub mod chunker;
pub mod embedder;
pub mod indexer;
pub mod search;
pub mod store;

pub use chunker::{chunk_markdown, Chunk};
pub use embedder::{Embedder, UnavailableEmbedder, EMBEDDING_DIM};
pub use indexer::{IndexReport, RecallIndexer};
pub use search::{MatchType, RecallSearch, SearchHit, SearchMode};
pub use store::{RecallStore, StoredChunk};

#[cfg(feature = "onnx")]
pub use embedder::OnnxEmbedder;
