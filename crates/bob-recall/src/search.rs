// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hybrid retrieval: full-text, vector, and their RRF fusion.
//!
//! Both paths are best-effort: a failure in either is swallowed and the
//! other path's results are returned alone. Fusion uses Reciprocal Rank
//! Fusion with k = 60; each hit is tagged with which paths contributed.

use std::collections::HashMap;
use std::sync::Arc;

use strum::Display;
use tracing::warn;

use bob_core::BobError;

use crate::embedder::{cosine_similarity, Embedder};
use crate::store::{RecallStore, StoredChunk};

/// RRF constant per the literature.
const RRF_K: f32 = 60.0;

/// Candidate multiplier for the approximate-NN first pass.
#[cfg(feature = "vec")]
const VEC_CANDIDATE_FACTOR: u32 = 3;

/// Which retrieval paths to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Fts,
    Vector,
    Hybrid,
}

/// Which paths contributed to a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum MatchType {
    Fts,
    Vector,
    Hybrid,
}

/// One retrieval result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk: StoredChunk,
    pub score: f32,
    pub match_type: MatchType,
}

/// Retrieval front-end over the recall store.
pub struct RecallSearch {
    store: Arc<RecallStore>,
    embedder: Arc<dyn Embedder>,
}

impl RecallSearch {
    pub fn new(store: Arc<RecallStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    /// Runs a search in the requested mode, returning at most `k` hits.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        mode: SearchMode,
    ) -> Result<Vec<SearchHit>, BobError> {
        let fts = if mode != SearchMode::Vector {
            match self.store.fts_search(query, k as u32).await {
                Ok(hits) => hits,
                Err(e) => {
                    warn!(error = %e, "fts search failed, continuing without it");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let vector = if mode != SearchMode::Fts {
            match self.vector_search(query, k).await {
                Ok(hits) => hits,
                Err(e) => {
                    warn!(error = %e, "vector search failed, continuing without it");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let ranked: Vec<(i64, f32, MatchType)> = match (fts.is_empty(), vector.is_empty()) {
            (false, false) => fuse(&fts, &vector),
            (false, true) => fts
                .iter()
                .map(|(id, score)| (*id, *score as f32, MatchType::Fts))
                .collect(),
            (true, false) => vector
                .iter()
                .map(|(id, score)| (*id, *score, MatchType::Vector))
                .collect(),
            (true, true) => Vec::new(),
        };

        let top: Vec<(i64, f32, MatchType)> = ranked.into_iter().take(k).collect();
        let ids: Vec<i64> = top.iter().map(|(id, _, _)| *id).collect();
        let chunks = self.store.chunks_by_ids(&ids).await?;

        let meta: HashMap<i64, (f32, MatchType)> = top
            .iter()
            .map(|(id, score, match_type)| (*id, (*score, *match_type)))
            .collect();

        Ok(chunks
            .into_iter()
            .filter_map(|chunk| {
                let (score, match_type) = meta.get(&chunk.id).copied()?;
                Some(SearchHit {
                    chunk,
                    score,
                    match_type,
                })
            })
            .collect())
    }

    /// Vector path: approximate NN via the sidecar when available,
    /// brute-force cosine over the BLOBs otherwise. Scores are
    /// `1 − distance` (equivalently, cosine similarity), higher = better.
    async fn vector_search(&self, query: &str, k: usize) -> Result<Vec<(i64, f32)>, BobError> {
        let query_vector = self.embedder.embed(query)?;

        #[cfg(feature = "vec")]
        {
            let candidates = (k as u32).max(1) * VEC_CANDIDATE_FACTOR;
            match self.store.knn(&query_vector, candidates).await {
                Ok(hits) => {
                    return Ok(hits
                        .into_iter()
                        .map(|(id, distance)| (id, 1.0 - distance as f32))
                        .take(k)
                        .collect());
                }
                Err(e) => {
                    warn!(error = %e, "vec sidecar lookup failed, brute-forcing");
                }
            }
        }

        let mut scored: Vec<(i64, f32)> = self
            .store
            .embeddings_all()
            .await?
            .into_iter()
            .filter(|(_, v)| v.len() == query_vector.len())
            .map(|(id, v)| (id, cosine_similarity(&query_vector, &v)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }
}

/// Reciprocal Rank Fusion of the two ranked lists.
///
/// A candidate at rank `i` (0-based) in a list contributes
/// `1 / (k + i + 1)`; contributions sum across lists. Candidates seen in
/// both lists are tagged hybrid.
fn fuse(fts: &[(i64, f64)], vector: &[(i64, f32)]) -> Vec<(i64, f32, MatchType)> {
    let mut scores: HashMap<i64, f32> = HashMap::new();
    let mut in_fts: Vec<i64> = Vec::new();
    let mut in_vector: Vec<i64> = Vec::new();

    for (rank, (id, _)) in fts.iter().enumerate() {
        *scores.entry(*id).or_insert(0.0) += 1.0 / (RRF_K + rank as f32 + 1.0);
        in_fts.push(*id);
    }
    for (rank, (id, _)) in vector.iter().enumerate() {
        *scores.entry(*id).or_insert(0.0) += 1.0 / (RRF_K + rank as f32 + 1.0);
        in_vector.push(*id);
    }

    let mut fused: Vec<(i64, f32, MatchType)> = scores
        .into_iter()
        .map(|(id, score)| {
            let match_type = match (in_fts.contains(&id), in_vector.contains(&id)) {
                (true, true) => MatchType::Hybrid,
                (true, false) => MatchType::Fts,
                (false, true) => MatchType::Vector,
                (false, false) => unreachable!("id came from one of the lists"),
            };
            (id, score, match_type)
        })
        .collect();
    fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    fused
}
